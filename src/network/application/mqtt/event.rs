//! Events the session reports to the application.

use crate::network::error::Error as NetworkError;

use super::error::DecodeError;
use super::packet::QoS;

/// A CONNACK return code other than "accepted".
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectReturnCode {
    /// 1: the broker does not support the requested protocol level.
    UnacceptableProtocolVersion,
    /// 2: the client identifier is not allowed.
    IdentifierRejected,
    /// 3: the MQTT service is unavailable.
    ServerUnavailable,
    /// 4: malformed user name or password.
    BadUserNameOrPassword,
    /// 5: the client is not authorized to connect.
    NotAuthorized,
    /// Any code outside 1..=5.
    Other(u8),
}

impl ConnectReturnCode {
    /// Map a non-zero CONNACK return code.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadUserNameOrPassword,
            5 => ConnectReturnCode::NotAuthorized,
            other => ConnectReturnCode::Other(other),
        }
    }

    /// The raw wire value.
    pub fn code(&self) -> u8 {
        match self {
            ConnectReturnCode::UnacceptableProtocolVersion => 1,
            ConnectReturnCode::IdentifierRejected => 2,
            ConnectReturnCode::ServerUnavailable => 3,
            ConnectReturnCode::BadUserNameOrPassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
            ConnectReturnCode::Other(code) => *code,
        }
    }
}

/// Why an established or pending connection went away.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DisconnectReason {
    /// The application called `disconnect()`.
    Requested,
    /// Reading from or writing to the transport failed.
    Transport(NetworkError),
    /// The broker sent bytes that do not decode.
    Decode(DecodeError),
    /// No PINGRESP within one keep-alive interval of a PINGREQ.
    KeepAliveTimeout,
    /// No CONNACK within the configured timeout.
    ConnackTimeout,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectReturnCode {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ConnectReturnCode({=u8})", self.code())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DisconnectReason {
    fn format(&self, f: defmt::Formatter) {
        match self {
            DisconnectReason::Requested => defmt::write!(f, "Requested"),
            DisconnectReason::Transport(e) => defmt::write!(f, "Transport({})", e),
            DisconnectReason::Decode(e) => defmt::write!(f, "Decode({})", e),
            DisconnectReason::KeepAliveTimeout => defmt::write!(f, "KeepAliveTimeout"),
            DisconnectReason::ConnackTimeout => defmt::write!(f, "ConnackTimeout"),
        }
    }
}

/// An application message received from the broker.
///
/// A PUBLISH that fits the receive buffer arrives as one `Message` with
/// `offset == 0` and `payload.len() == total_len`. A larger one arrives as a
/// run of messages sharing topic and id, with `offset` advancing until
/// [`is_complete`](Self::is_complete) holds.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Message<'a> {
    /// Topic the message was published to.
    pub topic: &'a str,
    /// This chunk of the payload.
    pub payload: &'a [u8],
    /// Delivery QoS.
    pub qos: QoS,
    /// Packet identifier, `None` for QoS 0.
    pub packet_id: Option<u16>,
    /// Retain flag.
    pub retain: bool,
    /// The broker flagged this as a re-delivery.
    pub dup: bool,
    /// Position of `payload` within the whole message payload.
    pub offset: usize,
    /// Length of the whole message payload.
    pub total_len: usize,
}

impl Message<'_> {
    /// Whether this chunk ends the payload.
    pub fn is_complete(&self) -> bool {
        self.offset + self.payload.len() >= self.total_len
    }
}

/// Receiver of session events.
///
/// Every method has an empty default body, so an implementation only needs to
/// override the events it cares about. Callbacks run on the thread driving
/// [`Client::poll`](super::Client::poll) and must not block.
///
/// ```rust
/// use libiot_mqtt::mqtt::{EventSink, Message};
///
/// #[derive(Default)]
/// struct Counter {
///     messages: usize,
/// }
///
/// impl EventSink for Counter {
///     fn on_message(&mut self, message: &Message<'_>) {
///         if message.is_complete() {
///             self.messages += 1;
///         }
///     }
/// }
/// ```
pub trait EventSink {
    /// CONNACK accepted the connection.
    fn on_connected(&mut self) {}

    /// CONNACK refused the connection. The session is back to
    /// `Disconnected`; nothing is retried.
    fn on_connect_failed(&mut self, _code: ConnectReturnCode) {}

    /// The connection was torn down. Pending exchanges were abandoned and
    /// their outcome is unknown.
    fn on_disconnected(&mut self, _reason: DisconnectReason) {}

    /// An inbound PUBLISH, or a chunk of one.
    fn on_message(&mut self, _message: &Message<'_>) {}

    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) completed an outbound publish.
    fn on_publish_acked(&mut self, _packet_id: u16) {}

    /// SUBACK arrived for a SUBSCRIBE.
    fn on_subscribe_acked(&mut self, _packet_id: u16) {}

    /// UNSUBACK arrived for an UNSUBSCRIBE.
    fn on_unsubscribe_acked(&mut self, _packet_id: u16) {}
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn on_connected(&mut self) {
        (**self).on_connected()
    }

    fn on_connect_failed(&mut self, code: ConnectReturnCode) {
        (**self).on_connect_failed(code)
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        (**self).on_disconnected(reason)
    }

    fn on_message(&mut self, message: &Message<'_>) {
        (**self).on_message(message)
    }

    fn on_publish_acked(&mut self, packet_id: u16) {
        (**self).on_publish_acked(packet_id)
    }

    fn on_subscribe_acked(&mut self, packet_id: u16) {
        (**self).on_subscribe_acked(packet_id)
    }

    fn on_unsubscribe_acked(&mut self, packet_id: u16) {
        (**self).on_unsubscribe_acked(packet_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_mapping() {
        for code in 1..=5u8 {
            assert_eq!(ConnectReturnCode::from_code(code).code(), code);
        }
        assert_eq!(ConnectReturnCode::from_code(5), ConnectReturnCode::NotAuthorized);
        assert_eq!(ConnectReturnCode::from_code(42), ConnectReturnCode::Other(42));
    }

    #[test]
    fn test_message_completion() {
        let mut message = Message {
            topic: "t",
            payload: b"abcd",
            qos: QoS::AtMostOnce,
            packet_id: None,
            retain: false,
            dup: false,
            offset: 0,
            total_len: 10,
        };
        assert!(!message.is_complete());
        message.offset = 6;
        assert!(message.is_complete());
    }
}
