//! Error types for the MQTT session.

use crate::network::error::Error as NetworkError;

use super::session::State;

/// Why an inbound byte sequence could not be decoded.
///
/// Any of these leaves the stream framing unreliable, so the session tears
/// the connection down when one is reported.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecodeError {
    /// The remaining-length field uses more than four bytes.
    MalformedLength,
    /// Packet type 0 or 15.
    UnknownPacketType(u8),
    /// Reserved fixed-header flag bits carry the wrong value.
    InvalidFlags(u8),
    /// QoS bits set to 3.
    InvalidQoS,
    /// The body is shorter or longer than its fields require.
    MalformedPacket,
    /// A string field is not valid UTF-8.
    InvalidUtf8,
    /// The packet's declared length exceeds the receive buffer.
    PacketTooLarge,
    /// A packet only a broker may receive (CONNECT, SUBSCRIBE, ...).
    UnexpectedPacket(u8),
}

/// The caller-supplied buffer cannot hold the encoded packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct BufferTooSmall;

/// Why a packet could not be encoded.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EncodeError {
    /// The packet does not fit the output buffer or exceeds the maximum
    /// remaining length.
    BufferTooSmall,
    /// A QoS 1/2 PUBLISH without a packet identifier.
    MissingPacketId,
}

impl From<BufferTooSmall> for EncodeError {
    fn from(_: BufferTooSmall) -> Self {
        EncodeError::BufferTooSmall
    }
}

/// Errors reported by the MQTT session.
///
/// Only [`Error::Io`] and [`Error::Decode`] tear the connection down; every
/// other variant is a local rejection that leaves the session untouched.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The transport failed.
    Io(NetworkError),
    /// A malformed inbound packet.
    Decode(DecodeError),
    /// The operation is not valid in the current lifecycle state.
    Precondition(State),
    /// `connect` was called before the network interface signalled ready.
    NetworkNotReady,
    /// An acknowledgment that matches nothing pending. Logged and ignored by
    /// the session; surfaced only from unit-level APIs.
    ProtocolAnomaly(u16),
    /// Topic, payload or packet does not fit the fixed buffers.
    BufferTooSmall,
    /// The exchange or subscription table is full.
    InflightLimit,
    /// `republish` was given an id with no pending outbound exchange.
    UnknownPacketId(u16),
    /// SUBSCRIBE or UNSUBSCRIBE without a single topic filter.
    NoTopics,
    /// A QoS 1/2 PUBLISH was handed to the encoder without a packet id.
    MissingPacketId,
}

impl Error {
    /// Whether the session must drop the connection after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Decode(_))
    }

    /// Whether the call was refused because its preconditions did not hold:
    /// wrong lifecycle state or network not ready.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_) | Error::NetworkNotReady)
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::Io(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<BufferTooSmall> for Error {
    fn from(_: BufferTooSmall) -> Self {
        Error::BufferTooSmall
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::BufferTooSmall => Error::BufferTooSmall,
            EncodeError::MissingPacketId => Error::MissingPacketId,
        }
    }
}

impl core::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EncodeError::BufferTooSmall => f.write_str("buffer too small"),
            EncodeError::MissingPacketId => f.write_str("QoS 1/2 PUBLISH without packet id"),
        }
    }
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::MalformedLength => f.write_str("malformed remaining length"),
            DecodeError::UnknownPacketType(t) => write!(f, "unknown packet type {}", t),
            DecodeError::InvalidFlags(b) => write!(f, "invalid fixed header flags {:#04x}", b),
            DecodeError::InvalidQoS => f.write_str("invalid QoS"),
            DecodeError::MalformedPacket => f.write_str("malformed packet"),
            DecodeError::InvalidUtf8 => f.write_str("invalid UTF-8 string"),
            DecodeError::PacketTooLarge => f.write_str("packet larger than receive buffer"),
            DecodeError::UnexpectedPacket(t) => write!(f, "unexpected packet type {}", t),
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "transport error: {}", e),
            Error::Decode(e) => write!(f, "decode error: {}", e),
            Error::Precondition(state) => write!(f, "not allowed while {:?}", state),
            Error::NetworkNotReady => f.write_str("network interface not ready"),
            Error::ProtocolAnomaly(id) => write!(f, "unexpected acknowledgment for id {}", id),
            Error::BufferTooSmall => f.write_str("buffer too small"),
            Error::InflightLimit => f.write_str("in-flight table full"),
            Error::UnknownPacketId(id) => write!(f, "no pending exchange with id {}", id),
            Error::NoTopics => f.write_str("empty topic filter list"),
            Error::MissingPacketId => f.write_str("QoS 1/2 PUBLISH without packet id"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for DecodeError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            DecodeError::MalformedLength => defmt::write!(f, "MalformedLength"),
            DecodeError::UnknownPacketType(t) => defmt::write!(f, "UnknownPacketType({=u8})", t),
            DecodeError::InvalidFlags(b) => defmt::write!(f, "InvalidFlags({=u8:#x})", b),
            DecodeError::InvalidQoS => defmt::write!(f, "InvalidQoS"),
            DecodeError::MalformedPacket => defmt::write!(f, "MalformedPacket"),
            DecodeError::InvalidUtf8 => defmt::write!(f, "InvalidUtf8"),
            DecodeError::PacketTooLarge => defmt::write!(f, "PacketTooLarge"),
            DecodeError::UnexpectedPacket(t) => defmt::write!(f, "UnexpectedPacket({=u8})", t),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EncodeError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            EncodeError::BufferTooSmall => defmt::write!(f, "BufferTooSmall"),
            EncodeError::MissingPacketId => defmt::write!(f, "MissingPacketId"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Io(e) => defmt::write!(f, "Io({})", e),
            Error::Decode(e) => defmt::write!(f, "Decode({})", e),
            Error::Precondition(s) => defmt::write!(f, "Precondition({})", s),
            Error::NetworkNotReady => defmt::write!(f, "NetworkNotReady"),
            Error::ProtocolAnomaly(id) => defmt::write!(f, "ProtocolAnomaly({=u16})", id),
            Error::BufferTooSmall => defmt::write!(f, "BufferTooSmall"),
            Error::InflightLimit => defmt::write!(f, "InflightLimit"),
            Error::UnknownPacketId(id) => defmt::write!(f, "UnknownPacketId({=u16})", id),
            Error::NoTopics => defmt::write!(f, "NoTopics"),
            Error::MissingPacketId => defmt::write!(f, "MissingPacketId"),
        }
    }
}
