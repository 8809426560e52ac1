//! MQTT 3.1.1 control packet codec.
//!
//! Pure functions over byte slices: nothing here performs I/O or allocates.
//! Decoding borrows topics and payloads straight out of the receive buffer;
//! encoding writes into a caller-supplied buffer and fails with
//! [`EncodeError::BufferTooSmall`](super::EncodeError::BufferTooSmall) instead of truncating.
//!
//! ```rust
//! use libiot_mqtt::mqtt::packet::{self, Packet, Publish, QoS};
//!
//! let publish = Packet::Publish(Publish {
//!     topic: "esp32/pub",
//!     packet_id: Some(10),
//!     qos: QoS::AtLeastOnce,
//!     retain: false,
//!     dup: false,
//!     payload: b"hello",
//! });
//!
//! let mut buf = [0u8; 64];
//! let len = publish.encode(&mut buf).unwrap();
//!
//! let (decoded, consumed) = packet::decode(&buf[..len]).unwrap().unwrap();
//! assert_eq!(consumed, len);
//! assert_eq!(decoded, publish);
//! ```

use serde::Deserialize;

use super::error::{BufferTooSmall, DecodeError, EncodeError};
use super::options::{LastWill, Options, ProtocolVersion};

// MQTT Control Packet types (upper nibble of the fixed header)
/// Client request to connect to a server.
pub const CONNECT: u8 = 1;
/// Connect acknowledgment.
pub const CONNACK: u8 = 2;
/// Publish message.
pub const PUBLISH: u8 = 3;
/// Publish acknowledgment (QoS 1).
pub const PUBACK: u8 = 4;
/// Publish received (QoS 2, part 1).
pub const PUBREC: u8 = 5;
/// Publish release (QoS 2, part 2).
pub const PUBREL: u8 = 6;
/// Publish complete (QoS 2, part 3).
pub const PUBCOMP: u8 = 7;
/// Subscribe request.
pub const SUBSCRIBE: u8 = 8;
/// Subscribe acknowledgment.
pub const SUBACK: u8 = 9;
/// Unsubscribe request.
pub const UNSUBSCRIBE: u8 = 10;
/// Unsubscribe acknowledgment.
pub const UNSUBACK: u8 = 11;
/// Ping request.
pub const PINGREQ: u8 = 12;
/// Ping response.
pub const PINGRESP: u8 = 13;
/// Client is disconnecting.
pub const DISCONNECT: u8 = 14;

/// Largest value the remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// SUBACK return code for a rejected topic filter.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Quality of Service levels for MQTT messages.
///
/// ```rust
/// use libiot_mqtt::mqtt::QoS;
///
/// assert_eq!(QoS::AtMostOnce as u8, 0);
/// assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
/// assert!(QoS::try_from(3).is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "u8")]
pub enum QoS {
    /// **QoS 0**: At most once delivery. Fire and forget.
    AtMostOnce = 0,
    /// **QoS 1**: At least once delivery, acknowledged with PUBACK.
    AtLeastOnce = 1,
    /// **QoS 2**: Exactly once delivery, PUBREC/PUBREL/PUBCOMP handshake.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QoS {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "QoS{=u8}", *self as u8)
    }
}

/// The fixed header common to every control packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FixedHeader {
    /// Packet type and flags as sent on the wire.
    pub first_byte: u8,
    /// Length of the variable header plus payload.
    pub remaining_len: usize,
    /// Bytes taken by the fixed header itself (2..=5).
    pub header_len: usize,
}

impl FixedHeader {
    /// Parse a fixed header from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` ends before the remaining-length field
    /// does. Packet type and reserved flag bits are validated here so a bad
    /// stream is rejected before its body is waited for.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, DecodeError> {
        let Some(&first_byte) = buf.first() else {
            return Ok(None);
        };
        validate_first_byte(first_byte)?;

        let mut remaining_len = 0usize;
        let mut multiplier = 1usize;
        for (i, &byte) in buf[1..].iter().enumerate() {
            remaining_len += (byte as usize & 0x7F) * multiplier;
            if byte & 0x80 == 0 {
                return Ok(Some(Self {
                    first_byte,
                    remaining_len,
                    header_len: i + 2,
                }));
            }
            if i == 3 {
                return Err(DecodeError::MalformedLength);
            }
            multiplier *= 128;
        }
        Ok(None)
    }

    /// Control packet type.
    pub fn packet_type(&self) -> u8 {
        self.first_byte >> 4
    }

    /// Lower nibble flags.
    pub fn flags(&self) -> u8 {
        self.first_byte & 0x0F
    }

    /// Whole packet length, fixed header included.
    pub fn total_len(&self) -> usize {
        self.header_len + self.remaining_len
    }

    /// Reject a packet that can never fit a buffer of `capacity` bytes.
    pub fn ensure_fits(&self, capacity: usize) -> Result<(), DecodeError> {
        if self.total_len() > capacity {
            Err(DecodeError::PacketTooLarge)
        } else {
            Ok(())
        }
    }
}

fn validate_first_byte(first_byte: u8) -> Result<(), DecodeError> {
    let flags = first_byte & 0x0F;
    match first_byte >> 4 {
        0 | 15 => Err(DecodeError::UnknownPacketType(first_byte >> 4)),
        PUBLISH => {
            if (flags >> 1) & 0x03 == 3 {
                Err(DecodeError::InvalidQoS)
            } else {
                Ok(())
            }
        }
        PUBREL | SUBSCRIBE | UNSUBSCRIBE if flags == 0x02 => Ok(()),
        PUBREL | SUBSCRIBE | UNSUBSCRIBE => Err(DecodeError::InvalidFlags(first_byte)),
        _ if flags == 0 => Ok(()),
        _ => Err(DecodeError::InvalidFlags(first_byte)),
    }
}

/// CONNECT.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Connect<'a> {
    /// Protocol revision.
    pub protocol: ProtocolVersion,
    /// Discard previous session state.
    pub clean_session: bool,
    /// Keep-alive interval in seconds.
    pub keep_alive: u16,
    /// Client identifier.
    pub client_id: &'a str,
    /// Optional last will.
    pub will: Option<LastWill<'a>>,
    /// Optional user name.
    pub username: Option<&'a str>,
    /// Optional password (binary on the wire).
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    /// Build the CONNECT a session with `options` sends.
    pub fn from_options(options: &Options<'a>) -> Self {
        Self {
            protocol: options.protocol_version,
            clean_session: options.clean_session,
            keep_alive: options.keep_alive_seconds,
            client_id: options.client_id,
            will: options.will,
            username: options.username,
            // A password without a user name is a protocol error in 3.1.1.
            password: options
                .username
                .and(options.password)
                .map(|p| p.as_bytes()),
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

/// CONNACK.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ConnAck {
    /// The broker resumed a stored session.
    pub session_present: bool,
    /// 0 on success, 1..=5 for the standard refusals.
    pub return_code: u8,
}

/// PUBLISH.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Publish<'a> {
    /// Topic name.
    pub topic: &'a str,
    /// Present exactly when `qos` is above 0.
    pub packet_id: Option<u16>,
    /// Delivery guarantee.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Re-delivery flag.
    pub dup: bool,
    /// Application payload.
    pub payload: &'a [u8],
}

/// The part of a PUBLISH preceding its payload.
///
/// Used to start delivering a publish whose payload does not fit the
/// receive buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PublishHead<'a> {
    /// Topic name.
    pub topic: &'a str,
    /// Present exactly when `qos` is above 0.
    pub packet_id: Option<u16>,
    /// Delivery guarantee.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Re-delivery flag.
    pub dup: bool,
}

impl<'a> PublishHead<'a> {
    /// Decode the topic and packet id of a PUBLISH.
    ///
    /// `body` starts right after the fixed header and may be truncated;
    /// `Ok(None)` asks for more bytes. On success returns the head and the
    /// number of body bytes it occupies.
    pub fn decode(header: &FixedHeader, body: &'a [u8]) -> Result<Option<(Self, usize)>, DecodeError> {
        let flags = header.flags();
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };

        if body.len() < 2 {
            return Ok(None);
        }
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let head_len = 2 + topic_len + id_len;
        if head_len > header.remaining_len {
            return Err(DecodeError::MalformedPacket);
        }
        if body.len() < head_len {
            return Ok(None);
        }

        let mut reader = Reader::new(&body[..head_len]);
        let topic = reader.str()?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(reader.packet_id()?),
        };

        Ok(Some((
            Self {
                topic,
                packet_id,
                qos,
                retain: flags & 0x01 != 0,
                dup: flags & 0x08 != 0,
            },
            head_len,
        )))
    }
}

/// Topic filters of a SUBSCRIBE.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SubscribeTopics<'a> {
    /// Filters supplied by the caller for encoding.
    List(&'a [(&'a str, QoS)]),
    /// Validated wire bytes from a decoded packet.
    Encoded(&'a [u8]),
}

impl<'a> SubscribeTopics<'a> {
    /// Iterate `(filter, requested QoS)` pairs.
    pub fn iter(&self) -> SubscribeTopicsIter<'a> {
        SubscribeTopicsIter {
            topics: *self,
            index: 0,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            SubscribeTopics::List(list) => list.iter().map(|(f, _)| 2 + f.len() + 1).sum(),
            SubscribeTopics::Encoded(raw) => raw.len(),
        }
    }
}

/// Iterator over [`SubscribeTopics`].
#[derive(Debug, Clone)]
pub struct SubscribeTopicsIter<'a> {
    topics: SubscribeTopics<'a>,
    index: usize,
}

impl<'a> Iterator for SubscribeTopicsIter<'a> {
    type Item = (&'a str, QoS);

    fn next(&mut self) -> Option<Self::Item> {
        match self.topics {
            SubscribeTopics::List(list) => {
                let item = list.get(self.index).copied();
                self.index += 1;
                item
            }
            SubscribeTopics::Encoded(raw) => {
                let mut reader = Reader::new(raw.get(self.index..)?);
                if reader.is_empty() {
                    return None;
                }
                let filter = reader.str().ok()?;
                let qos = QoS::try_from(reader.u8().ok()?).ok()?;
                self.index += reader.position();
                Some((filter, qos))
            }
        }
    }
}

/// Topic filters of an UNSUBSCRIBE.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnsubscribeTopics<'a> {
    /// Filters supplied by the caller for encoding.
    List(&'a [&'a str]),
    /// Validated wire bytes from a decoded packet.
    Encoded(&'a [u8]),
}

impl<'a> UnsubscribeTopics<'a> {
    /// Iterate the filters.
    pub fn iter(&self) -> UnsubscribeTopicsIter<'a> {
        UnsubscribeTopicsIter {
            topics: *self,
            index: 0,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            UnsubscribeTopics::List(list) => list.iter().map(|f| 2 + f.len()).sum(),
            UnsubscribeTopics::Encoded(raw) => raw.len(),
        }
    }
}

/// Iterator over [`UnsubscribeTopics`].
#[derive(Debug, Clone)]
pub struct UnsubscribeTopicsIter<'a> {
    topics: UnsubscribeTopics<'a>,
    index: usize,
}

impl<'a> Iterator for UnsubscribeTopicsIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        match self.topics {
            UnsubscribeTopics::List(list) => {
                let item = list.get(self.index).copied();
                self.index += 1;
                item
            }
            UnsubscribeTopics::Encoded(raw) => {
                let mut reader = Reader::new(raw.get(self.index..)?);
                if reader.is_empty() {
                    return None;
                }
                let filter = reader.str().ok()?;
                self.index += reader.position();
                Some(filter)
            }
        }
    }
}

/// SUBSCRIBE.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Subscribe<'a> {
    /// Packet identifier echoed by SUBACK.
    pub packet_id: u16,
    /// Requested filters.
    pub topics: SubscribeTopics<'a>,
}

/// SUBACK.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SubAck<'a> {
    /// Identifier of the acknowledged SUBSCRIBE.
    pub packet_id: u16,
    /// One code per requested filter: granted QoS or [`SUBACK_FAILURE`].
    pub return_codes: &'a [u8],
}

/// UNSUBSCRIBE.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Unsubscribe<'a> {
    /// Packet identifier echoed by UNSUBACK.
    pub packet_id: u16,
    /// Filters to remove.
    pub topics: UnsubscribeTopics<'a>,
}

/// A decoded or to-be-encoded MQTT control packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Packet<'a> {
    /// CONNECT
    Connect(Connect<'a>),
    /// CONNACK
    ConnAck(ConnAck),
    /// PUBLISH
    Publish(Publish<'a>),
    /// PUBACK
    PubAck(u16),
    /// PUBREC
    PubRec(u16),
    /// PUBREL
    PubRel(u16),
    /// PUBCOMP
    PubComp(u16),
    /// SUBSCRIBE
    Subscribe(Subscribe<'a>),
    /// SUBACK
    SubAck(SubAck<'a>),
    /// UNSUBSCRIBE
    Unsubscribe(Unsubscribe<'a>),
    /// UNSUBACK
    UnsubAck(u16),
    /// PINGREQ
    PingReq,
    /// PINGRESP
    PingResp,
    /// DISCONNECT
    Disconnect,
}

impl<'a> Packet<'a> {
    /// Control packet type number.
    pub fn packet_type(&self) -> u8 {
        match self {
            Packet::Connect(_) => CONNECT,
            Packet::ConnAck(_) => CONNACK,
            Packet::Publish(_) => PUBLISH,
            Packet::PubAck(_) => PUBACK,
            Packet::PubRec(_) => PUBREC,
            Packet::PubRel(_) => PUBREL,
            Packet::PubComp(_) => PUBCOMP,
            Packet::Subscribe(_) => SUBSCRIBE,
            Packet::SubAck(_) => SUBACK,
            Packet::Unsubscribe(_) => UNSUBSCRIBE,
            Packet::UnsubAck(_) => UNSUBACK,
            Packet::PingReq => PINGREQ,
            Packet::PingResp => PINGRESP,
            Packet::Disconnect => DISCONNECT,
        }
    }

    fn first_byte(&self) -> u8 {
        let flags = match self {
            Packet::Publish(p) => {
                let mut flags = (p.qos as u8) << 1;
                if p.dup {
                    flags |= 0x08;
                }
                if p.retain {
                    flags |= 0x01;
                }
                flags
            }
            Packet::PubRel(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0x02,
            _ => 0,
        };
        (self.packet_type() << 4) | flags
    }

    fn remaining_len(&self) -> usize {
        match self {
            Packet::Connect(c) => {
                let mut len = 2 + c.protocol.protocol_name().len() + 1 + 1 + 2;
                len += 2 + c.client_id.len();
                if let Some(will) = &c.will {
                    len += 2 + will.topic.len() + 2 + will.message.len();
                }
                if let Some(username) = c.username {
                    len += 2 + username.len();
                }
                if let Some(password) = c.password {
                    len += 2 + password.len();
                }
                len
            }
            Packet::ConnAck(_) => 2,
            Packet::Publish(p) => {
                let id_len = if p.qos == QoS::AtMostOnce { 0 } else { 2 };
                2 + p.topic.len() + id_len + p.payload.len()
            }
            Packet::PubAck(_)
            | Packet::PubRec(_)
            | Packet::PubRel(_)
            | Packet::PubComp(_)
            | Packet::UnsubAck(_) => 2,
            Packet::Subscribe(s) => 2 + s.topics.encoded_len(),
            Packet::SubAck(s) => 2 + s.return_codes.len(),
            Packet::Unsubscribe(u) => 2 + u.topics.encoded_len(),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
        }
    }

    /// Number of bytes [`encode`](Self::encode) will write.
    pub fn encoded_len(&self) -> usize {
        let remaining = self.remaining_len();
        1 + remaining_length_size(remaining) + remaining
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// * [`EncodeError::BufferTooSmall`] - `buf` is too short, or the packet
    ///   exceeds the protocol's maximum length
    /// * [`EncodeError::MissingPacketId`] - QoS 1/2 PUBLISH with `packet_id: None`
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let remaining = self.remaining_len();
        if remaining > MAX_REMAINING_LENGTH {
            return Err(EncodeError::BufferTooSmall);
        }
        let id = match self {
            Packet::Publish(p) if p.qos != QoS::AtMostOnce => {
                Some(p.packet_id.ok_or(EncodeError::MissingPacketId)?)
            }
            _ => None,
        };

        let mut w = Writer::new(buf);
        w.u8(self.first_byte())?;
        encode_remaining_length(&mut w, remaining)?;

        match self {
            Packet::Connect(c) => {
                w.str(c.protocol.protocol_name())?;
                w.u8(c.protocol.level())?;
                w.u8(c.flags())?;
                w.u16(c.keep_alive)?;
                w.str(c.client_id)?;
                if let Some(will) = &c.will {
                    w.str(will.topic)?;
                    w.bytes(will.message.as_bytes())?;
                }
                if let Some(username) = c.username {
                    w.str(username)?;
                }
                if let Some(password) = c.password {
                    w.bytes(password)?;
                }
            }
            Packet::ConnAck(c) => {
                w.u8(c.session_present as u8)?;
                w.u8(c.return_code)?;
            }
            Packet::Publish(p) => {
                w.str(p.topic)?;
                if let Some(id) = id {
                    w.u16(id)?;
                }
                w.raw(p.payload)?;
            }
            Packet::PubAck(id)
            | Packet::PubRec(id)
            | Packet::PubRel(id)
            | Packet::PubComp(id)
            | Packet::UnsubAck(id) => w.u16(*id)?,
            Packet::Subscribe(s) => {
                w.u16(s.packet_id)?;
                match s.topics {
                    SubscribeTopics::List(list) => {
                        for (filter, qos) in list {
                            w.str(filter)?;
                            w.u8(*qos as u8)?;
                        }
                    }
                    SubscribeTopics::Encoded(raw) => w.raw(raw)?,
                }
            }
            Packet::SubAck(s) => {
                w.u16(s.packet_id)?;
                w.raw(s.return_codes)?;
            }
            Packet::Unsubscribe(u) => {
                w.u16(u.packet_id)?;
                match u.topics {
                    UnsubscribeTopics::List(list) => {
                        for filter in list {
                            w.str(filter)?;
                        }
                    }
                    UnsubscribeTopics::Encoded(raw) => w.raw(raw)?,
                }
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }

        Ok(w.position())
    }
}

/// Decode one packet from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only part of a packet, otherwise the
/// packet and the number of bytes it occupied. Nothing is consumed on error.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet<'_>, usize)>, DecodeError> {
    let Some(header) = FixedHeader::parse(buf)? else {
        return Ok(None);
    };
    let total = header.total_len();
    if buf.len() < total {
        return Ok(None);
    }
    let body = &buf[header.header_len..total];
    let packet = decode_body(&header, body)?;
    Ok(Some((packet, total)))
}

fn decode_body<'a>(header: &FixedHeader, body: &'a [u8]) -> Result<Packet<'a>, DecodeError> {
    let mut r = Reader::new(body);
    let packet = match header.packet_type() {
        CONNECT => Packet::Connect(decode_connect(&mut r)?),
        CONNACK => {
            let flags = r.u8()?;
            if flags & 0xFE != 0 {
                return Err(DecodeError::MalformedPacket);
            }
            Packet::ConnAck(ConnAck {
                session_present: flags & 0x01 != 0,
                return_code: r.u8()?,
            })
        }
        PUBLISH => {
            let Some((head, head_len)) = PublishHead::decode(header, body)? else {
                return Err(DecodeError::MalformedPacket);
            };
            return Ok(Packet::Publish(Publish {
                topic: head.topic,
                packet_id: head.packet_id,
                qos: head.qos,
                retain: head.retain,
                dup: head.dup,
                payload: &body[head_len..],
            }));
        }
        PUBACK => Packet::PubAck(r.packet_id()?),
        PUBREC => Packet::PubRec(r.packet_id()?),
        PUBREL => Packet::PubRel(r.packet_id()?),
        PUBCOMP => Packet::PubComp(r.packet_id()?),
        SUBSCRIBE => {
            let packet_id = r.packet_id()?;
            let raw = r.rest();
            let mut check = Reader::new(raw);
            if check.is_empty() {
                return Err(DecodeError::MalformedPacket);
            }
            while !check.is_empty() {
                check.str()?;
                let options = check.u8()?;
                if options & 0xFC != 0 {
                    return Err(DecodeError::MalformedPacket);
                }
                QoS::try_from(options)?;
            }
            Packet::Subscribe(Subscribe {
                packet_id,
                topics: SubscribeTopics::Encoded(raw),
            })
        }
        SUBACK => {
            let packet_id = r.packet_id()?;
            let return_codes = r.rest();
            if return_codes.is_empty()
                || return_codes
                    .iter()
                    .any(|&c| c > 2 && c != SUBACK_FAILURE)
            {
                return Err(DecodeError::MalformedPacket);
            }
            Packet::SubAck(SubAck {
                packet_id,
                return_codes,
            })
        }
        UNSUBSCRIBE => {
            let packet_id = r.packet_id()?;
            let raw = r.rest();
            let mut check = Reader::new(raw);
            if check.is_empty() {
                return Err(DecodeError::MalformedPacket);
            }
            while !check.is_empty() {
                check.str()?;
            }
            Packet::Unsubscribe(Unsubscribe {
                packet_id,
                topics: UnsubscribeTopics::Encoded(raw),
            })
        }
        UNSUBACK => Packet::UnsubAck(r.packet_id()?),
        PINGREQ => Packet::PingReq,
        PINGRESP => Packet::PingResp,
        DISCONNECT => Packet::Disconnect,
        other => return Err(DecodeError::UnknownPacketType(other)),
    };
    r.expect_end()?;
    Ok(packet)
}

fn decode_connect<'a>(r: &mut Reader<'a>) -> Result<Connect<'a>, DecodeError> {
    let name = r.str()?;
    let level = r.u8()?;
    let protocol = ProtocolVersion::from_wire(name, level).ok_or(DecodeError::MalformedPacket)?;
    let flags = r.u8()?;
    if flags & 0x01 != 0 {
        return Err(DecodeError::MalformedPacket);
    }
    let keep_alive = r.u16()?;
    let client_id = r.str()?;

    let will = if flags & 0x04 != 0 {
        let topic = r.str()?;
        let message = core::str::from_utf8(r.bytes()?).map_err(|_| DecodeError::InvalidUtf8)?;
        Some(LastWill {
            topic,
            message,
            qos: QoS::try_from((flags >> 3) & 0x03)?,
            retain: flags & 0x20 != 0,
        })
    } else {
        None
    };
    let username = if flags & 0x80 != 0 { Some(r.str()?) } else { None };
    let password = if flags & 0x40 != 0 { Some(r.bytes()?) } else { None };

    Ok(Connect {
        protocol,
        clean_session: flags & 0x02 != 0,
        keep_alive,
        client_id,
        will,
        username,
        password,
    })
}

/// Bytes needed to encode `len` as a remaining-length field.
pub fn remaining_length_size(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Encode the remaining length field for an MQTT packet.
///
/// Each byte carries seven bits of the value, least significant group
/// first; the top bit marks a continuation. At most four bytes.
fn encode_remaining_length(w: &mut Writer<'_>, mut len: usize) -> Result<(), BufferTooSmall> {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        w.u8(byte)?;
        if len == 0 {
            return Ok(());
        }
    }
}

struct Writer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Writer<'b> {
    fn new(buf: &'b mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn raw(&mut self, bytes: &[u8]) -> Result<(), BufferTooSmall> {
        let end = self.pos.checked_add(bytes.len()).ok_or(BufferTooSmall)?;
        let dst = self.buf.get_mut(self.pos..end).ok_or(BufferTooSmall)?;
        dst.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn u8(&mut self, value: u8) -> Result<(), BufferTooSmall> {
        self.raw(&[value])
    }

    fn u16(&mut self, value: u16) -> Result<(), BufferTooSmall> {
        self.raw(&value.to_be_bytes())
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<(), BufferTooSmall> {
        let len = u16::try_from(bytes.len()).map_err(|_| BufferTooSmall)?;
        self.u16(len)?;
        self.raw(bytes)
    }

    fn str(&mut self, s: &str) -> Result<(), BufferTooSmall> {
        self.bytes(s.as_bytes())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::MalformedPacket)?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::MalformedPacket)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn packet_id(&mut self) -> Result<u16, DecodeError> {
        match self.u16()? {
            0 => Err(DecodeError::MalformedPacket),
            id => Ok(id),
        }
    }

    fn bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn str(&mut self) -> Result<&'a str, DecodeError> {
        core::str::from_utf8(self.bytes()?).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }

    fn expect_end(&self) -> Result<(), DecodeError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DecodeError::MalformedPacket)
        }
    }
}
