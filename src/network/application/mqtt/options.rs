//! Connection configuration.

use serde::Deserialize;

use super::packet::QoS;

/// Default reactor poll timeout, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u32 = 500;
/// Default time allowed between CONNECT and CONNACK, in milliseconds.
pub const DEFAULT_CONNACK_TIMEOUT_MS: u32 = 5_000;
/// Default retry deadline for in-flight exchanges, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u32 = 10_000;

/// MQTT protocol revision announced in CONNECT.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Deserialize)]
pub enum ProtocolVersion {
    /// MQTT 3.1 (`MQIsdp`, level 3).
    #[serde(rename = "3.1")]
    V3_1,
    /// MQTT 3.1.1 (`MQTT`, level 4).
    #[default]
    #[serde(rename = "3.1.1")]
    V3_1_1,
}

impl ProtocolVersion {
    /// Protocol name carried in the CONNECT variable header.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "MQIsdp",
            ProtocolVersion::V3_1_1 => "MQTT",
        }
    }

    /// Protocol level byte.
    pub fn level(&self) -> u8 {
        match self {
            ProtocolVersion::V3_1 => 3,
            ProtocolVersion::V3_1_1 => 4,
        }
    }

    /// Match a name/level pair read off the wire.
    pub fn from_wire(name: &str, level: u8) -> Option<Self> {
        match (name, level) {
            ("MQIsdp", 3) => Some(ProtocolVersion::V3_1),
            ("MQTT", 4) => Some(ProtocolVersion::V3_1_1),
            _ => None,
        }
    }
}

/// Message the broker publishes on the client's behalf if it vanishes.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
pub struct LastWill<'a> {
    /// Topic the will is published to.
    pub topic: &'a str,
    /// Will payload.
    pub message: &'a str,
    /// QoS of the will publication.
    #[serde(default = "default_will_qos")]
    pub qos: QoS,
    /// Whether the broker retains the will.
    #[serde(default)]
    pub retain: bool,
}

fn default_will_qos() -> QoS {
    QoS::AtMostOnce
}

/// Configuration options for an MQTT session.
///
/// All strings are borrowed, typically from `'static` constants or from a
/// configuration blob kept alive by the application. Buffer sizes are not
/// part of the options; they are the `RX`/`TX` const parameters of
/// [`Client`](super::Client).
///
/// # Examples
///
/// ```rust
/// use libiot_mqtt::mqtt::{Options, ProtocolVersion};
///
/// let options = Options {
///     username: Some("ongkdrvv"),
///     password: Some("secret"),
///     ..Options::new("192.168.1.4:1883", "ESP32-Demo-Board")
/// };
///
/// assert_eq!(options.protocol_version, ProtocolVersion::V3_1_1);
/// assert_eq!(options.keep_alive_seconds, 60);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Options<'a> {
    /// Broker address handed to the connector, e.g. `"192.168.1.4:1883"`.
    pub broker: &'a str,

    /// The client identifier, must be unique within the broker.
    pub client_id: &'a str,

    /// Optional user name.
    #[serde(default, borrow)]
    pub username: Option<&'a str>,

    /// Optional password. Only sent together with a user name.
    #[serde(default, borrow)]
    pub password: Option<&'a str>,

    /// The keep-alive time interval in seconds. Zero disables keep-alive.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u16,

    /// Whether to start a clean session.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Protocol revision.
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Upper bound on how long one reactor iteration waits for input.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u32,

    /// How long to wait for CONNACK before giving up on the attempt.
    #[serde(default = "default_connack_timeout")]
    pub connack_timeout_ms: u32,

    /// After this long an unacknowledged outbound exchange is reported by
    /// [`Client::overdue`](super::Client::overdue).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u32,

    /// Optional last will.
    #[serde(default, borrow)]
    pub will: Option<LastWill<'a>>,
}

fn default_keep_alive() -> u16 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_poll_timeout() -> u32 {
    DEFAULT_POLL_TIMEOUT_MS
}

fn default_connack_timeout() -> u32 {
    DEFAULT_CONNACK_TIMEOUT_MS
}

fn default_retry_interval() -> u32 {
    DEFAULT_RETRY_INTERVAL_MS
}

impl<'a> Options<'a> {
    /// Options with every optional field at its default.
    pub fn new(broker: &'a str, client_id: &'a str) -> Self {
        Self {
            broker,
            client_id,
            username: None,
            password: None,
            keep_alive_seconds: default_keep_alive(),
            clean_session: default_clean_session(),
            protocol_version: ProtocolVersion::default(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            connack_timeout_ms: DEFAULT_CONNACK_TIMEOUT_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            will: None,
        }
    }

    /// Parse options from a JSON document.
    ///
    /// Strings are borrowed from `json`, so they must not contain escape
    /// sequences.
    ///
    /// ```rust
    /// use libiot_mqtt::mqtt::Options;
    ///
    /// let json = br#"{"broker": "10.0.0.2:1883", "client_id": "node-7", "keep_alive_seconds": 30}"#;
    /// let options = Options::from_json(json).unwrap();
    /// assert_eq!(options.client_id, "node-7");
    /// assert_eq!(options.keep_alive_seconds, 30);
    /// assert!(options.clean_session);
    /// ```
    pub fn from_json(json: &'a [u8]) -> Result<Self, serde_json_core::de::Error> {
        let (options, _) = serde_json_core::from_slice::<Options<'a>>(json)?;
        Ok(options)
    }

    /// Keep-alive interval in milliseconds, `None` when disabled.
    pub fn keep_alive_ms(&self) -> Option<u64> {
        match self.keep_alive_seconds {
            0 => None,
            s => Some(u64::from(s) * 1000),
        }
    }
}
