//! MQTT 3.1.1 session driver for embedded systems.
//!
//! This module implements the client side of MQTT 3.1.1 (and 3.1) for
//! devices with a few kilobytes of RAM. MQTT (Message Queuing Telemetry
//! Transport) is a lightweight publish-subscribe messaging protocol ideal for
//! IoT applications.
//!
//! # Layers
//!
//! - [`packet`]: byte-exact encoder/decoder for the control packets, no I/O
//! - `session`: the lifecycle state machine and QoS 1/2 bookkeeping
//! - [`Client`]: owns the transport and buffers and runs the reactor loop
//! - [`EventSink`]: how the application hears about connects, messages and
//!   acknowledgments
//!
//! # Key Features
//!
//! - Quality of Service (QoS) levels 0, 1, and 2 in both directions, with
//!   duplicate suppression for inbound QoS 2
//! - Clean and persistent sessions, last will, user name and password
//! - Keep-alive via PINGREQ/PINGRESP, evaluated on every reactor iteration
//! - Fixed-size buffers and tables: no allocation, no globals
//! - Inbound payloads larger than the receive buffer are streamed in chunks
//! - Transport agnostic: anything implementing [`Transport`](crate::network::Transport)
//!
//! # Errors
//!
//! Only transport failures ([`Error::Io`]) and undecodable input
//! ([`Error::Decode`]) close the connection. Everything else is rejected
//! locally and leaves the session as it was. Nothing is retried
//! automatically: not CONNECT, not unacknowledged publishes.

mod client;
mod error;
mod event;
mod exchange;
mod options;
pub mod packet;
mod session;

pub use client::Client;
pub use error::{BufferTooSmall, DecodeError, EncodeError, Error};
pub use event::{ConnectReturnCode, DisconnectReason, EventSink, Message};
pub use exchange::{Direction, ExchangeState, PendingExchange, MAX_INFLIGHT};
pub use options::{
    LastWill, Options, ProtocolVersion, DEFAULT_CONNACK_TIMEOUT_MS, DEFAULT_POLL_TIMEOUT_MS,
    DEFAULT_RETRY_INTERVAL_MS,
};
pub use packet::QoS;
pub use session::{State, Subscription, SubscriptionStatus, MAX_SUBSCRIPTIONS, MAX_TOPIC_LEN};
