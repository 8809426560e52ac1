//! A network abstraction layer for embedded systems
//!
//! The traits in this module describe the transport the MQTT session runs
//! over: a connector that opens a byte stream to the broker, and a
//! connection that can be read, written, polled for readability and closed.
//! Implement them on top of your TCP/TLS stack (smoltcp, lwIP, a modem AT
//! driver, `std::net`, ...).
//!

#![deny(unsafe_code)]

use core::sync::atomic::{AtomicBool, Ordering};

/// Common error types for network operations
pub mod error;

/// Application layer protocols.
pub mod application;

/// `std::net` backed transport for hosted targets.
#[cfg(feature = "std")]
pub mod tcp;

pub use error::Error;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Poll, Read, Transport, Write};
}

/// Read bytes from a connection.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection.
    ///
    /// Non-blocking transports report "no data yet" as an error that maps to
    /// [`Error::WouldBlock`]; `Ok(0)` means the peer closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Write bytes to a connection.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Tear a connection down.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// Result of waiting on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one byte (or end of stream) can be read without blocking.
    Readable,
    /// The timeout expired with nothing to read.
    Timeout,
}

/// Bounded wait for readability.
pub trait Poll {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Wait at most `timeout_ms` milliseconds for the connection to become
    /// readable. A timeout of zero checks without waiting.
    fn poll(&mut self, timeout_ms: u32) -> Result<Readiness, Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}

/// A pollable connection whose errors are expressed in this crate's
/// [`Error`] type. This is what the MQTT client drives.
pub trait Transport:
    Connection + Read<Error = Error> + Write<Error = Error> + Close<Error = Error> + Poll<Error = Error>
{
}

impl<T> Transport for T where
    T: Connection
        + Read<Error = Error>
        + Write<Error = Error>
        + Close<Error = Error>
        + Poll<Error = Error>
{
}

/// Signal that the network interface has an address bound.
///
/// The interface bring-up code (DHCP client, Wi-Fi association callback)
/// calls [`signal`](NetworkReady::signal) once an address is bound; the MQTT
/// client refuses to [`connect`](crate::mqtt::Client::connect) until then.
/// Safe to share as a `static` between an event callback and the control
/// loop.
///
/// ```rust
/// use libiot_mqtt::network::NetworkReady;
///
/// static NETIF_READY: NetworkReady = NetworkReady::new();
///
/// assert!(!NETIF_READY.is_ready());
/// // from the DHCP "bound" event handler:
/// NETIF_READY.signal();
/// assert!(NETIF_READY.is_ready());
/// ```
#[derive(Debug)]
pub struct NetworkReady {
    ready: AtomicBool,
}

impl NetworkReady {
    /// A signal that has not fired yet.
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the interface as up.
    pub fn signal(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Mark the interface as down again (link lost, lease expired).
    pub fn reset(&self) {
        self.ready.store(false, Ordering::Release);
    }

    /// Whether [`signal`](Self::signal) has been called since the last reset.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Default for NetworkReady {
    fn default() -> Self {
        Self::new()
    }
}
