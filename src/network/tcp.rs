//! Hosted transport over `std::net::TcpStream`.
//!
//! Readability is polled with a read timeout plus `peek`, so the stream stays
//! in blocking mode and `read` after a `Readable` never stalls.

use super::error::Error;
use super::{Close, Connect, Connection, Poll, Read, Readiness, Write};
use std::io::{ErrorKind, Read as StdRead, Write as StdWrite};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Opens [`TcpTransport`]s to `host:port` addresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Connection = TcpTransport;
    type Error = Error;

    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error> {
        let stream = TcpStream::connect(remote).map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            ErrorKind::InvalidInput => Error::InvalidAddress,
            ErrorKind::TimedOut => Error::Timeout,
            _ => Error::NotOpen,
        })?;
        stream.set_nodelay(true).map_err(|_| Error::NotOpen)?;
        Ok(TcpTransport { stream })
    }
}

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap an already connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

fn map_read_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => Error::WouldBlock,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof => {
            Error::ConnectionClosed
        }
        _ => Error::ReadError,
    }
}

impl Read for TcpTransport {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream.read(buf).map_err(map_read_error)
    }
}

impl Write for TcpTransport {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf).map_err(|_| Error::WriteError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().map_err(|_| Error::WriteError)
    }
}

impl Poll for TcpTransport {
    type Error = Error;

    fn poll(&mut self, timeout_ms: u32) -> Result<Readiness, Self::Error> {
        // A zero read timeout means "block forever" to std.
        let timeout = Duration::from_millis(u64::from(timeout_ms.max(1)));
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|_| Error::ReadError)?;
        let mut peeked = [0u8; 1];
        match self.stream.peek(&mut peeked) {
            Ok(_) => Ok(Readiness::Readable),
            Err(e) => match map_read_error(e) {
                Error::WouldBlock => Ok(Readiness::Timeout),
                other => Err(other),
            },
        }
    }
}

impl Close for TcpTransport {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(_) => Err(Error::ConnectionClosed),
        }
    }
}

impl Connection for TcpTransport {}
