//! One reactor iteration: wait for input, drain it, run the timers.

use crate::network::error::Error as NetworkError;
use crate::network::{Connect, Poll, Read, Readiness, Transport};
use crate::system::clock::Clock;

use super::super::error::{DecodeError, Error};
use super::super::event::{EventSink, Message};
use super::super::packet::{self, FixedHeader, PublishHead};
use super::super::session::{State, Step};
use super::{Client, Stream};

impl<'a, N, K, E, const RX: usize, const TX: usize> Client<'a, N, K, E, RX, TX>
where
    N: Connect<Error = NetworkError>,
    N::Connection: Transport,
    K: Clock,
    E: EventSink,
{
    /// Run one iteration of the control loop.
    ///
    /// Waits up to [`Options::poll_timeout_ms`](super::super::Options::poll_timeout_ms)
    /// for the transport to become readable, reads and processes everything
    /// available, then calls [`tick`](Self::tick) whether or not anything
    /// arrived. Returns immediately when no connection is open.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] - Reading or writing failed, or a timer expired
    /// * [`Error::Decode`] - The broker sent an invalid packet
    ///
    /// In both cases the connection has already been torn down and
    /// [`EventSink::on_disconnected`] has fired. Call
    /// [`connect`](Self::connect) again to retry.
    pub fn poll(&mut self) -> Result<(), Error> {
        let received = match self.core.session.state() {
            State::Connecting | State::Connected => {
                let received = self.receive();
                self.check(received)
            }
            State::Disconnected | State::Disconnecting => Ok(()),
        };
        let ticked = self.tick();
        received.and(ticked)
    }

    fn receive(&mut self) -> Result<(), Error> {
        let mut timeout = self.core.options.poll_timeout_ms;
        loop {
            let Some(conn) = self.core.link.as_mut() else {
                return Ok(());
            };
            if conn.poll(timeout)? == Readiness::Timeout {
                return Ok(());
            }

            let spare = &mut self.inbound.buf[self.inbound.len..];
            let room = spare.len();
            if room == 0 {
                return Err(DecodeError::PacketTooLarge.into());
            }
            let n = match conn.read(spare) {
                Ok(0) => {
                    info!("connection closed by broker");
                    return Err(NetworkError::ConnectionClosed.into());
                }
                Ok(n) => n,
                Err(e) if e.is_would_block() => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            trace!("read {} bytes", n);
            self.inbound.len += n;
            self.process()?;

            // A short read drained the socket.
            if n < room {
                return Ok(());
            }
            timeout = 0;
        }
    }

    /// Process every complete packet in the receive buffer.
    ///
    /// A PUBLISH too large for the buffer switches to streaming once its
    /// topic and id are buffered. Any other packet that cannot fit is a
    /// [`DecodeError::PacketTooLarge`] as soon as its fixed header arrives.
    pub(super) fn process(&mut self) -> Result<(), Error> {
        let mut start = 0;
        let result = self.drain(&mut start);
        self.inbound.consume(start);
        if self.core.link.is_none() {
            self.inbound.reset();
        }
        result
    }

    fn drain(&mut self, start: &mut usize) -> Result<(), Error> {
        while self.core.link.is_some() {
            if self.inbound.stream.is_some() {
                if *start == self.inbound.len {
                    return Ok(());
                }
                *start += self.stream_chunk(*start)?;
                continue;
            }

            let buffered = &self.inbound.buf[*start..self.inbound.len];
            match packet::decode(buffered)? {
                Some((packet, used)) => {
                    self.core.dispatch(&packet)?;
                    *start += used;
                }
                None => {
                    // Only PUBLISH payloads can be streamed.
                    if let Some(header) = FixedHeader::parse(buffered)? {
                        if header.packet_type() != packet::PUBLISH {
                            header.ensure_fits(RX)?;
                        }
                    }
                    if *start > 0 || self.inbound.len < RX {
                        return Ok(());
                    }
                    *start += self.begin_stream()?;
                }
            }
        }
        Ok(())
    }

    /// Start streaming the PUBLISH that fills the receive buffer.
    ///
    /// Returns the number of header bytes consumed.
    fn begin_stream(&mut self) -> Result<usize, Error> {
        let buffered = &self.inbound.buf[..self.inbound.len];
        let header = FixedHeader::parse(buffered)?.ok_or(DecodeError::PacketTooLarge)?;
        if header.packet_type() != packet::PUBLISH {
            return Err(DecodeError::PacketTooLarge.into());
        }
        let body = &buffered[header.header_len..];
        let (head, head_len) = PublishHead::decode(&header, body)?.ok_or(DecodeError::PacketTooLarge)?;

        let mut topic = heapless::String::new();
        topic
            .push_str(head.topic)
            .map_err(|_| DecodeError::PacketTooLarge)?;
        let total_len = header.remaining_len - head_len;

        let step = if self.core.session.state() == State::Connected {
            let now = self.core.now();
            self.core.session.on_publish(head.packet_id, head.qos, now)
        } else {
            warn!("PUBLISH while {:?}, ignored", self.core.session.state());
            Step::default()
        };
        debug!(
            "streaming PUBLISH on {} id {:?} qos {:?} len {}",
            head.topic,
            head.packet_id,
            head.qos,
            total_len
        );

        self.inbound.stream = Some(Stream {
            topic,
            packet_id: head.packet_id,
            qos: head.qos,
            retain: head.retain,
            dup: head.dup,
            deliver: step.deliver,
            reply: step.reply,
            offset: 0,
            total_len,
        });
        Ok(header.header_len + head_len)
    }

    /// Deliver the buffered part of a streamed payload starting at `start`.
    ///
    /// Returns the number of bytes consumed. The acknowledgment goes out
    /// after the last byte.
    fn stream_chunk(&mut self, start: usize) -> Result<usize, Error> {
        let Some(stream) = self.inbound.stream.as_mut() else {
            return Ok(0);
        };
        let n = (self.inbound.len - start).min(stream.remaining());
        let chunk = &self.inbound.buf[start..start + n];

        if stream.deliver {
            self.core.sink.on_message(&Message {
                topic: stream.topic.as_str(),
                payload: chunk,
                qos: stream.qos,
                packet_id: stream.packet_id,
                retain: stream.retain,
                dup: stream.dup,
                offset: stream.offset,
                total_len: stream.total_len,
            });
        }
        stream.offset += n;

        if stream.remaining() == 0 {
            let reply = stream.reply;
            self.inbound.stream = None;
            trace!("streamed PUBLISH complete");
            if let Some(reply) = reply {
                self.core.send(&reply)?;
            }
        }
        Ok(n)
    }
}
