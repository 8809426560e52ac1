//! MQTT 3.1.1 client for embedded systems.
//!
//! [`Client`] owns everything one broker connection needs: the connector,
//! the open transport, fixed receive/transmit buffers, the session state and
//! the application's [`EventSink`]. Nothing is allocated and nothing is
//! global, so several clients can coexist.
//!
//! The client is driven from a single control loop. The application calls
//! [`Client::poll`] repeatedly; each call waits at most
//! [`Options::poll_timeout_ms`] for input, processes every complete packet
//! and evaluates the keep-alive timers. Publishes and subscriptions are
//! issued between polls.
//!
//! # Examples
//!
//! ```rust,no_run
//! use libiot_mqtt::mqtt::{Client, EventSink, Message, Options, QoS};
//! use libiot_mqtt::network::NetworkReady;
//! # use libiot_mqtt::network::{Close, Connect, Connection, Error, Poll, Read, Readiness, Write};
//! # use libiot_mqtt::system::clock::Clock;
//! # struct Socket;
//! # impl Read for Socket { type Error = Error; fn read(&mut self, _: &mut [u8]) -> Result<usize, Error> { Err(Error::WouldBlock) } }
//! # impl Write for Socket { type Error = Error; fn write(&mut self, b: &[u8]) -> Result<usize, Error> { Ok(b.len()) } fn flush(&mut self) -> Result<(), Error> { Ok(()) } }
//! # impl Close for Socket { type Error = Error; fn close(self) -> Result<(), Error> { Ok(()) } }
//! # impl Poll for Socket { type Error = Error; fn poll(&mut self, _: u32) -> Result<Readiness, Error> { Ok(Readiness::Timeout) } }
//! # impl Connection for Socket {}
//! # struct Stack;
//! # impl Connect for Stack { type Connection = Socket; type Error = Error; fn connect(&mut self, _: &str) -> Result<Socket, Error> { Ok(Socket) } }
//! # struct Ticks;
//! # impl Clock for Ticks { fn now_ms(&self) -> u64 { 0 } }
//!
//! struct Printer;
//!
//! impl EventSink for Printer {
//!     fn on_message(&mut self, message: &Message<'_>) {
//!         let _ = (message.topic, message.payload);
//!     }
//! }
//!
//! static NETIF_READY: NetworkReady = NetworkReady::new();
//!
//! let options = Options {
//!     username: Some("ongkdrvv"),
//!     password: Some("secret"),
//!     ..Options::new("192.168.1.4:1883", "ESP32-Demo-Board")
//! };
//! let mut client: Client<'_, _, _, _, 1024, 1024> = Client::new(Stack, options, Ticks, Printer);
//!
//! NETIF_READY.signal();
//! client.connect(&NETIF_READY)?;
//! client.subscribe(&[("esp32/sub", QoS::AtMostOnce)])?;
//!
//! loop {
//!     client.poll()?;
//!     client.publish("esp32/pub", b"hello", QoS::AtMostOnce, false)?;
//! }
//! # Ok::<(), libiot_mqtt::mqtt::Error>(())
//! ```

use crate::network::error::Error as NetworkError;
use crate::network::{Connect, Transport};
use crate::system::clock::Clock;

use super::error::Error;
use super::event::{DisconnectReason, EventSink, Message};
use super::exchange::PendingExchange;
use super::options::Options;
use super::packet::{Connect as ConnectPacket, Packet, Publish, QoS, Subscribe, SubscribeTopics, Unsubscribe, UnsubscribeTopics};
use super::session::{Resend, Session, SessionEvent, State, Subscription, Tick, MAX_TOPIC_LEN};

mod reactor;

/// An inbound PUBLISH larger than the receive buffer, part way through.
#[derive(Debug)]
struct Stream {
    topic: heapless::String<MAX_TOPIC_LEN>,
    packet_id: Option<u16>,
    qos: QoS,
    retain: bool,
    dup: bool,
    deliver: bool,
    reply: Option<Packet<'static>>,
    offset: usize,
    total_len: usize,
}

impl Stream {
    fn remaining(&self) -> usize {
        self.total_len - self.offset
    }
}

/// Receive side: buffered bytes not yet decoded, plus any streamed publish.
#[derive(Debug)]
struct Inbound<const RX: usize> {
    buf: [u8; RX],
    len: usize,
    stream: Option<Stream>,
}

impl<const RX: usize> Inbound<RX> {
    fn new() -> Self {
        Self {
            buf: [0; RX],
            len: 0,
            stream: None,
        }
    }

    fn reset(&mut self) {
        self.len = 0;
        self.stream = None;
    }

    /// Drop the first `n` buffered bytes.
    fn consume(&mut self, n: usize) {
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
    }
}

/// Everything but the receive buffer, so packets borrowed from that buffer
/// can be dispatched while the rest of the client is mutated.
#[derive(Debug)]
struct Core<'a, C, K, E, const TX: usize> {
    options: Options<'a>,
    clock: K,
    sink: E,
    session: Session,
    link: Option<C>,
    tx: [u8; TX],
}

impl<'a, C, K, E, const TX: usize> Core<'a, C, K, E, TX>
where
    C: Transport,
    K: Clock,
    E: EventSink,
{
    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Encode `packet` into the transmit buffer.
    fn encode(&mut self, packet: &Packet<'_>) -> Result<usize, Error> {
        Ok(packet.encode(&mut self.tx)?)
    }

    /// Send the first `len` bytes of the transmit buffer.
    fn transmit(&mut self, len: usize) -> Result<(), Error> {
        let conn = self.link.as_mut().ok_or(NetworkError::NotOpen)?;
        write_all(conn, &self.tx[..len])?;
        let now = self.clock.now_ms();
        self.session.packet_sent(now);
        Ok(())
    }

    fn send(&mut self, packet: &Packet<'_>) -> Result<(), Error> {
        let len = self.encode(packet)?;
        self.transmit(len)
    }

    fn close_link(&mut self) {
        if let Some(conn) = self.link.take() {
            if let Err(e) = conn.close() {
                warn!("transport close failed: {:?}", e);
            }
        }
    }

    /// Run one complete packet through the session and act on the result.
    fn dispatch(&mut self, packet: &Packet<'_>) -> Result<(), Error> {
        let now = self.now();
        let step = self.session.on_packet(packet, now)?;

        if step.deliver {
            if let Packet::Publish(publish) = packet {
                debug!(
                    "PUBLISH received on {} id {:?} qos {:?} len {}",
                    publish.topic,
                    publish.packet_id,
                    publish.qos,
                    publish.payload.len()
                );
                self.sink.on_message(&Message {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos: publish.qos,
                    packet_id: publish.packet_id,
                    retain: publish.retain,
                    dup: publish.dup,
                    offset: 0,
                    total_len: publish.payload.len(),
                });
            }
        }
        if let Some(reply) = step.reply {
            self.send(&reply)?;
        }
        if let Some(event) = step.event {
            self.emit(event);
        }
        Ok(())
    }

    fn emit(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => self.sink.on_connected(),
            SessionEvent::ConnectFailed(code) => {
                self.close_link();
                self.sink.on_connect_failed(code);
            }
            SessionEvent::PublishAcked(id) => {
                debug!("publish {} acknowledged", id);
                self.sink.on_publish_acked(id);
            }
            SessionEvent::SubscribeAcked(id) => {
                info!("SUBACK {}", id);
                self.sink.on_subscribe_acked(id);
            }
            SessionEvent::UnsubscribeAcked(id) => {
                info!("UNSUBACK {}", id);
                self.sink.on_unsubscribe_acked(id);
            }
        }
    }
}

/// Write all of `buf`, retrying short writes.
///
/// A transport that accepts nothing, or reports `WouldBlock`, fails the
/// write: the transmit buffer is reused by the next packet.
fn write_all<C: Transport>(conn: &mut C, mut buf: &[u8]) -> Result<(), NetworkError> {
    while !buf.is_empty() {
        match conn.write(buf)? {
            0 => return Err(NetworkError::WriteError),
            n => buf = &buf[n..],
        }
    }
    conn.flush()
}

/// A synchronous MQTT client over one transport.
///
/// # Type Parameters
///
/// * `N` - The connector that opens the transport, see [`Connect`]
/// * `K` - The monotonic clock used for keep-alive and deadlines
/// * `E` - The application's [`EventSink`]
/// * `RX` - Receive buffer size in bytes. Packets that fit are delivered
///   whole; larger PUBLISH payloads are delivered in chunks.
/// * `TX` - Transmit buffer size in bytes, bounding the largest packet the
///   client can send.
///
/// # Lifecycle
///
/// ```text
/// Disconnected --connect()--> Connecting --CONNACK(0)--> Connected
///      ^                          |                          |
///      +------ CONNACK(!=0) ------+        disconnect()      |
///      +------ I/O or decode error, timeouts ---------- Disconnecting
/// ```
pub struct Client<'a, N: Connect, K, E, const RX: usize, const TX: usize> {
    network: N,
    inbound: Inbound<RX>,
    core: Core<'a, N::Connection, K, E, TX>,
}

impl<'a, N, K, E, const RX: usize, const TX: usize> Client<'a, N, K, E, RX, TX>
where
    N: Connect<Error = NetworkError>,
    N::Connection: Transport,
    K: Clock,
    E: EventSink,
{
    /// Create a disconnected client.
    ///
    /// # Arguments
    ///
    /// * `network` - Connector used by [`connect`](Self::connect) to open the transport
    /// * `options` - Connection configuration
    /// * `clock` - Monotonic millisecond clock
    /// * `sink` - Receiver of session events
    pub fn new(network: N, options: Options<'a>, clock: K, sink: E) -> Self {
        let session = Session::new(&options);
        Self {
            network,
            inbound: Inbound::new(),
            core: Core {
                options,
                clock,
                sink,
                session,
                link: None,
                tx: [0; TX],
            },
        }
    }

    /// Open the transport and send CONNECT.
    ///
    /// Returns as soon as CONNECT is written; the outcome arrives later
    /// through [`EventSink::on_connected`] or [`EventSink::on_connect_failed`]
    /// while [`poll`](Self::poll) runs. A failed attempt is never retried.
    ///
    /// # Arguments
    ///
    /// * `ready` - Network readiness signal; must have fired
    ///
    /// # Errors
    ///
    /// * [`Error::Precondition`] - Not `Disconnected`
    /// * [`Error::NetworkNotReady`] - `ready` has not been signalled
    /// * [`Error::Io`] - The connector failed or CONNECT could not be written
    /// * [`Error::BufferTooSmall`] - CONNECT does not fit the transmit buffer
    pub fn connect(&mut self, ready: &crate::network::NetworkReady) -> Result<(), Error> {
        self.core.session.require(State::Disconnected)?;
        if !ready.is_ready() {
            warn!("connect refused: network interface not ready");
            return Err(Error::NetworkNotReady);
        }

        let broker = self.core.options.broker;
        info!("connecting to {} as {}", broker, self.core.options.client_id);
        let connect = Packet::Connect(ConnectPacket::from_options(&self.core.options));
        let len = self.core.encode(&connect)?;

        let conn = self.network.connect(broker).inspect_err(|e| {
            error!("transport connect to {} failed: {:?}", broker, e);
        })?;
        self.core.link = Some(conn);
        self.inbound.reset();

        match self.core.transmit(len) {
            Ok(()) => {
                let now = self.core.now();
                self.core.session.connect_sent(now);
                Ok(())
            }
            Err(e) => {
                error!("sending CONNECT failed: {:?}", e);
                self.core.close_link();
                Err(e)
            }
        }
    }

    /// Send DISCONNECT and schedule the transport for closing.
    ///
    /// DISCONNECT is best-effort. The transport closes on the next
    /// [`poll`](Self::poll) or [`tick`](Self::tick), which also abandons all
    /// pending exchanges without completion events and reports
    /// [`DisconnectReason::Requested`].
    ///
    /// # Errors
    ///
    /// * [`Error::Precondition`] - Not `Connected`
    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.core.session.require(State::Connected)?;
        if let Err(e) = self.core.send(&Packet::Disconnect) {
            warn!("DISCONNECT not sent: {:?}", e);
        }
        self.core.session.disconnect_requested();
        Ok(())
    }

    /// Publish a message.
    ///
    /// QoS 0 is sent and forgotten. QoS 1 and 2 get a fresh packet id and
    /// complete with [`EventSink::on_publish_acked`] once the broker
    /// acknowledges.
    ///
    /// # Arguments
    ///
    /// * `topic` - Topic name, no wildcards
    /// * `payload` - Message payload
    /// * `qos` - Delivery guarantee
    /// * `retain` - Ask the broker to retain the message
    ///
    /// # Returns
    ///
    /// The packet id for QoS 1/2, `None` for QoS 0.
    ///
    /// # Errors
    ///
    /// * [`Error::Precondition`] - Not `Connected`
    /// * [`Error::InflightLimit`] - Too many unacknowledged exchanges
    /// * [`Error::BufferTooSmall`] - The packet does not fit the transmit buffer
    /// * [`Error::Io`] - The write failed; the connection has been torn down
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<Option<u16>, Error> {
        let packet_id = self.core.session.publish_id(qos)?;
        let len = self.core.encode(&Packet::Publish(Publish {
            topic,
            packet_id,
            qos,
            retain,
            dup: false,
            payload,
        }))?;
        if let Some(id) = packet_id {
            let now = self.core.now();
            self.core.session.track_publish(id, qos, now)?;
        }
        let sent = self.core.transmit(len);
        self.check(sent)?;
        info!("PUBLISH {} id {:?} qos {:?} len {}", topic, packet_id, qos, payload.len());
        Ok(packet_id)
    }

    /// Re-send an overdue outbound exchange with its original packet id.
    ///
    /// If PUBREC already arrived for `packet_id`, PUBREL is re-sent instead
    /// of the PUBLISH. The exchange's deadline is pushed out by
    /// [`Options::retry_interval_ms`]. Nothing is resent automatically; see
    /// [`overdue`](Self::overdue).
    ///
    /// # Arguments
    ///
    /// * `packet_id` - Id returned by [`publish`](Self::publish)
    /// * `topic`, `payload`, `retain` - The original message
    ///
    /// # Errors
    ///
    /// * [`Error::Precondition`] - Not `Connected`
    /// * [`Error::UnknownPacketId`] - No outbound exchange with that id
    /// * [`Error::BufferTooSmall`] - The packet does not fit the transmit buffer
    /// * [`Error::Io`] - The write failed; the connection has been torn down
    pub fn republish(&mut self, packet_id: u16, topic: &str, payload: &[u8], retain: bool) -> Result<(), Error> {
        let now = self.core.now();
        let packet = match self.core.session.resend(packet_id, now)? {
            Resend::Publish(qos) => Packet::Publish(Publish {
                topic,
                packet_id: Some(packet_id),
                qos,
                retain,
                dup: true,
                payload,
            }),
            Resend::PubRel => Packet::PubRel(packet_id),
        };
        info!("resending exchange {}", packet_id);
        let sent = self.core.send(&packet);
        self.check(sent)
    }

    /// Subscribe to one or more topic filters.
    ///
    /// [`EventSink::on_subscribe_acked`] fires when SUBACK arrives; the
    /// granted QoS per filter is then visible through
    /// [`subscriptions`](Self::subscriptions).
    ///
    /// # Arguments
    ///
    /// * `topics` - `(filter, maximum QoS)` pairs
    ///
    /// # Returns
    ///
    /// The SUBSCRIBE packet id.
    ///
    /// # Errors
    ///
    /// * [`Error::Precondition`] - Not `Connected`
    /// * [`Error::NoTopics`] - `topics` is empty
    /// * [`Error::InflightLimit`] - The subscription table is full
    /// * [`Error::BufferTooSmall`] - A filter or the packet is too long
    /// * [`Error::Io`] - The write failed; the connection has been torn down
    pub fn subscribe(&mut self, topics: &[(&str, QoS)]) -> Result<u16, Error> {
        let packet_id = self.core.session.request_id()?;
        let len = self.core.encode(&Packet::Subscribe(Subscribe {
            packet_id,
            topics: SubscribeTopics::List(topics),
        }))?;
        self.core.session.track_subscribe(packet_id, topics)?;
        let sent = self.core.transmit(len);
        self.check(sent)?;
        info!("SUBSCRIBE {} with {} filters", packet_id, topics.len());
        Ok(packet_id)
    }

    /// Unsubscribe from one or more topic filters.
    ///
    /// The filters leave [`subscriptions`](Self::subscriptions) when UNSUBACK
    /// arrives, together with [`EventSink::on_unsubscribe_acked`].
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&mut self, filters: &[&str]) -> Result<u16, Error> {
        let packet_id = self.core.session.request_id()?;
        let len = self.core.encode(&Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topics: UnsubscribeTopics::List(filters),
        }))?;
        self.core.session.track_unsubscribe(packet_id, filters)?;
        let sent = self.core.transmit(len);
        self.check(sent)?;
        info!("UNSUBSCRIBE {} with {} filters", packet_id, filters.len());
        Ok(packet_id)
    }

    /// Evaluate timers: keep-alive, CONNACK timeout and pending disconnect.
    ///
    /// [`poll`](Self::poll) calls this on every iteration; call it directly
    /// only when driving the client with
    /// [`on_bytes_received`](Self::on_bytes_received).
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] - PINGREQ could not be written, or the broker stopped
    ///   answering ([`NetworkError::Timeout`]); the connection has been torn down
    pub fn tick(&mut self) -> Result<(), Error> {
        let now = self.core.now();
        match self.core.session.tick(now) {
            Tick::Idle => Ok(()),
            Tick::SendPing => {
                debug!("PINGREQ");
                let sent = self.core.send(&Packet::PingReq);
                if sent.is_ok() {
                    self.core.session.ping_sent(now);
                }
                self.check(sent)
            }
            Tick::Expired(DisconnectReason::Requested) => {
                info!("disconnected on request");
                self.teardown(DisconnectReason::Requested);
                Ok(())
            }
            Tick::Expired(reason) => {
                error!("connection expired: {:?}", reason);
                self.teardown(reason);
                Err(Error::Io(NetworkError::Timeout))
            }
        }
    }

    /// Feed bytes received outside [`poll`](Self::poll).
    ///
    /// For stacks that push received data through a callback instead of
    /// being read. Every complete packet is processed before returning;
    /// partial packets are kept for the next call.
    ///
    /// # Errors
    ///
    /// * [`Error::Precondition`] - No connection is open
    /// * [`Error::Decode`] - The bytes do not form valid packets; the
    ///   connection has been torn down
    /// * [`Error::Io`] - An acknowledgment could not be written; the
    ///   connection has been torn down
    pub fn on_bytes_received(&mut self, mut bytes: &[u8]) -> Result<(), Error> {
        let state = self.core.session.state();
        if !matches!(state, State::Connecting | State::Connected) {
            return Err(Error::Precondition(state));
        }
        while !bytes.is_empty() && self.core.link.is_some() {
            let spare = &mut self.inbound.buf[self.inbound.len..];
            let n = spare.len().min(bytes.len());
            spare[..n].copy_from_slice(&bytes[..n]);
            self.inbound.len += n;
            bytes = &bytes[n..];

            let processed = self.process();
            self.check(processed)?;
        }
        Ok(())
    }

    /// Outbound exchanges whose retry deadline has passed.
    pub fn overdue(&self) -> impl Iterator<Item = &PendingExchange> {
        self.core.session.exchanges().overdue(self.core.now())
    }

    /// All pending QoS 1/2 exchanges.
    pub fn pending(&self) -> impl Iterator<Item = &PendingExchange> {
        self.core.session.exchanges().iter()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.core.session.state()
    }

    /// Whether CONNACK reported a resumed session.
    pub fn session_present(&self) -> bool {
        self.core.session.session_present()
    }

    /// Known topic filters and their SUBACK verdicts.
    pub fn subscriptions(&self) -> &[Subscription] {
        self.core.session.subscriptions()
    }

    /// The connection options.
    pub fn options(&self) -> &Options<'a> {
        &self.core.options
    }

    /// The event sink.
    pub fn sink(&self) -> &E {
        &self.core.sink
    }

    /// The event sink, mutably.
    pub fn sink_mut(&mut self) -> &mut E {
        &mut self.core.sink
    }

    /// Tear down after a fatal error and hand the error back.
    fn check<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        match result {
            Err(Error::Io(e)) => {
                error!("transport error: {:?}", e);
                self.teardown(DisconnectReason::Transport(e));
                Err(Error::Io(e))
            }
            Err(Error::Decode(e)) => {
                error!("decode error: {:?}", e);
                self.teardown(DisconnectReason::Decode(e));
                Err(Error::Decode(e))
            }
            other => other,
        }
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        let was_open = self.core.link.is_some();
        self.core.close_link();
        self.core.session.teardown();
        self.inbound.reset();
        if was_open {
            self.core.sink.on_disconnected(reason);
        }
    }
}

impl<'a, N, K, E, const RX: usize, const TX: usize> core::fmt::Debug for Client<'a, N, K, E, RX, TX>
where
    N: Connect,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.core.session.state())
            .field("buffered", &self.inbound.len)
            .field("streaming", &self.inbound.stream.is_some())
            .finish()
    }
}
