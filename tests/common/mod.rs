#![allow(dead_code)]

//! Scripted transport, manual clock and recording sink shared by the
//! integration tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use libiot_mqtt::mqtt::packet::{self, ConnAck, Packet};
use libiot_mqtt::mqtt::{
    Client, ConnectReturnCode, DisconnectReason, EventSink, Message, Options, QoS,
};
use libiot_mqtt::network::error::Error;
use libiot_mqtt::network::{Close, Connect, Connection, NetworkReady, Poll, Read, Readiness, Write};
use libiot_mqtt::system::clock::Clock;

/// One scripted outcome of a `read` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
    Fail(Error),
}

/// Both ends of the mock wire, shared between the test and the client.
#[derive(Debug, Default)]
pub struct Wire {
    pub inbound: VecDeque<Chunk>,
    pub written: Vec<u8>,
    pub open: bool,
    pub connects: usize,
    pub closes: usize,
    pub fail_connect: Option<Error>,
    pub fail_write: Option<Error>,
    pub max_read: Option<usize>,
    pub poll_timeouts: Vec<u32>,
}

pub type SharedWire = Rc<RefCell<Wire>>;

#[derive(Debug)]
pub struct MockConnection {
    wire: SharedWire,
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut wire = self.wire.borrow_mut();
        if !wire.open {
            return Err(Error::NotOpen);
        }
        let max_read = wire.max_read.unwrap_or(usize::MAX);
        match wire.inbound.pop_front() {
            None | Some(Chunk::WouldBlock) => Err(Error::WouldBlock),
            Some(Chunk::Eof) => Ok(0),
            Some(Chunk::Fail(e)) => Err(e),
            Some(Chunk::Data(mut data)) => {
                let len = buf.len().min(data.len()).min(max_read);
                buf[..len].copy_from_slice(&data[..len]);
                if len < data.len() {
                    let rest = data.split_off(len);
                    wire.inbound.push_front(Chunk::Data(rest));
                }
                Ok(len)
            }
        }
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut wire = self.wire.borrow_mut();
        if !wire.open {
            return Err(Error::NotOpen);
        }
        if let Some(e) = wire.fail_write {
            return Err(e);
        }
        wire.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Poll for MockConnection {
    type Error = Error;

    fn poll(&mut self, timeout_ms: u32) -> Result<Readiness, Self::Error> {
        let mut wire = self.wire.borrow_mut();
        wire.poll_timeouts.push(timeout_ms);
        if wire.inbound.is_empty() {
            Ok(Readiness::Timeout)
        } else {
            Ok(Readiness::Readable)
        }
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        let mut wire = self.wire.borrow_mut();
        wire.open = false;
        wire.closes += 1;
        Ok(())
    }
}

impl Connection for MockConnection {}

#[derive(Debug)]
pub struct MockNetwork {
    wire: SharedWire,
}

impl Connect for MockNetwork {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, _remote: &str) -> Result<Self::Connection, Self::Error> {
        let mut wire = self.wire.borrow_mut();
        if let Some(e) = wire.fail_connect {
            return Err(e);
        }
        wire.open = true;
        wire.connects += 1;
        Ok(MockConnection {
            wire: self.wire.clone(),
        })
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Owned copy of a sink callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    ConnectFailed(ConnectReturnCode),
    Disconnected(DisconnectReason),
    Message {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        packet_id: Option<u16>,
        offset: usize,
        total_len: usize,
    },
    PublishAcked(u16),
    SubscribeAcked(u16),
    UnsubscribeAcked(u16),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<Event>,
}

impl EventSink for RecordingSink {
    fn on_connected(&mut self) {
        self.events.push(Event::Connected);
    }

    fn on_connect_failed(&mut self, code: ConnectReturnCode) {
        self.events.push(Event::ConnectFailed(code));
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.events.push(Event::Disconnected(reason));
    }

    fn on_message(&mut self, message: &Message<'_>) {
        self.events.push(Event::Message {
            topic: message.topic.to_string(),
            payload: message.payload.to_vec(),
            qos: message.qos,
            packet_id: message.packet_id,
            offset: message.offset,
            total_len: message.total_len,
        });
    }

    fn on_publish_acked(&mut self, packet_id: u16) {
        self.events.push(Event::PublishAcked(packet_id));
    }

    fn on_subscribe_acked(&mut self, packet_id: u16) {
        self.events.push(Event::SubscribeAcked(packet_id));
    }

    fn on_unsubscribe_acked(&mut self, packet_id: u16) {
        self.events.push(Event::UnsubscribeAcked(packet_id));
    }
}

pub const TX: usize = 256;

pub type TestClient<const RX: usize> =
    Client<'static, MockNetwork, ManualClock, RecordingSink, RX, TX>;

/// Test-side handles on the client's wire and clock.
#[derive(Debug)]
pub struct Harness {
    pub wire: SharedWire,
    pub clock: ManualClock,
    pub ready: NetworkReady,
}

impl Harness {
    /// Queue bytes for the client to read.
    pub fn push(&self, bytes: &[u8]) {
        self.wire
            .borrow_mut()
            .inbound
            .push_back(Chunk::Data(bytes.to_vec()));
    }

    /// Queue an encoded packet for the client to read.
    pub fn push_packet(&self, packet: &Packet<'_>) {
        self.push(&encode(packet));
    }

    pub fn push_chunk(&self, chunk: Chunk) {
        self.wire.borrow_mut().inbound.push_back(chunk);
    }

    /// Everything written since the last call.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.wire.borrow_mut().written)
    }

    pub fn is_open(&self) -> bool {
        self.wire.borrow().open
    }
}

pub fn options() -> Options<'static> {
    Options {
        keep_alive_seconds: 10,
        ..Options::new("mock:1883", "test-client")
    }
}

pub fn client_with<const RX: usize>(options: Options<'static>) -> (TestClient<RX>, Harness) {
    let wire = SharedWire::default();
    let clock = ManualClock::default();
    let client = Client::new(
        MockNetwork { wire: wire.clone() },
        options,
        clock.clone(),
        RecordingSink::default(),
    );
    let ready = NetworkReady::new();
    ready.signal();
    (client, Harness { wire, clock, ready })
}

/// A client that has completed CONNECT/CONNACK, with wire and events cleared.
pub fn connected<const RX: usize>(options: Options<'static>) -> (TestClient<RX>, Harness) {
    let (mut client, harness) = client_with::<RX>(options);
    client.connect(&harness.ready).unwrap();
    harness.push_packet(&Packet::ConnAck(ConnAck {
        session_present: false,
        return_code: 0,
    }));
    client.poll().unwrap();
    assert_eq!(client.sink().events, vec![Event::Connected]);
    client.sink_mut().events.clear();
    harness.take_written();
    (client, harness)
}

pub fn encode(packet: &Packet<'_>) -> Vec<u8> {
    let mut buf = vec![0u8; packet.encoded_len()];
    let len = packet.encode(&mut buf).unwrap();
    buf.truncate(len);
    buf
}

/// Packet types of every packet in `bytes`.
pub fn packet_types(bytes: &[u8]) -> Vec<u8> {
    let mut types = Vec::new();
    let mut rest = bytes;
    while let Some((packet, used)) = packet::decode(rest).unwrap() {
        types.push(packet.packet_type());
        rest = &rest[used..];
    }
    assert!(rest.is_empty(), "trailing bytes: {:?}", rest);
    types
}

pub fn publish_bytes(topic: &str, payload: &[u8], qos: QoS, packet_id: Option<u16>) -> Vec<u8> {
    encode(&Packet::Publish(packet::Publish {
        topic,
        packet_id,
        qos,
        retain: false,
        dup: false,
        payload,
    }))
}
