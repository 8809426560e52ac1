use criterion::{BatchSize, Criterion, Throughput};
use libiot_mqtt::mqtt::packet::{ConnAck, Packet, Publish};
use libiot_mqtt::mqtt::{Client, EventSink, Message, Options, QoS};
use libiot_mqtt::network::error::Error;
use libiot_mqtt::network::{Close, Connect, Connection, NetworkReady, Poll, Read, Readiness, Write};
use libiot_mqtt::system::clock::Clock;
use std::hint::black_box;

/// A transport that swallows writes and never has anything to read.
struct Discard;

impl Read for Discard {
    type Error = Error;
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> {
        Err(Error::WouldBlock)
    }
}

impl Write for Discard {
    type Error = Error;
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Poll for Discard {
    type Error = Error;
    fn poll(&mut self, _timeout_ms: u32) -> Result<Readiness, Self::Error> {
        Ok(Readiness::Timeout)
    }
}

impl Close for Discard {
    type Error = Error;
    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Connection for Discard {}

struct Loopback;

impl Connect for Loopback {
    type Connection = Discard;
    type Error = Error;
    fn connect(&mut self, _remote: &str) -> Result<Self::Connection, Self::Error> {
        Ok(Discard)
    }
}

struct Frozen;

impl Clock for Frozen {
    fn now_ms(&self) -> u64 {
        0
    }
}

#[derive(Default)]
struct Counter {
    messages: usize,
    acked: usize,
}

impl EventSink for Counter {
    fn on_message(&mut self, message: &Message<'_>) {
        self.messages += black_box(message.payload.len()).min(1);
    }

    fn on_publish_acked(&mut self, _packet_id: u16) {
        self.acked += 1;
    }
}

type BenchClient = Client<'static, Loopback, Frozen, Counter, 512, 512>;

fn encode(packet: &Packet<'_>) -> Vec<u8> {
    let mut buf = vec![0u8; packet.encoded_len()];
    let len = packet.encode(&mut buf).expect("Failed to encode");
    buf.truncate(len);
    buf
}

fn setup_client() -> BenchClient {
    let ready = NetworkReady::new();
    ready.signal();
    let options = Options::new("localhost:1883", "libiot-bench-client");
    let mut client = Client::new(Loopback, options, Frozen, Counter::default());
    client.connect(&ready).expect("Failed to connect");
    client
        .on_bytes_received(&encode(&Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: 0,
        })))
        .expect("Failed to accept CONNACK");
    client
}

pub fn bench_publish_qos0(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_qos0");
    let payload = b"hello world from bench";
    group.throughput(Throughput::Bytes(payload.len() as u64 * 50));

    group.bench_function("publish_qos0", |b| {
        b.iter_batched_ref(
            setup_client,
            |client| {
                for _ in 0..50 {
                    client
                        .publish("libiot/bench-topic-qos0", payload, QoS::AtMostOnce, false)
                        .expect("Failed to publish");
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_publish_qos1_acked(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_qos1_acked");
    let payload = b"hello world from bench qos1";
    group.throughput(Throughput::Bytes(payload.len() as u64 * 50));

    group.bench_function("publish_qos1_acked", |b| {
        b.iter_batched_ref(
            setup_client,
            |client| {
                for _ in 0..50 {
                    let id = client
                        .publish("libiot/bench-topic-qos1", payload, QoS::AtLeastOnce, false)
                        .expect("Failed to publish")
                        .expect("QoS 1 has a packet id");
                    client
                        .on_bytes_received(&encode(&Packet::PubAck(id)))
                        .expect("Failed to accept PUBACK");
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_receive_qos1(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_qos1");
    let mut stream = Vec::new();
    for id in 1..=50u16 {
        stream.extend(encode(&Packet::Publish(Publish {
            topic: "libiot/bench-topic-qos1",
            packet_id: Some(id),
            qos: QoS::AtLeastOnce,
            retain: false,
            dup: false,
            payload: b"hello world from bench qos1",
        })));
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("receive_qos1", |b| {
        b.iter_batched_ref(
            setup_client,
            |client| {
                client
                    .on_bytes_received(black_box(&stream))
                    .expect("Failed to receive");
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}
