use criterion::{Criterion, Throughput};
use libiot_mqtt::mqtt::packet::{self, Connect, Packet, Publish};
use libiot_mqtt::mqtt::{Options, QoS};
use std::hint::black_box;

const PAYLOAD: &[u8; 64] = &[0x5A; 64];

fn publish() -> Packet<'static> {
    Packet::Publish(Publish {
        topic: "libiot/bench-topic",
        packet_id: Some(42),
        qos: QoS::AtLeastOnce,
        retain: false,
        dup: false,
        payload: PAYLOAD,
    })
}

pub fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let mut buf = [0u8; 256];

    group.throughput(Throughput::Bytes(PAYLOAD.len() as u64));
    group.bench_function("publish_qos1", |b| {
        let packet = publish();
        b.iter(|| black_box(&packet).encode(&mut buf).expect("Failed to encode"))
    });

    let options = Options {
        username: Some("bench"),
        password: Some("secret"),
        ..Options::new("localhost:1883", "libiot-bench-client")
    };
    group.bench_function("connect", |b| {
        let packet = Packet::Connect(Connect::from_options(&options));
        b.iter(|| black_box(&packet).encode(&mut buf).expect("Failed to encode"))
    });
    group.finish();
}

pub fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let mut buf = [0u8; 256];
    let len = publish().encode(&mut buf).expect("Failed to encode");
    let bytes = &buf[..len];

    group.throughput(Throughput::Bytes(len as u64));
    group.bench_function("publish_qos1", |b| {
        b.iter(|| packet::decode(black_box(bytes)).expect("Failed to decode"))
    });
    group.bench_function("incomplete_publish", |b| {
        let partial = &bytes[..len / 2];
        b.iter(|| packet::decode(black_box(partial)).expect("Failed to decode"))
    });
    group.finish();
}
