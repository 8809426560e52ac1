mod common;

use common::*;
use libiot_mqtt::mqtt::packet::{Packet, SubAck};
use libiot_mqtt::mqtt::{DecodeError, DisconnectReason, Error, Options, QoS, State};
use libiot_mqtt::network::error::Error as NetworkError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PINGREQ: [u8; 2] = [0xC0, 0x00];

/// Every delivered message chunk as `(offset, total_len, payload)`.
fn chunks(client: &TestClient<64>) -> Vec<(usize, usize, Vec<u8>)> {
    client
        .sink()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Message {
                payload,
                offset,
                total_len,
                ..
            } => Some((*offset, *total_len, payload.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn test_keep_alive_ping_cycle() {
    let (mut client, harness) = connected::<256>(options());

    harness.clock.advance(9_999);
    client.poll().unwrap();
    assert!(harness.take_written().is_empty());

    harness.clock.advance(1);
    client.poll().unwrap();
    assert_eq!(harness.take_written(), PINGREQ);

    // Only one PINGREQ outstanding.
    harness.clock.advance(5_000);
    client.poll().unwrap();
    assert!(harness.take_written().is_empty());

    harness.push_packet(&Packet::PingResp);
    client.poll().unwrap();
    assert_eq!(client.state(), State::Connected);

    harness.clock.advance(5_000);
    client.poll().unwrap();
    assert_eq!(harness.take_written(), PINGREQ);

    harness.clock.advance(10_000);
    assert_eq!(client.poll(), Err(Error::Io(NetworkError::Timeout)));
    assert_eq!(client.state(), State::Disconnected);
    assert!(!harness.is_open());
    assert_eq!(
        client.sink().events,
        vec![Event::Disconnected(DisconnectReason::KeepAliveTimeout)]
    );
}

#[test]
fn test_keep_alive_counts_from_last_transmit() {
    let (mut client, harness) = connected::<256>(options());

    harness.clock.advance(8_000);
    client.publish("esp32/pub", b"x", QoS::AtMostOnce, false).unwrap();
    harness.take_written();

    harness.clock.advance(8_000);
    client.poll().unwrap();
    assert!(harness.take_written().is_empty());

    harness.clock.advance(2_000);
    client.poll().unwrap();
    assert_eq!(harness.take_written(), PINGREQ);
}

#[test]
fn test_keep_alive_disabled() {
    let options = Options {
        keep_alive_seconds: 0,
        ..options()
    };
    let (mut client, harness) = connected::<256>(options);

    for _ in 0..10 {
        harness.clock.advance(60_000);
        client.poll().unwrap();
    }
    assert!(harness.take_written().is_empty());
    assert_eq!(client.state(), State::Connected);
}

#[test]
fn test_connack_timeout() {
    let (mut client, harness) = client_with::<256>(options());
    client.connect(&harness.ready).unwrap();

    harness.clock.advance(4_999);
    client.poll().unwrap();
    assert_eq!(client.state(), State::Connecting);

    harness.clock.advance(1);
    assert_eq!(client.poll(), Err(Error::Io(NetworkError::Timeout)));
    assert_eq!(client.state(), State::Disconnected);
    assert!(!harness.is_open());
    assert_eq!(
        client.sink().events,
        vec![Event::Disconnected(DisconnectReason::ConnackTimeout)]
    );
}

#[test]
fn test_poll_waits_with_configured_timeout() {
    let options = Options {
        poll_timeout_ms: 250,
        ..options()
    };
    let (mut client, harness) = connected::<256>(options);
    harness.wire.borrow_mut().poll_timeouts.clear();

    client.poll().unwrap();
    assert_eq!(harness.wire.borrow().poll_timeouts, vec![250]);
}

#[test]
fn test_poll_without_connection_is_idle() {
    let (mut client, harness) = client_with::<256>(options());
    client.poll().unwrap();
    assert!(harness.wire.borrow().poll_timeouts.is_empty());
    assert!(client.sink().events.is_empty());
}

#[test]
fn test_several_packets_in_one_read() {
    let (mut client, harness) = connected::<256>(options());
    let mut bytes = publish_bytes("a", b"1", QoS::AtMostOnce, None);
    bytes.extend(publish_bytes("b", b"2", QoS::AtMostOnce, None));
    bytes.extend(encode(&Packet::PingResp));
    harness.push(&bytes);

    client.poll().unwrap();

    let topics: Vec<&str> = client
        .sink()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Message { topic, .. } => Some(topic.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(topics, vec!["a", "b"]);
}

#[test]
fn test_packet_split_across_reads() {
    let (mut client, harness) = connected::<256>(options());
    harness.wire.borrow_mut().max_read = Some(3);
    harness.push(&publish_bytes("esp32/sub", b"split", QoS::AtLeastOnce, Some(9)));

    let mut polls = 0;
    while client.sink().events.is_empty() {
        client.poll().unwrap();
        polls += 1;
        assert!(polls < 20);
    }

    assert!(polls > 1);
    assert_eq!(harness.take_written(), encode(&Packet::PubAck(9)));
    assert!(matches!(
        &client.sink().events[..],
        [Event::Message { payload, .. }] if payload == b"split"
    ));
}

#[test]
fn test_would_block_is_not_an_error() {
    let (mut client, harness) = connected::<256>(options());
    harness.push_chunk(Chunk::WouldBlock);

    client.poll().unwrap();
    assert_eq!(client.state(), State::Connected);
    assert!(harness.is_open());
}

#[test]
fn test_large_publish_streamed_in_chunks() {
    let (mut client, harness) = connected::<64>(options());
    let mut rng = StdRng::seed_from_u64(7);
    let payload: Vec<u8> = (0..1000).map(|_| rng.r#gen()).collect();
    let bytes = publish_bytes("esp32/ota", &payload, QoS::AtLeastOnce, Some(21));

    let mut rest = &bytes[..];
    while !rest.is_empty() {
        let n = rng.gen_range(1..=40).min(rest.len());
        harness.push(&rest[..n]);
        rest = &rest[n..];
    }
    // Something queued behind the large publish.
    harness.push(&publish_bytes("esp32/sub", b"after", QoS::AtMostOnce, None));

    let mut polls = 0;
    while !harness.wire.borrow().inbound.is_empty() {
        client.poll().unwrap();
        polls += 1;
        assert!(polls < 1000);
    }

    let chunks = chunks(&client);
    let (streamed, trailing) = chunks.split_at(chunks.len() - 1);
    assert!(streamed.len() > 1);

    let mut expected_offset = 0;
    let mut received = Vec::new();
    for (offset, total_len, data) in streamed {
        assert_eq!(*offset, expected_offset);
        assert_eq!(*total_len, payload.len());
        assert!(!data.is_empty());
        expected_offset += data.len();
        received.extend_from_slice(data);
    }
    assert_eq!(received, payload);
    assert_eq!(trailing, [(0, 5, b"after".to_vec())]);

    // PUBACK once, after the last byte.
    assert_eq!(harness.take_written(), encode(&Packet::PubAck(21)));
    assert_eq!(client.state(), State::Connected);
}

#[test]
fn test_oversized_non_publish_is_fatal() {
    let (mut client, harness) = connected::<64>(options());
    let codes = [0u8; 100];
    harness.push_packet(&Packet::SubAck(SubAck {
        packet_id: 1,
        return_codes: &codes,
    }));

    assert_eq!(client.poll(), Err(Error::Decode(DecodeError::PacketTooLarge)));
    assert_eq!(client.state(), State::Disconnected);
    assert_eq!(
        client.sink().events,
        vec![Event::Disconnected(DisconnectReason::Decode(
            DecodeError::PacketTooLarge
        ))]
    );
}

#[test]
fn test_decode_error_discards_buffered_input() {
    let (mut client, harness) = connected::<256>(options());
    let mut bytes = vec![0xF0, 0x00];
    bytes.extend(publish_bytes("a", b"1", QoS::AtMostOnce, None));
    harness.push(&bytes);

    assert!(client.poll().is_err());
    assert!(!client
        .sink()
        .events
        .iter()
        .any(|e| matches!(e, Event::Message { .. })));
}

#[test]
fn test_oversized_non_publish_rejected_from_header() {
    let (mut client, harness) = connected::<256>(options());
    let codes = [0u8; 300];
    let suback = encode(&Packet::SubAck(SubAck {
        packet_id: 1,
        return_codes: &codes,
    }));
    // Only the start of the packet has arrived; the buffer is far from full.
    harness.push(&suback[..20]);

    assert_eq!(client.poll(), Err(Error::Decode(DecodeError::PacketTooLarge)));
    assert_eq!(client.state(), State::Disconnected);
    assert!(!harness.is_open());
}
