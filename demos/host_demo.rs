//! Hosted version of the board demo: wait for the network, connect,
//! subscribe to `esp32/sub` and publish to `esp32/pub` every few seconds.
//!
//! ```text
//! cargo run --example host_demo --features std -- 192.168.1.4:1883
//! ```

use libiot_mqtt::mqtt::{Client, ConnectReturnCode, DisconnectReason, EventSink, Message, Options, QoS, State};
use libiot_mqtt::network::tcp::TcpConnector;
use libiot_mqtt::network::NetworkReady;
use libiot_mqtt::system::clock::{Clock, StdClock};
use std::env;
use std::thread;
use std::time::Duration;

static NETIF_READY: NetworkReady = NetworkReady::new();

const PUBLISH_INTERVAL_MS: u64 = 5_000;

struct Console;

impl EventSink for Console {
    fn on_connected(&mut self) {
        println!("connected");
    }

    fn on_connect_failed(&mut self, code: ConnectReturnCode) {
        println!("broker refused connection: {:?}", code);
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        println!("disconnected: {:?}", reason);
    }

    fn on_message(&mut self, message: &Message<'_>) {
        println!(
            "{} [{}/{}]: {}",
            message.topic,
            message.offset + message.payload.len(),
            message.total_len,
            String::from_utf8_lossy(message.payload)
        );
    }

    fn on_subscribe_acked(&mut self, packet_id: u16) {
        println!("subscribed ({})", packet_id);
    }
}

fn main() {
    let broker = env::args().nth(1).unwrap_or("test.mosquitto.org:1883".to_string());

    // Stands in for the Wi-Fi driver's "got IP" callback.
    thread::spawn(|| {
        thread::sleep(Duration::from_millis(200));
        NETIF_READY.signal();
    });

    let clock = StdClock::new();
    let options = Options::new(&broker, "ESP32-Demo-Board");
    let mut client: Client<'_, _, _, _, 1024, 1024> = Client::new(TcpConnector, options, clock, Console);

    while !NETIF_READY.is_ready() {
        thread::sleep(Duration::from_millis(50));
    }

    let mut subscribed = false;
    let mut last_publish = 0;
    loop {
        if client.state() == State::Disconnected {
            if let Err(e) = client.connect(&NETIF_READY) {
                println!("connect failed: {}", e);
                thread::sleep(Duration::from_secs(5));
                continue;
            }
            subscribed = false;
        }

        if let Err(e) = client.poll() {
            println!("poll: {}", e);
            continue;
        }

        if client.state() != State::Connected {
            continue;
        }
        if !subscribed {
            subscribed = client.subscribe(&[("esp32/sub", QoS::AtMostOnce)]).is_ok();
        }

        let now = clock.now_ms();
        if now - last_publish >= PUBLISH_INTERVAL_MS {
            last_publish = now;
            let reading = format!("uptime {} ms", now);
            if let Err(e) = client.publish("esp32/pub", reading.as_bytes(), QoS::AtMostOnce, false) {
                println!("publish failed: {}", e);
            }
        }
    }
}
