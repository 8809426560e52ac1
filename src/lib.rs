//! # libiot-mqtt - MQTT session driver for IoT devices
//!
//! A synchronous, allocation-free MQTT 3.1.1 client for devices that run a
//! single control loop: a Wi-Fi microcontroller publishing sensor readings,
//! a gateway relaying commands. It carries the session from network
//! readiness through CONNECT, QoS 0/1/2 publishing, subscriptions and
//! keep-alive, and reports everything through callbacks.
//!
//! ## Features
//!
//! ### MQTT
//! - MQTT 3.1.1 and 3.1, byte exact
//! - QoS 0, 1 and 2 in both directions, inbound QoS 2 deduplicated by id
//! - Subscribe/unsubscribe with per-filter SUBACK results
//! - Keep-alive, CONNACK timeout, last will, credentials
//! - Payloads larger than the receive buffer are delivered in chunks
//!
//! ### Network Abstraction
//! - Transport traits for any TCP/TLS stack
//! - Explicit network-readiness signal gating `connect`
//! - `std::net` transport for hosted targets (`std` feature)
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! libiot-mqtt = "0.1.0"
//! ```
//!
//! ### Control Loop Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "std")]
//! # fn main() -> Result<(), libiot_mqtt::mqtt::Error> {
//! use libiot_mqtt::mqtt::{Client, EventSink, Message, Options, QoS};
//! use libiot_mqtt::network::{tcp::TcpConnector, NetworkReady};
//! use libiot_mqtt::system::clock::StdClock;
//!
//! struct Sink;
//!
//! impl EventSink for Sink {
//!     fn on_message(&mut self, message: &Message<'_>) {
//!         println!("{}: {:?}", message.topic, message.payload);
//!     }
//! }
//!
//! static NETIF_READY: NetworkReady = NetworkReady::new();
//! NETIF_READY.signal();
//!
//! let options = Options::new("192.168.1.4:1883", "ESP32-Demo-Board");
//! let mut client: Client<'_, _, _, _, 1024, 1024> =
//!     Client::new(TcpConnector, options, StdClock::new(), Sink);
//!
//! client.connect(&NETIF_READY)?;
//! client.subscribe(&[("esp32/sub", QoS::AtMostOnce)])?;
//! loop {
//!     client.poll()?;
//!     client.publish("esp32/pub", b"hello", QoS::AtMostOnce, false)?;
//! }
//! # }
//! # #[cfg(not(feature = "std"))]
//! # fn main() {}
//! ```
//!
//! ## Platform Support
//!
//! This library is designed to work on:
//! - Embedded microcontrollers (ARM Cortex-M, RISC-V, Xtensa)
//! - Linux-based IoT devices (Raspberry Pi, etc.)
//! - Any platform supporting Rust's `core` library
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support and the TCP transport (default: disabled)
//! - `defmt`: Enable defmt logging support for embedded debugging
//! - `log`: Route logging through the `log` facade

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![doc(html_root_url = "https://shishir-dey.github.io/libiot/")]

#[macro_use]
mod fmt;

/// Network abstraction layer providing the transport traits and the MQTT
/// protocol implementation.
pub mod network;

/// System utilities for embedded devices.
///
/// Contains the monotonic clock abstraction the session uses for keep-alive
/// and retry deadlines.
pub mod system;

pub use network::application::mqtt;
