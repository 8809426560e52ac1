//! System utilities for embedded devices.
//!
//! Platform services the protocol code needs but does not own. Currently
//! that is just time: the MQTT session measures keepalive and retry
//! deadlines against a [`clock::Clock`] supplied by the application.

/// Monotonic millisecond clock abstraction.
pub mod clock;
