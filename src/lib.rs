//! # piconode - sensor node support library
//!
//! Building blocks for Wi-Fi connected gas/CO2 sensor nodes: a single-session
//! MQTT client, a one-shot timestamp synchronization protocol, a CSV sensor
//! log with bounded tail reads, and a minimal HTTP status server. Everything
//! is driven from one cooperative poll loop and works in `no_std`
//! environments.
//!
//! ## Design
//!
//! A node owns exactly one outbound MQTT session to a fixed broker. Incoming
//! publishes are delivered in two phases (topic announcement, then payload
//! fragments) and reassembled by a small router that dispatches complete
//! messages to per-topic handlers. One of those handlers latches a wall-clock
//! epoch from a time-source peer; the others append timestamped CSV records
//! to persistent storage. An HTTP server on the same loop serves the tail of
//! the log and a dashboard page, one connection at a time.
//!
//! All I/O goes through trait seams ([`network::Connection`],
//! [`network::Accept`], [`storage::LogStore`], [`time::Clock`],
//! [`time::Delay`]) so every layer can be exercised on a host with mock
//! implementations.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use piconode::node::{NodeConfig, Topics};
//!
//! let config = NodeConfig {
//!     broker_addr: "192.168.1.10:1883",
//!     client_id: "pico_w_client",
//!     keep_alive_seconds: 60,
//!     topics: Topics {
//!         sensor_data: "pico1/sensor/data",
//!         safety_level: "pico1/safety_level",
//!         timestamp_request: "pc/timestamp/request",
//!         timestamp_reply: "pc/timestamp/reply",
//!     },
//!     ..NodeConfig::default()
//! };
//!
//! // let mut node = Node::start(&mut connector, store, config, &clock, &mut delay)?;
//! // loop {
//! //     node.poll_once(&mut acceptor, &clock, &mut delay)?;
//! //     delay.delay_ms(10);
//! // }
//! ```
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support (default: disabled)
//! - `defmt`: Enable defmt logging support for embedded debugging

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

#[cfg(test)]
extern crate std;

/// Network abstraction layer: byte-stream traits plus the MQTT session,
/// message router and HTTP status server built on top of them.
pub mod network;

/// Persistent sensor log: the storage trait seam, CSV record formatting and
/// the bounded tail-window reader.
pub mod storage;

/// One-shot timestamp synchronization over the MQTT session.
pub mod timesync;

/// Outbound sensor telemetry payloads.
pub mod telemetry;

/// Monotonic clock and bounded delay trait seams.
pub mod time;

/// Node wiring: configuration, the boot/init sequence and the cooperative
/// poll step that drives all other layers.
pub mod node;
