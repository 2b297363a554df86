//! stream-relay
//!
//! Relays JSON objects from a long-lived HTTP response stream into an MQTT
//! broker.
//!
//! # Overview
//!
//! The pipeline has two stages joined by an unbounded queue:
//! - [`stream::StreamReader`] tails one plaintext HTTP response, rebuilds JSON
//!   object boundaries line by line and enqueues each complete object
//! - [`publisher::Publisher`] drains the queue into a [`broker::BrokerClient`]
//!
//! [`relay::Relay`] validates the configuration and drives both through their
//! start/stop lifecycle.
//!
//! # Quick Start
//!
//! ```rust
//! use stream_relay::stream::{FrameAssembler, FramingMode, LineEvent};
//!
//! let mut assembler = FrameAssembler::new(FramingMode::Json, 1024);
//! assembler.push_line("HTTP/1.1 200 OK");
//! assembler.push_line("");
//! assembler.push_line("{\"a\":");
//!
//! match assembler.push_line("1}").event {
//!     LineEvent::Completed(payload) => assert_eq!(payload.as_str(), "{\"a\":1}"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod publisher;
pub mod queue;
pub mod relay;
pub mod stream;
pub mod testing;

pub use broker::{mqtt::MqttBroker, BrokerClient};
pub use config::*;
pub use error::{RelayError, RelayResult};
pub use lifecycle::{ComponentState, LifecycleError};
pub use publisher::Publisher;
pub use queue::{Payload, PayloadQueue};
pub use relay::Relay;
pub use stream::StreamReader;
