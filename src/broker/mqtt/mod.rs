//! MQTT v5 broker client built on rumqttc
//!
//! Split into pure decision code (`connection`, `health_monitor`) and the
//! impure client that owns the event loop (`client`).

pub mod client;
pub mod connection;
pub mod health_monitor;

pub use client::MqttBroker;
pub use connection::{
    canonicalize_topic, configure_mqtt_options, resolve_client_id, ConnectionState, MqttError,
    ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
