//! Pure connection state management for the MQTT broker client
//!
//! Option building, topic canonicalization and event classification live
//! here so they can be tested without a broker.

use crate::config::BrokerSection;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{Event, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Headroom above `max_message_bytes` for the MQTT fixed header, topic and properties
pub const PACKET_OVERHEAD_BYTES: usize = 64 * 1024;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given 1-based attempt.
    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain at 250ms forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT broker client errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] rumqttc::v5::ClientError),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(#[source] rumqttc::v5::ClientError),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Client has not been connected")]
    NotStarted,
    #[error("Client was already connected once")]
    AlreadyConnected,
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Client id from config, or a fresh `stream-relay-<uuid>`
pub fn resolve_client_id(config: &BrokerSection) -> String {
    config
        .client_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("stream-relay-{}", Uuid::new_v4()))
}

/// Build rumqttc options from the broker section
pub fn configure_mqtt_options(
    client_id: &str,
    config: &BrokerSection,
) -> Result<MqttOptions, MqttError> {
    let invalid = || MqttError::InvalidBrokerUrl(crate::config::redact_url(&config.broker_url));

    let url = Url::parse(&config.broker_url).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

    let max_packet = config
        .max_message_bytes
        .saturating_add(PACKET_OVERHEAD_BYTES)
        .min(u32::MAX as usize) as u32;
    mqtt_options.set_max_packet_size(Some(max_packet));

    Ok(mqtt_options)
}

/// Normalize a topic: single leading slash, no repeated or trailing slashes
pub fn canonicalize_topic(topic: &str) -> String {
    let segments: Vec<&str> = topic.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Routing decisions for events produced by the rumqttc event loop
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    /// Broker acknowledged a QoS 1 publish
    PublishAcknowledged(u16),
    Disconnected,
    /// Anything else, carried only for debug logging
    Other(String),
}

/// Classify an event loop event (pure routing decision)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
        Event::Incoming(Packet::PubAck(ack)) => EventRoute::PublishAcknowledged(ack.pkid),
        Event::Incoming(Packet::Disconnect(_)) => EventRoute::Disconnected,
        Event::Incoming(other) => EventRoute::Other(format!("{other:?}")),
        Event::Outgoing(outgoing) => EventRoute::Other(format!("{outgoing:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_broker_config() -> BrokerSection {
        BrokerSection::new("mqtt://localhost:1883")
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.backoff_pattern, vec![25, 50, 100, 250]);
        assert_eq!(config.sustained_delay, 250);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 250);
        assert_eq!(config.calculate_backoff_delay(5), 250);
        assert_eq!(config.calculate_backoff_delay(100), 250);

        let empty = ReconnectConfig {
            backoff_pattern: Vec::new(),
            ..ReconnectConfig::default()
        };
        assert_eq!(empty.calculate_backoff_delay(1), 250);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = test_broker_config();
        let options = configure_mqtt_options("relay-test", &config).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.client_id(), "relay-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_mqtts_default_port() {
        let config = BrokerSection::new("mqtts://broker.example.com");
        let options = configure_mqtt_options("relay-test", &config).unwrap();
        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
    }

    #[test]
    fn test_invalid_broker_url() {
        let config = BrokerSection::new("invalid-url");
        let result = configure_mqtt_options("relay-test", &config);
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_invalid_url_error_is_redacted() {
        let config = BrokerSection::new("mqtt://user:secret@");
        match configure_mqtt_options("relay-test", &config) {
            Err(MqttError::InvalidBrokerUrl(url)) => assert!(!url.contains("secret")),
            other => panic!("expected InvalidBrokerUrl, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_client_id() {
        let mut config = test_broker_config();
        let generated = resolve_client_id(&config);
        assert!(generated.starts_with("stream-relay-"));
        assert_ne!(generated, resolve_client_id(&config));

        config.client_id = Some("relay-1".to_string());
        assert_eq!(resolve_client_id(&config), "relay-1");

        config.client_id = Some("  ".to_string());
        assert!(resolve_client_id(&config).starts_with("stream-relay-"));
    }

    #[test]
    fn test_topic_canonicalization() {
        assert_eq!(canonicalize_topic("/stream-relay/payloads"), "/stream-relay/payloads");
        assert_eq!(canonicalize_topic("feeds//raw/"), "/feeds/raw");
        assert_eq!(canonicalize_topic(""), "/");
        assert_eq!(canonicalize_topic("///"), "/");
    }

    #[test]
    fn test_connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Disconnected("test".to_string())
        );
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("refused".to_string()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotStarted,
            MqttError::AlreadyConnected,
            MqttError::NotConnected {
                state: ConnectionState::Reconnecting(2),
            },
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    proptest! {
        #[test]
        fn canonicalize_topic_is_idempotent(topic in ".*") {
            let first = canonicalize_topic(&topic);
            let second = canonicalize_topic(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn canonicalize_topic_shape(topic in "[a-z/]{0,24}") {
            let result = canonicalize_topic(&topic);
            prop_assert!(result.starts_with('/'));
            prop_assert!(!result.contains("//"));
            prop_assert!(result == "/" || !result.ends_with('/'));
        }
    }
}
