//! Configuration system for the stream relay
//!
//! Configuration is assembled once at startup from a TOML file, environment
//! variables and command-line flags, validated, and then handed to each
//! component as an immutable value.

use crate::stream::framing::FramingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Default cap on a single broker message (1 MiB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Default cap on an in-progress JSON fragment (16 MiB)
pub const DEFAULT_MAX_FRAGMENT_BYTES: usize = 16 * 1024 * 1024;

/// Main relay configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub stream: StreamSection,
    /// Broker target; may be absent only in permissive mode
    pub broker: Option<BrokerSection>,
    #[serde(default)]
    pub relay: RelaySection,
}

/// HTTP stream source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSection {
    /// DNS name of the stream server, also sent as the `Host` header
    #[serde(default)]
    pub host: String,
    /// Request target, e.g. `/v1/feed`
    #[serde(default)]
    pub path: String,
    /// Plaintext TCP port (default: 80)
    #[serde(default = "default_stream_port")]
    pub port: u16,
    /// How complete payloads are detected in the line stream
    #[serde(default)]
    pub framing: FramingMode,
    /// Maximum wait for the next line in seconds; 0 disables (default: 300)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// In-progress fragments larger than this are discarded
    #[serde(default = "default_max_fragment_bytes")]
    pub max_fragment_bytes: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            path: String::new(),
            port: default_stream_port(),
            framing: FramingMode::default(),
            read_timeout_secs: default_read_timeout(),
            max_fragment_bytes: default_max_fragment_bytes(),
        }
    }
}

impl StreamSection {
    /// Idle read timeout, `None` when disabled
    pub fn read_timeout(&self) -> Option<std::time::Duration> {
        match self.read_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }

    /// Check the values the stream reader needs to open its connection
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::MissingValue("stream.path"));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingValue("stream.host"));
        }
        if self.host.contains(['/', ' ', ':']) {
            return Err(ConfigError::InvalidConfig(format!(
                "stream host '{}' must be a bare DNS name",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "stream port must be greater than 0".to_string(),
            ));
        }
        if self.max_fragment_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "stream.max_fragment_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Topic every payload is published to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Fixed client identifier; generated when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Published message bodies are truncated to this many bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long `connect` waits for the broker's ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl BrokerSection {
    /// Username and password from the environment variables named here.
    ///
    /// `None` unless the username variable is configured and set; a missing
    /// password becomes empty.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = get_env_var_optional(self.username_env.as_ref())?;
        let password = get_env_var_optional(self.password_env.as_ref()).unwrap_or_default();
        Some((username, password))
    }

    /// Broker section with defaults for everything but the URL
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            topic: default_topic(),
            client_id: None,
            username_env: None,
            password_env: None,
            max_message_bytes: default_max_message_bytes(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Controller behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelaySection {
    /// Allow running without a broker; the publisher is then never started
    #[serde(default)]
    pub permissive: bool,
}

fn default_stream_port() -> u16 {
    80
}

fn default_read_timeout() -> u64 {
    300
}

fn default_max_fragment_bytes() -> usize {
    DEFAULT_MAX_FRAGMENT_BYTES
}

fn default_topic() -> String {
    "/stream-relay/payloads".to_string()
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

/// Values supplied on the command line or through the environment.
///
/// Every field that is `Some` replaces the corresponding file value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub path: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub broker_url: Option<String>,
    pub topic: Option<String>,
    pub permissive: bool,
}

impl ConfigOverrides {
    /// Merge the overrides into `config`
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(path) = &self.path {
            config.stream.path = path.clone();
        }
        if let Some(host) = &self.host {
            config.stream.host = host.clone();
        }
        if let Some(port) = self.port {
            config.stream.port = port;
        }
        if let Some(broker_url) = &self.broker_url {
            match config.broker.as_mut() {
                Some(broker) => broker.broker_url = broker_url.clone(),
                None => config.broker = Some(BrokerSection::new(broker_url.clone())),
            }
        }
        if let Some(topic) = &self.topic {
            if let Some(broker) = config.broker.as_mut() {
                broker.topic = topic.clone();
            }
        }
        if self.permissive {
            config.relay.permissive = true;
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Missing required value: {0}")]
    MissingValue(&'static str),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file without validating it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the final configuration: optional file, then overrides, then validation
    pub fn resolve(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration purely from overrides
    pub fn from_overrides(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(None, overrides)
    }

    /// Check that every required value is present and well-formed
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()?;

        match &self.broker {
            Some(broker) => validate_broker(broker)?,
            None if self.relay.permissive => {}
            None => return Err(ConfigError::MissingValue("broker.broker_url")),
        }

        Ok(())
    }

    /// Whether the publisher should be started
    pub fn publisher_enabled(&self) -> bool {
        self.broker.is_some()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[stream]
host = "stream.example.com"
path = "/v1/feed"

[broker]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_broker(broker: &BrokerSection) -> Result<(), ConfigError> {
    if broker.broker_url.trim().is_empty() {
        return Err(ConfigError::MissingValue("broker.broker_url"));
    }

    let url = Url::parse(&broker.broker_url).map_err(|e| {
        ConfigError::InvalidConfig(format!(
            "invalid broker URL '{}': {e}",
            redact_url(&broker.broker_url)
        ))
    })?;
    if !matches!(url.scheme(), "mqtt" | "mqtts" | "tcp") {
        return Err(ConfigError::InvalidConfig(format!(
            "unsupported broker URL scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidConfig(
            "broker URL has no host".to_string(),
        ));
    }
    if broker.topic.trim().is_empty() {
        return Err(ConfigError::MissingValue("broker.topic"));
    }
    if broker.topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidConfig(format!(
            "broker topic '{}' must not contain wildcards",
            broker.topic
        )));
    }
    if broker.max_message_bytes == 0 {
        return Err(ConfigError::InvalidConfig(
            "broker.max_message_bytes must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Helper to read an optional environment variable named in configuration
fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Hide any password embedded in a URL before it reaches a log line
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => mask_userinfo(raw),
    }
}

/// Mask everything between the scheme separator and the last `@` of a URL
/// that failed to parse
fn mask_userinfo(raw: &str) -> String {
    let authority_start = raw.find("://").map_or(0, |i| i + 3);
    match raw[authority_start..].rfind('@') {
        Some(at) => format!(
            "{}***{}",
            &raw[..authority_start],
            &raw[authority_start + at..]
        ),
        None => raw.to_string(),
    }
}
