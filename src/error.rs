//! Top-level error type for the stream relay
//!
//! Component errors (configuration, lifecycle, stream, broker) are defined
//! next to the code that raises them and funnel into [`RelayError`] at the
//! controller and binary boundary.

use crate::lifecycle::LifecycleError;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// The broker client could not be built
    #[error("Broker error: {0}")]
    Broker(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RelayError {
    /// Wrap any broker client error
    pub fn broker<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Broker(Box::new(error))
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_config_error_conversion() {
        let error: RelayError = ConfigError::MissingValue("stream.path").into();
        assert!(matches!(error, RelayError::Config(_)));
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing required value: stream.path"
        );
    }

    #[test]
    fn test_lifecycle_error_conversion() {
        let error: RelayError = LifecycleError::AlreadyStarted {
            component: "stream reader",
        }
        .into();
        assert!(matches!(error, RelayError::Lifecycle(_)));
        assert!(error.to_string().contains("stream reader"));
    }

    #[test]
    fn test_broker_error_wrapping() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = RelayError::broker(io);
        assert!(matches!(error, RelayError::Broker(_)));
        assert_eq!(error.to_string(), "Broker error: refused");
    }
}
