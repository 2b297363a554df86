//! Observability for the stream relay
//!
//! Structured logging, process-wide metrics and the optional health check
//! HTTP endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsSnapshot, RelayMetrics};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span, publish_span, stream_span};
