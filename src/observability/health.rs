//! Health check HTTP server for container orchestration
//!
//! Exposes the relay's connection status and metrics over plain HTTP so that
//! operators and orchestrators can probe a running process.

use crate::observability::metrics::{current_timestamp, metrics, MetricsSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    service: String,
    port: u16,
    broker_enabled: bool,
}

impl HealthServer {
    /// `broker_enabled` is false in permissive mode without a broker
    pub fn new(service: impl Into<String>, port: u16, broker_enabled: bool) -> Self {
        Self {
            service: service.into(),
            port,
            broker_enabled,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until `shutdown` resolves. Fails only if the port cannot be bound.
    pub async fn start<S>(
        self: Arc<Self>,
        shutdown: S,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - overall status with per-component checks
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.evaluate(&metrics().snapshot());
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /metrics - metrics snapshot
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(|| async {
            Ok::<_, Infallible>(warp::reply::json(&metrics().snapshot()))
        });

        // GET /ready - readiness probe
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let ready = server.broker_ready(metrics().is_broker_connected());
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).and_then(|| async {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).and_then(|| async {
            Ok::<_, Infallible>(warp::reply::json(&endpoint_listing()))
        });

        let routes = health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let (bound, server) =
            warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)?;

        tracing::info!(addr = %bound, "Health server listening");
        server.await;

        Ok(())
    }

    fn broker_ready(&self, broker_connected: bool) -> bool {
        !self.broker_enabled || broker_connected
    }

    fn evaluate(&self, snapshot: &MetricsSnapshot) -> HealthStatus {
        let mut checks = HashMap::new();

        checks.insert(
            "stream".to_string(),
            if snapshot.stream.connected {
                HealthCheck::healthy("HTTP stream connected")
            } else {
                HealthCheck::unhealthy("HTTP stream not connected")
            },
        );

        let broker_check = if !self.broker_enabled {
            HealthCheck::healthy("Broker disabled (permissive mode)")
        } else if snapshot.publisher.broker_connected {
            HealthCheck::healthy("Broker connection established")
        } else {
            HealthCheck::unhealthy("Broker disconnected")
        };
        checks.insert("broker".to_string(), broker_check);

        let overall_healthy = checks.values().all(|check| check.status == "healthy");

        HealthStatus {
            status: if overall_healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: snapshot.timestamp,
            service: self.service.clone(),
            uptime_seconds: snapshot.uptime_seconds,
            queue_depth: snapshot.queue.depth,
            checks,
        }
    }
}

fn endpoint_listing() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("/health", "Overall health status with component checks"),
        ("/metrics", "Stream, queue and publisher metrics"),
        ("/ready", "Readiness probe"),
        ("/live", "Liveness probe"),
    ])
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    fn healthy(message: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            message: Some(message.to_string()),
            last_check: current_timestamp(),
        }
    }

    fn unhealthy(message: &str) -> Self {
        Self {
            status: "unhealthy".to_string(),
            message: Some(message.to_string()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    service: String,
    uptime_seconds: u64,
    queue_depth: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::observability::metrics::RelayMetrics;

    #[test]
    fn test_health_check_logic() {
        let collector = RelayMetrics::new();
        let server = HealthServer::new("stream-relay", 8080, true);

        let status = server.evaluate(&collector.snapshot());
        assert_eq!(status.status, "degraded");
        assert_eq!(status.checks["stream"].status, "unhealthy");
        assert_eq!(status.checks["broker"].status, "unhealthy");
        assert!(!server.broker_ready(false));

        collector.stream_connection_established();
        collector.broker_connection_established();
        collector.payload_enqueued(3);
        let status = server.evaluate(&collector.snapshot());
        assert_eq!(status.status, "healthy");
        assert_eq!(status.service, "stream-relay");
        assert_eq!(status.queue_depth, 3);
        assert!(server.broker_ready(true));
    }

    #[test]
    fn test_permissive_mode_ignores_broker() {
        let collector = RelayMetrics::new();
        collector.stream_connection_established();
        let server = HealthServer::new("stream-relay", 8080, false);

        let status = server.evaluate(&collector.snapshot());
        assert_eq!(status.checks["broker"].status, "healthy");
        assert_eq!(status.status, "healthy");
        assert!(server.broker_ready(false));
    }

    #[test]
    fn test_endpoint_listing() {
        let endpoints = endpoint_listing();
        assert_eq!(endpoints.len(), 4);
        assert!(endpoints.contains_key("/metrics"));
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let server = Arc::new(HealthServer::new("stream-relay", 0, false));
        assert_eq!(server.port(), 0);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            server.start(async {}),
        )
        .await
        .expect("server should stop promptly");
        assert!(result.is_ok());
    }
}
