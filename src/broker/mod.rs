//! Broker abstraction for outbound payloads
//!
//! The publisher only needs to connect, push opaque bytes and disconnect, so
//! the seam is kept that small. The MQTT implementation lives in [`mqtt`];
//! tests inject [`crate::testing::mocks::MockBroker`].

use async_trait::async_trait;
use bytes::Bytes;

pub mod mqtt;

/// Client for the downstream message broker
///
/// The publisher owns its client exclusively for the lifetime of its worker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish the broker session. Must be called before `publish`.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Send one message body to the configured destination
    async fn publish(&self, payload: Bytes) -> Result<(), Self::Error>;

    /// Close the session; calling it on an unconnected client is not an error
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;
}
