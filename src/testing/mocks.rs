//! Mock implementations for testing
//!
//! `MockBroker` records every published body in memory. Clones share the
//! same state, so a test can keep one handle while the publisher owns another.

use crate::broker::BrokerClient;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors produced by [`MockBroker`]
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Mock connection failure")]
    ConnectFailed,
    #[error("Mock publish failure")]
    PublishFailed,
    #[error("Mock broker is not connected")]
    NotConnected,
}

/// In-memory broker for tests
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    published: Arc<Mutex<Vec<Bytes>>>,
    connected: Arc<AtomicBool>,
    connect_calls: Arc<AtomicUsize>,
    disconnect_calls: Arc<AtomicUsize>,
    publish_attempts: Arc<AtomicUsize>,
    fail_connect: bool,
    fail_publish: bool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker whose `connect` always fails
    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    /// A broker that connects but rejects every publish
    pub fn failing_publish() -> Self {
        Self {
            fail_publish: true,
            ..Default::default()
        }
    }

    /// Bodies accepted so far, in publish order
    pub async fn published(&self) -> Vec<Bytes> {
        self.published.lock().await.clone()
    }

    /// Published bodies decoded as UTF-8 (lossy)
    pub async fn published_strings(&self) -> Vec<String> {
        self.published()
            .await
            .iter()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .collect()
    }

    /// Poll until at least `count` messages were published or `timeout` elapses
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.published.lock().await.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Publishes attempted, including rejected ones
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    type Error = BrokerError;

    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(BrokerError::ConnectFailed);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, payload: Bytes) -> Result<(), BrokerError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if self.fail_publish {
            return Err(BrokerError::PublishFailed);
        }
        self.published.lock().await.push(payload);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
