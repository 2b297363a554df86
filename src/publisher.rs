//! Publisher: drains the payload queue into the broker client
//!
//! The worker owns the broker client for its whole life. It connects first,
//! forwards payloads one at a time in queue order and disconnects on the way
//! out. Delivery is at-most-once: a failed publish is logged and dropped.

use crate::broker::BrokerClient;
use crate::lifecycle::{shutdown_requested, ComponentState, LifecycleError, WorkerControl};
use crate::observability::metrics::metrics;
use crate::queue::{Payload, PayloadQueue};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

const COMPONENT: &str = "publisher";

/// Result of handing one payload to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Not object-like, never sent
    Skipped,
    Sent { bytes: usize, truncated: bool },
    Failed,
}

/// UTF-8 bytes of the payload, cut to exactly `cap` bytes when longer
pub fn encode_capped(payload: Payload, cap: usize) -> (Bytes, bool) {
    let mut body = Bytes::from(payload.into_string());
    let truncated = body.len() > cap;
    if truncated {
        body.truncate(cap);
    }
    (body, truncated)
}

/// Forward one payload. Failures are logged and reported, never returned.
pub async fn forward<B: BrokerClient>(
    client: &B,
    payload: Payload,
    max_message_bytes: usize,
) -> ForwardOutcome {
    if !payload.is_object_like() {
        metrics().payload_skipped();
        debug!(bytes = payload.len(), "Skipping payload that is not a JSON object");
        return ForwardOutcome::Skipped;
    }

    let original_len = payload.len();
    let (body, truncated) = encode_capped(payload, max_message_bytes);
    if truncated {
        warn!(
            bytes = original_len,
            limit = max_message_bytes,
            "Payload exceeds message size limit, truncating"
        );
    }

    let bytes = body.len();
    let started = Instant::now();
    match client.publish(body).await {
        Ok(()) => {
            metrics().message_published(bytes, truncated, started.elapsed());
            debug!(bytes, "Payload published");
            ForwardOutcome::Sent { bytes, truncated }
        }
        Err(e) => {
            metrics().publish_failed();
            error!(error = %e, bytes, "Failed to publish payload, dropping it");
            ForwardOutcome::Failed
        }
    }
}

async fn forward_until_stopped<B: BrokerClient>(
    client: &B,
    queue: &PayloadQueue,
    max_message_bytes: usize,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => break,
            payload = queue.dequeue() => payload,
        };
        forward(client, payload, max_message_bytes).await;
    }

    let left = queue.len();
    if left > 0 {
        info!(pending = left, "Publisher stopping with payloads still queued");
    }
}

async fn run_worker<B: BrokerClient>(
    mut client: B,
    queue: Arc<PayloadQueue>,
    max_message_bytes: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let connected = tokio::select! {
        biased;
        _ = shutdown_requested(&mut shutdown_rx) => None,
        result = client.connect() => Some(result),
    };

    match connected {
        Some(Ok(())) => {
            info!("Publisher connected to broker");
            forward_until_stopped(&client, &queue, max_message_bytes, &mut shutdown_rx).await;
        }
        Some(Err(e)) => error!(error = %e, "Broker connection failed, publisher stopping"),
        None => info!("Publisher stopped before the broker connection completed"),
    }

    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "Broker disconnect failed");
    }
    info!("Publisher stopped");
}

/// Publishes queued payloads through an injected broker client
pub struct Publisher<B: BrokerClient + 'static> {
    client: Option<B>,
    queue: Arc<PayloadQueue>,
    max_message_bytes: usize,
    control: WorkerControl,
}

impl<B: BrokerClient + 'static> Publisher<B> {
    pub fn new(client: B, queue: Arc<PayloadQueue>, max_message_bytes: usize) -> Self {
        Self {
            client: Some(client),
            queue,
            max_message_bytes,
            control: WorkerControl::new(COMPONENT),
        }
    }

    /// Spawn the worker, moving the broker client into it. Valid only once.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.control.ensure_startable()?;
        let client = self
            .client
            .take()
            .ok_or(LifecycleError::NotRestartable {
                component: COMPONENT,
            })?;

        let queue = self.queue.clone();
        let max_message_bytes = self.max_message_bytes;
        self.control.launch(move |shutdown_rx| {
            let span = crate::publish_span!(max_message_bytes);
            run_worker(client, queue, max_message_bytes, shutdown_rx).instrument(span)
        })?;

        info!(max_message_bytes, "Publisher started");
        Ok(())
    }

    /// Stop the worker; returns after the broker client was disconnected
    pub async fn stop(&mut self) {
        self.control.stop().await;
    }

    pub fn state(&self) -> ComponentState {
        self.control.state()
    }

    pub fn state_watch(&self) -> watch::Receiver<ComponentState> {
        self.control.subscribe_state()
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }
}
