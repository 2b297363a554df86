//! Lifecycle controller wiring the stream reader, the queue and the publisher

use crate::broker::BrokerClient;
use crate::config::{ConfigError, RelayConfig};
use crate::error::RelayResult;
use crate::lifecycle::ComponentState;
use crate::publisher::Publisher;
use crate::queue::PayloadQueue;
use crate::stream::StreamReader;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Owns both workers and the queue between them
pub struct Relay<B: BrokerClient + 'static> {
    config: RelayConfig,
    queue: Arc<PayloadQueue>,
    reader: StreamReader,
    publisher: Option<Publisher<B>>,
}

impl<B: BrokerClient + 'static> Relay<B> {
    /// Validate `config` and build the components. Nothing is started yet.
    ///
    /// The publisher exists only when both a broker section and a client are
    /// given. A missing broker is accepted only in permissive mode.
    pub fn new(config: RelayConfig, broker: Option<B>) -> RelayResult<Self> {
        config.validate()?;

        let queue = Arc::new(PayloadQueue::new());
        let publisher = match (&config.broker, broker) {
            (Some(section), Some(client)) => Some(Publisher::new(
                client,
                queue.clone(),
                section.max_message_bytes,
            )),
            _ if config.relay.permissive => None,
            (Some(_), None) => {
                return Err(ConfigError::InvalidConfig(
                    "broker is configured but no broker client was supplied".to_string(),
                )
                .into())
            }
            (None, _) => return Err(ConfigError::MissingValue("broker.broker_url").into()),
        };

        let reader = StreamReader::new(config.stream.clone(), queue.clone());

        Ok(Self {
            config,
            queue,
            reader,
            publisher,
        })
    }

    /// Start the publisher (when configured), then the stream reader
    pub async fn start(&mut self) -> RelayResult<()> {
        let span = crate::lifecycle_span!(event = "start");
        self.start_components().instrument(span).await
    }

    async fn start_components(&mut self) -> RelayResult<()> {
        match self.publisher.as_mut() {
            Some(publisher) => publisher.start()?,
            None => warn!("No broker configured, payloads will only be queued"),
        }

        if let Err(e) = self.reader.start() {
            // Leave nothing running behind a failed start
            if let Some(publisher) = self.publisher.as_mut() {
                publisher.stop().await;
            }
            return Err(e.into());
        }

        info!(
            host = %self.config.stream.host,
            path = %self.config.stream.path,
            publisher = self.publisher.is_some(),
            "Relay started"
        );
        Ok(())
    }

    /// Stop the publisher, then the stream reader
    pub async fn stop(&mut self) {
        let span = crate::lifecycle_span!(event = "stop");
        self.stop_components().instrument(span).await
    }

    async fn stop_components(&mut self) {
        if let Some(publisher) = self.publisher.as_mut() {
            info!("Stopping publisher");
            publisher.stop().await;
            info!("Publisher stopped");
        }

        info!("Stopping stream reader");
        self.reader.stop().await;
        info!(queued = self.queue.len(), "Relay stopped");
    }

    /// Start, wait for `shutdown`, then stop
    pub async fn run_until<F>(&mut self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        info!("Shutdown requested");
        self.stop().await;
        Ok(())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<PayloadQueue> {
        &self.queue
    }

    pub fn reader_state(&self) -> ComponentState {
        self.reader.state()
    }

    /// `None` when running without a broker
    pub fn publisher_state(&self) -> Option<ComponentState> {
        self.publisher.as_ref().map(Publisher::state)
    }
}
