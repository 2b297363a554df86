//! Impure I/O for the MQTT broker client
//!
//! A supervisor task owns the rumqttc event loop, publishes connection state
//! through a watch channel and retries after network errors. The client side
//! only checks that state before handing a publish to rumqttc.

use super::connection::{
    canonicalize_topic, configure_mqtt_options, resolve_client_id, route_event, ConnectionState,
    EventRoute, MqttError, ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use crate::broker::BrokerClient;
use crate::config::{redact_url, BrokerSection};
use crate::lifecycle::shutdown_requested;
use crate::observability::metrics::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Request channel capacity between `AsyncClient` and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the supervisor to finish
const SUPERVISOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the supervisor keeps polling to flush the DISCONNECT packet
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// MQTT v5 implementation of [`BrokerClient`]
pub struct MqttBroker {
    config: BrokerSection,
    client_id: String,
    topic: String,
    client: AsyncClient,
    // EventLoop is Send but not Sync; the Mutex keeps the broker shareable
    // until `connect` hands the loop to the supervisor
    event_loop: Mutex<Option<EventLoop>>,
    reconnect_config: ReconnectConfig,
    supervisor_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MqttBroker {
    /// Build the client; no network activity happens until `connect`
    pub fn new(config: BrokerSection) -> Result<Self, MqttError> {
        let client_id = resolve_client_id(&config);
        let mqtt_options = configure_mqtt_options(&client_id, &config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        Ok(Self {
            topic: canonicalize_topic(&config.topic),
            config,
            client_id,
            client,
            event_loop: Mutex::new(Some(event_loop)),
            reconnect_config: ReconnectConfig::default(),
            supervisor_handle: None,
            state_rx: None,
            shutdown_tx: None,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Canonicalized destination topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current connection state, `None` before `connect`
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Wait for ConnAck. Any disconnect or retry before it counts as failure.
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason)
                    | ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    // Backoff only starts after a failed attempt
                    ConnectionState::Reconnecting(attempt) => {
                        return Err(MqttError::ConnectionFailed(format!(
                            "Initial connection failed, retry {attempt} scheduled"
                        )));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "Connection supervisor stopped".to_string(),
                    ));
                }
            }
        })
        .await;

        confirmation.unwrap_or_else(|_| {
            Err(MqttError::ConnectionFailed(format!(
                "No ConnAck within {}s",
                timeout.as_secs()
            )))
        })
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or(MqttError::NotStarted)?;
        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    async fn stop_supervisor(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            shutdown_tx.send_replace(true);
        }

        if let Some(handle) = self.supervisor_handle.take() {
            match tokio::time::timeout(SUPERVISOR_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!("MQTT supervisor shut down gracefully"),
                Ok(Err(e)) => warn!(error = %e, "MQTT supervisor ended with error"),
                // The dropped handle detaches the task; it exits on its next shutdown check
                Err(_) => warn!("MQTT supervisor did not stop in time"),
            }
        }
    }
}

/// Move to `next`, log the transition and mirror it into metrics
fn transition(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
    let next = HealthMonitor::determine_next_state(event);
    let previous = state_tx.send_replace(next.clone());
    HealthMonitor::log_state_transition(&previous, &next);

    match next {
        ConnectionState::Connected => metrics().broker_connection_established(),
        ConnectionState::Disconnected(_) | ConnectionState::PermanentlyDisconnected(_) => {
            metrics().broker_connection_lost()
        }
        ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
    }
}

/// Sleep for `delay_ms` unless a shutdown arrives first. Returns false on shutdown.
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_requested(shutdown_rx) => false,
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

/// Decide whether to keep going after a lost connection. Returns false to stop.
async fn back_off(
    attempts: &mut u32,
    reconnect_config: &ReconnectConfig,
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let shutdown = *shutdown_rx.borrow();
    match HealthMonitor::should_attempt_reconnection(*attempts, reconnect_config, shutdown) {
        ReconnectionDecision::Proceed { attempt, delay_ms } => {
            *attempts = attempt;
            transition(state_tx, ConnectionEvent::ReconnectionStarted(attempt));
            interruptible_sleep(shutdown_rx, delay_ms).await
        }
        ReconnectionDecision::AbortShutdownRequested => false,
        ReconnectionDecision::AbortMaxAttemptsExceeded => {
            let reason = format!("Max reconnection attempts ({attempts}) exceeded");
            transition(state_tx, ConnectionEvent::PermanentFailure(reason));
            false
        }
    }
}

/// Drive the event loop until shutdown, reconnecting after errors
async fn supervise(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
) {
    let mut attempts = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            event = event_loop.poll() => match event {
                Ok(event) => match route_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        attempts = 0;
                        transition(&state_tx, ConnectionEvent::ConnAckReceived);
                    }
                    EventRoute::PublishAcknowledged(pkid) => {
                        debug!(pkid, "Publish acknowledged");
                    }
                    EventRoute::Disconnected => {
                        transition(&state_tx, ConnectionEvent::DisconnectedByBroker);
                        if !back_off(&mut attempts, &reconnect_config, &state_tx, &mut shutdown_rx).await {
                            break;
                        }
                    }
                    EventRoute::Other(description) => {
                        tracing::trace!(event = %description, "MQTT event");
                    }
                },
                Err(e) => {
                    transition(&state_tx, ConnectionEvent::NetworkError(e.to_string()));
                    if !back_off(&mut attempts, &reconnect_config, &state_tx, &mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }
    }

    let connected = HealthMonitor::can_publish(&state_tx.borrow());
    if connected {
        // Let the queued DISCONNECT reach the broker
        let _ = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            while event_loop.poll().await.is_ok() {}
        })
        .await;
    }
    transition(&state_tx, ConnectionEvent::ClientDisconnected);
    info!("MQTT supervisor stopped");
}

#[async_trait]
impl BrokerClient for MqttBroker {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MqttError::AlreadyConnected)?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        metrics().broker_connection_attempt();
        info!(
            broker = %redact_url(&self.config.broker_url),
            client_id = %self.client_id,
            topic = %self.topic,
            "Connecting to MQTT broker"
        );

        let span = crate::mqtt_span!(client_id = %self.client_id);
        self.supervisor_handle = Some(tokio::spawn(
            supervise(
                event_loop,
                state_tx,
                shutdown_rx,
                self.reconnect_config.clone(),
            )
            .instrument(span),
        ));

        let timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, timeout).await {
            metrics().broker_connection_failed();
            self.stop_supervisor().await;
            return Err(e);
        }

        Ok(())
    }

    async fn publish(&self, payload: Bytes) -> Result<(), MqttError> {
        self.check_connection_state()?;

        // Payloads are QoS 1 and never retained
        self.client
            .publish_with_properties(
                self.topic.clone(),
                QoS::AtLeastOnce,
                false,
                payload,
                PublishProperties::default(),
            )
            .await
            .map_err(MqttError::PublishFailed)
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        if self.state_rx.is_none() {
            return Ok(());
        }

        let was_connected = self.is_connected();
        if let Some(shutdown_tx) = &self.shutdown_tx {
            shutdown_tx.send_replace(true);
        }

        let result = if was_connected {
            self.client
                .disconnect()
                .await
                .map_err(MqttError::DisconnectFailed)
        } else {
            Ok(())
        };

        self.stop_supervisor().await;
        info!("MQTT client disconnected");
        result
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }
}
