//! Start/stop control shared by the stream reader and the publisher
//!
//! Each component owns one background worker. The worker is told to stop
//! through a watch channel and its observable state moves strictly forward:
//! `NotStarted -> Running -> Stopping -> Stopped`. A stopped component cannot
//! be started again.

use crate::config::ConfigError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Observable state of a background component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl ComponentState {
    pub fn is_running(&self) -> bool {
        matches!(self, ComponentState::Running)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentState::NotStarted => "not_started",
            ComponentState::Running => "running",
            ComponentState::Stopping => "stopping",
            ComponentState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{component} is already running")]
    AlreadyStarted { component: &'static str },
    #[error("{component} has been stopped and cannot be restarted")]
    NotRestartable { component: &'static str },
    #[error("{component} cannot start: {source}")]
    InvalidSettings {
        component: &'static str,
        #[source]
        source: ConfigError,
    },
}

/// Owns one component's worker task and its stop signal
#[derive(Debug)]
pub(crate) struct WorkerControl {
    component: &'static str,
    state_tx: Arc<watch::Sender<ComponentState>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerControl {
    pub(crate) fn new(component: &'static str) -> Self {
        let (state_tx, _) = watch::channel(ComponentState::NotStarted);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            component,
            state_tx: Arc::new(state_tx),
            shutdown_tx,
            handle: None,
        }
    }

    pub(crate) fn state(&self) -> ComponentState {
        *self.state_tx.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ComponentState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn ensure_startable(&self) -> Result<(), LifecycleError> {
        match self.state() {
            ComponentState::NotStarted => Ok(()),
            ComponentState::Running | ComponentState::Stopping => {
                Err(LifecycleError::AlreadyStarted {
                    component: self.component,
                })
            }
            ComponentState::Stopped => Err(LifecycleError::NotRestartable {
                component: self.component,
            }),
        }
    }

    /// Spawn the worker. The closure receives the stop signal receiver.
    pub(crate) fn launch<W, F>(&mut self, worker: W) -> Result<(), LifecycleError>
    where
        W: FnOnce(watch::Receiver<bool>) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_startable()?;

        let shutdown_rx = self.shutdown_tx.subscribe();
        let state_tx = self.state_tx.clone();
        let component = self.component;
        let task = worker(shutdown_rx);

        self.state_tx.send_replace(ComponentState::Running);
        self.handle = Some(tokio::spawn(async move {
            task.await;
            state_tx.send_replace(ComponentState::Stopped);
            debug!(component, "Worker exited");
        }));

        Ok(())
    }

    /// Signal the worker and wait for it to finish. Idempotent; a no-op before start.
    pub(crate) async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.state_tx.send_if_modified(|state| {
            if *state == ComponentState::Running {
                *state = ComponentState::Stopping;
                true
            } else {
                false
            }
        });
        self.shutdown_tx.send_replace(true);

        if let Err(e) = handle.await {
            error!(component = self.component, error = %e, "Worker terminated abnormally");
        }
        self.state_tx.send_replace(ComponentState::Stopped);
    }
}

/// Resolves once a stop has been requested or the controlling side is gone
pub(crate) async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
