//! stream-relay - Main Entry Point
//!
//! Tails an HTTP response stream and republishes every JSON object to MQTT.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use stream_relay::broker::mqtt::MqttBroker;
use stream_relay::config::{redact_url, ConfigOverrides, RelayConfig};
use stream_relay::error::RelayError;
use stream_relay::observability::{init_default_logging, HealthServer};
use stream_relay::Relay;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Relay JSON objects from an HTTP stream into an MQTT broker
#[derive(Parser)]
#[command(name = "stream-relay")]
#[command(about = "Relay JSON objects from an HTTP stream into an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "HTTPSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Request path on the stream server, e.g. /v1/feed
    #[arg(short, long, env = "HTTPSTREAM_URL")]
    url: Option<String>,

    /// Stream server host name
    #[arg(long, env = "HTTPSTREAM_HOST")]
    host: Option<String>,

    /// Stream server port
    #[arg(short, long, env = "HTTPSTREAM_PORT")]
    port: Option<u16>,

    /// MQTT broker URL, e.g. mqtt://localhost:1883
    #[arg(short, long, env = "HTTPSTREAM_BROKER")]
    broker: Option<String>,

    /// MQTT topic for published payloads
    #[arg(short, long, env = "HTTPSTREAM_TOPIC")]
    topic: Option<String>,

    /// Run without a broker; payloads are read but never published
    #[arg(long, env = "HTTPSTREAM_PERMISSIVE")]
    permissive: bool,

    /// Serve health endpoints on this port
    #[arg(long, env = "HEALTH_PORT")]
    health_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until SIGINT or SIGTERM (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            path: self.url.clone(),
            host: self.host.clone(),
            port: self.port,
            broker_url: self.broker.clone(),
            topic: self.topic.clone(),
            permissive: self.permissive,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match RelayConfig::resolve(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("stream-relay: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        None | Some(Commands::Run) => run_relay(config, cli.health_port).await,
        Some(Commands::Config { show }) => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_relay(
    config: RelayConfig,
    health_port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.stream.host,
        port = config.stream.port,
        path = %config.stream.path,
        broker = %config
            .broker
            .as_ref()
            .map(|b| redact_url(&b.broker_url))
            .unwrap_or_else(|| "none".to_string()),
        permissive = config.relay.permissive,
        "Starting stream-relay"
    );

    let broker = match &config.broker {
        Some(section) => Some(MqttBroker::new(section.clone()).map_err(RelayError::broker)?),
        None => None,
    };
    let broker_enabled = broker.is_some();

    let mut relay = Relay::new(config, broker)?;

    let (health_shutdown_tx, mut health_shutdown_rx) = watch::channel(false);
    let health_task = health_port.map(|port| {
        let server = Arc::new(HealthServer::new("stream-relay", port, broker_enabled));
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = health_shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server.start(shutdown).await {
                error!(error = %e, "Health server error");
            }
        })
    });

    let result = relay.run_until(shutdown_signal()).await;

    health_shutdown_tx.send_replace(true);
    if let Some(task) = health_task {
        let _ = task.await;
    }

    Ok(result?)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

fn handle_config_command(config: &RelayConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
