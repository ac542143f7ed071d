//! Coder Gateway entry point: hosts the C9 TCP scanner listener and bridges
//! it to the bus, turning `coder.start` commands into `coder.complete`
//! events.

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use workcell_core::coder_gateway::{CoderGateway, CoderGatewayConfig};
use workcell_core::config::ServiceConfig;
use workcell_core::observability::{init_default_logging, metrics, HealthServer};
use workcell_core::protocol::{CoderStart, Direction, Envelope, MessageType, Priority, TopicRegistry};
use workcell_core::routing::{Handler, Router};
use workcell_core::transport::mqtt::BusClient;
use workcell_core::transport::Publisher;

const SERVICE_NAME: &str = "coder-gateway";

#[derive(Parser)]
#[command(name = "coder-gateway")]
#[command(about = "Scanner TCP listener bridging coder.start/coder.complete to the bus")]
#[command(version)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Delegates [`Publisher::publish`] to a [`BusClient`] behind a lock, so the
/// start handler can publish while `main` retains the exclusive access
/// `BusClient::start`/`stop` require.
struct SharedBus(Arc<tokio::sync::Mutex<BusClient>>);

#[async_trait]
impl Publisher for SharedBus {
    async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: MessageType,
        priority: Priority,
        data: serde_json::Value,
        correlation_id: Option<uuid::Uuid>,
    ) -> bool {
        self.0
            .lock()
            .await
            .publish(registry, topic_key, message_type, priority, data, correlation_id)
            .await
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::In => "in",
        Direction::Out => "out",
    }
}

/// Splits a `ScanResult.codes` join back into individual codes; an empty
/// join means no scanner produced anything, not one empty-string code.
fn split_codes(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        Vec::new()
    } else {
        joined.split(';').map(str::to_string).collect()
    }
}

/// Subscribes to `coder.start`: on receipt, runs a scan window on the
/// gateway and publishes the collected codes as `coder.complete`.
struct CoderStartHandler {
    gateway: Arc<CoderGateway>,
    bus: Arc<dyn Publisher>,
    registry: Arc<TopicRegistry>,
    start_topic: String,
    scan_timeout_ms: Option<u64>,
}

#[async_trait]
impl Handler for CoderStartHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "coder gateway: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            return;
        }
        let payload: CoderStart = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "coder.start: undecodable payload");
                return;
            }
        };
        let Some(task_id) = envelope.correlation_id else {
            warn!("coder.start: missing correlation id, cannot attribute a scan to a task");
            return;
        };

        // The router already dispatches this handler on its own spawned
        // task, so a scan window running for seconds here does not block
        // dispatch of other inbound messages.
        info!(%task_id, direction = direction_str(payload.direction), "coder gateway: starting scan");
        let result = self.gateway.start_scan(direction_str(payload.direction), payload.stack_height, self.scan_timeout_ms).await;
        let codes = split_codes(&result.codes);
        let success = !codes.is_empty();
        let error_message = if success { None } else { Some("scan window closed with no codes".to_string()) };

        self.bus
            .publish(
                &self.registry,
                "coder.complete",
                MessageType::Event,
                Priority::Normal,
                json!({
                    "direction": payload.direction,
                    "stackHeight": payload.stack_height,
                    "codes": codes,
                    "timestamp": result.timestamp,
                    "success": success,
                    "errorMessage": error_message,
                }),
                Some(task_id),
            )
            .await;
    }

    fn can_handle(&self, topic: &str) -> bool {
        topic == self.start_topic
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.start_topic.clone()]
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();
    info!("starting coder gateway v{}", env!("CARGO_PKG_VERSION"));

    let (config, validation) = match load_configuration(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("failed to load configuration: {e}");
            process::exit(1);
        }
    };
    for warning in &validation.warnings {
        tracing::warn!(warning, "configuration warning");
    }
    if !validation.is_ok() {
        for e in &validation.errors {
            error!(error = %e, "configuration error");
        }
        process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("coder gateway failed: {e}");
        process::exit(1);
    }
    info!("coder gateway shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<(ServiceConfig, workcell_core::config::ValidationResult), Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => Ok(ServiceConfig::load_from_file(path, SERVICE_NAME)?),
        None => {
            for candidate in ["coder-gateway.toml", "config/coder-gateway.toml"] {
                let path = PathBuf::from(candidate);
                if path.exists() {
                    return Ok(ServiceConfig::load_from_file(&path, SERVICE_NAME)?);
                }
            }
            Err("no configuration file found; pass -c/--config or create coder-gateway.toml".into())
        }
    }
}

async fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let version = config.messages.version.clone();
    let registry = Arc::new(TopicRegistry::with_workflow_defaults());
    let router = Arc::new(Router::new());

    let bus_client = BusClient::new(config.clone(), router.clone())?;
    let bus = Arc::new(tokio::sync::Mutex::new(bus_client));
    let publisher: Arc<dyn Publisher> = Arc::new(SharedBus(bus.clone()));

    let gateway_config = CoderGatewayConfig {
        socket_address: std::env::var("CODER_GATEWAY_ADDRESS").unwrap_or_else(|_| CoderGatewayConfig::default().socket_address),
        socket_port: std::env::var("CODER_GATEWAY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| CoderGatewayConfig::default().socket_port),
        ..CoderGatewayConfig::default()
    };
    let gateway = Arc::new(CoderGateway::new(gateway_config));

    let start_topic = registry.resolve("coder.start", &version, &[])?;
    router.register(
        &start_topic,
        Arc::new(CoderStartHandler {
            gateway: gateway.clone(),
            bus: publisher,
            registry: registry.clone(),
            start_topic: start_topic.clone(),
            scan_timeout_ms: None,
        }),
    );

    gateway.start().await?;

    let health_port: u16 = std::env::var("HEALTH_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8081);
    let health_server = Arc::new(HealthServer::new(SERVICE_NAME.to_string(), health_port));
    let health_for_server = health_server.clone();
    tokio::spawn(async move {
        if let Err(e) = health_for_server.start().await {
            error!("health server error: {e}");
        }
    });

    metrics().set_service_state("connecting");
    bus.lock().await.start().await?;
    metrics().set_service_state("running");
    health_server.set_mqtt_connected(true).await;
    gateway.set_mqtt_connected(true);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("coder gateway running, listening for scanner connections");

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    metrics().set_service_state("stopping");
    health_server.set_mqtt_connected(false).await;
    gateway.set_mqtt_connected(false);
    gateway.stop().await;
    bus.lock().await.stop().await;
    metrics().set_service_state("stopped");

    Ok(())
}
