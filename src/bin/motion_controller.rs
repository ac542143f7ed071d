//! Motion Controller entry point: hosts the C10 Motion Adapter driving a
//! single positioning axis, bridging `motion.move`/`motion.stop` commands
//! and `motion.complete`/`motion.position` telemetry to the bus.

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use workcell_core::config::ServiceConfig;
use workcell_core::motion::{MotionAdapter, MotionAdapterConfig, SimulatedAxis, MM_TO_PULSES};
use workcell_core::observability::{init_default_logging, metrics, HealthServer};
use workcell_core::protocol::{Envelope, MessageType, MotionMove, Priority, TopicRegistry};
use workcell_core::routing::{Handler, Router};
use workcell_core::transport::mqtt::BusClient;
use workcell_core::transport::Publisher;

const SERVICE_NAME: &str = "motion-controller";
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "motion-controller")]
#[command(about = "Motion Adapter driving a single positioning axis")]
#[command(version)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Delegates [`Publisher::publish`] to a [`BusClient`] behind a lock, so the
/// move handler and the telemetry loop can both publish while `main`
/// retains the exclusive access `BusClient::start`/`stop` require.
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

/// Subscribes to `motion.move` and `motion.stop`: drives the adapter and
/// publishes `motion.complete` for every move.
struct MotionCommandHandler {
    adapter: Arc<MotionAdapter>,
    bus: Arc<dyn Publisher>,
    registry: Arc<TopicRegistry>,
    move_topic: String,
    stop_topic: String,
}

impl MotionCommandHandler {
    async fn on_move(&self, envelope: Envelope) {
        let payload: MotionMove = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "motion.move: undecodable payload");
                return;
            }
        };

        // The router already dispatches this handler on its own spawned
        // task, so a move taking seconds here does not block dispatch of
        // telemetry and stop commands.
        let position_pulses = (payload.position_mm * MM_TO_PULSES / 1000.0).round() as i64;
        let speed = payload.speed.map(|s| s as f64);
        info!(task_id = %payload.task_id, position_mm = payload.position_mm, position_pulses, "motion controller: moving");

        let result = self.adapter.move_absolute(position_pulses, speed).await;
        let status = self.adapter.get_status().await;

        self.bus
            .publish(
                &self.registry,
                "motion.complete",
                MessageType::Event,
                Priority::Normal,
                json!({
                    "taskId": payload.task_id,
                    "finalPosition": status.position,
                    "success": result.is_ok(),
                    "timestamp": status.timestamp,
                }),
                Some(payload.task_id),
            )
            .await;
    }

    async fn on_stop(&self) {
        if let Err(e) = self.adapter.stop().await {
            warn!(error = %e, "motion.stop: stop command failed");
        }
    }
}

#[async_trait]
impl Handler for MotionCommandHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "motion controller: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            return;
        }

        if topic == self.move_topic {
            self.on_move(envelope).await;
        } else if topic == self.stop_topic {
            self.on_stop().await;
        }
    }

    fn can_handle(&self, topic: &str) -> bool {
        topic == self.move_topic || topic == self.stop_topic
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.move_topic.clone(), self.stop_topic.clone()]
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();
    info!("starting motion controller v{}", env!("CARGO_PKG_VERSION"));

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
        error!("motion controller failed: {e}");
        process::exit(1);
    }
    info!("motion controller shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<(ServiceConfig, workcell_core::config::ValidationResult), Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => Ok(ServiceConfig::load_from_file(path, SERVICE_NAME)?),
        None => {
            for candidate in ["motion-controller.toml", "config/motion-controller.toml"] {
                let path = PathBuf::from(candidate);
                if path.exists() {
                    return Ok(ServiceConfig::load_from_file(&path, SERVICE_NAME)?);
                }
            }
            Err("no configuration file found; pass -c/--config or create motion-controller.toml".into())
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

    // The real fieldbus driver is out of scope; this service always drives
    // a simulated axis in its place.
    let adapter = Arc::new(MotionAdapter::new(Arc::new(SimulatedAxis::new()), MotionAdapterConfig::default()));
    adapter.initialize().await?;

    let move_topic = registry.resolve("motion.move", &version, &[])?;
    let stop_topic = registry.resolve("motion.stop", &version, &[])?;
    let command_handler: Arc<dyn Handler> = Arc::new(MotionCommandHandler {
        adapter: adapter.clone(),
        bus: publisher.clone(),
        registry: registry.clone(),
        move_topic: move_topic.clone(),
        stop_topic: stop_topic.clone(),
    });
    router.register(&move_topic, command_handler.clone());
    router.register(&stop_topic, command_handler);

    let health_port: u16 = std::env::var("HEALTH_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8082);
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

    let telemetry_bus = publisher.clone();
    let telemetry_registry = registry.clone();
    let telemetry_adapter = adapter.clone();
    let telemetry_task = tokio::spawn(async move {
        let mut ticker = interval(TELEMETRY_INTERVAL);
        loop {
            ticker.tick().await;
            let status = telemetry_adapter.get_status().await;
            telemetry_bus
                .publish(
                    &telemetry_registry,
                    "motion.position",
                    MessageType::Event,
                    Priority::Low,
                    json!({"x": 0.0, "y": 0.0, "z": status.position as f64 / MM_TO_PULSES * 1000.0, "timestamp": status.timestamp}),
                    None,
                )
                .await;
        }
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("motion controller running, driving the positioning axis");

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    telemetry_task.abort();
    metrics().set_service_state("stopping");
    health_server.set_mqtt_connected(false).await;
    adapter.shutdown().await?;
    bus.lock().await.stop().await;
    metrics().set_service_state("stopped");

    Ok(())
}
