//! Scheduler entry point: hosts the Bus Client, Router, Handler Set,
//! Shared State Store, and Workflow Engine for one outbound/unloading
//! workcell.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use workcell_core::config::ServiceConfig;
use workcell_core::handlers::{CoderHandler, DefaultHandler, HandlerContext, MotionHandler, OrderHandler, SensorHandler, SystemHandler, VisionHandler};
use workcell_core::observability::{init_default_logging, metrics, HealthServer};
use workcell_core::protocol::TopicRegistry;
use workcell_core::routing::{Handler, Router};
use workcell_core::state::StateStore;
use workcell_core::transport::mqtt::BusClient;
use workcell_core::transport::Publisher;
use workcell_core::workflow::WorkflowEngine;

const SERVICE_NAME: &str = "scheduler";

#[derive(Parser)]
#[command(name = "scheduler")]
#[command(about = "Outbound/unloading workcell coordination scheduler")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler
    Run,
    /// Load and validate configuration without starting the bus
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

/// Delegates [`Publisher::publish`] to a [`BusClient`] behind a lock, so
/// handlers can hold a shared `Arc<dyn Publisher>` while `main` retains the
/// exclusive access `BusClient::start`/`stop` require.
struct SharedBus(Arc<tokio::sync::Mutex<BusClient>>);

#[async_trait::async_trait]
impl Publisher for SharedBus {
    async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: workcell_core::protocol::MessageType,
        priority: workcell_core::protocol::Priority,
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

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    info!("starting scheduler v{}", env!("CARGO_PKG_VERSION"));

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

    let result = match cli.command {
        Commands::Run => run(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("scheduler failed: {e}");
        process::exit(1);
    }
    info!("scheduler shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<(ServiceConfig, workcell_core::config::ValidationResult), Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => Ok(ServiceConfig::load_from_file(path, SERVICE_NAME)?),
        None => {
            for candidate in ["scheduler.toml", "config/scheduler.toml"] {
                let path = PathBuf::from(candidate);
                if path.exists() {
                    return Ok(ServiceConfig::load_from_file(&path, SERVICE_NAME)?);
                }
            }
            Err("no configuration file found; pass -c/--config or create scheduler.toml".into())
        }
    }
}

fn handle_config_command(config: &ServiceConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

async fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let version = config.messages.version.clone();
    let geometry: workcell_core::workflow::GeometryConfig = config.geometry.into();

    let registry = Arc::new(TopicRegistry::with_workflow_defaults());
    let state = Arc::new(StateStore::new());
    let router = Arc::new(Router::new());

    let bus_client = BusClient::new(config.clone(), router.clone())?;
    let bus = Arc::new(tokio::sync::Mutex::new(bus_client));
    let publisher: Arc<dyn Publisher> = Arc::new(SharedBus(bus.clone()));

    let workflow = Arc::new(WorkflowEngine::new(state.clone(), publisher.clone(), registry.clone(), geometry));
    let ctx = HandlerContext::new(state.clone(), publisher.clone(), registry.clone(), workflow.clone(), version.as_str());

    register_handlers(&router, &registry, ctx.clone(), &version)?;

    let health_port: u16 = std::env::var("HEALTH_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
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

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("scheduler running, dispatching workcell events");

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    metrics().set_service_state("stopping");
    health_server.set_mqtt_connected(false).await;
    bus.lock().await.stop().await;
    metrics().set_service_state("stopped");

    Ok(())
}

/// Registers every domain handler's topics with the Router. Must run
/// before [`BusClient::start`] so inbound events have a handler to
/// dispatch to as soon as the broker connection is confirmed.
fn register_handlers(
    router: &Arc<Router>,
    registry: &Arc<TopicRegistry>,
    ctx: HandlerContext,
    version: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolve = |key: &str, params: &[&str]| -> Result<String, Box<dyn std::error::Error>> { Ok(registry.resolve(key, version, params)?) };

    let sensor_topic = resolve("sensor.trigger", &[])?;
    router.register(&sensor_topic, Arc::new(SensorHandler::new(ctx.clone(), sensor_topic.clone())));

    let vision_detection = resolve("vision.detection", &[])?;
    let vision_height_result = resolve("vision.height.result", &[])?;
    let vision_result = resolve("vision.result", &[])?;
    let vision_handler: Arc<dyn Handler> =
        Arc::new(VisionHandler::new(ctx.clone(), vision_detection.clone(), vision_height_result.clone(), vision_result.clone()));
    router.register(&vision_detection, vision_handler.clone());
    router.register(&vision_height_result, vision_handler.clone());
    router.register(&vision_result, vision_handler);

    let motion_complete = resolve("motion.complete", &[])?;
    let motion_position = resolve("motion.position", &[])?;
    let motion_handler: Arc<dyn Handler> = Arc::new(MotionHandler::new(ctx.clone(), motion_complete.clone(), motion_position.clone()));
    router.register(&motion_complete, motion_handler.clone());
    router.register(&motion_position, motion_handler);

    let coder_result = resolve("coder.result", &[])?;
    let coder_complete = resolve("coder.complete", &[])?;
    let coder_handler: Arc<dyn Handler> = Arc::new(CoderHandler::new(ctx.clone(), coder_result.clone(), coder_complete.clone()));
    router.register(&coder_result, coder_handler.clone());
    router.register(&coder_complete, coder_handler);

    let order_new = resolve("order.new", &[])?;
    router.register(&order_new, Arc::new(OrderHandler::new(ctx.clone(), order_new.clone())));

    // `status.heartbeat`'s pattern carries a positional source segment;
    // resolving it with "+" turns it into the MQTT wildcard that accepts a
    // heartbeat from any service.
    let heartbeat_pattern = resolve("status.heartbeat", &["+"])?;
    let status_query = resolve("system.status.query", &[])?;
    let config_update = resolve("system.config.update", &[])?;
    let system_handler: Arc<dyn Handler> =
        Arc::new(SystemHandler::new(ctx.clone(), heartbeat_pattern.clone(), status_query.clone(), config_update.clone()));
    router.register(&heartbeat_pattern, system_handler.clone());
    router.register(&status_query, system_handler.clone());
    router.register(&config_update, system_handler);

    router.set_default_handler(Arc::new(DefaultHandler::new(ctx)));

    Ok(())
}
