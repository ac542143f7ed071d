//! Dev tool: publish a single Envelope to a topic resolved from the topic
//! registry. Useful for exercising one workflow step (e.g. `sensor.trigger`
//! or `coder.result`) without a live sensor or scanner attached.

use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use uuid::Uuid;
use workcell_core::config::ServiceConfig;
use workcell_core::observability::init_default_logging;
use workcell_core::protocol::{MessageType, Priority, TopicRegistry};
use workcell_core::routing::Router;
use workcell_core::transport::mqtt::BusClient;

/// Delay after publish, before disconnecting, so the in-flight publish has
/// time to reach the broker.
const PUBLISH_SETTLE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "publish-envelope")]
#[command(about = "Publish a single Envelope to a topic resolved from the topic registry")]
#[command(version)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Registry key to resolve, e.g. "sensor.trigger" or "coder.result"
    #[arg(long)]
    topic_key: String,

    /// JSON payload carried as the envelope's data
    #[arg(long, default_value = "{}")]
    data: String,

    #[arg(long, value_enum, default_value = "event")]
    message_type: CliMessageType,

    #[arg(long, value_enum, default_value = "normal")]
    priority: CliPriority,

    /// Correlation id to attach (defaults to a fresh random id)
    #[arg(long)]
    correlation_id: Option<Uuid>,
}

#[derive(Clone, clap::ValueEnum)]
enum CliMessageType {
    Command,
    Event,
    Request,
    Response,
    Query,
    Notification,
    Heartbeat,
}

impl From<CliMessageType> for MessageType {
    fn from(value: CliMessageType) -> Self {
        match value {
            CliMessageType::Command => MessageType::Command,
            CliMessageType::Event => MessageType::Event,
            CliMessageType::Request => MessageType::Request,
            CliMessageType::Response => MessageType::Response,
            CliMessageType::Query => MessageType::Query,
            CliMessageType::Notification => MessageType::Notification,
            CliMessageType::Heartbeat => MessageType::Heartbeat,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum CliPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl From<CliPriority> for Priority {
    fn from(value: CliPriority) -> Self {
        match value {
            CliPriority::Low => Priority::Low,
            CliPriority::Normal => Priority::Normal,
            CliPriority::High => Priority::High,
            CliPriority::Critical => Priority::Critical,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    if let Err(e) = run(cli).await {
        eprintln!("failed to publish envelope: {e}");
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let candidates = ["publish-envelope.toml", "config/publish-envelope.toml", "scheduler.toml", "config/scheduler.toml"];
    let path = match config_path {
        Some(path) => path.clone(),
        None => candidates
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or("no configuration file found; pass -c/--config")?,
    };
    let (config, _) = ServiceConfig::load_from_file(&path, "publish-envelope")?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let data: Value = serde_json::from_str(&cli.data)?;
    let config = load_configuration(&cli.config)?;
    let version = config.messages.version.clone();
    let registry = Arc::new(TopicRegistry::with_workflow_defaults());
    let router = Arc::new(Router::new());

    let mut bus = BusClient::new(config, router)?;
    bus.start().await?;

    let correlation_id = cli.correlation_id.unwrap_or_else(Uuid::new_v4);
    // `BusClient::publish` always resolves topic keys with no positional
    // params, so only params-free keys (not `status.heartbeat`) work here.
    let topic = registry.resolve(&cli.topic_key, &version, &[])?;

    println!("publishing to {topic} (correlation {correlation_id})");
    let published = bus
        .publish(&registry, &cli.topic_key, cli.message_type.into(), cli.priority.into(), data, Some(correlation_id))
        .await;

    if !published {
        return Err(format!("publish failed for topic key '{}'", cli.topic_key).into());
    }

    sleep(PUBLISH_SETTLE).await;
    bus.stop().await;
    println!("published");
    Ok(())
}
