//! Dev tool: subscribes to bus topics and pretty-prints decoded Envelopes
//! as they arrive. Not part of the production topology; useful when wiring
//! up a new workcell or debugging a handler in isolation.

use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::error;
use workcell_core::config::ServiceConfig;
use workcell_core::protocol::{Envelope, MessageType, Priority};
use workcell_core::observability::init_default_logging;
use workcell_core::routing::{Handler, Router};
use workcell_core::transport::mqtt::BusClient;

const RESET: &str = "\x1b[0m";

fn paint(text: &str, code: &str) -> String {
    format!("{code}{text}{RESET}")
}

#[derive(Parser)]
#[command(name = "bus-monitor")]
#[command(about = "Subscribe to bus topics and print decoded envelopes")]
#[command(version)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Topic filter to subscribe to; MQTT wildcards (+, #) are honored
    #[arg(short, long, default_value = "ios/#")]
    topic: String,

    /// Print raw JSON instead of the colorized summary
    #[arg(long)]
    raw: bool,
}

struct PrintHandler {
    raw: bool,
}

fn color_code_for_type(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Command => "\x1b[1;36m",      // cyan
        MessageType::Event => "\x1b[1;32m",        // green
        MessageType::Request => "\x1b[1;33m",      // yellow
        MessageType::Response => "\x1b[1;34m",     // blue
        MessageType::Query => "\x1b[1;35m",        // magenta
        MessageType::Notification => "\x1b[0;37m", // white
        MessageType::Heartbeat => "\x1b[0;90m",    // bright black
    }
}

fn color_code_for_priority(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "\x1b[0;90m",
        Priority::Normal => "\x1b[0;37m",
        Priority::High => "\x1b[1;33m",
        Priority::Critical => "\x1b[1;31m",
    }
}

#[async_trait]
impl Handler for PrintHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        if self.raw {
            println!("{} {}", paint(topic, "\x1b[1;34m"), String::from_utf8_lossy(payload));
            return;
        }

        match Envelope::deserialize(payload) {
            Ok(envelope) => {
                let type_str = paint(&format!("{:?}", envelope.message_type), color_code_for_type(envelope.message_type));
                let priority_str = paint(&format!("{:?}", envelope.priority), color_code_for_priority(envelope.priority));
                println!(
                    "{} {} [{}] {} from {}\n  {}",
                    envelope.timestamp.format("%H:%M:%S%.3f"),
                    paint(topic, "\x1b[1;34m"),
                    type_str,
                    priority_str,
                    envelope.source.name,
                    envelope.data,
                );
                if let Some(correlation_id) = envelope.correlation_id {
                    println!("  correlation: {correlation_id}");
                }
            }
            Err(e) => {
                println!("{} {}", paint(topic, "\x1b[1;31m"), paint(&format!("undecodable payload: {e}"), "\x1b[1;31m"));
            }
        }
    }

    fn can_handle(&self, _topic: &str) -> bool {
        true
    }

    fn supported_topics(&self) -> Vec<String> {
        vec!["#".to_string()]
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    if let Err(e) = run(cli).await {
        error!("bus monitor failed: {e}");
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let candidates = ["bus-monitor.toml", "config/bus-monitor.toml", "scheduler.toml", "config/scheduler.toml"];
    let path = match config_path {
        Some(path) => path.clone(),
        None => candidates
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or("no configuration file found; pass -c/--config")?,
    };
    let (config, _) = ServiceConfig::load_from_file(&path, "bus-monitor")?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_configuration(&cli.config)?;
    let router = Arc::new(Router::new());
    router.set_default_handler(Arc::new(PrintHandler { raw: cli.raw }));

    let mut bus = BusClient::new(config, router)?;
    bus.start().await?;
    bus.subscribe(&cli.topic).await?;

    println!("listening on {}", cli.topic);

    signal::ctrl_c().await?;
    bus.stop().await;
    Ok(())
}
