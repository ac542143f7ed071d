//! MQTT v5 transport for the Bus Client.
//!
//! The module is split into four focused sub-modules:
//!
//! - [`connection`] - Pure connection state management and configuration
//! - [`message_handler`] - Pure message routing and processing logic
//! - [`health_monitor`] - Pure health monitoring and reconnection logic
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use workcell_core::transport::mqtt::BusClient;
//! use workcell_core::config::ServiceConfig;
//! use workcell_core::routing::Router;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let (config, validation) = ServiceConfig::load_from_file(
//!     std::path::Path::new("config.toml"),
//!     "motion-controller",
//! )?;
//! assert!(validation.is_ok());
//!
//! let mut client = BusClient::new(config, Arc::new(Router::new()))?;
//! client.start().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::{BatchResult, BusClient, Statistics};
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{
    ConnectionEvent, ConnectionQuality, HealthMetrics, HealthMonitor, ReconnectionDecision,
};
pub use message_handler::{EventRoute, MessageHandler};
