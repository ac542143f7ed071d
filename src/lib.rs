//! workcell-core
//!
//! Shared library backing the outbound/unloading workcell's three services
//! (scheduler, coder gateway, motion controller): the wire protocol every
//! MQTT publish carries, the topic registry, configuration loading, the
//! MQTT transport, message routing, shared cross-handler state, the
//! per-task workflow state machine, and the domain handlers that tie them
//! together.
//!
//! # Quick start
//!
//! ```rust
//! use workcell_core::protocol::{Envelope, MessageType, Priority, ServiceDescriptor};
//! use serde_json::json;
//!
//! let envelope = Envelope::new(
//!     MessageType::Event,
//!     Priority::Normal,
//!     ServiceDescriptor::new("scheduler", "scheduler-0"),
//!     json!({"direction": "out"}),
//! );
//! let bytes = envelope.serialize().unwrap();
//! let decoded = Envelope::deserialize(&bytes).unwrap();
//! assert_eq!(decoded.message_id, envelope.message_id);
//! ```

pub mod coder_gateway;
pub mod config;
pub mod error;
pub mod handlers;
pub mod motion;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod state;
pub mod testing;
pub mod transport;
pub mod workflow;

pub use config::ServiceConfig;
pub use error::WorkcellError;
pub use protocol::{Envelope, MessageType, Priority, ServiceDescriptor, TopicRegistry};
pub use transport::mqtt::BusClient;
