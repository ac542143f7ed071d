//! Per-domain handlers (C7): the concrete [`Handler`](crate::routing::Handler)
//! implementations registered with the Router at service startup.

pub mod coder;
pub mod default;
pub mod motion;
pub mod order;
pub mod sensor;
pub mod system;
pub mod vision;

pub use coder::CoderHandler;
pub use default::DefaultHandler;
pub use motion::MotionHandler;
pub use order::OrderHandler;
pub use sensor::SensorHandler;
pub use system::SystemHandler;
pub use vision::VisionHandler;

use crate::protocol::TopicRegistry;
use crate::state::StateStore;
use crate::transport::Publisher;
use crate::workflow::WorkflowEngine;
use std::sync::Arc;

/// Shared dependencies every domain handler needs: where to read/write
/// cross-handler state, where to publish follow-on messages, the registry
/// used to resolve topic keys for those publishes, and the Workflow Engine
/// that owns outbound-task state transitions.
#[derive(Clone)]
pub struct HandlerContext {
    pub state: Arc<StateStore>,
    pub bus: Arc<dyn Publisher>,
    pub registry: Arc<TopicRegistry>,
    pub workflow: Arc<WorkflowEngine>,
    pub version: String,
}

impl HandlerContext {
    pub fn new(
        state: Arc<StateStore>,
        bus: Arc<dyn Publisher>,
        registry: Arc<TopicRegistry>,
        workflow: Arc<WorkflowEngine>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            state,
            bus,
            registry,
            workflow,
            version: version.into(),
        }
    }
}
