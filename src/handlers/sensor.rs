//! Sensor handler (C7): reacts to the grating trigger that starts an
//! outbound/inbound task.

use super::HandlerContext;
use crate::protocol::{Direction, Envelope, SensorTrigger};
use crate::routing::Handler;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

/// Handles `sensor.trigger`: records the requested direction in the Shared
/// State Store and hands the envelope off to the Workflow Engine, which
/// creates the task and requests the height measurement.
pub struct SensorHandler {
    ctx: HandlerContext,
    trigger_topic: String,
}

impl SensorHandler {
    pub fn new(ctx: HandlerContext, trigger_topic: impl Into<String>) -> Self {
        Self {
            ctx,
            trigger_topic: trigger_topic.into(),
        }
    }

    async fn on_trigger(&self, envelope: Envelope) {
        let direction: Direction = match serde_json::from_value::<SensorTrigger>(envelope.data.clone()) {
            Ok(payload) => payload.direction,
            Err(e) => {
                warn!(error = %e, "sensor.trigger: undecodable payload");
                return;
            }
        };

        self.ctx.state.set("sensor:grating", json!(direction));
        debug!(?direction, message_id = %envelope.message_id, "grating trigger received");

        self.ctx.workflow.on_trigger(direction, envelope.message_id).await;
    }
}

#[async_trait]
impl Handler for SensorHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        if topic != self.trigger_topic {
            return;
        }
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "sensor handler: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            debug!(%topic, "sensor handler: dropping expired envelope");
            return;
        }
        self.on_trigger(envelope).await;
    }

    fn can_handle(&self, topic: &str) -> bool {
        topic == self.trigger_topic
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.trigger_topic.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, Priority, ServiceDescriptor, TopicRegistry};
    use crate::state::StateStore;
    use crate::testing::mock_bus::MockBusClient;
    use crate::workflow::{GeometryConfig, WorkflowEngine};
    use std::sync::Arc;

    fn context() -> (HandlerContext, Arc<MockBusClient>) {
        let state = Arc::new(StateStore::new());
        let registry = Arc::new(TopicRegistry::with_workflow_defaults());
        let bus = Arc::new(MockBusClient::new("scheduler"));
        let workflow = Arc::new(WorkflowEngine::new(state.clone(), bus.clone(), registry.clone(), GeometryConfig::default()));
        (HandlerContext::new(state, bus.clone(), registry, workflow, "v1"), bus)
    }

    #[tokio::test]
    async fn trigger_stores_direction_and_starts_a_task() {
        let (ctx, bus) = context();
        let topic = "ios/v1/sensor/grating/trigger".to_string();
        let handler = SensorHandler::new(ctx.clone(), topic.clone());

        let envelope = Envelope::new(
            MessageType::Event,
            Priority::Normal,
            ServiceDescriptor::new("barcode-gateway", "bg-0"),
            json!({"direction": "out"}),
        );
        handler.handle(&topic, &envelope.serialize().unwrap()).await;

        assert_eq!(ctx.state.get("sensor:grating"), Some(json!("out")));
        assert_eq!(bus.published_topic_keys().await, vec!["vision.height.request"]);
    }

    #[tokio::test]
    async fn ignores_topics_it_does_not_own() {
        let (ctx, bus) = context();
        let handler = SensorHandler::new(ctx, "ios/v1/sensor/grating/trigger");

        handler.handle("ios/v1/unrelated/topic", b"not even json").await;

        assert!(bus.published().await.is_empty());
    }
}
