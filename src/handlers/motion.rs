//! Motion handler (C7): records motion telemetry and hands completion
//! events to the Workflow Engine.

use super::HandlerContext;
use crate::protocol::{Envelope, MessageType, MotionComplete, MotionPosition, Priority};
use crate::routing::Handler;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

pub struct MotionHandler {
    ctx: HandlerContext,
    complete_topic: String,
    position_topic: String,
}

impl MotionHandler {
    pub fn new(ctx: HandlerContext, complete_topic: impl Into<String>, position_topic: impl Into<String>) -> Self {
        Self {
            ctx,
            complete_topic: complete_topic.into(),
            position_topic: position_topic.into(),
        }
    }

    async fn on_complete(&self, envelope: Envelope) {
        let payload: MotionComplete = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "motion.complete: undecodable payload");
                return;
            }
        };

        self.ctx
            .state
            .set(format!("task:{}:motion_status", payload.task_id), json!("completed"));
        self.ctx
            .state
            .set(format!("task:{}:final_position", payload.task_id), json!(payload.final_position));

        self.ctx
            .bus
            .publish(
                &self.ctx.registry,
                "motion.next_step",
                MessageType::Notification,
                Priority::Normal,
                json!({"taskId": payload.task_id, "finalPosition": payload.final_position}),
                Some(payload.task_id),
            )
            .await;

        self.ctx
            .workflow
            .on_motion_complete(payload.task_id, envelope.message_id, payload.success)
            .await;
    }

    fn on_position(&self, envelope: &Envelope) {
        let payload: MotionPosition = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "motion.position: undecodable payload");
                return;
            }
        };
        self.ctx.state.set("motion:current_position", json!({"x": payload.x, "y": payload.y, "z": payload.z}));
        self.ctx.state.set("motion:last_update", json!(payload.timestamp));
    }
}

#[async_trait]
impl Handler for MotionHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "motion handler: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            debug!(%topic, "motion handler: dropping expired envelope");
            return;
        }

        if topic == self.complete_topic {
            self.on_complete(envelope).await;
        } else if topic == self.position_topic {
            self.on_position(&envelope);
        }
    }

    fn can_handle(&self, topic: &str) -> bool {
        topic == self.complete_topic || topic == self.position_topic
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.complete_topic.clone(), self.position_topic.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Priority as Prio, ServiceDescriptor, TopicRegistry};
    use crate::state::StateStore;
    use crate::testing::mock_bus::MockBusClient;
    use crate::workflow::{GeometryConfig, WorkflowEngine};
    use std::sync::Arc;
    use uuid::Uuid;

    fn context() -> (HandlerContext, Arc<MockBusClient>) {
        let state = Arc::new(StateStore::new());
        let registry = Arc::new(TopicRegistry::with_workflow_defaults());
        let bus = Arc::new(MockBusClient::new("scheduler"));
        let workflow = Arc::new(WorkflowEngine::new(state.clone(), bus.clone(), registry.clone(), GeometryConfig::default()));
        (HandlerContext::new(state, bus.clone(), registry, workflow, "v1"), bus)
    }

    #[tokio::test]
    async fn motion_complete_records_state_and_advances_the_workflow() {
        let (ctx, bus) = context();
        let task_id = ctx.workflow.on_trigger(crate::protocol::Direction::Out, Uuid::new_v4()).await.unwrap();
        ctx.workflow.on_height_result(task_id, Uuid::new_v4(), 12.0).await;

        let handler = MotionHandler::new(ctx.clone(), "ios/v1/motion/control/complete", "ios/v1/motion/control/position");
        let envelope = Envelope::new(
            MessageType::Event,
            Prio::Normal,
            ServiceDescriptor::new("motion-controller", "mc-0"),
            json!({"taskId": task_id, "finalPosition": 4200, "success": true, "timestamp": chrono::Utc::now()}),
        );
        handler.handle("ios/v1/motion/control/complete", &envelope.serialize().unwrap()).await;

        assert_eq!(ctx.state.get(&format!("task:{task_id}:motion_status")), Some(json!("completed")));
        assert_eq!(ctx.state.get(&format!("task:{task_id}:final_position")), Some(json!(4200)));
        assert!(bus.published_topic_keys().await.contains(&"coder.start".to_string()));
    }

    #[tokio::test]
    async fn motion_position_updates_current_position_state() {
        let (ctx, _bus) = context();
        let handler = MotionHandler::new(ctx.clone(), "ios/v1/motion/control/complete", "ios/v1/motion/control/position");
        let envelope = Envelope::new(
            MessageType::Event,
            Prio::Normal,
            ServiceDescriptor::new("motion-controller", "mc-0"),
            json!({"x": 1.0, "y": 2.0, "z": 3.0, "timestamp": chrono::Utc::now()}),
        );
        handler.handle("ios/v1/motion/control/position", &envelope.serialize().unwrap()).await;

        assert!(ctx.state.contains("motion:current_position"));
        assert!(ctx.state.contains("motion:last_update"));
    }
}
