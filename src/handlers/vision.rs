//! Vision handler (C7): persists detections and hands height measurements
//! to the Workflow Engine.

use super::HandlerContext;
use crate::protocol::{DetectedObjectType, Envelope, VisionDetection, VisionHeightResult};
use crate::routing::Handler;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

pub struct VisionHandler {
    ctx: HandlerContext,
    detection_topic: String,
    height_result_topic: String,
    result_topic: String,
}

impl VisionHandler {
    pub fn new(
        ctx: HandlerContext,
        detection_topic: impl Into<String>,
        height_result_topic: impl Into<String>,
        result_topic: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            detection_topic: detection_topic.into(),
            height_result_topic: height_result_topic.into(),
            result_topic: result_topic.into(),
        }
    }

    fn on_detection(&self, envelope: &Envelope) {
        let payload: VisionDetection = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "vision.detection: undecodable payload");
                return;
            }
        };

        let classified: Vec<_> = payload
            .detected_objects
            .iter()
            .map(|object| {
                let kind = match object.object_type {
                    DetectedObjectType::Package => "package",
                    DetectedObjectType::Qrcode => "qrcode",
                    DetectedObjectType::Barcode => "barcode",
                };
                json!({"type": kind, "confidence": object.confidence, "content": object.content})
            })
            .collect();

        self.ctx
            .state
            .set(format!("vision:{}:detection", payload.task_id), json!(classified));
    }

    /// `vision.height.result` carries no `task_id` in its payload; the
    /// originating request set `correlation_id` to the task id, and a
    /// well-behaved vision service echoes it back.
    async fn on_height_result(&self, envelope: &Envelope) {
        let payload: VisionHeightResult = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "vision.height.result: undecodable payload");
                return;
            }
        };
        self.ctx.state.set("min_height", json!(payload.min_height));

        let Some(task_id) = envelope.correlation_id else {
            warn!("vision.height.result: missing correlation id, cannot attribute to a task");
            return;
        };
        self.ctx
            .workflow
            .on_height_result(task_id, envelope.message_id, payload.min_height)
            .await;
    }

    fn on_result(&self, envelope: &Envelope) {
        let task_id = envelope
            .correlation_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.ctx.state.set(format!("vision:{task_id}:result"), envelope.data.clone());
    }
}

#[async_trait]
impl Handler for VisionHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "vision handler: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            debug!(%topic, "vision handler: dropping expired envelope");
            return;
        }

        if topic == self.detection_topic {
            self.on_detection(&envelope);
        } else if topic == self.height_result_topic {
            self.on_height_result(&envelope).await;
        } else if topic == self.result_topic {
            self.on_result(&envelope);
        }
    }

    fn can_handle(&self, topic: &str) -> bool {
        [&self.detection_topic, &self.height_result_topic, &self.result_topic].contains(&&topic.to_string())
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.detection_topic.clone(), self.height_result_topic.clone(), self.result_topic.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Direction, MessageType, Priority, ServiceDescriptor, TopicRegistry};
    use crate::state::StateStore;
    use crate::testing::mock_bus::MockBusClient;
    use crate::workflow::{GeometryConfig, TaskStatus, WorkflowEngine};
    use std::sync::Arc;
    use uuid::Uuid;

    fn context() -> (HandlerContext, Arc<MockBusClient>) {
        let state = Arc::new(StateStore::new());
        let registry = Arc::new(TopicRegistry::with_workflow_defaults());
        let bus = Arc::new(MockBusClient::new("scheduler"));
        let workflow = Arc::new(WorkflowEngine::new(state.clone(), bus.clone(), registry.clone(), GeometryConfig::default()));
        (HandlerContext::new(state, bus.clone(), registry, workflow, "v1"), bus)
    }

    fn handler(ctx: HandlerContext) -> VisionHandler {
        VisionHandler::new(
            ctx,
            "ios/v1/vision/camera/detection",
            "ios/v1/vision/camera/height/result",
            "ios/v1/vision/camera/result",
        )
    }

    #[tokio::test]
    async fn height_result_advances_task_via_correlation_id() {
        let (ctx, _bus) = context();
        let task_id = ctx.workflow.on_trigger(Direction::In, Uuid::new_v4()).await.unwrap();
        let h = handler(ctx.clone());

        let envelope = Envelope::new(
            MessageType::Event,
            Priority::Normal,
            ServiceDescriptor::new("vision-service", "vs-0"),
            json!({"minHeight": 7.5, "timestamp": chrono::Utc::now()}),
        )
        .with_correlation_id(task_id);
        h.handle("ios/v1/vision/camera/height/result", &envelope.serialize().unwrap()).await;

        assert_eq!(ctx.state.get("min_height"), Some(json!(7.5)));
        assert_eq!(ctx.workflow.status(task_id).await, Some(TaskStatus::Moving));
    }

    #[tokio::test]
    async fn detection_classifies_each_object_by_type() {
        let (ctx, _bus) = context();
        let h = handler(ctx.clone());
        let task_id = Uuid::new_v4();

        let envelope = Envelope::new(
            MessageType::Event,
            Priority::Normal,
            ServiceDescriptor::new("vision-service", "vs-0"),
            json!({
                "taskId": task_id,
                "detectedObjects": [{"type": "qrcode", "x": 0.0, "y": 0.0, "width": 1.0, "height": 1.0, "confidence": 0.9}],
                "timestamp": chrono::Utc::now(),
            }),
        );
        h.handle("ios/v1/vision/camera/detection", &envelope.serialize().unwrap()).await;

        let stored = ctx.state.get(&format!("vision:{task_id}:detection")).unwrap();
        assert_eq!(stored[0]["type"], json!("qrcode"));
    }
}
