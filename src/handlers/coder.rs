//! Coder handler (C7): validates scanned codes and closes out the
//! scanning step of the Workflow Engine.

use super::HandlerContext;
use crate::protocol::{CoderComplete, CoderResult, Envelope, MessageType, Priority};
use crate::routing::Handler;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

/// Format rules a scanned code must satisfy per its declared type.
fn validate_code(code_type: &str, code: &str) -> Result<(), String> {
    match code_type {
        "qr" | "qrcode" => {
            if (3..1000).contains(&code.len()) {
                Ok(())
            } else {
                Err(format!("qr code length {} out of range 3..1000", code.len()))
            }
        }
        "barcode" => {
            if (8..=20).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit()) {
                Ok(())
            } else {
                Err("barcode must be 8..=20 ASCII digits".to_string())
            }
        }
        "datamatrix" => {
            if code.len() >= 3 {
                Ok(())
            } else {
                Err("datamatrix code must be non-empty with length >= 3".to_string())
            }
        }
        other => Err(format!("unknown code type '{other}'")),
    }
}

pub struct CoderHandler {
    ctx: HandlerContext,
    result_topic: String,
    complete_topic: String,
}

impl CoderHandler {
    pub fn new(ctx: HandlerContext, result_topic: impl Into<String>, complete_topic: impl Into<String>) -> Self {
        Self {
            ctx,
            result_topic: result_topic.into(),
            complete_topic: complete_topic.into(),
        }
    }

    async fn on_result(&self, envelope: &Envelope) {
        let payload: CoderResult = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "coder.result: undecodable payload");
                return;
            }
        };

        self.ctx
            .state
            .set(format!("task:{}:coder:code", payload.task_id), json!(payload.code));
        self.ctx
            .state
            .set(format!("task:{}:coder:type", payload.task_id), json!(payload.code_type));

        let (topic_key, data) = match validate_code(&payload.code_type, &payload.code) {
            Ok(()) => (
                "coder.validation.success",
                json!({"taskId": payload.task_id, "code": payload.code, "codeType": payload.code_type}),
            ),
            Err(reason) => (
                "coder.validation.failed",
                json!({"taskId": payload.task_id, "code": payload.code, "codeType": payload.code_type, "reason": reason}),
            ),
        };
        self.ctx
            .bus
            .publish(&self.ctx.registry, topic_key, MessageType::Event, Priority::Normal, data, Some(payload.task_id))
            .await;
    }

    /// `coder.complete` carries no `task_id`; the task is identified by the
    /// `correlation_id` set when `coder.start` was published.
    async fn on_complete(&self, envelope: &Envelope) {
        let payload: CoderComplete = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "coder.complete: undecodable payload");
                return;
            }
        };

        let Some(task_id) = envelope.correlation_id else {
            warn!("coder.complete: missing correlation id, cannot attribute to a task");
            self.ctx
                .bus
                .publish(
                    &self.ctx.registry,
                    "coder.validation.error",
                    MessageType::Event,
                    Priority::High,
                    json!({"reason": "coder.complete without correlation id"}),
                    None,
                )
                .await;
            return;
        };

        self.ctx
            .state
            .set(format!("task:{task_id}:coder_status"), json!(if payload.success { "completed" } else { "failed" }));

        self.ctx
            .workflow
            .on_scan_complete(task_id, envelope.message_id, payload.codes, payload.success, payload.error_message)
            .await;
    }
}

#[async_trait]
impl Handler for CoderHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "coder handler: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            debug!(%topic, "coder handler: dropping expired envelope");
            return;
        }

        if topic == self.result_topic {
            self.on_result(&envelope).await;
        } else if topic == self.complete_topic {
            self.on_complete(&envelope).await;
        }
    }

    fn can_handle(&self, topic: &str) -> bool {
        topic == self.result_topic || topic == self.complete_topic
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.result_topic.clone(), self.complete_topic.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Direction, MessageType as MType, Priority as Prio, ServiceDescriptor, TopicRegistry};
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

    fn handler(ctx: HandlerContext) -> CoderHandler {
        CoderHandler::new(ctx, "ios/v1/coder/service/result", "ios/v1/coder/service/complete")
    }

    #[tokio::test]
    async fn valid_barcode_publishes_success() {
        let (ctx, bus) = context();
        let h = handler(ctx.clone());
        let task_id = Uuid::new_v4();
        let envelope = Envelope::new(
            MType::Event,
            Prio::Normal,
            ServiceDescriptor::new("coder-gateway", "cg-0"),
            json!({"taskId": task_id, "code": "12345678", "codeType": "barcode", "confidence": 0.95, "timestamp": chrono::Utc::now()}),
        );
        h.handle("ios/v1/coder/service/result", &envelope.serialize().unwrap()).await;

        assert!(bus.published_topic_keys().await.contains(&"coder.validation.success".to_string()));
    }

    #[tokio::test]
    async fn malformed_barcode_publishes_failure() {
        let (ctx, bus) = context();
        let h = handler(ctx.clone());
        let task_id = Uuid::new_v4();
        let envelope = Envelope::new(
            MType::Event,
            Prio::Normal,
            ServiceDescriptor::new("coder-gateway", "cg-0"),
            json!({"taskId": task_id, "code": "AB", "codeType": "barcode", "confidence": 0.2, "timestamp": chrono::Utc::now()}),
        );
        h.handle("ios/v1/coder/service/result", &envelope.serialize().unwrap()).await;

        assert!(bus.published_topic_keys().await.contains(&"coder.validation.failed".to_string()));
    }

    #[tokio::test]
    async fn complete_advances_task_via_correlation_id() {
        let (ctx, _bus) = context();
        let task_id = ctx.workflow.on_trigger(Direction::Out, Uuid::new_v4()).await.unwrap();
        ctx.workflow.on_height_result(task_id, Uuid::new_v4(), 5.0).await;
        ctx.workflow.on_motion_complete(task_id, Uuid::new_v4(), true).await;

        let h = handler(ctx.clone());
        let envelope = Envelope::new(
            MType::Event,
            Prio::Normal,
            ServiceDescriptor::new("coder-gateway", "cg-0"),
            json!({"direction": "out", "stackHeight": 5.0, "codes": ["A", "B"], "timestamp": chrono::Utc::now(), "success": true}),
        )
        .with_correlation_id(task_id);
        h.handle("ios/v1/coder/service/complete", &envelope.serialize().unwrap()).await;

        assert_eq!(ctx.workflow.status(task_id).await, Some(TaskStatus::OrderPending));
    }
}
