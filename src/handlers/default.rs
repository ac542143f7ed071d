//! Default handler (C7): catch-all for any topic no registered handler
//! claimed, reached via the Router's wildcard/default fallback.

use super::HandlerContext;
use crate::protocol::{MessageType, Priority};
use crate::routing::Handler;
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

pub struct DefaultHandler {
    ctx: HandlerContext,
}

impl DefaultHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    /// `test/`, `debug/`, `log/` topics get a lightweight classification on
    /// top of the generic unknown-topic bookkeeping; every other topic only
    /// gets that bookkeeping.
    fn basic_processing(&self, topic: &str, raw: &[u8]) {
        let category = if topic.starts_with("test/") {
            "test"
        } else if topic.starts_with("debug/") {
            "debug"
        } else if topic.starts_with("log/") {
            "log"
        } else {
            return;
        };
        self.ctx
            .state
            .set(format!("unclassified:{category}:{topic}"), json!({"bytes": raw.len()}));
    }
}

#[async_trait]
impl Handler for DefaultHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        warn!(%topic, bytes = payload.len(), "message on unregistered topic");

        let raw = String::from_utf8_lossy(payload).to_string();
        let key = format!("unknown_messages:{}:{}", chrono::Utc::now().to_rfc3339(), Uuid::new_v4());
        self.ctx.state.set(key, json!({"topic": topic, "raw": raw}));

        self.basic_processing(topic, payload);

        self.ctx
            .bus
            .publish(
                &self.ctx.registry,
                "system.events.unknown_topic",
                MessageType::Event,
                Priority::Low,
                json!({"topic": topic, "byteLen": payload.len()}),
                None,
            )
            .await;
    }

    fn can_handle(&self, _topic: &str) -> bool {
        true
    }

    fn supported_topics(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TopicRegistry;
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
    async fn unknown_topic_is_recorded_and_announced() {
        let (ctx, bus) = context();
        let handler = DefaultHandler::new(ctx.clone());
        handler.handle("ios/v1/mystery/thing", b"raw payload").await;

        let recorded = ctx.state.keys().into_iter().filter(|k| k.starts_with("unknown_messages:")).count();
        assert_eq!(recorded, 1);
        assert!(bus.published_topic_keys().await.contains(&"system.events.unknown_topic".to_string()));
    }

    #[tokio::test]
    async fn debug_prefixed_topic_also_gets_classified() {
        let (ctx, _bus) = context();
        let handler = DefaultHandler::new(ctx.clone());
        handler.handle("debug/probe", b"x").await;

        assert!(ctx.state.contains("unclassified:debug:debug/probe"));
    }
}
