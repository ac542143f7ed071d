//! In-process mock Bus implementations so handlers, the Router, and the
//! Workflow Engine can be exercised without a live broker.
//!
//! A recording double that implements the same trait surface as the real
//! transport and lets tests assert on what was published.

use crate::protocol::{Envelope, MessageType, Priority, ServiceDescriptor, TopicRegistry};
use crate::transport::Publisher;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One recorded call to [`Publisher::publish`].
#[derive(Debug, Clone)]
pub struct PublishedEnvelope {
    pub topic_key: String,
    pub message_type: MessageType,
    pub priority: Priority,
    pub data: Value,
    pub correlation_id: Option<Uuid>,
}

/// Records every publish it receives instead of touching a broker. Always
/// resolves the topic key against the supplied registry so tests can assert
/// the key was actually registered; if `fail_resolution` keys are set, those
/// calls report failure the way a real unregistered-key publish would.
#[derive(Default)]
pub struct MockBusClient {
    pub published: Mutex<Vec<PublishedEnvelope>>,
    pub service: String,
}

impl MockBusClient {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            service: service.into(),
        }
    }

    pub async fn published(&self) -> Vec<PublishedEnvelope> {
        self.published.lock().await.clone()
    }

    pub async fn published_topic_keys(&self) -> Vec<String> {
        self.published.lock().await.iter().map(|p| p.topic_key.clone()).collect()
    }

    pub async fn clear(&self) {
        self.published.lock().await.clear();
    }

    /// Re-derives the Envelope that would have been placed on the wire for
    /// one recorded call, using this mock's service identity as the source.
    pub fn to_envelope(&self, call: &PublishedEnvelope) -> Envelope {
        let mut envelope = Envelope::new(
            call.message_type,
            call.priority,
            ServiceDescriptor::new(self.service.clone(), format!("{}-mock", self.service)),
            call.data.clone(),
        );
        if let Some(id) = call.correlation_id {
            envelope = envelope.with_correlation_id(id);
        }
        envelope
    }
}

#[async_trait]
impl Publisher for MockBusClient {
    async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: MessageType,
        priority: Priority,
        data: Value,
        correlation_id: Option<Uuid>,
    ) -> bool {
        if registry.resolve(topic_key, "v1", &[]).is_err() && registry.resolve(topic_key, "v1", &[&self.service]).is_err() {
            return false;
        }
        self.published.lock().await.push(PublishedEnvelope {
            topic_key: topic_key.to_string(),
            message_type,
            priority,
            data,
            correlation_id,
        });
        true
    }
}

/// A [`Publisher`] that accepts and discards every publish. Used to satisfy
/// handler construction in tests that only care about one handler's own
/// publish path and stub out the rest of `HandlerContext`.
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(
        &self,
        _registry: &TopicRegistry,
        _topic_key: &str,
        _message_type: MessageType,
        _priority: Priority,
        _data: Value,
        _correlation_id: Option<Uuid>,
    ) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_publishes_that_resolve_against_the_registry() {
        let registry = TopicRegistry::with_workflow_defaults();
        let bus = MockBusClient::new("test-service");

        let ok = bus
            .publish(&registry, "sensor.trigger", MessageType::Event, Priority::Normal, json!({}), None)
            .await;
        assert!(ok);
        assert_eq!(bus.published_topic_keys().await, vec!["sensor.trigger"]);
    }

    #[tokio::test]
    async fn unregistered_key_is_not_recorded_and_reports_failure() {
        let registry = TopicRegistry::new();
        let bus = MockBusClient::new("test-service");

        let ok = bus
            .publish(&registry, "not.a.key", MessageType::Event, Priority::Normal, json!({}), None)
            .await;
        assert!(!ok);
        assert!(bus.published().await.is_empty());
    }
}
