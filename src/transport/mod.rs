//! Transport layer: the Bus Client contract and its MQTT implementation.

pub mod mqtt;

use crate::protocol::{MessageType, Priority, TopicRegistry};
use mqtt::{BatchResult, ConnectionState, Statistics};
use uuid::Uuid;

/// Abstraction over the message bus connection, so handlers and workflow
/// code can be exercised against a mock without a live broker.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the connection and subscribe to every configured inbound topic.
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Signal shutdown and close the connection; safe to call more than once.
    async fn stop(&mut self);

    /// At-least-once publish of raw bytes to `topic`.
    async fn publish_raw(&self, topic: &str, bytes: Vec<u8>) -> Result<(), Self::Error>;

    /// Wrap `data` in an Envelope and publish it to the topic resolved from
    /// `topic_key`. Returns `false` (never an error) on an unresolvable key
    /// or serialization failure.
    async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: MessageType,
        priority: Priority,
        data: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> bool;

    /// Subscribe to `topic` at-least-once.
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Remove the subscription and any registered handler for `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Publish each item independently; never stops on the first failure.
    async fn publish_batch(&self, items: Vec<(String, Vec<u8>)>) -> BatchResult;

    /// Publish a heartbeat and report whether the bus is usable.
    async fn health_check(&self, registry: &TopicRegistry) -> bool;

    /// Point-in-time snapshot of connection activity.
    async fn statistics(&self) -> Statistics;

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> Option<ConnectionState>;

    fn is_permanently_disconnected(&self) -> bool;
}

/// Default, production bus implementation.
pub type DefaultBus = mqtt::BusClient;

/// Narrower, object-safe facet of [`Bus`] that handlers and the workflow
/// engine depend on for outbound publishing, so they can hold `Arc<dyn
/// Publisher>` without fixing an associated error type.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: MessageType,
        priority: Priority,
        data: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> bool;
}

#[async_trait::async_trait]
impl Publisher for mqtt::BusClient {
    async fn publish(
        &self,
        registry: &TopicRegistry,
        topic_key: &str,
        message_type: MessageType,
        priority: Priority,
        data: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> bool {
        mqtt::BusClient::publish(self, registry, topic_key, message_type, priority, data, correlation_id).await
    }
}
