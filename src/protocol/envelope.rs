//! The versioned message container (Envelope) carried on every managed topic.
//!
//! Every publish made through the Bus Client is wrapped in an [`Envelope`]. The
//! wire representation is UTF-8 JSON with camelCase field names; the Rust side
//! keeps idiomatic snake_case identifiers and relies on `serde`'s
//! `rename_all` to bridge the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Protocol version tag carried by every envelope.
pub const PROTOCOL_VERSION: &str = "v1";

/// Service descriptor identifying the origin or intended recipient of an
/// envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    pub instance: String,
    pub version: String,
    pub environment: String,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
            version: PROTOCOL_VERSION.to_string(),
            environment: "Production".to_string(),
        }
    }
}

/// The kind of message an envelope carries, per §3 of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Command,
    Event,
    Request,
    Response,
    Query,
    Notification,
    Heartbeat,
}

/// Delivery priority. `Normal` is the documented default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Versioned message container carried as the payload of every MQTT publish
/// on topics governed by this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: Uuid,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub source: ServiceDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ServiceDescriptor>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub data: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fields present on the wire but not named above survive a round-trip
    /// here instead of being discarded.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("envelope missing required field: {0}")]
    MissingField(&'static str),
}

impl Envelope {
    /// Build a fresh envelope with a server-generated id and timestamp.
    pub fn new(
        message_type: MessageType,
        priority: Priority,
        source: ServiceDescriptor,
        data: Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            version: PROTOCOL_VERSION.to_string(),
            timestamp: Utc::now(),
            source,
            target: None,
            message_type,
            priority,
            correlation_id: None,
            data,
            metadata: HashMap::new(),
            headers: HashMap::new(),
            expires_at: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            extra: HashMap::new(),
        }
    }

    pub fn with_target(mut self, target: ServiceDescriptor) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// `true` once `expires_at` has passed; receivers MUST drop such envelopes.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Utc::now() > deadline)
            .unwrap_or(false)
    }

    /// Whether this envelope is addressed to `service_name`. Untargeted
    /// envelopes (`target == None`) are addressed to everyone.
    pub fn is_for(&self, service_name: &str) -> bool {
        self.target
            .as_ref()
            .map(|t| t.name == service_name)
            .unwrap_or(true)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(EnvelopeError::from)
    }
}
