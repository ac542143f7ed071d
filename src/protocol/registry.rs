//! Process-wide mapping from symbolic topic keys to topic-pattern templates.

use super::envelope::MessageType;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// A registered topic: symbolic key, pattern template, and the message type
/// it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicDefinition {
    pub key: String,
    pub pattern: String,
    pub message_type: MessageType,
    pub payload_type: Option<String>,
    pub registered_at: chrono::DateTime<chrono::Utc>,
    pub description: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("topic key must not be empty")]
    EmptyKey,
    #[error("topic key '{0}' is not registered")]
    NotRegistered(String),
    #[error("topic pattern for '{0}' is under-parameterised: {1}")]
    UnderParameterised(String, String),
}

/// Write-protected, process-wide table mapping symbolic keys to topic
/// patterns. Registration is idempotent per `(key, pattern)`: registering
/// the same key twice is last-write-wins.
pub struct TopicRegistry {
    entries: Mutex<HashMap<String, TopicDefinition>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Construct a registry pre-loaded with the nine mandatory topic keys.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for (key, pattern, message_type) in MANDATORY_TOPICS {
            registry
                .register(key, pattern, *message_type, None)
                .expect("mandatory topic keys are never empty");
        }
        registry
    }

    /// Construct a registry pre-loaded with the nine mandatory keys plus the
    /// additional topic keys the Workflow Engine and Handler Set use for
    /// intermediate steps that §4.2 doesn't enumerate (height probes,
    /// business-event handoff, validation/error/notification topics). These
    /// follow the same `ios/{version}/...` namespace convention.
    pub fn with_workflow_defaults() -> Self {
        let registry = Self::with_defaults();
        for (key, pattern, message_type) in SUPPLEMENTAL_TOPICS {
            registry
                .register(key, pattern, *message_type, None)
                .expect("supplemental topic keys are never empty");
        }
        registry
    }

    pub fn register(
        &self,
        key: &str,
        pattern: &str,
        message_type: MessageType,
        payload_type: Option<&str>,
    ) -> Result<(), RegistryError> {
        if key.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        entries.insert(
            key.to_string(),
            TopicDefinition {
                key: key.to_string(),
                pattern: pattern.to_string(),
                message_type,
                payload_type: payload_type.map(str::to_string),
                registered_at: chrono::Utc::now(),
                description: None,
            },
        );
        Ok(())
    }

    /// Substitute `{version}` first, then positional `{0}`, `{1}`, ...
    /// placeholders in order.
    pub fn resolve(&self, key: &str, version: &str, params: &[&str]) -> Result<String, RegistryError> {
        let entries = self.entries.lock().expect("registry mutex poisoned");
        let definition = entries
            .get(key)
            .ok_or_else(|| RegistryError::NotRegistered(key.to_string()))?;

        let mut topic = definition.pattern.replace("{version}", version);
        for (index, param) in params.iter().enumerate() {
            topic = topic.replace(&format!("{{{index}}}"), param);
        }

        if topic.contains('{') && topic.contains('}') {
            return Err(RegistryError::UnderParameterised(key.to_string(), topic));
        }

        Ok(topic)
    }

    pub fn unregister(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        entries.remove(key).is_some()
    }

    pub fn list(&self) -> Vec<TopicDefinition> {
        let entries = self.entries.lock().expect("registry mutex poisoned");
        entries.values().cloned().collect()
    }

    pub fn exists(&self, key: &str) -> bool {
        let entries = self.entries.lock().expect("registry mutex poisoned");
        entries.contains_key(key)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("registry mutex poisoned");
        entries.clear();
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The nine topic keys every implementation MUST pre-register.
pub const MANDATORY_TOPICS: &[(&str, &str, MessageType)] = &[
    (
        "sensor.trigger",
        "ios/{version}/sensor/grating/trigger",
        MessageType::Event,
    ),
    (
        "order.new",
        "ios/{version}/order/system/new",
        MessageType::Command,
    ),
    (
        "vision.start",
        "ios/{version}/vision/camera/start",
        MessageType::Command,
    ),
    (
        "vision.result",
        "ios/{version}/vision/camera/result",
        MessageType::Event,
    ),
    (
        "motion.move",
        "ios/{version}/motion/control/move",
        MessageType::Command,
    ),
    (
        "motion.complete",
        "ios/{version}/motion/control/complete",
        MessageType::Event,
    ),
    (
        "coder.start",
        "ios/{version}/coder/service/start",
        MessageType::Command,
    ),
    (
        "coder.complete",
        "ios/{version}/coder/service/complete",
        MessageType::Event,
    ),
    (
        "status.heartbeat",
        "ios/{version}/status/{0}/heartbeat",
        MessageType::Heartbeat,
    ),
];

/// Topic keys used internally by the Workflow Engine and Handler Set that
/// are not among the nine mandatory registrations but are needed to carry
/// intermediate workflow steps and handler side-effects end to end.
pub const SUPPLEMENTAL_TOPICS: &[(&str, &str, MessageType)] = &[
    (
        "vision.height.request",
        "ios/{version}/vision/camera/height/request",
        MessageType::Command,
    ),
    (
        "vision.height.result",
        "ios/{version}/vision/camera/height/result",
        MessageType::Event,
    ),
    (
        "vision.detection",
        "ios/{version}/vision/camera/detection",
        MessageType::Event,
    ),
    (
        "motion.position",
        "ios/{version}/motion/control/position",
        MessageType::Event,
    ),
    (
        "motion.stop",
        "ios/{version}/motion/control/stop",
        MessageType::Command,
    ),
    (
        "motion.next_step",
        "ios/{version}/motion/control/next_step",
        MessageType::Notification,
    ),
    (
        "vision.stop",
        "ios/{version}/vision/camera/stop",
        MessageType::Command,
    ),
    (
        "coder.result",
        "ios/{version}/coder/service/result",
        MessageType::Event,
    ),
    (
        "coder.validation.success",
        "ios/{version}/coder/validation/success",
        MessageType::Event,
    ),
    (
        "coder.validation.failed",
        "ios/{version}/coder/validation/failed",
        MessageType::Event,
    ),
    (
        "coder.validation.error",
        "ios/{version}/coder/validation/error",
        MessageType::Event,
    ),
    (
        "order.request",
        "ios/{version}/order/system/request",
        MessageType::Request,
    ),
    (
        "coder.odoo",
        "ios/{version}/coder/service/odoo",
        MessageType::Event,
    ),
    (
        "outbound.task.error",
        "ios/{version}/outbound/task/error",
        MessageType::Event,
    ),
    (
        "system.heartbeat",
        "ios/{version}/system/{0}/heartbeat",
        MessageType::Heartbeat,
    ),
    (
        "system.status.query",
        "ios/{version}/system/status/query",
        MessageType::Query,
    ),
    (
        "system.status.response",
        "ios/{version}/system/status/response",
        MessageType::Response,
    ),
    (
        "system.config.update",
        "ios/{version}/system/config/update",
        MessageType::Command,
    ),
    (
        "system.config.confirm",
        "ios/{version}/system/config/confirm",
        MessageType::Response,
    ),
    (
        "system.config.error",
        "ios/{version}/system/config/error",
        MessageType::Response,
    ),
    (
        "system.error",
        "ios/{version}/system/error/{0}",
        MessageType::Event,
    ),
    (
        "system.events.unknown_topic",
        "ios/{version}/system/events/unknown_topic",
        MessageType::Event,
    ),
];
