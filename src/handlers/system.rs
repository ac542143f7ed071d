//! System handler (C7): heartbeat liveness, status snapshots, and runtime
//! configuration updates.

use super::HandlerContext;
use crate::observability::metrics;
use crate::protocol::{Envelope, MessageType, Priority, StatusHeartbeat};
use crate::routing::Handler;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const ONLINE_WINDOW_SECS: i64 = 5 * 60;
const RECOGNIZED_CONFIG_KEYS: &[&str] = &["log_level", "mqtt_reconnect_interval", "task_timeout"];

pub struct SystemHandler {
    ctx: HandlerContext,
    heartbeat_topic: String,
    status_query_topic: String,
    config_update_topic: String,
}

impl SystemHandler {
    pub fn new(
        ctx: HandlerContext,
        heartbeat_topic: impl Into<String>,
        status_query_topic: impl Into<String>,
        config_update_topic: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            heartbeat_topic: heartbeat_topic.into(),
            status_query_topic: status_query_topic.into(),
            config_update_topic: config_update_topic.into(),
        }
    }

    fn on_heartbeat(&self, envelope: &Envelope) {
        let payload: StatusHeartbeat = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "system.heartbeat: undecodable payload");
                return;
            }
        };
        self.ctx
            .state
            .set(format!("heartbeat:{}:last_seen", payload.source), json!(payload.timestamp));
        metrics().mqtt_heartbeat();
    }

    async fn on_status_query(&self, _envelope: &Envelope) {
        let counts = self.ctx.workflow.counts_by_status().await;
        let now = Utc::now();

        let mut sources: HashMap<String, Value> = HashMap::new();
        for key in self.ctx.state.keys() {
            let Some(source) = key.strip_prefix("heartbeat:").and_then(|s| s.strip_suffix(":last_seen")) else {
                continue;
            };
            let Some(last_seen) = self.ctx.state.get(&key) else { continue };
            let status = match last_seen.as_str().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) {
                Some(ts) if (now - ts.with_timezone(&Utc)).num_seconds() < ONLINE_WINDOW_SECS => "online",
                Some(_) => "offline",
                None => "unknown",
            };
            sources.insert(source.to_string(), json!({"status": status, "lastSeen": last_seen}));
        }

        self.ctx
            .bus
            .publish(
                &self.ctx.registry,
                "system.status.response",
                MessageType::Response,
                Priority::Normal,
                json!({"taskCounts": counts, "sources": sources, "timestamp": now}),
                None,
            )
            .await;
    }

    async fn on_config_update(&self, envelope: &Envelope) {
        let Some(key) = envelope.data.get("key").and_then(Value::as_str) else {
            self.publish_config_error("missing 'key' field").await;
            return;
        };
        let Some(value) = envelope.data.get("value") else {
            self.publish_config_error("missing 'value' field").await;
            return;
        };

        if !RECOGNIZED_CONFIG_KEYS.contains(&key) {
            self.publish_config_error(&format!("unrecognized config key '{key}'")).await;
            return;
        }

        self.ctx.state.set(format!("config:{key}"), value.clone());
        info!(key, %value, "runtime config updated");

        self.ctx
            .bus
            .publish(
                &self.ctx.registry,
                "system.config.confirm",
                MessageType::Response,
                Priority::Normal,
                json!({"key": key, "value": value}),
                envelope.correlation_id,
            )
            .await;
    }

    async fn publish_config_error(&self, reason: &str) {
        warn!(reason, "system.config.update rejected");
        self.ctx
            .bus
            .publish(
                &self.ctx.registry,
                "system.config.error",
                MessageType::Response,
                Priority::Normal,
                json!({"reason": reason}),
                None,
            )
            .await;
    }
}

#[async_trait]
impl Handler for SystemHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "system handler: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            debug!(%topic, "system handler: dropping expired envelope");
            return;
        }

        if topic == self.heartbeat_topic {
            self.on_heartbeat(&envelope);
        } else if topic == self.status_query_topic {
            self.on_status_query(&envelope).await;
        } else if topic == self.config_update_topic {
            self.on_config_update(&envelope).await;
        }
    }

    fn can_handle(&self, topic: &str) -> bool {
        [&self.heartbeat_topic, &self.status_query_topic, &self.config_update_topic].contains(&&topic.to_string())
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.heartbeat_topic.clone(), self.status_query_topic.clone(), self.config_update_topic.clone()]
    }
}
