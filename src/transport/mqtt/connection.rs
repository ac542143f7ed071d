//! Pure connection state and MQTT option configuration for the Bus Client.

use crate::config::{MqttConnectionConfig, ServiceConfig};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;

/// Connection state for the Bus Client.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(String),
    Reconnecting(u32),
    PermanentlyDisconnected(String),
}

/// Reconnection backoff schedule.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub max_attempts: Option<u32>,
    pub backoff_pattern: Vec<u64>,
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    pub fn from_service_config(config: &MqttConnectionConfig) -> Self {
        Self {
            max_attempts: Some(config.max_reconnect_attempts),
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: config.reconnect_interval_s * 1000,
        }
    }

    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            let mut total_time = 0u64;
            for attempt in 1..=max_attempts {
                total_time += self.calculate_backoff_delay(attempt);
            }
            total_time
        })
    }

    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain forever.
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        if self.backoff_pattern.is_empty() {
            return self.sustained_delay;
        }
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("publish queue is full")]
    QueueOverflow,
}

/// Build `MqttOptions` from a resolved `ServiceConfig`, including
/// credentials, TLS, keep-alive, and a Last Will Testament announcing the
/// service as disconnected.
pub fn configure_mqtt_options(config: &ServiceConfig) -> Result<MqttOptions, MqttError> {
    let connection = &config.connection;
    if connection.broker.is_empty() {
        return Err(MqttError::InvalidBroker(connection.broker.clone()));
    }

    let mut mqtt_options = MqttOptions::new(
        connection.client_id.clone(),
        connection.broker.clone(),
        connection.port,
    );

    if connection.use_tls {
        let transport = RumqttcTransport::tls_with_default_config();
        mqtt_options.set_transport(transport);
    }

    if let Some(username_env) = &connection.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = connection
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(connection.keep_alive_s));
    mqtt_options.set_clean_start(connection.clean_session);

    let lwt_topic = format!(
        "ios/{}/status/{}/disconnected",
        config.messages.version,
        config.service_name.to_lowercase()
    );
    let lwt_payload = serde_json::to_string(&serde_json::json!({
        "source": config.service_name,
        "reason": "last_will",
    }))
    .map_err(MqttError::SerializationError)?;
    let lwt = LastWill::new(&lwt_topic, lwt_payload, QoS::AtLeastOnce, false, None);
    mqtt_options.set_last_will(lwt);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServiceConfig {
        ServiceConfig::test_config()
    }

    #[test]
    fn reconnect_config_default_matches_the_documented_pattern() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.backoff_pattern, vec![25, 50, 100, 250]);
        assert_eq!(config.sustained_delay, 250);
    }

    #[test]
    fn backoff_delay_follows_pattern_then_sustains() {
        let config = ReconnectConfig::default();
        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 250);
        assert_eq!(config.calculate_backoff_delay(5), 250);
        assert_eq!(config.calculate_backoff_delay(100), 250);
    }

    #[test]
    fn max_total_time_is_none_when_unlimited() {
        let config = ReconnectConfig::default();
        assert_eq!(config.calculate_max_total_time(), None);
    }

    #[test]
    fn max_total_time_sums_the_schedule_when_bounded() {
        let config = ReconnectConfig {
            max_attempts: Some(4),
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        };
        assert_eq!(config.calculate_max_total_time(), Some(25 + 50 + 100 + 250));
    }

    #[test]
    fn configure_mqtt_options_succeeds_for_a_valid_config() {
        let config = test_config();
        assert!(configure_mqtt_options(&config).is_ok());
    }

    #[test]
    fn configure_mqtt_options_rejects_an_empty_broker() {
        let mut config = test_config();
        config.connection.broker = String::new();
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(MqttError::InvalidBroker(_))
        ));
    }

    #[test]
    fn connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_eq!(
            ConnectionState::Disconnected("x".to_string()),
            ConnectionState::Disconnected("x".to_string())
        );
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Disconnected("x".to_string())
        );
    }
}
