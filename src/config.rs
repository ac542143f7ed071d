//! Hierarchical per-service MQTT configuration: load, resolve template
//! variables, and validate before a service is allowed to start.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Top-level configuration for one service process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub service_name: String,
    pub connection: MqttConnectionConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub geometry: GeometrySettings,
}

/// Workcell geometry constants the scheduler uses to translate a measured
/// stack height into an axis target position. Site-specific, so these live
/// in config rather than as compiled-in defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct GeometrySettings {
    #[serde(default)]
    pub height_init_mm: f64,
    #[serde(default)]
    pub tray_height_mm: f64,
    #[serde(default)]
    pub camera_height_mm: f64,
    #[serde(default)]
    pub coder_height_mm: f64,
}

impl From<GeometrySettings> for crate::workflow::GeometryConfig {
    fn from(settings: GeometrySettings) -> Self {
        crate::workflow::GeometryConfig {
            height_init_mm: settings.height_init_mm,
            tray_height_mm: settings.tray_height_mm,
            camera_height_mm: settings.camera_height_mm,
            coder_height_mm: settings.coder_height_mm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttConnectionConfig {
    pub broker: String,
    pub port: u16,
    #[serde(default)]
    pub client_id: String,
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,
    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,
    #[serde(default = "default_reconnect_interval_s")]
    pub reconnect_interval_s: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
}

fn default_keep_alive_s() -> u64 {
    30
}
fn default_connect_timeout_s() -> u64 {
    10
}
fn default_reconnect_interval_s() -> u64 {
    5
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_clean_session() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopicsConfig {
    #[serde(default)]
    pub subscribe: HashMap<String, String>,
    #[serde(default)]
    pub publish: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_enable_validation")]
    pub enable_validation: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            enable_validation: default_enable_validation(),
            max_retries: default_max_retries(),
            timeout_s: default_timeout_s(),
        }
    }
}

fn default_version() -> String {
    "v1".to_string()
}
fn default_enable_validation() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_s() -> u64 {
    30
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result of validating a resolved `ServiceConfig`: errors that MUST abort
/// startup, and warnings that are informational only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ServiceConfig {
    /// Load, resolve template variables, and validate a config file for
    /// `service_name`. Callers MUST abort startup if the returned
    /// [`ValidationResult`] is non-empty in `errors`.
    pub fn load_from_file(path: &Path, service_name: &str) -> Result<(Self, ValidationResult), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, service_name)
    }

    pub fn load_from_str(content: &str, service_name: &str) -> Result<(Self, ValidationResult), ConfigError> {
        let mut config: ServiceConfig = toml::from_str(content)?;
        config.service_name = service_name.to_string();
        config.resolve_templates();
        let validation = config.validate();
        Ok((config, validation))
    }

    /// Substitute `{serviceName}`, `{version}`, `{timestamp}`, and
    /// `{environment}` in every configured topic pattern, and populate
    /// `client_id` when empty.
    fn resolve_templates(&mut self) {
        let service_name_lower = self.service_name.to_lowercase();
        let version = self.messages.version.clone();
        let timestamp = chrono::Utc::now().format("%Y%m%d").to_string();
        let environment = std::env::var("WORKCELL_ENVIRONMENT").unwrap_or_else(|_| "Production".to_string());

        let resolve = |pattern: &str| -> String {
            pattern
                .replace("{serviceName}", &service_name_lower)
                .replace("{version}", &version)
                .replace("{timestamp}", &timestamp)
                .replace("{environment}", &environment)
        };

        for pattern in self.topics.subscribe.values_mut() {
            *pattern = resolve(pattern);
        }
        for pattern in self.topics.publish.values_mut() {
            *pattern = resolve(pattern);
        }

        if self.connection.client_id.is_empty() {
            self.connection.client_id = format!("IOS.{service_name_lower}");
        }
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.connection.broker.is_empty() {
            result.errors.push("connection.broker must not be empty".to_string());
        }
        if self.connection.port == 0 {
            result.errors.push("connection.port must be in 1..65535".to_string());
        }
        if self.connection.client_id.is_empty() {
            result.errors.push("connection.client_id must not be empty".to_string());
        }
        if self.topics.subscribe.is_empty() && self.topics.publish.is_empty() {
            result
                .warnings
                .push("no topics configured for subscribe or publish".to_string());
        }

        result
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    pub fn mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.connection.username_env.as_ref())
    }

    pub fn mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.connection.password_env.as_ref())
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        let (config, _) = Self::load_from_str(
            r#"
[connection]
broker = "localhost"
port = 1883

[topics.subscribe]
"sensor.trigger" = "ios/{version}/sensor/grating/trigger"

[topics.publish]
"status.heartbeat" = "ios/{version}/status/{serviceName}/heartbeat"
"#,
            "test-service",
        )
        .expect("test config should parse");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[connection]
broker = "mqtt.internal"
port = 1883
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"

[topics.subscribe]
"sensor.trigger" = "ios/{version}/sensor/grating/trigger"

[topics.publish]
"status.heartbeat" = "ios/{version}/status/{serviceName}/heartbeat"
"#;

    #[test]
    fn resolves_version_and_service_name_templates() {
        let (config, validation) = ServiceConfig::load_from_str(SAMPLE, "MotionControl").unwrap();
        assert!(validation.is_ok());
        assert_eq!(
            config.topics.subscribe["sensor.trigger"],
            "ios/v1/sensor/grating/trigger"
        );
        assert_eq!(
            config.topics.publish["status.heartbeat"],
            "ios/v1/status/motioncontrol/heartbeat"
        );
    }

    #[test]
    fn populates_client_id_when_empty() {
        let (config, _) = ServiceConfig::load_from_str(SAMPLE, "CoderService").unwrap();
        assert_eq!(config.connection.client_id, "IOS.coderservice");
    }

    #[test]
    fn preserves_explicit_client_id() {
        let content = r#"
[connection]
broker = "mqtt.internal"
port = 1883
client_id = "custom-client"
"#;
        let (config, _) = ServiceConfig::load_from_str(content, "svc").unwrap();
        assert_eq!(config.connection.client_id, "custom-client");
    }

    #[test]
    fn empty_broker_is_a_validation_error() {
        let content = r#"
[connection]
broker = ""
port = 1883
"#;
        let (_, validation) = ServiceConfig::load_from_str(content, "svc").unwrap();
        assert!(!validation.is_ok());
        assert!(validation.errors.iter().any(|e| e.contains("broker")));
    }

    #[test]
    fn zero_port_is_a_validation_error() {
        let content = r#"
[connection]
broker = "mqtt.internal"
port = 0
"#;
        let (_, validation) = ServiceConfig::load_from_str(content, "svc").unwrap();
        assert!(validation.errors.iter().any(|e| e.contains("port")));
    }

    #[test]
    fn empty_topic_sets_produce_a_warning_not_an_error() {
        let content = r#"
[connection]
broker = "mqtt.internal"
port = 1883
"#;
        let (_, validation) = ServiceConfig::load_from_str(content, "svc").unwrap();
        assert!(validation.is_ok());
        assert_eq!(validation.warnings.len(), 1);
    }

    #[test]
    fn geometry_defaults_to_zero_when_absent() {
        let content = r#"
[connection]
broker = "mqtt.internal"
port = 1883
"#;
        let (config, _) = ServiceConfig::load_from_str(content, "svc").unwrap();
        assert_eq!(config.geometry, GeometrySettings::default());
    }

    #[test]
    fn geometry_section_parses_into_workflow_geometry_config() {
        let content = r#"
[connection]
broker = "mqtt.internal"
port = 1883

[geometry]
height_init_mm = 1000.0
tray_height_mm = 200.0
camera_height_mm = 50.0
coder_height_mm = 300.0
"#;
        let (config, _) = ServiceConfig::load_from_str(content, "svc").unwrap();
        let geometry: crate::workflow::GeometryConfig = config.geometry.into();
        assert_eq!(geometry.tray_height_mm, 200.0);
    }

    #[test]
    fn environment_template_falls_back_to_production() {
        std::env::remove_var("WORKCELL_ENVIRONMENT");
        let content = r#"
[connection]
broker = "mqtt.internal"
port = 1883

[topics.publish]
"env.marker" = "ios/{environment}/marker"
"#;
        let (config, _) = ServiceConfig::load_from_str(content, "svc").unwrap();
        assert_eq!(config.topics.publish["env.marker"], "ios/Production/marker");
    }
}
