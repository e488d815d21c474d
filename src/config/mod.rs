//! # Service Configuration
//!
//! Per-service MQTT configuration resolved from a hierarchical YAML source.
//! The file carries PascalCase sections (`StandardMqtt.Connection`,
//! `StandardMqtt.Topics`, `StandardMqtt.Messages`, plus per-service
//! sections such as `MotionControl`, `CoderService`, and `Sample`); the
//! loader resolves template variables, fills defaults, and produces the
//! runtime [`ServiceConfig`] together with a [`ValidationReport`].

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError, ValidationReport};
pub use loader::{ConfigLoader, LoadedConfig};

use serde::{Deserialize, Serialize};

use crate::constants::protocol;

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_s: u64,
    pub connect_timeout_s: u64,
    pub reconnect_interval_s: u64,
    pub max_reconnect_attempts: u32,
    pub use_tls: bool,
    pub clean_session: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive_s: 60,
            connect_timeout_s: 10,
            reconnect_interval_s: 5,
            max_reconnect_attempts: 10,
            use_tls: false,
            clean_session: true,
        }
    }
}

/// One symbolic-key → topic-pattern binding, order-preserving.
///
/// Subscriptions are re-issued on every reconnect in the order declared
/// here, so the binding list keeps file order instead of using a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicBinding {
    pub key: String,
    pub pattern: String,
}

/// Declared subscription and publication sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicsConfig {
    pub subscribe: Vec<TopicBinding>,
    pub publish: Vec<TopicBinding>,
}

impl TopicsConfig {
    /// Pattern bound to a subscription key, if declared.
    pub fn subscription(&self, key: &str) -> Option<&str> {
        self.subscribe
            .iter()
            .find(|binding| binding.key == key)
            .map(|binding| binding.pattern.as_str())
    }

    /// Pattern bound to a publication key, if declared.
    pub fn publication(&self, key: &str) -> Option<&str> {
        self.publish
            .iter()
            .find(|binding| binding.key == key)
            .map(|binding| binding.pattern.as_str())
    }
}

/// Message-layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesConfig {
    pub version: String,
    pub enable_validation: bool,
    pub max_retries: u32,
    pub timeout_s: u64,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            version: protocol::PROTOCOL_VERSION.to_string(),
            enable_validation: true,
            max_retries: protocol::DEFAULT_MAX_RETRIES,
            timeout_s: 30,
        }
    }
}

/// Fully-resolved per-service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub connection: ConnectionConfig,
    pub topics: TopicsConfig,
    pub messages: MessagesConfig,
}

impl ServiceConfig {
    /// Validate the resolved configuration.
    ///
    /// Errors abort startup; warnings are informational (an empty topic
    /// set is legal for a service that only publishes raw bytes).
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();

        if self.service_name.trim().is_empty() {
            report.error("service name must not be empty");
        }
        if self.connection.broker.trim().is_empty() {
            report.error("connection broker must not be empty");
        }
        if self.connection.port == 0 {
            report.error("connection port must be in 1..65535");
        }
        if self.connection.client_id.trim().is_empty() {
            report.error("connection client id must not be empty");
        }
        if self.connection.keep_alive_s == 0 {
            report.warning("keep-alive of 0 disables broker liveness checks");
        }
        if self.topics.subscribe.is_empty() {
            report.warning("no subscriptions declared");
        }
        if self.topics.publish.is_empty() {
            report.warning("no publications declared");
        }
        report
    }

    /// The outbound queue bound used by the bus client.
    pub fn outbound_queue_capacity(&self) -> usize {
        (self.messages.max_retries as usize) * 10
    }
}

/// Motion axis limits and unit conversion for the motion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    pub min_position: i64,
    pub max_position: i64,
    pub default_speed: u32,
    pub pulses_per_mm: f64,
    pub move_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_position: 0,
            max_position: 220_000,
            default_speed: crate::constants::motion::DEFAULT_SPEED,
            pulses_per_mm: crate::constants::motion::PULSES_PER_MM,
            move_timeout_ms: 30_000,
            poll_interval_ms: 50,
        }
    }
}

/// Scanner gateway listener settings for the coder service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoderConfig {
    pub socket_address: String,
    pub socket_port: u16,
    pub max_clients: u32,
    pub receive_buffer_size: usize,
    pub client_timeout_ms: u64,
    pub scan_timeout_ms: u64,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            socket_address: "0.0.0.0".to_string(),
            socket_port: 5000,
            max_clients: 16,
            receive_buffer_size: 1024,
            client_timeout_ms: 60_000,
            scan_timeout_ms: crate::constants::timing::DEFAULT_SCAN_WINDOW_MS,
        }
    }
}

/// Workcell geometry used to turn a measured height into a target
/// position. All values are millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub height_init: f64,
    pub tray_height: f64,
    pub camera_height: f64,
    pub coder_height: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            height_init: 2000.0,
            tray_height: 150.0,
            camera_height: 2200.0,
            coder_height: 450.0,
        }
    }
}
