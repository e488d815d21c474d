//! # Configuration Loader
//!
//! Environment-aware loading of the hierarchical YAML configuration file.
//! Resolves template variables in topic patterns, fills the client id when
//! empty, validates the result, and hands back the runtime
//! [`ServiceConfig`] plus the per-service sections present in the file.

use chrono::Utc;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::{debug, info, warn};

use super::error::{ConfigResult, ConfigurationError, ValidationReport};
use super::{
    CoderConfig, ConnectionConfig, GeometryConfig, MessagesConfig, MotionConfig, ServiceConfig,
    TopicBinding, TopicsConfig,
};
use crate::constants::protocol;

/// File-level schema. Sections use the PascalCase names shared with the
/// other services' configuration tooling.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileConfig {
    standard_mqtt: StandardMqttSection,
    #[serde(default)]
    motion_control: Option<MotionControlSection>,
    #[serde(default)]
    coder_service: Option<CoderServiceSection>,
    #[serde(default)]
    sample: Option<SampleSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StandardMqttSection {
    connection: ConnectionSection,
    #[serde(default)]
    topics: TopicsSection,
    #[serde(default)]
    messages: MessagesSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConnectionSection {
    broker: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_keep_alive")]
    keep_alive_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_seconds: u64,
    #[serde(default = "default_reconnect_interval")]
    reconnect_interval_seconds: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    max_reconnect_attempts: u32,
    #[serde(default)]
    use_tls: bool,
    #[serde(default = "default_true")]
    clean_session: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TopicsSection {
    #[serde(default)]
    subscriptions: Vec<String>,
    #[serde(default)]
    publications: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessagesSection {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "default_true")]
    enable_validation: bool,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
}

impl Default for MessagesSection {
    fn default() -> Self {
        Self {
            version: default_version(),
            enable_validation: true,
            max_retries: default_max_retries(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MotionControlSection {
    #[serde(default)]
    min_position: i64,
    #[serde(default = "default_max_position")]
    max_position: i64,
    #[serde(default = "default_motion_speed")]
    default_speed: u32,
    #[serde(default = "default_pulses_per_mm")]
    pulses_per_mm: f64,
    #[serde(default = "default_move_timeout")]
    move_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    poll_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CoderServiceSection {
    #[serde(default = "default_socket_address")]
    socket_address: String,
    #[serde(default = "default_socket_port")]
    socket_port: u16,
    #[serde(default = "default_max_clients")]
    max_clients: u32,
    #[serde(default = "default_receive_buffer")]
    receive_buffer_size: usize,
    #[serde(default = "default_client_timeout")]
    client_timeout_ms: u64,
    #[serde(default = "default_scan_timeout")]
    scan_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SampleSection {
    height_init: f64,
    tray_height: f64,
    camera_height: f64,
    coder_height: f64,
}

fn default_port() -> u16 {
    1883
}
fn default_keep_alive() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_reconnect_interval() -> u64 {
    5
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_version() -> String {
    protocol::PROTOCOL_VERSION.to_string()
}
fn default_max_retries() -> u32 {
    protocol::DEFAULT_MAX_RETRIES
}
fn default_timeout() -> u64 {
    30
}
fn default_max_position() -> i64 {
    220_000
}
fn default_motion_speed() -> u32 {
    crate::constants::motion::DEFAULT_SPEED
}
fn default_pulses_per_mm() -> f64 {
    crate::constants::motion::PULSES_PER_MM
}
fn default_move_timeout() -> u64 {
    30_000
}
fn default_poll_interval() -> u64 {
    50
}
fn default_socket_address() -> String {
    "0.0.0.0".to_string()
}
fn default_socket_port() -> u16 {
    5000
}
fn default_max_clients() -> u32 {
    16
}
fn default_receive_buffer() -> usize {
    1024
}
fn default_client_timeout() -> u64 {
    60_000
}
fn default_scan_timeout() -> u64 {
    crate::constants::timing::DEFAULT_SCAN_WINDOW_MS
}

/// Everything the loader produced: the runtime service configuration, the
/// validation report, and the optional per-service sections.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub service: ServiceConfig,
    pub report: ValidationReport,
    pub motion: Option<MotionConfig>,
    pub coder: Option<CoderConfig>,
    pub geometry: Option<GeometryConfig>,
}

/// Loader for the hierarchical service configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and resolve configuration for a service from a YAML file.
    ///
    /// Returns an error when the file is unreadable, unparsable, or when
    /// validation produces any error. Warnings are logged and returned in
    /// the report.
    pub fn load(path: impl AsRef<Path>, service_name: &str) -> ConfigResult<LoadedConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read(path.display().to_string(), e))?;
        Self::load_from_str(&contents, service_name)
    }

    /// Load and resolve configuration from YAML text.
    pub fn load_from_str(contents: &str, service_name: &str) -> ConfigResult<LoadedConfig> {
        let file: FileConfig = serde_yaml::from_str(contents)?;
        let environment = detect_environment();

        let messages = MessagesConfig {
            version: file.standard_mqtt.messages.version.clone(),
            enable_validation: file.standard_mqtt.messages.enable_validation,
            max_retries: file.standard_mqtt.messages.max_retries,
            timeout_s: file.standard_mqtt.messages.timeout_seconds,
        };

        let mut client_id = file.standard_mqtt.connection.client_id.trim().to_string();
        if client_id.is_empty() {
            client_id = format!("{}{service_name}", protocol::CLIENT_ID_PREFIX);
            debug!(client_id, "client id defaulted from service name");
        }

        let connection = ConnectionConfig {
            broker: file.standard_mqtt.connection.broker.trim().to_string(),
            port: file.standard_mqtt.connection.port,
            client_id,
            username: file.standard_mqtt.connection.username.clone(),
            password: file.standard_mqtt.connection.password.clone(),
            keep_alive_s: file.standard_mqtt.connection.keep_alive_seconds,
            connect_timeout_s: file.standard_mqtt.connection.connect_timeout_seconds,
            reconnect_interval_s: file.standard_mqtt.connection.reconnect_interval_seconds,
            max_reconnect_attempts: file.standard_mqtt.connection.max_reconnect_attempts,
            use_tls: file.standard_mqtt.connection.use_tls,
            clean_session: file.standard_mqtt.connection.clean_session,
        };

        let topics = TopicsConfig {
            subscribe: resolve_bindings(
                &file.standard_mqtt.topics.subscriptions,
                service_name,
                &messages.version,
                &environment,
            ),
            publish: resolve_bindings(
                &file.standard_mqtt.topics.publications,
                service_name,
                &messages.version,
                &environment,
            ),
        };

        let service = ServiceConfig {
            service_name: service_name.to_string(),
            connection,
            topics,
            messages,
        };

        let report = service.validate();
        for warning in &report.warnings {
            warn!(service = service_name, warning, "configuration warning");
        }
        if !report.is_valid() {
            return Err(ConfigurationError::ValidationFailed { report });
        }

        info!(
            service = service_name,
            broker = %service.connection.broker,
            port = service.connection.port,
            subscriptions = service.topics.subscribe.len(),
            "✅ configuration loaded"
        );

        Ok(LoadedConfig {
            service,
            report,
            motion: file.motion_control.map(|section| MotionConfig {
                min_position: section.min_position,
                max_position: section.max_position,
                default_speed: section.default_speed,
                pulses_per_mm: section.pulses_per_mm,
                move_timeout_ms: section.move_timeout_ms,
                poll_interval_ms: section.poll_interval_ms,
            }),
            coder: file.coder_service.map(|section| CoderConfig {
                socket_address: section.socket_address,
                socket_port: section.socket_port,
                max_clients: section.max_clients,
                receive_buffer_size: section.receive_buffer_size,
                client_timeout_ms: section.client_timeout_ms,
                scan_timeout_ms: section.scan_timeout_ms,
            }),
            geometry: file.sample.map(|section| GeometryConfig {
                height_init: section.height_init,
                tray_height: section.tray_height,
                camera_height: section.camera_height,
                coder_height: section.coder_height,
            }),
        })
    }
}

/// Detect the deployment environment.
fn detect_environment() -> String {
    env::var("IOS_ENVIRONMENT")
        .or_else(|_| env::var("IOS_ENV"))
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| protocol::DEFAULT_ENVIRONMENT.to_string())
}

/// Resolve template variables in each declared pattern and derive its
/// symbolic key from the remaining literal segments.
fn resolve_bindings(
    patterns: &[String],
    service_name: &str,
    version: &str,
    environment: &str,
) -> Vec<TopicBinding> {
    let timestamp = Utc::now().format("%Y%m%d").to_string();
    patterns
        .iter()
        .map(|pattern| {
            let resolved = pattern
                .replace("{serviceName}", &service_name.to_lowercase())
                .replace("{version}", version)
                .replace("{timestamp}", &timestamp)
                .replace("{environment}", environment);
            TopicBinding {
                key: derive_key(&resolved, version),
                pattern: resolved,
            }
        })
        .collect()
}

/// Derive a symbolic key from a resolved pattern: drop the namespace and
/// version segments and join the rest with dots, skipping wildcards.
fn derive_key(pattern: &str, version: &str) -> String {
    pattern
        .split('/')
        .skip(1)
        .filter(|segment| {
            !segment.is_empty() && *segment != version && *segment != "+" && *segment != "#"
        })
        .collect::<Vec<_>>()
        .join(".")
}
