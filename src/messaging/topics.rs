//! # Topic Registry
//!
//! Process-wide mapping from symbolic topic keys to topic-pattern
//! templates. Patterns are MQTT-style hierarchical strings whose segments
//! may contain a `{version}` placeholder and positional `{0}`, `{1}`, …
//! parameters; resolution substitutes the version first, then the
//! positional parameters, and fails if any placeholder remains.
//!
//! The registry is a dependency-injected service with explicit lifecycle,
//! not a language-level global. Registration is write-protected by a
//! mutex; `with_defaults()` pre-registers the topic catalogue every
//! service relies on.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::constants::{protocol, topic_keys};
use crate::messaging::envelope::MessageType;
use crate::messaging::errors::{MessagingError, MessagingResult};

/// A registered topic template.
#[derive(Debug, Clone)]
pub struct TopicDefinition {
    pub key: String,
    pub pattern: String,
    pub message_type: MessageType,
    pub payload_type: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub description: Option<String>,
}

/// Registry mapping symbolic keys to topic patterns.
pub struct TopicRegistry {
    definitions: RwLock<HashMap<String, TopicDefinition>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry pre-loaded with the workcell topic catalogue.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_defaults();
        registry
    }

    fn register_defaults(&self) {
        use MessageType::*;

        let defaults: &[(&str, &str, MessageType, &str)] = &[
            (
                topic_keys::SENSOR_TRIGGER,
                "ios/{version}/sensor/grating/trigger",
                Event,
                "grating trigger that starts an outbound task",
            ),
            (
                topic_keys::ORDER_NEW,
                "ios/{version}/order/system/new",
                Command,
                "order assignment from the order service",
            ),
            (
                topic_keys::ORDER_REQUEST,
                "ios/{version}/order/system/request",
                Request,
                "order lookup request for collected codes",
            ),
            (
                topic_keys::VISION_START,
                "ios/{version}/vision/camera/start",
                Command,
                "start camera acquisition",
            ),
            (
                topic_keys::VISION_STOP,
                "ios/{version}/vision/camera/stop",
                Command,
                "stop camera acquisition",
            ),
            (
                topic_keys::VISION_RESULT,
                "ios/{version}/vision/camera/result",
                Event,
                "camera detection result",
            ),
            (
                topic_keys::VISION_DETECTION,
                "ios/{version}/vision/camera/detection",
                Event,
                "classified object detections",
            ),
            (
                topic_keys::VISION_HEIGHT_REQUEST,
                "ios/{version}/vision/height/request",
                Request,
                "stack height measurement request",
            ),
            (
                topic_keys::VISION_HEIGHT_RESULT,
                "ios/{version}/vision/height/result",
                Event,
                "measured minimum stack height",
            ),
            (
                topic_keys::MOTION_MOVE,
                "ios/{version}/motion/control/move",
                Command,
                "absolute move command in millimetres",
            ),
            (
                topic_keys::MOTION_STOP,
                "ios/{version}/motion/control/stop",
                Command,
                "controlled stop",
            ),
            (
                topic_keys::MOTION_COMPLETE,
                "ios/{version}/motion/control/complete",
                Event,
                "move completion report",
            ),
            (
                topic_keys::MOTION_POSITION,
                "ios/{version}/motion/control/position",
                Event,
                "periodic axis position report",
            ),
            (
                topic_keys::CODER_START,
                "ios/{version}/coder/service/start",
                Command,
                "open a scanner collect window",
            ),
            (
                topic_keys::CODER_RESULT,
                "ios/{version}/coder/service/result",
                Event,
                "single decoded code",
            ),
            (
                topic_keys::CODER_COMPLETE,
                "ios/{version}/coder/service/complete",
                Event,
                "collect window result",
            ),
            (
                topic_keys::CODER_ODOO,
                "ios/{version}/coder/service/odoo",
                Event,
                "business event for a finalised task",
            ),
            (
                topic_keys::STATUS_HEARTBEAT,
                "ios/{version}/status/{0}/heartbeat",
                Heartbeat,
                "per-service liveness heartbeat",
            ),
            (
                topic_keys::SYSTEM_HEARTBEAT,
                "ios/{version}/system/heartbeat",
                Heartbeat,
                "system-wide heartbeat ingest",
            ),
            (
                topic_keys::SYSTEM_STATUS,
                "ios/{version}/system/status",
                Query,
                "system status query",
            ),
            (
                topic_keys::SYSTEM_STATUS_RESULT,
                "ios/{version}/system/status/result",
                Response,
                "system status snapshot",
            ),
            (
                topic_keys::SYSTEM_CONFIG,
                "ios/{version}/system/config",
                Command,
                "runtime configuration update",
            ),
            (
                topic_keys::SYSTEM_CONFIG_CONFIRM,
                "ios/{version}/system/config/confirm",
                Response,
                "configuration update applied",
            ),
            (
                topic_keys::SYSTEM_CONFIG_ERROR,
                "ios/{version}/system/config/error",
                Response,
                "configuration update rejected",
            ),
            (
                topic_keys::SYSTEM_ERROR,
                "ios/{version}/system/error/{0}",
                Event,
                "per-service error channel",
            ),
            (
                topic_keys::SYSTEM_UNKNOWN_TOPIC,
                "ios/{version}/system/events/unknown_topic",
                Event,
                "default-handler report of an unrecognised topic",
            ),
            (
                topic_keys::TASK_NEXT_STEP,
                "ios/{version}/outbound/task/next_step",
                Notification,
                "workflow step advanced",
            ),
            (
                topic_keys::TASK_ERROR,
                "ios/{version}/outbound/task/error",
                Event,
                "task-level failure report",
            ),
            (
                topic_keys::CODER_VALIDATION_SUCCESS,
                "ios/{version}/coder/validation/success",
                Event,
                "code format accepted",
            ),
            (
                topic_keys::CODER_VALIDATION_FAILED,
                "ios/{version}/coder/validation/failed",
                Event,
                "code format rejected",
            ),
            (
                topic_keys::CODER_VALIDATION_ERROR,
                "ios/{version}/coder/validation/error",
                Event,
                "code validation error",
            ),
        ];

        for (key, pattern, message_type, description) in defaults {
            // Preloading a fresh registry cannot fail: keys are non-empty.
            let _ = self.register_with_description(key, pattern, *message_type, None, description);
        }
    }

    /// Register a topic pattern under a symbolic key.
    ///
    /// Idempotent per `(key, pattern)`; re-registering a key overwrites the
    /// previous definition (last write wins). Fails only for an empty key.
    pub fn register(
        &self,
        key: &str,
        pattern: &str,
        message_type: MessageType,
        payload_type: Option<String>,
    ) -> MessagingResult<()> {
        self.insert(key, pattern, message_type, payload_type, None)
    }

    /// Register with a human-readable description.
    pub fn register_with_description(
        &self,
        key: &str,
        pattern: &str,
        message_type: MessageType,
        payload_type: Option<String>,
        description: &str,
    ) -> MessagingResult<()> {
        self.insert(
            key,
            pattern,
            message_type,
            payload_type,
            Some(description.to_string()),
        )
    }

    fn insert(
        &self,
        key: &str,
        pattern: &str,
        message_type: MessageType,
        payload_type: Option<String>,
        description: Option<String>,
    ) -> MessagingResult<()> {
        if key.is_empty() {
            return Err(MessagingError::EmptyTopicKey);
        }
        let definition = TopicDefinition {
            key: key.to_string(),
            pattern: pattern.to_string(),
            message_type,
            payload_type,
            registered_at: Utc::now(),
            description,
        };
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if definitions.insert(key.to_string(), definition).is_some() {
            debug!(key, pattern, "topic re-registered");
        }
        Ok(())
    }

    /// Resolve a key to a concrete topic using the default protocol
    /// version and no positional parameters.
    pub fn resolve_default(&self, key: &str) -> MessagingResult<String> {
        self.resolve(key, protocol::PROTOCOL_VERSION, &[])
    }

    /// Resolve a key to a concrete topic.
    ///
    /// Substitutes `{version}` first, then positional `{0}`, `{1}`, …
    /// parameters. Fails with not-registered when the key is missing and
    /// with under-parameterised when any placeholder remains.
    pub fn resolve(&self, key: &str, version: &str, params: &[&str]) -> MessagingResult<String> {
        let pattern = {
            let definitions = self
                .definitions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            definitions
                .get(key)
                .map(|d| d.pattern.clone())
                .ok_or_else(|| MessagingError::topic_not_registered(key))?
        };

        let mut topic = pattern.replace("{version}", version);
        for (index, param) in params.iter().enumerate() {
            topic = topic.replace(&format!("{{{index}}}"), param);
        }

        if let Some(placeholder) = first_placeholder(&topic) {
            return Err(MessagingError::unresolved_placeholder(pattern, placeholder));
        }
        Ok(topic)
    }

    /// Remove a key; returns whether it was present.
    pub fn unregister(&self, key: &str) -> bool {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions.remove(key).is_some()
    }

    /// Copy of one definition, if registered.
    pub fn definition(&self, key: &str) -> Option<TopicDefinition> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions.get(key).cloned()
    }

    /// Whether a key is registered.
    pub fn exists(&self, key: &str) -> bool {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions.contains_key(key)
    }

    /// Snapshot of every registered definition.
    pub fn list(&self) -> Vec<TopicDefinition> {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions.values().cloned().collect()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        let definitions = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registration.
    pub fn clear(&self) {
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        definitions.clear();
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Find the first `{…}` placeholder remaining in a resolved topic.
fn first_placeholder(topic: &str) -> Option<String> {
    let start = topic.find('{')?;
    let end = topic[start..].find('}')? + start;
    Some(topic[start..=end].to_string())
}
