//! # Message Envelope
//!
//! The standardized container carried as the payload of every MQTT publish
//! on managed topics. The wire format is UTF-8 JSON with camelCase field
//! names and ISO-8601 UTC timestamps at millisecond precision.
//!
//! Receivers drop an envelope whose `expiresAt` is in the past, and may
//! ignore an envelope whose `target` names a different service. Fields
//! absent in input assume their documented defaults; unknown fields are
//! preserved across a round-trip.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::constants::protocol;
use crate::messaging::errors::{MessagingError, MessagingResult};

/// Classification of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Command,
    Event,
    Request,
    Response,
    Query,
    Notification,
    Heartbeat,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Command => "Command",
            Self::Event => "Event",
            Self::Request => "Request",
            Self::Response => "Response",
            Self::Query => "Query",
            Self::Notification => "Notification",
            Self::Heartbeat => "Heartbeat",
        };
        write!(f, "{name}")
    }
}

/// Delivery priority recorded in the envelope. Normal is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Identity of a sending or receiving service instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    pub instance: String,
    pub version: String,
    pub environment: String,
}

impl ServiceDescriptor {
    /// Build a descriptor for the current process.
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: format!("{}", std::process::id()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.into(),
        }
    }
}

/// The versioned message container carried on every managed topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique per-process message identifier, never reused within a run.
    pub message_id: Uuid,

    /// Protocol version tag.
    #[serde(default = "default_version")]
    pub version: String,

    /// Creation time, UTC, millisecond precision.
    #[serde(with = "serde_utc_ms")]
    pub timestamp: DateTime<Utc>,

    /// Sending service identity.
    #[serde(default)]
    pub source: ServiceDescriptor,

    /// Optional addressee. Receivers whose service name does not match may
    /// ignore the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ServiceDescriptor>,

    /// Message classification.
    #[serde(rename = "type")]
    pub message_type: MessageType,

    #[serde(default)]
    pub priority: MessagePriority,

    /// Tracks causally-linked messages across services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Typed payload; schema depends on the topic.
    #[serde(default)]
    pub data: Value,

    /// Open mapping for structured annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,

    /// String-to-string annotations kept alongside metadata for legacy
    /// consumers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Absolute expiry; receivers drop the envelope past this instant.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_utc_ms_opt"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Unknown wire fields, preserved round-trip.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_version() -> String {
    protocol::PROTOCOL_VERSION.to_string()
}

fn default_max_retries() -> u32 {
    protocol::DEFAULT_MAX_RETRIES
}

impl Envelope {
    /// Create a new envelope with a fresh message id and a millisecond-
    /// truncated creation timestamp.
    pub fn new(
        message_type: MessageType,
        priority: MessagePriority,
        source: ServiceDescriptor,
        data: Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            version: default_version(),
            timestamp: Utc::now().trunc_subsecs(3),
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

    /// Shorthand for a Normal-priority command.
    pub fn command(source: ServiceDescriptor, data: Value) -> Self {
        Self::new(MessageType::Command, MessagePriority::Normal, source, data)
    }

    /// Shorthand for a Normal-priority event.
    pub fn event(source: ServiceDescriptor, data: Value) -> Self {
        Self::new(MessageType::Event, MessagePriority::Normal, source, data)
    }

    /// Shorthand for a heartbeat envelope.
    pub fn heartbeat(source: ServiceDescriptor, data: Value) -> Self {
        Self::new(
            MessageType::Heartbeat,
            MessagePriority::Low,
            source,
            data,
        )
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Address the envelope to a specific service.
    pub fn with_target(mut self, target: ServiceDescriptor) -> Self {
        self.target = Some(target);
        self
    }

    /// Set an absolute expiry (truncated to millisecond precision).
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at.trunc_subsecs(3));
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Add a header entry.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Serialize to the UTF-8 JSON wire form.
    pub fn serialize(&self) -> MessagingResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MessagingError::EnvelopeSerialization {
            message: e.to_string(),
        })
    }

    /// Deserialize from the wire form. Fails when `messageId`, `type`, or
    /// `timestamp` are absent or ill-typed.
    pub fn deserialize(bytes: &[u8]) -> MessagingResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| MessagingError::EnvelopeDeserialization {
            message: e.to_string(),
        })
    }

    /// Whether the envelope has passed its expiry instant.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Utc::now() > expiry,
            None => false,
        }
    }

    /// Whether the envelope is addressed to a different service.
    pub fn is_for_other_service(&self, service_name: &str) -> bool {
        match &self.target {
            Some(target) => target.name != service_name,
            None => false,
        }
    }

    /// Increment the redelivery counter.
    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Whether the sender has exhausted its redelivery budget.
    pub fn is_max_retries_exceeded(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Age of the envelope in milliseconds.
    pub fn age_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.timestamp)
            .num_milliseconds()
    }

    /// Deserialize the typed payload carried in `data`.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> MessagingResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            MessagingError::EnvelopeDeserialization {
                message: format!("payload: {e}"),
            }
        })
    }
}

/// ISO-8601 UTC serialization at millisecond precision.
mod serde_utc_ms {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`serde_utc_ms`].
mod serde_utc_ms_opt {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn source() -> ServiceDescriptor {
        ServiceDescriptor {
            name: "Scheduler".to_string(),
            instance: "1".to_string(),
            version: "0.1.0".to_string(),
            environment: "Test".to_string(),
        }
    }

    #[test]
    fn test_envelope_defaults() {
        let env = Envelope::command(source(), json!({"direction": "out"}));
        assert_eq!(env.version, "v1");
        assert_eq!(env.priority, MessagePriority::Normal);
        assert_eq!(env.retry_count, 0);
        assert_eq!(env.max_retries, 3);
        assert!(env.correlation_id.is_none());
        assert!(env.target.is_none());
        assert!(!env.is_expired());
    }

    #[test]
    fn test_round_trip_equality() {
        let env = Envelope::new(
            MessageType::Event,
            MessagePriority::High,
            source(),
            json!({"minHeight": 1.8}),
        )
        .with_correlation_id("task-1")
        .with_metadata("attempt", json!(2))
        .with_header("traceId", "abc")
        .with_expiry(Utc::now() + Duration::minutes(5));

        let bytes = env.serialize().unwrap();
        let decoded = Envelope::deserialize(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let env = Envelope::command(source(), json!(null)).with_correlation_id("t");
        let value: Value = serde_json::from_slice(&env.serialize().unwrap()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("messageId"));
        assert!(obj.contains_key("type"));
        assert!(obj.contains_key("correlationId"));
        assert!(obj.contains_key("retryCount"));
        assert!(obj.contains_key("maxRetries"));
        assert!(!obj.contains_key("message_id"));
    }

    #[test]
    fn test_timestamp_is_millisecond_iso8601() {
        let env = Envelope::event(source(), json!(null));
        let value: Value = serde_json::from_slice(&env.serialize().unwrap()).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        // e.g. 2026-08-02T10:15:30.123Z
        assert!(ts.ends_with('Z'));
        let frac = ts.split('.').nth(1).unwrap();
        assert_eq!(frac.len(), 4); // three digits plus the trailing Z
    }

    #[test]
    fn test_missing_required_fields_fail() {
        let missing_id = json!({
            "type": "Event",
            "timestamp": "2026-08-02T10:00:00.000Z"
        });
        assert!(Envelope::deserialize(missing_id.to_string().as_bytes()).is_err());

        let missing_type = json!({
            "messageId": Uuid::new_v4(),
            "timestamp": "2026-08-02T10:00:00.000Z"
        });
        assert!(Envelope::deserialize(missing_type.to_string().as_bytes()).is_err());

        let missing_timestamp = json!({
            "messageId": Uuid::new_v4(),
            "type": "Event"
        });
        assert!(Envelope::deserialize(missing_timestamp.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_optional_fields_assume_defaults() {
        let minimal = json!({
            "messageId": Uuid::new_v4(),
            "type": "Command",
            "timestamp": "2026-08-02T10:00:00.000Z"
        });
        let env = Envelope::deserialize(minimal.to_string().as_bytes()).unwrap();
        assert_eq!(env.version, "v1");
        assert_eq!(env.priority, MessagePriority::Normal);
        assert_eq!(env.max_retries, 3);
        assert_eq!(env.data, Value::Null);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let with_unknown = json!({
            "messageId": Uuid::new_v4(),
            "type": "Event",
            "timestamp": "2026-08-02T10:00:00.000Z",
            "vendorExtension": {"a": 1}
        });
        let env = Envelope::deserialize(with_unknown.to_string().as_bytes()).unwrap();
        let bytes = env.serialize().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["vendorExtension"], json!({"a": 1}));
    }

    #[test]
    fn test_expiry() {
        let expired =
            Envelope::event(source(), json!(null)).with_expiry(Utc::now() - Duration::seconds(1));
        assert!(expired.is_expired());

        let live =
            Envelope::event(source(), json!(null)).with_expiry(Utc::now() + Duration::minutes(1));
        assert!(!live.is_expired());
    }

    #[test]
    fn test_target_filtering() {
        let env = Envelope::command(source(), json!(null))
            .with_target(ServiceDescriptor::new("MotionControl", "Test"));
        assert!(!env.is_for_other_service("MotionControl"));
        assert!(env.is_for_other_service("Scheduler"));

        let untargeted = Envelope::command(source(), json!(null));
        assert!(!untargeted.is_for_other_service("anything"));
    }

    #[test]
    fn test_retry_bookkeeping() {
        let mut env = Envelope::command(source(), json!(null));
        assert!(!env.is_max_retries_exceeded());
        for _ in 0..3 {
            env.increment_retry();
        }
        assert!(env.is_max_retries_exceeded());
    }

    #[test]
    fn test_message_id_uniqueness() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let env = Envelope::event(source(), json!(null));
            assert!(seen.insert(env.message_id));
        }
    }

    #[test]
    fn test_typed_payload_access() {
        #[derive(Deserialize)]
        struct Trigger {
            direction: String,
        }
        let env = Envelope::event(source(), json!({"direction": "out"}));
        let trigger: Trigger = env.payload().unwrap();
        assert_eq!(trigger.direction, "out");

        let bad: MessagingResult<Trigger> =
            Envelope::event(source(), json!({"nope": 1})).payload();
        assert!(bad.is_err());
    }
}
