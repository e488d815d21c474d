//! # Messaging Error Types
//!
//! Structured error handling for the bus substrate using thiserror,
//! covering the MQTT session, the topic registry, and envelope codecs.

use thiserror::Error;

/// Errors produced by the bus client, topic registry, and router.
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Connect timed out after {timeout_seconds}s")]
    ConnectTimeout { timeout_seconds: u64 },

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("Subscribe failed for topic {topic}: {message}")]
    SubscribeFailed { topic: String, message: String },

    #[error("Unsubscribe failed for topic {topic}: {message}")]
    UnsubscribeFailed { topic: String, message: String },

    #[error("Publish failed for topic {topic}: {message}")]
    PublishFailed { topic: String, message: String },

    #[error("Outbound queue full ({capacity} entries) for topic {topic}")]
    PublishOverflow { topic: String, capacity: usize },

    #[error("Topic key not registered: {key}")]
    TopicNotRegistered { key: String },

    #[error("Topic key must not be empty")]
    EmptyTopicKey,

    #[error("Unresolved placeholder {placeholder} in pattern {pattern}")]
    UnresolvedPlaceholder { pattern: String, placeholder: String },

    #[error("Envelope serialization error: {message}")]
    EnvelopeSerialization { message: String },

    #[error("Envelope deserialization error: {message}")]
    EnvelopeDeserialization { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a broker connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a subscribe failure for a concrete topic
    pub fn subscribe_failed(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create an unsubscribe failure for a concrete topic
    pub fn unsubscribe_failed(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsubscribeFailed {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a publish failure for a concrete topic
    pub fn publish_failed(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create an outbound-queue overflow error
    pub fn publish_overflow(topic: impl Into<String>, capacity: usize) -> Self {
        Self::PublishOverflow {
            topic: topic.into(),
            capacity,
        }
    }

    /// Create a not-registered error for a symbolic key
    pub fn topic_not_registered(key: impl Into<String>) -> Self {
        Self::TopicNotRegistered { key: key.into() }
    }

    /// Create an under-parameterised resolution error
    pub fn unresolved_placeholder(
        pattern: impl Into<String>,
        placeholder: impl Into<String>,
    ) -> Self {
        Self::UnresolvedPlaceholder {
            pattern: pattern.into(),
            placeholder: placeholder.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is transient and worth retrying at the transport
    /// layer. Protocol and registry errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectTimeout { .. }
                | Self::NotConnected
                | Self::PublishOverflow { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            Self::EnvelopeDeserialization {
                message: err.to_string(),
            }
        } else {
            Self::EnvelopeSerialization {
                message: err.to_string(),
            }
        }
    }
}

impl From<rumqttc::ClientError> for MessagingError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = MessagingError::subscribe_failed("ios/v1/a/b", "refused");
        assert!(matches!(err, MessagingError::SubscribeFailed { .. }));

        let err = MessagingError::publish_overflow("ios/v1/a/b", 30);
        assert!(matches!(err, MessagingError::PublishOverflow { .. }));
        assert!(err.is_transient());

        let err = MessagingError::topic_not_registered("nope.key");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = MessagingError::unresolved_placeholder("ios/{version}/x/{0}", "{0}");
        let text = err.to_string();
        assert!(text.contains("{0}"));
        assert!(text.contains("ios/{version}/x/{0}"));
    }

    #[test]
    fn test_json_error_maps_to_deserialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: MessagingError = json_err.into();
        assert!(matches!(
            err,
            MessagingError::EnvelopeDeserialization { .. }
        ));
    }
}
