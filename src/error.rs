use std::fmt;

/// Top-level error type for the workcell coordination core.
///
/// Component modules define their own structured error enums
/// ([`crate::messaging::MessagingError`], [`crate::motion::MotionError`],
/// [`crate::coder::GatewayError`], …); this type is the coarse-grained
/// umbrella used at service boundaries.
#[derive(Debug, Clone, PartialEq)]
pub enum IosError {
    ConfigurationError(String),
    MessagingError(String),
    RoutingError(String),
    WorkflowError(String),
    StateTransitionError(String),
    MotionError(String),
    GatewayError(String),
    ValidationError(String),
    InvalidInput(String),
}

impl fmt::Display for IosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IosError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            IosError::MessagingError(msg) => write!(f, "Messaging error: {msg}"),
            IosError::RoutingError(msg) => write!(f, "Routing error: {msg}"),
            IosError::WorkflowError(msg) => write!(f, "Workflow error: {msg}"),
            IosError::StateTransitionError(msg) => write!(f, "State transition error: {msg}"),
            IosError::MotionError(msg) => write!(f, "Motion error: {msg}"),
            IosError::GatewayError(msg) => write!(f, "Gateway error: {msg}"),
            IosError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            IosError::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
        }
    }
}

impl std::error::Error for IosError {}

impl From<serde_json::Error> for IosError {
    fn from(error: serde_json::Error) -> Self {
        IosError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::messaging::MessagingError> for IosError {
    fn from(error: crate::messaging::MessagingError) -> Self {
        IosError::MessagingError(error.to_string())
    }
}

impl From<crate::motion::MotionError> for IosError {
    fn from(error: crate::motion::MotionError) -> Self {
        IosError::MotionError(error.to_string())
    }
}

impl From<crate::coder::GatewayError> for IosError {
    fn from(error: crate::coder::GatewayError) -> Self {
        IosError::GatewayError(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for IosError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        IosError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IosError>;
