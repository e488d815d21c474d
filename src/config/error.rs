//! Configuration error types and the validation report returned by the
//! loader.

use thiserror::Error;

/// Outcome of validating a loaded service configuration.
///
/// Errors are fatal: a caller receiving a non-empty error list must abort
/// startup. Warnings are informational and logged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Errors produced while loading and validating configuration.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read configuration file {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },

    #[error("Configuration validation failed: {}", .report.errors.join("; "))]
    ValidationFailed { report: ValidationReport },

    #[error("Missing configuration section: {section}")]
    MissingSection { section: String },
}

impl ConfigurationError {
    pub fn file_read(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigurationError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_validity() {
        let mut report = ValidationReport::new();
        assert!(report.is_valid());

        report.warning("empty subscription set");
        assert!(report.is_valid());

        report.error("broker must not be empty");
        assert!(!report.is_valid());
    }

    #[test]
    fn test_validation_failed_display() {
        let mut report = ValidationReport::new();
        report.error("broker must not be empty");
        report.error("port out of range");
        let err = ConfigurationError::ValidationFailed { report };
        let text = err.to_string();
        assert!(text.contains("broker must not be empty"));
        assert!(text.contains("port out of range"));
    }
}
