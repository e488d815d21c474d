//! # Coder Gateway
//!
//! TCP listener aggregating barcode/QR scanner endpoints. Each accepted
//! connection gets its own receive loop and an ordered message buffer;
//! the workflow uses the collect-window primitive (`start_scan`) to gather
//! codes from every connected scanner for a bounded interval.

pub mod connection;
pub mod gateway;

pub use connection::ClientConnection;
pub use gateway::{CoderGateway, GatewayStatus, ScanResult};

use thiserror::Error;

/// Errors produced by the scanner gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to bind {address}: {message}")]
    Bind { address: String, message: String },

    #[error("Gateway is not running")]
    NotRunning,

    #[error("Invalid endpoint address: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("No connected client at endpoint: {endpoint}")]
    ClientNotFound { endpoint: String },

    #[error("I/O error on {endpoint}: {message}")]
    Io { endpoint: String, message: String },
}

impl GatewayError {
    pub fn bind(address: impl Into<String>, err: std::io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            message: err.to_string(),
        }
    }

    pub fn io(endpoint: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
