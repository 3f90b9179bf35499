//! Error types for storegrid

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // === Client Input Errors ===
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid data for {command}: {reason}")]
    InvalidPayload { command: String, reason: String },

    #[error("Store {0} not found.")]
    StoreNotFound(String),

    #[error("Product {product} not found in store {store}.")]
    ProductNotFound { store: String, product: String },

    #[error("Store {0} already exists.")]
    StoreExists(String),

    #[error("Product {product} already exists in store {store}.")]
    ProductExists { store: String, product: String },

    #[error("Insufficient stock for {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: String,
        requested: u32,
        available: u32,
    },

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    // === Network Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No workers registered")]
    NoWorkers,

    // === Liveness ===
    #[error("Interrupted while waiting for {0}")]
    Interrupted(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::NoWorkers | Error::Io(_)
        )
    }

    /// Errors caused by what the caller sent rather than by the cluster.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownCommand(_)
                | Error::InvalidPayload { .. }
                | Error::StoreNotFound(_)
                | Error::ProductNotFound { .. }
                | Error::StoreExists(_)
                | Error::ProductExists { .. }
                | Error::InsufficientStock { .. }
        )
    }

    pub fn invalid_payload(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPayload {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Render as the `{"error": ...}` envelope used on the wire.
    pub fn to_envelope(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::Protocol(format!("expected integer: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_is_json() {
        let env = Error::NoWorkers.to_envelope();
        let value: serde_json::Value = serde_json::from_str(&env).unwrap();
        assert_eq!(value["error"], "No workers registered");
    }

    #[test]
    fn test_classification() {
        assert!(Error::StoreNotFound("x".into()).is_client_error());
        assert!(!Error::StoreNotFound("x".into()).is_retryable());
        assert!(Error::ConnectionFailed("w0".into()).is_retryable());
        assert!(!Error::ConnectionFailed("w0".into()).is_client_error());
    }
}
