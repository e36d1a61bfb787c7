//! Error types for the applet runtime
//!
//! All runtime errors are collected here so every layer speaks the same taxonomy.

use serde_json::Value;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Applet runtime error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Process lifecycle
    // ========================================================================
    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Runtime manager is shutting down")]
    ShuttingDown,

    // ========================================================================
    // Channels
    // ========================================================================
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error(transparent)]
    PublicCall(#[from] PublicCallError),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// Spawn error helper
    pub fn spawn(applet_id: &str, message: impl std::fmt::Display) -> Self {
        Error::Spawn(format!("applet {:?}: {}", applet_id, message))
    }

    /// Delivery error helper
    pub fn delivery(message: impl Into<String>) -> Self {
        Error::Delivery(message.into())
    }
}

// ============================================================================
// PublicCallError
// ============================================================================

/// Application-level error reported by an applet's public method.
///
/// Kept apart from transport failures so callers can translate the applet's own
/// `code`/`message`/`details` into their RPC response without losing anything.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicCallError {
    pub code: Value,
    pub message: String,
    pub details: Value,
}

impl PublicCallError {
    pub fn new(code: Value, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
        }
    }

    pub fn rpc_code(&self) -> &Value {
        &self.code
    }

    pub fn rpc_message(&self) -> &str {
        &self.message
    }

    pub fn rpc_details(&self) -> &Value {
        &self.details
    }
}

impl std::fmt::Display for PublicCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.trim().is_empty() {
            write!(f, "public call failed")
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for PublicCallError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_call_error_display() {
        let err = PublicCallError::new(json!("forbidden"), "no access", Value::Null);
        assert_eq!(err.to_string(), "no access");

        let blank = PublicCallError::new(json!(-32603), "  ", Value::Null);
        assert_eq!(blank.to_string(), "public call failed");
    }

    #[test]
    fn test_public_call_error_is_transparent() {
        let err: Error =
            PublicCallError::new(json!("validation"), "bad input", json!({"field": "x"})).into();
        assert_eq!(err.to_string(), "bad input");
        match err {
            Error::PublicCall(inner) => {
                assert_eq!(inner.rpc_code(), &json!("validation"));
                assert_eq!(inner.rpc_details(), &json!({"field": "x"}));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_spawn_helper_names_applet() {
        let err = Error::spawn("bichat", "no such file");
        assert_eq!(err.to_string(), "Spawn error: applet \"bichat\": no such file");
    }
}
