//! Error types for the discovery engine
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the discovery engine
#[derive(Error, Debug)]
pub enum Error {
    /// Prober infrastructure errors (socket creation, resolver failure).
    ///
    /// A host that simply does not answer is NOT an error; it is
    /// reported as `ProbeResult::Unreachable`.
    #[error("Probe error: {0}")]
    Probe(String),

    /// SNMP errors that escaped the prober's degrade-to-no-SNMP handling
    #[error("SNMP error: {0}")]
    Snmp(String),

    /// Device store errors
    #[error("Device store error: {0}")]
    Store(String),

    /// Unique-key violation in the device store (e.g. duplicate IP insert)
    #[error("Store conflict: {0}")]
    Conflict(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Run was cancelled before the operation could start
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Prober-specific error
    #[error("Prober error ({prober}): {message}")]
    Prober {
        /// Prober name
        prober: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a probe error
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Create an SNMP error
    pub fn snmp(msg: impl Into<String>) -> Self {
        Self::Snmp(msg.into())
    }

    /// Create a device store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a store conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a prober-specific error
    pub fn prober(prober: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Prober {
            prober: prober.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a unique-key conflict that may succeed on a fresh read
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether this error is a configuration error (aborts a run before probing)
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(Error::conflict("duplicate ip 10.0.0.2").is_conflict());
        assert!(!Error::store("disk full").is_conflict());
        assert!(Error::config("bad cidr").is_config());
        assert_eq!(
            Error::prober("net", "socket denied").to_string(),
            "Prober error (net): socket denied"
        );
    }
}
