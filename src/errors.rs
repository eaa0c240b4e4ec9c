//! Error types for the capability gateway
//!
//! Two families live here. `GatewayError` covers process-level failures
//! (configuration, storage) that abort startup or a CLI command. `CapabilityError` is the dispatch taxonomy: every
//! variant is converted into a failed `InvocationResult` at the dispatch
//! boundary and never escapes as a fault.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Process-level error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database operation failed: {operation} - {source}")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result alias for process-level operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a database error
    pub fn database(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Database {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::config(err.to_string())
    }
}

/// Failure kinds a capability invocation can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    CapabilityNotFound,
    ValidationError,
    DecryptionError,
    AuditUnavailable,
    HandlerFault,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::CapabilityNotFound => "CapabilityNotFound",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::DecryptionError => "DecryptionError",
            ErrorKind::AuditUnavailable => "AuditUnavailable",
            ErrorKind::HandlerFault => "HandlerFault",
        };
        f.write_str(name)
    }
}

/// Dispatch-level error taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Capability '{name}' not found")]
    NotFound { name: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Decryption failed: {message}")]
    Decryption { message: String },

    #[error("Audit trail unavailable: {reason}")]
    AuditUnavailable { reason: String },

    #[error("Handler fault: {message}")]
    HandlerFault { message: String },
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

impl CapabilityError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a validation error for a missing or malformed term
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }

    pub fn audit_unavailable(reason: impl Into<String>) -> Self {
        Self::AuditUnavailable {
            reason: reason.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::HandlerFault {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CapabilityError::NotFound { .. } => ErrorKind::CapabilityNotFound,
            CapabilityError::Validation { .. } => ErrorKind::ValidationError,
            CapabilityError::Decryption { .. } => ErrorKind::DecryptionError,
            CapabilityError::AuditUnavailable { .. } => ErrorKind::AuditUnavailable,
            CapabilityError::HandlerFault { .. } => ErrorKind::HandlerFault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = GatewayError::config("Missing cipher secret");
        assert!(config_err.to_string().contains("Configuration error"));

        let missing = CapabilityError::not_found("nope:nope");
        assert!(missing.to_string().contains("nope:nope"));
        assert_eq!(missing.kind(), ErrorKind::CapabilityNotFound);
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let store_err = crate::audit_store::AuditStoreError::Unavailable("locked".into());
        let gateway_err = GatewayError::database("open audit store", store_err);

        assert!(gateway_err.source().is_some());
        assert!(gateway_err.to_string().contains("open audit store"));
    }

    #[test]
    fn kinds_map_one_to_one() {
        let cases = [
            (CapabilityError::validation("plaintext", "missing"), ErrorKind::ValidationError),
            (CapabilityError::decryption("tag mismatch"), ErrorKind::DecryptionError),
            (CapabilityError::audit_unavailable("store down"), ErrorKind::AuditUnavailable),
            (CapabilityError::fault("boom"), ErrorKind::HandlerFault),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
        assert_eq!(ErrorKind::DecryptionError.to_string(), "DecryptionError");
    }
}
