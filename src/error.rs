//! Error types for telemux.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error messages.

use thiserror::Error;

use crate::record::{TelemetryClass, TelemetryKey};

/// Registry errors raised by register/dispatch on a session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown {class} key '{key}': not declared by device metadata")]
    UnknownKey {
        class: TelemetryClass,
        key: TelemetryKey,
    },

    #[error("Session is destroyed; no further register or dispatch is possible")]
    SessionClosed,
}

/// Errors produced by the historical bootstrap merge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("Historical fetch failed: {message}")]
    FetchFailed {
        message: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Transport errors at the live-stream and batch-fetch boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open {stream} stream: {message}")]
    OpenFailed {
        stream: String,
        message: String,
    },

    #[error("Disconnected: {path}")]
    Disconnected {
        path: String,
    },
}

/// Error returned by a subscriber callback to signal a delivery fault.
///
/// A fault is isolated to the failing callback: it is counted and logged and
/// never prevents delivery to the remaining subscribers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Subscriber callback failed: {message}")]
pub struct CallbackError {
    /// Human-readable fault description.
    pub message: String,
}

impl CallbackError {
    /// Creates a callback error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for telemux.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TelemetryError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a registry error.
    #[must_use]
    pub const fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// Returns true if this is a merge error.
    #[must_use]
    pub const fn is_merge(&self) -> bool {
        matches!(self, Self::Merge(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if the operation attempted a destroyed session.
    #[must_use]
    pub const fn is_session_closed(&self) -> bool {
        matches!(self, Self::Registry(RegistryError::SessionClosed))
    }

    /// Returns true if this error is retryable.
    ///
    /// Merge failures are retryable only through an explicit re-activation;
    /// they are still marked retryable so callers can distinguish them from
    /// programmer mistakes such as `SessionClosed`.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Registry(_) => false,
            Self::Merge(_) => true,
            Self::Transport(_) => true,
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for telemux operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_message_names_class_and_key() {
        let err = RegistryError::UnknownKey {
            class: TelemetryClass::Property,
            key: TelemetryKey::new("temp"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("property"));
        assert!(msg.contains("temp"));
    }

    #[test]
    fn merge_timeout_message_contains_duration() {
        let err = MergeError::Timeout { duration_ms: 5000 };
        let msg = format!("{err}");
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn telemetry_error_from_registry() {
        let err: TelemetryError = RegistryError::SessionClosed.into();
        assert!(err.is_registry());
        assert!(err.is_session_closed());
        assert!(!err.is_retryable());
    }

    #[test]
    fn telemetry_error_from_merge_is_retryable() {
        let err: TelemetryError = MergeError::FetchFailed {
            message: "backend unavailable".to_string(),
        }
        .into();
        assert!(err.is_merge());
        assert!(err.is_retryable());
    }

    #[test]
    fn telemetry_error_from_transport_is_retryable() {
        let err: TelemetryError = TransportError::Disconnected {
            path: "property_stream".to_string(),
        }
        .into();
        assert!(err.is_transport());
        assert!(err.is_retryable());
    }

    #[test]
    fn internal_error_carries_message() {
        let err = TelemetryError::internal("unexpected state");
        assert!(!err.is_retryable());
        let msg = format!("{err}");
        assert!(msg.contains("unexpected state"));
    }
}
