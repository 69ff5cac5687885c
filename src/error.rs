//! Error types for the Cloud Delegator
//!
//! Provides the store error taxonomy used by every port, the admission and
//! conversion errors raised by the reconciliation engine, and the separate
//! [`PluginError`] returned by CSP plugins.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the delegator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Resource version conflict on {kind}/{name}: {reason}")]
    Conflict {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid label selector: {0}")]
    InvalidSelector(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    #[error("admission failed: {}", .violations.join("; "))]
    Admission { violations: Vec<String> },

    #[error("Failed to convert {kind}/{name} to its domain model: {reason}")]
    Conversion {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Unavailable(_)
            | Error::Conflict { .. }
            | Error::DeadlineExceeded => ErrorAction::RequeueWithBackoff,

            // Object vanished or was recreated under us - look again shortly
            Error::NotFound { .. } | Error::AlreadyExists { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(5))
            }

            // Permission issues need an operator, retry slowly
            Error::Forbidden(_) => ErrorAction::RequeueAfter(Duration::from_secs(300)),

            // Permanent errors - retrying reproduces the same failure
            Error::Configuration(_)
            | Error::Validation(_)
            | Error::InvalidSelector(_)
            | Error::Admission { .. }
            | Error::Conversion { .. }
            | Error::Cancelled => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if the store reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if the store rejected a write based on a stale version
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Short label used for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::Conflict { .. } => "conflict",
            Error::Validation(_) | Error::InvalidSelector(_) | Error::Admission { .. } => {
                "validation"
            }
            Error::Forbidden(_) => "forbidden",
            Error::Unavailable(_) | Error::Kube(_) => "unavailable",
            Error::Conversion { .. } => "conversion",
            Error::Cancelled | Error::DeadlineExceeded => "cancelled",
            _ => "internal",
        }
    }
}

/// Result type alias for the delegator
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Plugin Errors
// =============================================================================

/// Outcome reported by a CSP plugin call
///
/// These never reach the scheduler as errors: the handler records them in the
/// resource's condition history and requeues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// The provider accepted the request but has not finished yet
    #[error("operation still in progress")]
    StillProcessing,

    #[error("{provider} {operation} failed: {reason}")]
    Failed {
        provider: String,
        operation: String,
        reason: String,
    },

    #[error("{provider} has no resource {name}")]
    NotFound { provider: String, name: String },
}

impl PluginError {
    /// Build a generic provider failure
    pub fn failed(
        provider: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PluginError::Failed {
            provider: provider.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is the asynchronous "come back later" signal
    pub fn is_still_processing(&self) -> bool {
        matches!(self, PluginError::StillProcessing)
    }
}

/// Result of a CSP plugin call
pub type PluginResult = std::result::Result<(), PluginError>;

/// A single violated admission rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct Violation(pub String);

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Violation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::Conflict {
            kind: "BlockStorage".into(),
            name: "vol-1".into(),
            reason: "stale resourceVersion".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::Forbidden("denied".into());
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Unavailable("etcd leader election".into());
        assert!(transient.is_retryable());

        let conversion = Error::Conversion {
            kind: "Workspace".into(),
            name: "ws-1".into(),
            reason: "missing tenant".into(),
        };
        assert!(!conversion.is_retryable());
    }

    #[test]
    fn test_admission_message_lists_every_violation() {
        let err = Error::Admission {
            violations: vec!["first rule".into(), "second rule".into()],
        };
        let message = err.to_string();
        assert!(message.starts_with("admission failed"));
        assert!(message.contains("first rule"));
        assert!(message.contains("second rule"));
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError::failed("aruba", "create", "quota exceeded");
        assert_eq!(err.to_string(), "aruba create failed: quota exceeded");
        assert!(!err.is_still_processing());
        assert!(PluginError::StillProcessing.is_still_processing());
    }
}
