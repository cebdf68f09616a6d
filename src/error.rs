//! Error types for the Volume Replication Operator
//!
//! Provides structured error types for the reconciler, the data-source
//! resolver and the replication driver client, together with the requeue
//! policy applied to each of them.

use crate::domain::ports::ReplicationOperation;
use std::time::Duration;
use thiserror::Error;
use tonic::Code;

/// Unified error type for the operator
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

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Write conflict on {kind}/{name}, object has been modified")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Data Source Errors
    // =========================================================================
    #[error("{kind} {name} is not bound yet")]
    DataSourceNotBound { kind: String, name: String },

    #[error("{kind} {name} has no volume handle: {reason}")]
    MissingVolumeHandle {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Replication Driver Errors
    // =========================================================================
    #[error("{operation} failed: {source}")]
    Replication {
        operation: ReplicationOperation,
        #[source]
        source: DriverError,
    },

    #[error("Driver connection error: {0}")]
    DriverConnection(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by, or on the way to, the replication driver
#[derive(Error, Debug)]
pub enum DriverError {
    /// The driver answered with a gRPC status
    #[error("rpc error: code = {:?} desc = {}", .0.code(), .0.message())]
    Status(#[from] tonic::Status),

    /// The call never reached the driver
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the configured RPC timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl DriverError {
    /// Check whether the driver reported one of the given status codes.
    ///
    /// Only errors that originate from the remote call itself carry a code;
    /// transport failures and timeouts never match.
    pub fn has_known_error(&self, known: &[Code]) -> bool {
        match self {
            DriverError::Status(status) => known.contains(&status.code()),
            DriverError::Transport(_) | DriverError::Timeout(_) => false,
        }
    }

    /// Human readable message suitable for the status of the intent object
    pub fn message(&self) -> String {
        match self {
            DriverError::Status(status) => status.message().to_string(),
            other => other.to_string(),
        }
    }
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
            | Error::Conflict { .. }
            | Error::ResourceNotFound { .. }
            | Error::DataSourceNotBound { .. }
            | Error::MissingVolumeHandle { .. }
            | Error::Replication { .. }
            | Error::DriverConnection(_) => ErrorAction::RequeueWithBackoff,

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_) | Error::Validation(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Conflict { .. } | Error::DriverConnection(_)
        )
    }

    /// Message recorded in `status.message` when this error ends a reconcile.
    ///
    /// Driver failures surface the driver's own description rather than the
    /// wrapped error chain.
    pub fn status_message(&self) -> String {
        match self {
            Error::Replication { source, .. } => source.message(),
            other => other.to_string(),
        }
    }
}

/// Map a Kubernetes API error for a write, turning 409 into [`Error::Conflict`]
pub(crate) fn map_write_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => Error::Kube(other),
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::Validation("unknown parameter".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::DataSourceNotBound {
            kind: "PersistentVolumeClaim".into(),
            name: "pvc-1".into(),
        };
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);

        let err = Error::Configuration("missing driver name".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Conflict {
            kind: "VolumeReplication".into(),
            name: "vr-1".into(),
        };
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
    }

    #[test]
    fn test_known_error_only_matches_remote_status() {
        let status = DriverError::Status(tonic::Status::failed_precondition("split brain"));
        assert!(status.has_known_error(&[Code::FailedPrecondition]));
        assert!(!status.has_known_error(&[Code::NotFound]));
        assert!(!status.has_known_error(&[]));

        let transport = DriverError::Transport("connection refused".into());
        assert!(!transport.has_known_error(&[Code::FailedPrecondition, Code::Unavailable]));

        let timeout = DriverError::Timeout(Duration::from_secs(60));
        assert!(!timeout.has_known_error(&[Code::DeadlineExceeded]));
    }

    #[test]
    fn test_status_message_prefers_driver_description() {
        let err = Error::Replication {
            operation: ReplicationOperation::Promote,
            source: DriverError::Status(tonic::Status::internal("image is busy")),
        };
        assert_eq!(err.status_message(), "image is busy");

        let err = Error::Replication {
            operation: ReplicationOperation::Enable,
            source: DriverError::Transport("connection refused".into()),
        };
        assert_eq!(err.status_message(), "transport error: connection refused");
    }

    #[test]
    fn test_write_conflict_mapping() {
        let api_err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code: 409,
        });
        let err = map_write_error(api_err, "VolumeReplication", "vr-1");
        assert!(matches!(err, Error::Conflict { .. }));
    }
}
