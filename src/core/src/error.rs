use thiserror::Error;

use crate::condition::ConditionType;
use crate::failure::FailureKind;

/// Container snapshot error types
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Target image reference could not be parsed
    #[error("Invalid image '{image}': {reason}")]
    InvalidImage { image: String, reason: String },

    /// Container runtime rejected the commit
    #[error("Container commit failed: {container} - {message}")]
    CommitFailed { container: String, message: String },

    /// Every credential and the anonymous push were rejected
    #[error("Image push failed: {image} after {attempts} attempt(s) - {message}")]
    PushFailed {
        image: String,
        attempts: usize,
        message: String,
    },

    /// A credential file could not be read or parsed
    #[error("Credential load failed: {path} - {message}")]
    CredentialLoad { path: String, message: String },

    /// Source pod does not exist
    #[error("Source pod not found: {pod}")]
    SourcePodNotFound { pod: String },

    /// Source pod exists but is not running
    #[error("Source pod not ready: {pod} is {phase}")]
    SourcePodNotReady { pod: String, phase: String },

    /// Source pod is running but the named container is missing
    #[error("Source container not found: {container} in pod {pod}")]
    SourceContainerNotFound { pod: String, container: String },

    /// Optimistic update collided with a concurrent write
    #[error("Conflict updating {kind} {key}")]
    Conflict { kind: String, key: String },

    /// Zero or several delegated jobs are owned by one snapshot
    #[error("Snapshot {snapshot} owns {found} jobs, expected exactly one")]
    OwnershipViolation { snapshot: String, found: usize },

    /// Cluster API error
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Container runtime API error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Serialization(err.to_string())
    }
}

impl SnapshotError {
    /// Worker failure category, if this error is one the worker reports
    /// through a dedicated exit code.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SnapshotError::InvalidImage { .. } => Some(FailureKind::InvalidImage),
            SnapshotError::CommitFailed { .. } => Some(FailureKind::CommitFailed),
            SnapshotError::PushFailed { .. } => Some(FailureKind::PushFailed),
            _ => None,
        }
    }

    /// Condition recorded on the snapshot when source resolution fails.
    pub fn source_condition(&self) -> Option<ConditionType> {
        match self {
            SnapshotError::SourcePodNotFound { .. } => Some(ConditionType::SourcePodNotFound),
            SnapshotError::SourcePodNotReady { .. } => Some(ConditionType::SourcePodNotReady),
            SnapshotError::SourceContainerNotFound { .. } => {
                Some(ConditionType::SourceContainerNotFound)
            }
            _ => None,
        }
    }

    /// Whether the reconciliation that produced this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SnapshotError::Conflict { .. } | SnapshotError::Cluster(_) | SnapshotError::Timeout(_)
        )
    }
}

/// Result type alias for container snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;
