//! Container Snapshot Core - Shared Types
//!
//! Resource model, status conditions, error taxonomy and exit codes shared
//! by the snapshot controller and the snapshot worker.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod failure;
pub mod resource;
pub mod workload;

// Re-export commonly used types
pub use condition::{Condition, ConditionStatus, ConditionType, Conditions};
pub use config::ControllerConfig;
pub use context::{ReconcileContext, SnapshotContext};
pub use error::{Result, SnapshotError};
pub use failure::FailureKind;
pub use resource::{
    LocalObjectReference, ObjectKey, ObjectMeta, OwnerReference, Snapshot, SnapshotSpec,
    SnapshotStatus, WorkerState,
};
pub use workload::{ContainerStatus, Job, JobSpec, JobStatus, Phase, Pod, TerminationRecord};

/// Container Snapshot version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
