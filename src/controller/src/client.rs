//! ClusterClient - Trait for the cluster control plane.

use async_trait::async_trait;
use container_snapshot_core::error::Result;
use container_snapshot_core::resource::{ObjectKey, Snapshot};
use container_snapshot_core::workload::{Job, Pod};
use tokio::sync::broadcast;

/// Reads and writes the reconciler performs against the cluster.
///
/// Implementations keep an index from owner uid to the jobs it controls, so
/// ownership lookups never scan every job.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a snapshot; `None` if it does not exist.
    async fn get_snapshot(&self, key: &ObjectKey) -> Result<Option<Snapshot>>;

    /// Keys of every snapshot, used for the initial resync.
    async fn list_snapshots(&self) -> Result<Vec<ObjectKey>>;

    /// Replace a snapshot's status.
    ///
    /// The write only applies if the stored resource version still equals
    /// `snapshot.metadata.resource_version`; otherwise it fails with
    /// `SnapshotError::Conflict`. Returns the stored object.
    async fn update_snapshot_status(&self, snapshot: &Snapshot) -> Result<Snapshot>;

    /// Fetch a pod; `None` if it does not exist.
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>>;

    /// Create a job, resolving `generate_name` into a unique name.
    async fn create_job(&self, job: Job) -> Result<Job>;

    /// Jobs in `namespace` whose controller owner has `owner_uid`.
    async fn jobs_owned_by(&self, namespace: &str, owner_uid: &str) -> Result<Vec<Job>>;

    /// Stream of snapshot keys to reconcile.
    ///
    /// A change to a snapshot yields its own key; a change to a job yields
    /// the key of its controlling snapshot.
    fn subscribe(&self) -> broadcast::Receiver<ObjectKey>;
}
