//! In-memory cluster.
//!
//! Holds snapshots, pods and jobs in maps behind a single lock, assigns
//! uids and resource versions the way an API server would, and keeps the
//! owner uid → job index the reconciler queries.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use container_snapshot_core::error::{Result, SnapshotError};
use container_snapshot_core::resource::{ObjectKey, ObjectMeta, Snapshot, SNAPSHOT_KIND};
use container_snapshot_core::workload::{Job, JobStatus, Pod};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::broadcast;

use crate::client::ClusterClient;

const EVENT_CAPACITY: usize = 1024;

/// Length of the random suffix appended to a generated name.
const GENERATED_SUFFIX_LEN: usize = 5;

#[derive(Default)]
struct State {
    snapshots: HashMap<ObjectKey, Snapshot>,
    pods: HashMap<ObjectKey, Pod>,
    jobs: HashMap<ObjectKey, Job>,
    /// owner uid → keys of the jobs it controls
    owned_jobs: HashMap<String, BTreeSet<ObjectKey>>,
    resource_version: u64,
    /// Status updates still to reject with a conflict
    pending_conflicts: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn admit(&mut self, meta: &mut ObjectMeta) {
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Utc::now());
        }
        meta.resource_version = self.next_version();
    }
}

/// Cluster control plane kept in process memory.
pub struct MemoryCluster {
    state: RwLock<State>,
    events: broadcast::Sender<ObjectKey>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            events,
        }
    }

    fn notify(&self, key: ObjectKey) {
        // No subscribers is fine
        let _ = self.events.send(key);
    }

    /// Snapshot key a job's change should wake, if it has a snapshot owner.
    fn owner_key(job: &Job) -> Option<ObjectKey> {
        job.metadata
            .controller_owner()
            .filter(|o| o.kind == SNAPSHOT_KIND)
            .map(|o| ObjectKey::new(job.metadata.namespace.clone(), o.name.clone()))
    }

    /// Store a snapshot as a user would create or replace it.
    pub fn insert_snapshot(&self, mut snapshot: Snapshot) -> Snapshot {
        let key = snapshot.key();
        {
            let mut state = self.state.write();
            if let Some(existing) = state.snapshots.get(&key) {
                snapshot.metadata.uid = existing.metadata.uid.clone();
                snapshot.metadata.creation_timestamp = existing.metadata.creation_timestamp;
            }
            state.admit(&mut snapshot.metadata);
            state.snapshots.insert(key.clone(), snapshot.clone());
        }
        self.notify(key);
        snapshot
    }

    /// Request deletion of a snapshot; the object stays until its owner cascade runs.
    pub fn mark_snapshot_deleted(&self, key: &ObjectKey) -> bool {
        let found = {
            let mut state = self.state.write();
            let version = state.next_version();
            match state.snapshots.get_mut(key) {
                Some(snapshot) => {
                    snapshot.metadata.deletion_timestamp = Some(Utc::now());
                    snapshot.metadata.resource_version = version;
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(key.clone());
        }
        found
    }

    /// Current copy of a snapshot.
    pub fn snapshot(&self, key: &ObjectKey) -> Option<Snapshot> {
        self.state.read().snapshots.get(key).cloned()
    }

    pub fn insert_pod(&self, mut pod: Pod) -> Pod {
        let mut state = self.state.write();
        state.admit(&mut pod.metadata);
        state.pods.insert(pod.key(), pod.clone());
        pod
    }

    pub fn remove_pod(&self, key: &ObjectKey) -> Option<Pod> {
        self.state.write().pods.remove(key)
    }

    /// Store a job verbatim, indexing its owner.
    pub fn insert_job(&self, mut job: Job) -> Job {
        {
            let mut state = self.state.write();
            state.admit(&mut job.metadata);
            if let Some(owner) = job.metadata.controller_owner() {
                state
                    .owned_jobs
                    .entry(owner.uid.clone())
                    .or_default()
                    .insert(job.key());
            }
            state.jobs.insert(job.key(), job.clone());
        }
        if let Some(owner) = Self::owner_key(&job) {
            self.notify(owner);
        }
        job
    }

    /// Record a new job status, as the job controller would.
    pub fn set_job_status(&self, key: &ObjectKey, status: JobStatus) -> Result<()> {
        let owner = {
            let mut state = self.state.write();
            let version = state.next_version();
            let job = state
                .jobs
                .get_mut(key)
                .ok_or_else(|| SnapshotError::Cluster(format!("job {} not found", key)))?;
            job.status = status;
            job.metadata.resource_version = version;
            Self::owner_key(job)
        };
        if let Some(owner) = owner {
            self.notify(owner);
        }
        Ok(())
    }

    /// All jobs, ordered by key.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.state.read().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.key());
        jobs
    }

    /// Reject the next `count` status updates with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.state.write().pending_conflicts = count;
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get_snapshot(&self, key: &ObjectKey) -> Result<Option<Snapshot>> {
        Ok(self.snapshot(key))
    }

    async fn list_snapshots(&self) -> Result<Vec<ObjectKey>> {
        let mut keys: Vec<ObjectKey> = self.state.read().snapshots.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn update_snapshot_status(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        let key = snapshot.key();
        let updated = {
            let mut state = self.state.write();
            let conflict = || SnapshotError::Conflict {
                kind: SNAPSHOT_KIND.to_string(),
                key: key.to_string(),
            };

            if state.pending_conflicts > 0 {
                state.pending_conflicts -= 1;
                return Err(conflict());
            }

            let version = state.next_version();
            let stored = state
                .snapshots
                .get_mut(&key)
                .ok_or_else(|| SnapshotError::Cluster(format!("snapshot {} not found", key)))?;
            if stored.metadata.resource_version != snapshot.metadata.resource_version {
                return Err(conflict());
            }
            stored.status = snapshot.status.clone();
            stored.metadata.resource_version = version;
            stored.clone()
        };
        self.notify(key);
        Ok(updated)
    }

    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>> {
        Ok(self.state.read().pods.get(key).cloned())
    }

    async fn create_job(&self, mut job: Job) -> Result<Job> {
        {
            let mut state = self.state.write();
            let namespace = job.metadata.namespace.clone();

            if job.metadata.name.is_empty() {
                let prefix = job.metadata.generate_name.clone().ok_or_else(|| {
                    SnapshotError::Cluster("job needs a name or generateName".to_string())
                })?;
                job.metadata.name = loop {
                    let candidate = format!("{}{}", prefix, random_suffix());
                    if !state
                        .jobs
                        .contains_key(&ObjectKey::new(namespace.clone(), candidate.clone()))
                    {
                        break candidate;
                    }
                };
            } else if state.jobs.contains_key(&job.key()) {
                return Err(SnapshotError::Conflict {
                    kind: "Job".to_string(),
                    key: job.key().to_string(),
                });
            }

            state.admit(&mut job.metadata);
            if let Some(owner) = job.metadata.controller_owner() {
                state
                    .owned_jobs
                    .entry(owner.uid.clone())
                    .or_default()
                    .insert(job.key());
            }
            state.jobs.insert(job.key(), job.clone());
        }

        tracing::debug!(job = %job.key(), "Job created");
        if let Some(owner) = Self::owner_key(&job) {
            self.notify(owner);
        }
        Ok(job)
    }

    async fn jobs_owned_by(&self, namespace: &str, owner_uid: &str) -> Result<Vec<Job>> {
        let state = self.state.read();
        let jobs = state
            .owned_jobs
            .get(owner_uid)
            .into_iter()
            .flatten()
            .filter(|key| key.namespace == namespace)
            .filter_map(|key| state.jobs.get(key).cloned())
            .collect();
        Ok(jobs)
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectKey> {
        self.events.subscribe()
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_snapshot_core::resource::SnapshotSpec;
    use container_snapshot_core::workload::{JobSpec, Phase};

    fn snapshot() -> Snapshot {
        Snapshot::new(
            "default",
            "snap",
            SnapshotSpec {
                pod_name: "web".to_string(),
                container_name: "app".to_string(),
                image: "ghcr.io/org/app:v1".to_string(),
                image_push_secrets: vec![],
            },
        )
    }

    fn owned_job(owner: &Snapshot) -> Job {
        Job {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", owner.metadata.name)),
                namespace: owner.metadata.namespace.clone(),
                owner_references: vec![owner.controller_reference()],
                ..Default::default()
            },
            spec: JobSpec::default(),
            status: JobStatus::default(),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_identity() {
        let cluster = MemoryCluster::new();
        let stored = cluster.insert_snapshot(snapshot());
        assert!(!stored.metadata.uid.is_empty());
        assert!(!stored.metadata.resource_version.is_empty());
        assert!(stored.metadata.creation_timestamp.is_some());

        let fetched = cluster.get_snapshot(&stored.key()).await.unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn test_status_update_conflicts_on_stale_version() {
        let cluster = MemoryCluster::new();
        let stored = cluster.insert_snapshot(snapshot());

        let mut first = stored.clone();
        first.status.node_name = Some("node-a".to_string());
        let updated = cluster.update_snapshot_status(&first).await.unwrap();
        assert_ne!(updated.metadata.resource_version, stored.metadata.resource_version);

        let mut stale = stored;
        stale.status.node_name = Some("node-b".to_string());
        let err = cluster.update_snapshot_status(&stale).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Conflict { .. }));
        assert_eq!(
            cluster.snapshot(&updated.key()).unwrap().status.node_name.as_deref(),
            Some("node-a")
        );
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let cluster = MemoryCluster::new();
        let stored = cluster.insert_snapshot(snapshot());
        cluster.inject_conflicts(1);

        assert!(cluster.update_snapshot_status(&stored).await.is_err());
        assert!(cluster.update_snapshot_status(&stored).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_job_generates_name_and_indexes_owner() {
        let cluster = MemoryCluster::new();
        let owner = cluster.insert_snapshot(snapshot());

        let job = cluster.create_job(owned_job(&owner)).await.unwrap();
        assert!(job.metadata.name.starts_with("snap-"));
        assert_eq!(job.metadata.name.len(), "snap-".len() + GENERATED_SUFFIX_LEN);

        let owned = cluster
            .jobs_owned_by("default", &owner.metadata.uid)
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].key(), job.key());

        assert!(cluster
            .jobs_owned_by("other", &owner.metadata.uid)
            .await
            .unwrap()
            .is_empty());
        assert!(cluster
            .jobs_owned_by("default", "unknown-uid")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_job_with_taken_name_conflicts() {
        let cluster = MemoryCluster::new();
        let owner = cluster.insert_snapshot(snapshot());
        let mut job = owned_job(&owner);
        job.metadata.name = "fixed".to_string();

        cluster.create_job(job.clone()).await.unwrap();
        let err = cluster.create_job(job).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_job_changes_notify_owner() {
        let cluster = MemoryCluster::new();
        let owner = cluster.insert_snapshot(snapshot());
        let mut events = cluster.subscribe();

        let job = cluster.create_job(owned_job(&owner)).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), owner.key());

        cluster
            .set_job_status(
                &job.key(),
                JobStatus {
                    phase: Phase::Running,
                    termination: None,
                },
            )
            .unwrap();
        assert_eq!(events.recv().await.unwrap(), owner.key());
    }

    #[tokio::test]
    async fn test_mark_deleted() {
        let cluster = MemoryCluster::new();
        let stored = cluster.insert_snapshot(snapshot());
        assert!(cluster.mark_snapshot_deleted(&stored.key()));
        assert!(cluster.snapshot(&stored.key()).unwrap().is_deleting());
        assert!(!cluster.mark_snapshot_deleted(&ObjectKey::new("default", "absent")));
    }
}
