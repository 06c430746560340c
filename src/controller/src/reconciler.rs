//! Snapshot reconciler.
//!
//! Drives a snapshot through `Created → Running → Complete | Failed` by
//! creating one delegated job and mirroring its state into the snapshot's
//! status. Each call looks at the current cluster state only, so repeating
//! it is always safe.

use std::sync::Arc;

use chrono::Utc;
use container_snapshot_core::condition::{ConditionStatus, ConditionType};
use container_snapshot_core::config::ControllerConfig;
use container_snapshot_core::context::ReconcileContext;
use container_snapshot_core::error::{Result, SnapshotError};
use container_snapshot_core::failure::FailureKind;
use container_snapshot_core::resource::{LocalObjectReference, ObjectKey, Snapshot, WorkerState};
use container_snapshot_core::workload::{Job, Phase, TerminationRecord};
use tracing::Instrument;

use crate::client::ClusterClient;
use crate::template;

/// Result of one reconciliation.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Nothing more to do until the next change.
    Done,
    /// The snapshot cannot make progress; do not requeue.
    Failed(SnapshotError),
    /// Transient failure; requeue with backoff.
    Retry(String),
}

impl ReconcileOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, ReconcileOutcome::Done)
    }
}

/// Worker state mirrored from the delegated job's phase.
pub fn worker_state_for(phase: Phase) -> WorkerState {
    match phase {
        Phase::Pending => WorkerState::Created,
        Phase::Running => WorkerState::Running,
        Phase::Succeeded => WorkerState::Complete,
        Phase::Failed => WorkerState::Failed,
        Phase::Unknown => WorkerState::Unknown,
    }
}

/// Failure category of a terminated job.
///
/// The termination reason wins; runtimes commonly report a bare `Error`
/// reason, in which case the worker's exit code decides.
pub fn classify_termination(record: &TerminationRecord) -> Option<FailureKind> {
    FailureKind::from_reason(&record.reason).or_else(|| FailureKind::from_exit_code(record.exit_code))
}

pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    config: ControllerConfig,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClient>, config: ControllerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn reconcile(&self, ctx: &ReconcileContext) -> ReconcileOutcome {
        async {
            match self.reconcile_key(&ctx.key).await {
                Ok(()) => ReconcileOutcome::Done,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, "Reconcile will be retried");
                    ReconcileOutcome::Retry(e.to_string())
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reconcile failed");
                    ReconcileOutcome::Failed(e)
                }
            }
        }
        .instrument(ctx.span())
        .await
    }

    async fn reconcile_key(&self, key: &ObjectKey) -> Result<()> {
        let Some(snapshot) = self.client.get_snapshot(key).await? else {
            tracing::debug!("Snapshot no longer exists");
            return Ok(());
        };

        if snapshot.is_deleting() {
            tracing::debug!("Snapshot is being deleted");
            return Ok(());
        }

        match snapshot.status.worker_state {
            Some(state) if state.is_terminal() => {
                tracing::debug!(state = %state, "Snapshot finished");
                Ok(())
            }
            Some(state) if state.is_active() => self.update(snapshot).await,
            _ => self.create(snapshot).await,
        }
    }

    /// Creation path: resolve the source container and start the job.
    async fn create(&self, mut snapshot: Snapshot) -> Result<()> {
        let jobs = self.owned_jobs(&snapshot).await?;
        if !jobs.is_empty() {
            tracing::info!(jobs = jobs.len(), "Job already exists, syncing status");
            return self.sync(snapshot, jobs).await;
        }

        let (node_name, container_id) = match (
            snapshot.status.node_name.clone(),
            snapshot.status.container_id.clone(),
        ) {
            (Some(node), Some(id)) => (node, id),
            _ => match self.resolve_source(&snapshot).await {
                Ok(resolved) => resolved,
                Err(e) => return self.fail_resolution(snapshot, e).await,
            },
        };

        let job = template::build_job(&snapshot, &node_name, &container_id, &self.config);
        let job = self.client.create_job(job).await?;
        tracing::info!(
            job = %job.metadata.name,
            node = %node_name,
            container = %container_id,
            "Created snapshot job"
        );

        snapshot.status.node_name = Some(node_name);
        snapshot.status.container_id = Some(container_id);
        snapshot.status.job_ref = Some(LocalObjectReference::new(job.metadata.name));
        snapshot.status.worker_state = Some(WorkerState::Created);
        self.persist(&snapshot).await
    }

    /// Locate the running source container, returning node and runtime id.
    async fn resolve_source(&self, snapshot: &Snapshot) -> Result<(String, String)> {
        let spec = &snapshot.spec;
        let pod_key = ObjectKey::new(snapshot.metadata.namespace.clone(), spec.pod_name.clone());

        let pod = self
            .client
            .get_pod(&pod_key)
            .await?
            .ok_or_else(|| SnapshotError::SourcePodNotFound {
                pod: pod_key.to_string(),
            })?;

        if pod.status.phase != Phase::Running {
            return Err(SnapshotError::SourcePodNotReady {
                pod: pod_key.to_string(),
                phase: pod.status.phase.to_string(),
            });
        }

        let status = pod.container_status(&spec.container_name).ok_or_else(|| {
            SnapshotError::SourceContainerNotFound {
                pod: pod_key.to_string(),
                container: spec.container_name.clone(),
            }
        })?;

        // A container without a runtime id has not started yet
        let container_id = status
            .runtime_id()
            .ok_or_else(|| SnapshotError::SourcePodNotReady {
                pod: pod_key.to_string(),
                phase: format!("{} (container {} not started)", pod.status.phase, status.name),
            })?
            .to_string();

        let node_name = pod.spec.node_name.clone().ok_or_else(|| {
            SnapshotError::SourcePodNotReady {
                pod: pod_key.to_string(),
                phase: format!("{} (not scheduled)", pod.status.phase),
            }
        })?;

        Ok((node_name, container_id))
    }

    /// Record a resolution failure and return it.
    async fn fail_resolution(&self, mut snapshot: Snapshot, err: SnapshotError) -> Result<()> {
        let Some(condition) = err.source_condition() else {
            return Err(err);
        };

        tracing::warn!(condition = %condition, error = %err, "Source resolution failed");
        snapshot.status.conditions.upsert(
            condition,
            ConditionStatus::True,
            err.to_string(),
            Utc::now(),
        );
        snapshot.status.worker_state = Some(WorkerState::Failed);
        self.persist(&snapshot).await?;
        Err(err)
    }

    /// Update path: mirror the job's state into the snapshot.
    async fn update(&self, snapshot: Snapshot) -> Result<()> {
        let jobs = self.owned_jobs(&snapshot).await?;
        self.sync(snapshot, jobs).await
    }

    async fn sync(&self, mut snapshot: Snapshot, jobs: Vec<Job>) -> Result<()> {
        let job = match <[Job; 1]>::try_from(jobs) {
            Ok([job]) => job,
            Err(jobs) => {
                return Err(SnapshotError::OwnershipViolation {
                    snapshot: snapshot.key().to_string(),
                    found: jobs.len(),
                })
            }
        };

        let status = &mut snapshot.status;
        let mut changed = false;

        let state = worker_state_for(job.status.phase);
        if status.worker_state != Some(state) {
            tracing::info!(
                from = %status.worker_state.map(|s| s.to_string()).unwrap_or_default(),
                to = %state,
                job = %job.metadata.name,
                "Worker state changed"
            );
            status.worker_state = Some(state);
            changed = true;
        }

        if status.job_ref.as_ref().map(|r| r.name.as_str()) != Some(job.metadata.name.as_str()) {
            status.job_ref = Some(LocalObjectReference::new(job.metadata.name.clone()));
            changed = true;
        }

        // Fill what an interrupted creation path did not persist
        if status.node_name.is_none() && job.spec.node_name.is_some() {
            status.node_name = job.spec.node_name.clone();
            changed = true;
        }
        if status.container_id.is_none() {
            if let Some(id) = template::container_id_of(&job) {
                status.container_id = Some(id.to_string());
                changed = true;
            }
        }

        if job.status.phase.is_terminated() {
            if let Some(record) = &job.status.termination {
                if let Some(kind) = classify_termination(record) {
                    let condition: ConditionType = kind.condition_type();
                    let at = record.finished_at.unwrap_or_else(Utc::now);
                    if status.conditions.upsert(
                        condition,
                        ConditionStatus::True,
                        record.message.trim(),
                        at,
                    ) {
                        tracing::warn!(
                            condition = %condition,
                            exit_code = record.exit_code,
                            "Worker reported failure"
                        );
                        changed = true;
                    }
                }
            }
        }

        if !changed {
            tracing::debug!("Status unchanged");
            return Ok(());
        }
        self.persist(&snapshot).await
    }

    async fn owned_jobs(&self, snapshot: &Snapshot) -> Result<Vec<Job>> {
        self.client
            .jobs_owned_by(&snapshot.metadata.namespace, &snapshot.metadata.uid)
            .await
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let stored = self.client.update_snapshot_status(snapshot).await?;
        tracing::debug!(
            resource_version = %stored.metadata.resource_version,
            state = ?stored.status.worker_state,
            conditions = stored.status.conditions.len(),
            "Status persisted"
        );
        Ok(())
    }
}
