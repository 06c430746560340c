//! Event-driven dispatcher.
//!
//! Watch events land in a deduplicating work queue. A fixed pool of workers
//! pulls keys from it; a key being reconciled is never handed to a second
//! worker, and an event that arrives meanwhile reruns it once it finishes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use container_snapshot_core::context::ReconcileContext;
use container_snapshot_core::error::Result;
use container_snapshot_core::resource::ObjectKey;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::client::ClusterClient;
use crate::reconciler::{ReconcileOutcome, Reconciler};

#[derive(Default)]
struct QueueState {
    /// Keys waiting for a worker, in arrival order
    pending: VecDeque<ObjectKey>,
    /// Membership of `pending`
    queued: HashSet<ObjectKey>,
    /// Keys currently being reconciled
    active: HashSet<ObjectKey>,
    /// Active keys that changed while being reconciled
    dirty: HashSet<ObjectKey>,
    /// Consecutive retryable failures per key
    failures: HashMap<ObjectKey, u32>,
    shut_down: bool,
}

/// Per-key serialized work queue.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key unless it is already waiting.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock();
        if state.shut_down || state.queued.contains(&key) {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        state.queued.insert(key.clone());
        state.pending.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    fn try_next(&self) -> Option<ObjectKey> {
        let mut state = self.state.lock();
        let key = state.pending.pop_front()?;
        state.queued.remove(&key);
        state.active.insert(key.clone());
        Some(key)
    }

    /// Wait for the next key; `None` once the queue is shut down.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            if self.state.lock().shut_down {
                return None;
            }
            if let Some(key) = self.try_next() {
                return Some(key);
            }
            notified.await;
        }
    }

    /// Release a key taken with [`WorkQueue::next`].
    pub fn done(&self, key: &ObjectKey) {
        let requeue = {
            let mut state = self.state.lock();
            state.active.remove(key);
            state.dirty.remove(key)
        };
        if requeue {
            self.add(key.clone());
        }
    }

    /// Count a retryable failure, returning the consecutive total.
    pub fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut state = self.state.lock();
        let failures = state.failures.entry(key.clone()).or_insert(0);
        *failures += 1;
        *failures
    }

    /// Reset the failure count of a key.
    pub fn forget(&self, key: &ObjectKey) {
        self.state.lock().failures.remove(key);
    }

    fn failures(&self, key: &ObjectKey) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        self.state.lock().shut_down = true;
        self.notify.notify_waiters();
    }
}

/// Runs reconciliations for snapshot keys as cluster events arrive.
pub struct Dispatcher {
    client: Arc<dyn ClusterClient>,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ClusterClient>, reconciler: Reconciler) -> Self {
        Self {
            client,
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Queue every existing snapshot.
    pub async fn resync(&self) -> Result<()> {
        let keys = self.client.list_snapshots().await?;
        tracing::debug!(snapshots = keys.len(), "Resyncing snapshots");
        for key in keys {
            self.queue.add(key);
        }
        Ok(())
    }

    /// Dispatch until `shutdown` resolves, then wait for in-flight work.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut events = self.client.subscribe();
        self.resync().await?;

        let workers = self.reconciler.config().max_concurrent_reconciles.max(1);
        tracing::info!(workers, "Snapshot dispatcher started");

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let this = Arc::clone(&self);
            pool.spawn(async move { this.work().await });
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Ok(key) => self.queue.add(key),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Watch lagged, resyncing");
                        if let Err(e) = self.resync().await {
                            tracing::error!(error = %e, "Resync failed");
                        }
                    }
                    Err(RecvError::Closed) => {
                        tracing::warn!("Watch closed");
                        break;
                    }
                },
            }
        }

        self.queue.shut_down();
        while pool.join_next().await.is_some() {}
        tracing::info!("Snapshot dispatcher stopped");
        Ok(())
    }

    async fn work(&self) {
        while let Some(key) = self.queue.next().await {
            self.process(&key).await;
            self.queue.done(&key);
        }
    }

    /// Reconcile one key and act on the outcome.
    pub async fn process(&self, key: &ObjectKey) -> ReconcileOutcome {
        let ctx = ReconcileContext::new(key.clone(), self.queue.failures(key) + 1);
        let outcome = self.reconciler.reconcile(&ctx).await;

        match &outcome {
            ReconcileOutcome::Done | ReconcileOutcome::Failed(_) => self.queue.forget(key),
            ReconcileOutcome::Retry(reason) => {
                let failures = self.queue.record_failure(key);
                let delay = self.reconciler.config().requeue_delay(failures);
                tracing::info!(
                    snapshot = %key,
                    failures,
                    delay = ?delay,
                    reason = %reason,
                    "Requeueing snapshot"
                );
                self.requeue_after(key.clone(), delay);
            }
        }
        outcome
    }

    fn requeue_after(&self, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }
}
