//! Structured logging contexts.
//!
//! Each operation receives its context explicitly and enters the span it
//! produces; nothing mutates a shared logger.

use tracing::Span;

use crate::resource::ObjectKey;

/// Identity of one worker run.
#[derive(Debug, Clone, Default)]
pub struct SnapshotContext {
    pub namespace: String,
    pub snapshot: String,
    pub container: String,
    pub image: String,
}

impl SnapshotContext {
    pub fn new(
        namespace: impl Into<String>,
        snapshot: impl Into<String>,
        container: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            snapshot: snapshot.into(),
            container: container.into(),
            image: image.into(),
        }
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "snapshot",
            namespace = %self.namespace,
            snapshot = %self.snapshot,
            container = %self.container,
            image = %self.image,
        )
    }
}

/// Identity of one reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub key: ObjectKey,
    /// Attempt counter for the key, starting at 1.
    pub attempt: u32,
}

impl ReconcileContext {
    pub fn new(key: ObjectKey, attempt: u32) -> Self {
        Self { key, attempt }
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "reconcile",
            namespace = %self.key.namespace,
            snapshot = %self.key.name,
            attempt = self.attempt,
        )
    }
}
