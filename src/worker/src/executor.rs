//! Snapshot executor: commit a container, then push it.
//!
//! Pushes try every stored credential for the target registry in discovery
//! order and finish with one anonymous attempt. Attempts are strictly
//! sequential and each one drains its progress stream to the end.

use std::time::Duration;

use container_snapshot_core::context::SnapshotContext;
use container_snapshot_core::error::{Result, SnapshotError};
use futures::StreamExt;
use tracing::Instrument;

use crate::credentials::{CredentialStore, RegistryAuth};
use crate::reference::ImageReference;
use crate::runtime::{CommitRequest, ContainerRuntime};

/// Inputs of one snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    /// Runtime id of the source container
    pub container: String,
    /// Target image reference as given by the user
    pub image: String,
    pub author: Option<String>,
    pub comment: Option<String>,
}

/// Result of a successful snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub image_id: String,
    pub reference: ImageReference,
    /// Push attempts made, the successful one included
    pub attempts: usize,
    /// Whether the successful push used a stored credential
    pub authenticated: bool,
}

pub struct Worker<R> {
    runtime: R,
    credentials: CredentialStore,
}

impl<R: ContainerRuntime> Worker<R> {
    pub fn new(runtime: R, credentials: CredentialStore) -> Self {
        Self {
            runtime,
            credentials,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Commit the container and push the resulting image.
    ///
    /// Every error returned is one of `InvalidImage`, `CommitFailed` or
    /// `PushFailed`.
    pub async fn take_snapshot(
        &self,
        ctx: &SnapshotContext,
        options: &SnapshotOptions,
    ) -> Result<SnapshotOutcome> {
        self.run(options).instrument(ctx.span()).await
    }

    /// [`Worker::take_snapshot`] bounded by `deadline`.
    ///
    /// Expiry drops the in-flight runtime call and yields `Timeout`, which
    /// carries no failure kind.
    pub async fn take_snapshot_within(
        &self,
        ctx: &SnapshotContext,
        options: &SnapshotOptions,
        deadline: Duration,
    ) -> Result<SnapshotOutcome> {
        tokio::time::timeout(deadline, self.take_snapshot(ctx, options))
            .await
            .map_err(|_| {
                SnapshotError::Timeout(format!(
                    "snapshot did not finish within {}",
                    humantime::format_duration(deadline)
                ))
            })?
    }

    async fn run(&self, options: &SnapshotOptions) -> Result<SnapshotOutcome> {
        let reference = ImageReference::parse(&options.image)?;

        tracing::info!(
            container = %options.container,
            reference = %reference,
            "Committing container"
        );
        let image_id = self
            .runtime
            .commit(CommitRequest {
                container: &options.container,
                reference: &reference,
                author: options.author.as_deref(),
                comment: options.comment.as_deref(),
            })
            .await
            .map_err(|e| match e {
                e @ SnapshotError::CommitFailed { .. } => e,
                other => SnapshotError::CommitFailed {
                    container: options.container.clone(),
                    message: other.to_string(),
                },
            })?;
        tracing::info!(image_id = %image_id, "Container committed");

        let (attempts, authenticated) = self.push(&reference).await?;

        tracing::info!(
            reference = %reference,
            attempts,
            authenticated,
            "Snapshot pushed"
        );
        Ok(SnapshotOutcome {
            image_id,
            reference,
            attempts,
            authenticated,
        })
    }

    /// Push with each credential in order, then anonymously.
    async fn push(&self, reference: &ImageReference) -> Result<(usize, bool)> {
        let credentials = self.credentials.credentials_for(&reference.registry);
        let mut attempts = 0;

        for (index, auth) in credentials.iter().enumerate() {
            attempts += 1;
            match self.push_once(reference, Some(auth)).await {
                Ok(()) => return Ok((attempts, true)),
                Err(message) => tracing::warn!(
                    registry = %reference.registry,
                    credential = index,
                    username = auth.username.as_deref().unwrap_or(""),
                    error = %message,
                    "Push with credential failed, trying next"
                ),
            }
        }

        if !credentials.is_empty() {
            tracing::warn!(
                registry = %reference.registry,
                "All credentials rejected, falling back to anonymous push"
            );
        }
        attempts += 1;
        self.push_once(reference, None)
            .await
            .map(|()| (attempts, false))
            .map_err(|message| SnapshotError::PushFailed {
                image: reference.full_reference(),
                attempts,
                message,
            })
    }

    async fn push_once(
        &self,
        reference: &ImageReference,
        auth: Option<&RegistryAuth>,
    ) -> std::result::Result<(), String> {
        let mut stream = self
            .runtime
            .push(reference, auth)
            .await
            .map_err(|e| e.to_string())?;

        while let Some(record) = stream.next().await {
            let record = record.map_err(|e| e.to_string())?;
            if let Some(error) = record.error {
                return Err(error);
            }
            tracing::debug!(
                status = record.status.as_deref().unwrap_or(""),
                progress = record.progress.as_deref().unwrap_or(""),
                "Push progress"
            );
        }
        Ok(())
    }
}
