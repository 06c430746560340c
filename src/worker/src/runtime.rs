//! ContainerRuntime - Trait for the node's container runtime.

use async_trait::async_trait;
use container_snapshot_core::error::Result;
use futures::stream::BoxStream;

use crate::credentials::RegistryAuth;
use crate::reference::ImageReference;

/// Commit parameters.
#[derive(Debug, Clone)]
pub struct CommitRequest<'a> {
    /// Runtime id of the running container
    pub container: &'a str,
    /// Repository and tag the new image is recorded under
    pub reference: &'a ImageReference,
    pub author: Option<&'a str>,
    pub comment: Option<&'a str>,
}

/// One progress record of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushProgress {
    pub status: Option<String>,
    pub progress: Option<String>,
    /// Set when the runtime reports the push failed.
    pub error: Option<String>,
}

impl PushProgress {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Operations the worker needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Commit the container's filesystem to a new image.
    ///
    /// Returns the new image id.
    async fn commit(&self, request: CommitRequest<'_>) -> Result<String>;

    /// Start pushing an image, optionally authenticated.
    ///
    /// The push only completes once the returned stream is drained.
    async fn push(
        &self,
        reference: &ImageReference,
        auth: Option<&RegistryAuth>,
    ) -> Result<BoxStream<'static, Result<PushProgress>>>;
}
