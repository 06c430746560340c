//! Docker Engine backend over the node's mounted socket.

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::Config as ContainerConfig;
use bollard::image::{CommitContainerOptions, PushImageOptions};
use bollard::Docker;
use container_snapshot_core::error::{Result, SnapshotError};
use futures::stream::{BoxStream, StreamExt};

use crate::credentials::RegistryAuth;
use crate::reference::ImageReference;
use crate::runtime::{CommitRequest, ContainerRuntime, PushProgress};

/// Seconds to wait on a single Docker API request.
const REQUEST_TIMEOUT_SECS: u64 = 600;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the default local socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SnapshotError::Runtime(format!("failed to connect to Docker: {}", e)))?
            .with_timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS));
        Ok(Self { docker })
    }

    /// Verify the daemon answers before doing any work.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SnapshotError::Runtime(format!("Docker daemon unreachable: {}", e)))
    }
}

fn to_credentials(auth: &RegistryAuth, registry: &str) -> DockerCredentials {
    DockerCredentials {
        username: auth.username.clone(),
        password: auth.password.clone(),
        auth: auth.auth.clone(),
        email: auth.email.clone(),
        serveraddress: auth
            .serveraddress
            .clone()
            .or_else(|| Some(registry.to_string())),
        identitytoken: auth.identitytoken.clone(),
        registrytoken: auth.registrytoken.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn commit(&self, request: CommitRequest<'_>) -> Result<String> {
        let options = CommitContainerOptions {
            container: request.container.to_string(),
            repo: request.reference.name(),
            tag: request.reference.tag.clone(),
            comment: request.comment.unwrap_or_default().to_string(),
            author: request.author.unwrap_or_default().to_string(),
            pause: true,
            ..Default::default()
        };

        let commit = self
            .docker
            .commit_container(options, ContainerConfig::<String>::default())
            .await
            .map_err(|e| SnapshotError::CommitFailed {
                container: request.container.to_string(),
                message: e.to_string(),
            })?;

        Ok(commit
            .id
            .unwrap_or_else(|| request.reference.full_reference()))
    }

    async fn push(
        &self,
        reference: &ImageReference,
        auth: Option<&RegistryAuth>,
    ) -> Result<BoxStream<'static, Result<PushProgress>>> {
        let options = PushImageOptions {
            tag: reference.tag.clone(),
        };
        let credentials = auth.map(|a| to_credentials(a, &reference.registry));

        let stream = self
            .docker
            .push_image(&reference.name(), Some(options), credentials)
            .map(|item| {
                item.map(|info| PushProgress {
                    status: info.status,
                    progress: info.progress,
                    error: info.error,
                })
                .map_err(|e| SnapshotError::Runtime(e.to_string()))
            });

        Ok(stream.boxed())
    }
}
