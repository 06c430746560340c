//! Container Snapshot Worker
//!
//! Runs inside the delegated job on the source container's node: loads the
//! mounted registry credentials, commits the container through the node's
//! runtime and pushes the image, reporting failures through exit codes and
//! the termination message.

pub mod args;
pub mod credentials;
pub mod docker;
pub mod executor;
pub mod reference;
pub mod runtime;
pub mod termination;

pub use credentials::{CredentialStore, RegistryAuth};
pub use docker::DockerRuntime;
pub use executor::{SnapshotOptions, SnapshotOutcome, Worker};
pub use reference::ImageReference;
pub use runtime::{CommitRequest, ContainerRuntime, PushProgress};
