//! Command-line arguments of the snapshot worker.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use container_snapshot_core::config::{
    parse_duration, DEFAULT_CREDENTIALS_ROOT, DEFAULT_TERMINATION_LOG, ENV_NAMESPACE, ENV_TIMEOUT,
};
use container_snapshot_core::context::SnapshotContext;

use crate::executor::SnapshotOptions;

/// Container snapshot worker
#[derive(Parser, Debug, Clone)]
#[command(
    name = "snapshot-worker",
    about = "Commit a running container and push the image",
    version
)]
pub struct Args {
    /// Runtime id of the container to commit.
    #[arg(short, long)]
    pub container: String,

    /// Target image reference.
    #[arg(short, long)]
    pub image: String,

    /// Author recorded in the image metadata.
    #[arg(long)]
    pub author: Option<String>,

    /// Comment recorded in the image metadata.
    #[arg(long)]
    pub comment: Option<String>,

    /// Directory scanned for registry credential files.
    #[arg(long, default_value = DEFAULT_CREDENTIALS_ROOT)]
    pub config: PathBuf,

    /// Name of the snapshot resource this run belongs to.
    #[arg(long)]
    pub snapshot: Option<String>,

    /// Namespace of the snapshot resource.
    #[arg(long, env = ENV_NAMESPACE)]
    pub namespace: String,

    /// Deadline for the whole run, e.g. "30m" or "1h 15m".
    #[arg(long, env = ENV_TIMEOUT, default_value = "30m", value_parser = parse_timeout)]
    pub timeout: Duration,

    /// File the failure message is written to.
    #[arg(long, default_value = DEFAULT_TERMINATION_LOG)]
    pub termination_log: PathBuf,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    parse_duration(ENV_TIMEOUT, value).map_err(|e| e.to_string())
}

impl Args {
    pub fn context(&self) -> SnapshotContext {
        SnapshotContext::new(
            &self.namespace,
            self.snapshot.as_deref().unwrap_or_default(),
            &self.container,
            &self.image,
        )
    }

    pub fn options(&self) -> SnapshotOptions {
        SnapshotOptions {
            container: self.container.clone(),
            image: self.image.clone(),
            author: self.author.clone(),
            comment: self.comment.clone(),
        }
    }
}
