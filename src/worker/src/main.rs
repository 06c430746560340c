//! Snapshot worker entry point.

use clap::Parser;
use container_snapshot_core::error::SnapshotError;
use container_snapshot_core::failure::EXIT_SETUP_FAILED;
use tracing_subscriber::EnvFilter;

use container_snapshot_worker::args::Args;
use container_snapshot_worker::{termination, CredentialStore, DockerRuntime, Worker};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(EXIT_SETUP_FAILED);
        }
    };

    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    let ctx = args.context();

    tracing::info!(
        namespace = %ctx.namespace,
        snapshot = %ctx.snapshot,
        config = %args.config.display(),
        timeout = %humantime::format_duration(args.timeout),
        "Starting snapshot worker"
    );

    let setup = async {
        let credentials = CredentialStore::load(&args.config)?;
        let runtime = DockerRuntime::connect()?;
        runtime.ping().await?;
        Ok::<_, SnapshotError>(Worker::new(runtime, credentials))
    };
    let worker = match setup.await {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(error = %e, "Worker setup failed");
            return termination::report_setup_failure(&args.termination_log, &e);
        }
    };

    let options = args.options();
    match worker
        .take_snapshot_within(&ctx, &options, args.timeout)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                reference = %outcome.reference,
                image_id = %outcome.image_id,
                attempts = outcome.attempts,
                "Snapshot complete"
            );
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Snapshot failed");
            termination::report(&args.termination_log, &e)
        }
    }
}
