//! Termination message written for the supervising job.

use std::path::Path;

use container_snapshot_core::error::SnapshotError;
use container_snapshot_core::failure::{FailureKind, EXIT_SETUP_FAILED, EXIT_UNCLASSIFIED};

/// Upper bound the cluster keeps of a termination message.
const MAX_MESSAGE_BYTES: usize = 4096;

/// Exit code for a failed snapshot run.
pub fn exit_code(err: &SnapshotError) -> i32 {
    err.failure_kind()
        .map(FailureKind::exit_code)
        .unwrap_or(EXIT_UNCLASSIFIED)
}

/// Message recorded for a failed run: the failure reason and the error text.
pub fn message(err: &SnapshotError) -> String {
    let text = match err.failure_kind() {
        Some(kind) => format!("{}: {}", kind.reason(), err),
        None => err.to_string(),
    };
    truncate(text, MAX_MESSAGE_BYTES)
}

/// Write the failure message; a missing or read-only path is logged and ignored.
pub fn write(path: &Path, err: &SnapshotError) {
    if let Err(e) = std::fs::write(path, message(err)) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to write termination message"
        );
    }
}

/// Record a failed snapshot run and return its exit code.
pub fn report(path: &Path, err: &SnapshotError) -> i32 {
    write(path, err);
    exit_code(err)
}

/// Record a failure that happened before any snapshot work started.
pub fn report_setup_failure(path: &Path, err: &SnapshotError) -> i32 {
    write(path, err);
    EXIT_SETUP_FAILED
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
