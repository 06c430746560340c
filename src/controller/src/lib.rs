//! Container Snapshot Controller
//!
//! Watches snapshot resources and, for each one, resolves the source
//! container, starts a delegated worker job on its node and mirrors the
//! job's outcome back into the snapshot's status.

pub mod client;
pub mod dispatcher;
pub mod memory;
pub mod reconciler;
pub mod template;

pub use client::ClusterClient;
pub use dispatcher::{Dispatcher, WorkQueue};
pub use memory::MemoryCluster;
pub use reconciler::{ReconcileOutcome, Reconciler};
