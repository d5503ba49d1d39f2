//! ---
//! tsf_section: "05-measurement-routing"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Routing table engine and connect-on-demand resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Measurement routing.
//!
//! [`RoutingEngine`] derives an immutable [`RoutingSnapshot`] from the adapter graph on a
//! dedicated [`CoalescingWorker`] thread and swaps it in atomically. Dispatch reads whichever
//! snapshot is current and never waits for a calculation in progress.

pub mod demand;
pub mod engine;
pub mod snapshot;
pub mod worker;

use std::io;

/// Shared result type for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("failed to spawn routing worker `{name}`: {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("routing engine has been disposed")]
    Disposed,
}

pub use demand::{resolve_connect_on_demand, DemandSets};
pub use engine::{DispatchSummary, RoutingEngine};
pub use snapshot::{RoutingSnapshot, RoutingSnapshotBuilder};
pub use worker::CoalescingWorker;
