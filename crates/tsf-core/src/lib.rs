//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Session orchestration and lifecycle management."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Session orchestrator for the time-series framework.

pub mod session;

use tsf_measurement::MeasurementError;
use tsf_routing::RoutingError;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("routing engine error: {0}")]
    Routing(#[from] RoutingError),
    #[error("invalid input measurement keys restriction: {0}")]
    Restriction(#[from] MeasurementError),
    #[error(transparent)]
    Metrics(#[from] anyhow::Error),
    #[error("session `{session}` has been disposed")]
    Disposed { session: String },
}

pub use session::IaonSession;
