//! ---
//! tsf_section: "11-simulation"
//! tsf_subsection: "01-bootstrap"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Demonstration adapters and the type-name factory."
//! tsf_version: "v0.1.0"
//! tsf_owner: "tbd"
//! ---
//! Concrete adapters used by the daemon and the integration tests.
//!
//! | type name        | variant | behaviour                                            |
//! |------------------|---------|------------------------------------------------------|
//! | `SyntheticInput` | input   | sine wave plus gaussian noise per output measurement |
//! | `AverageAction`  | action  | mean over a fixed number of received values          |
//! | `LogOutput`      | output  | bounded queue drained and logged on its own thread   |

pub mod average;
pub mod factory;
pub mod log_output;
pub mod synthetic;
mod ticker;

pub use average::AverageActionAdapter;
pub use factory::AdapterFactory;
pub use log_output::LogOutputAdapter;
pub use synthetic::SyntheticInputAdapter;
