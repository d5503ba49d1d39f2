//! ---
//! tsf_section: "02-measurement-data-model"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Measurement identity, values and metadata resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Measurement data model shared by every adapter.
//!
//! A [`MeasurementKey`] names a stream (`source:id`), a [`Measurement`] carries one timestamped
//! value of that stream. The [`DataSource`] holds the metadata tables adapters query with the
//! `FILTER` expression language when resolving their declared inputs and outputs.

pub mod data_source;
pub mod filter;
pub mod key;
pub mod measurement;
pub mod parse;

/// Shared result type for measurement operations.
pub type Result<T> = std::result::Result<T, MeasurementError>;

/// Errors raised while parsing keys, evaluating filters or resolving measurements.
#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("`{0}` is not a valid measurement key, expected `source:id`")]
    InvalidKey(String),
    #[error("filter expression syntax error: {0}")]
    FilterSyntax(String),
    #[error("data source has no table named `{0}`")]
    UnknownTable(String),
    #[error("table `{table}` has no column named `{column}`")]
    UnknownColumn { table: String, column: String },
    #[error("unable to resolve measurement `{0}`")]
    UnresolvedMeasurement(String),
    #[error("invalid measurement definition `{0}`")]
    InvalidMeasurement(String),
    #[error("a data source is required to evaluate `{0}`")]
    MissingDataSource(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use data_source::{CellValue, DataSource, DataTable};
pub use filter::{FilterExpression, Predicate};
pub use key::MeasurementKey;
pub use measurement::Measurement;
pub use parse::{
    parse_input_measurement_keys, parse_output_measurements, DEFAULT_MEASUREMENT_TABLE,
};
