//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Adapter contract and collections.
//!
//! Adapters come in three capability variants sharing one lifecycle: [`InputAdapter`]s produce
//! measurements, [`ActionAdapter`]s consume and produce, [`OutputAdapter`]s consume. Each holds an
//! [`AdapterBase`] with the shared lifecycle state; the traits supply the lifecycle operations on
//! top of it. [`AdapterCollection`] groups adapters of one variant and
//! [`AllAdaptersCollection`] owns one collection of each.

pub mod adapter;
pub mod all;
pub mod base;
pub mod collection;
pub mod command;
pub mod events;
pub mod queue;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

use tsf_common::SettingsError;
use tsf_measurement::MeasurementError;

/// Shared result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors raised by adapters and collections.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter `{adapter}` configuration error: {message}")]
    Configuration { adapter: String, message: String },
    #[error("adapter `{adapter}` is missing required setting `{key}`")]
    MissingSetting { adapter: String, key: String },
    #[error("adapter `{adapter}` setting `{key}` has invalid value `{value}`: {reason}")]
    InvalidSetting {
        adapter: String,
        key: String,
        value: String,
        reason: String,
    },
    #[error("adapter `{adapter}` was not initialized within {timeout:?}")]
    InitializationTimeout { adapter: String, timeout: Duration },
    #[error("adapter `{adapter}` could not resolve `{key}`: {source}")]
    FilterExpression {
        adapter: String,
        key: String,
        #[source]
        source: MeasurementError,
    },
    #[error("adapter `{adapter}` processing failed: {message}")]
    Processing { adapter: String, message: String },
    #[error("collection `{collection}` failed to initialize adapter `{adapter}`: {reason}")]
    PartialInitialization {
        collection: String,
        adapter: String,
        reason: String,
    },
    #[error("adapter `{adapter}` has no command named `{command}`")]
    UnknownCommand { adapter: String, command: String },
    #[error("adapter `{adapter}` command `{command}` rejected its arguments: {message}")]
    InvalidCommandArgument {
        adapter: String,
        command: String,
        message: String,
    },
    #[error("adapter `{adapter}` has been disposed")]
    Disposed { adapter: String },
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

pub use adapter::{ActionAdapter, Adapter, Consumes, InputAdapter, OutputAdapter, Produces};
pub use all::{AllAdaptersCollection, InitializationReport};
pub use base::{
    AdapterBase, AdapterStatus, DEFAULT_INITIALIZATION_TIMEOUT,
    DEFAULT_MEASUREMENT_REPORTING_INTERVAL,
};
pub use collection::{
    ActionAdapterCollection, AdapterCollection, CollectionInitialization,
    InputAdapterCollection, OutputAdapterCollection,
};
pub use command::{CommandResponse, CommandTable};
pub use events::{
    AdapterEvent, AdapterEventKind, AdapterRef, NewMeasurements, Observers, StatusLevel,
    SubscriptionId,
};
pub use queue::MeasurementQueue;
