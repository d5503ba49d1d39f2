//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Shared primitives and utilities for the core runtime."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Core shared primitives for the TSF workspace.
//! This crate exposes configuration loading, connection-string settings parsing,
//! and logging utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod settings;

pub use config::{
    AdapterConfig, AppConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, SessionConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use settings::{ConnectionStringFormat, Settings, SettingsError};
