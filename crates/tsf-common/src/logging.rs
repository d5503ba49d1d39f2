//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Shared primitives and utilities for the core runtime."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Tracing bootstrap for the daemon and tests.
//!
//! Every process writes JSON lines to a daily rolling file under the configured directory. Stdout
//! mirrors the same events as JSON or as human readable text.

use std::env;

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "TSF_LOG";
const FALLBACK_ENV: &str = "RUST_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

// Dropping a guard stops its writer thread, so both live for the whole process.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Stdout rendering. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global subscriber for `service_name`.
///
/// The filter comes from `TSF_LOG`, then `RUST_LOG`, then `info`. An unparsable `TSF_LOG` is
/// reported on stderr and replaced by the default. Calling this again after a subscriber is
/// installed only logs the attempt.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let file_appender = daily(&config.directory, format!("{prefix}-{service_name}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer(config.format, stdout_writer))
        .with(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
        .try_init()
        .is_ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        installed,
        "tracing initialised"
    );
    Ok(())
}

/// Plain subscriber captured by the test harness, `warn` unless `RUST_LOG` says otherwise.
/// Later calls are ignored.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::StructuredJson => layer.json().with_writer(writer).boxed(),
        LogFormat::Pretty => layer.with_thread_names(true).with_writer(writer).boxed(),
    }
}

fn env_filter() -> EnvFilter {
    let directive = filter_directive(env::var(LOG_ENV).ok(), env::var(FALLBACK_ENV).ok());
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter {directive:?} ({err}); using {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}

/// First non-blank directive of the override and the fallback.
fn filter_directive(preferred: Option<String>, fallback: Option<String>) -> String {
    [preferred, fallback]
        .into_iter()
        .flatten()
        .map(|directive| directive.trim().to_owned())
        .find(|directive| !directive.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned())
}
