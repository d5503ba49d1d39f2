//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "binary"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Binary entrypoint for the TSF daemon."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tsf_common::{init_tracing, AppConfig};
use tsf_core::IaonSession;
use tsf_measurement::DataSource;
use tsf_metrics::{new_registry, spawn_http_server, DaemonMetrics, MetricsServer};
use tsf_sim::AdapterFactory;

const ROUTING_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("TSF ", env!("CARGO_PKG_VERSION")),
    about = "TSF measurement routing daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        help = "Override session.use_measurement_routing (false broadcasts every batch)"
    )]
    use_measurement_routing: Option<bool>,

    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 0,
        help = "Log adapter statuses every SECONDS while running (0 disables)"
    )]
    status_interval: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the session until interrupted")]
    Run,
    #[command(about = "Validate configuration and adapter types, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/tsfd.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    let load_duration = load_started.elapsed();
    if let Some(enabled) = cli.use_measurement_routing {
        config.session.use_measurement_routing = enabled;
    }

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());

    init_tracing("tsfd", &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        session = %config.session.name,
        adapters = config.adapter_count(),
        "configuration loaded"
    );

    let factory = AdapterFactory::with_defaults();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            daemon_metrics.inc_start();
            run_daemon(config, &factory, daemon_metrics, cli.status_interval).await?
        }
        Commands::CheckConfig => check_config(&config, &factory)?,
    }

    Ok(())
}

async fn run_daemon(
    config: AppConfig,
    factory: &AdapterFactory,
    daemon_metrics: DaemonMetrics,
    status_interval: u64,
) -> Result<()> {
    let registry = daemon_metrics.registry();
    let metrics_server: Option<MetricsServer> = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let data_source = load_data_source(&config)?;
    let adapters = factory.build_all(&config)?;
    let session = IaonSession::with_registry(config.session.clone(), adapters, registry)?;
    session.set_data_source(data_source);

    let report = session.initialize(true)?;
    if report.is_complete() {
        info!(initialized = report.initialized(), "all adapters initialized");
    } else {
        warn!(
            initialized = report.initialized(),
            failed = ?report.failed(),
            "session running with failed adapters"
        );
    }
    if session.use_measurement_routing() && !session.wait_for_routing(ROUTING_SETTLE_TIMEOUT) {
        warn!("routing tables still calculating after startup");
    }

    info!(
        session = %session.name(),
        routing = session.use_measurement_routing(),
        "daemon running; waiting for termination signal"
    );
    wait_for_shutdown(&session, status_interval).await?;
    info!("ctrl-c received; shutting down");
    session.dispose();

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

async fn wait_for_shutdown(session: &IaonSession, status_interval: u64) -> Result<()> {
    if status_interval == 0 {
        signal::ctrl_c().await?;
        return Ok(());
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval));
    ticker.tick().await;
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                return Ok(());
            }
            _ = ticker.tick() => log_statuses(session),
        }
    }
}

fn log_statuses(session: &IaonSession) {
    for status in session.statuses() {
        info!(
            adapter = %status.name,
            enabled = status.enabled,
            initialized = status.initialized,
            processed = status.processed_measurements,
            detail = status.detail.as_deref().unwrap_or(""),
            "adapter status"
        );
    }
    let snapshot = session.routing_snapshot();
    info!(
        version = snapshot.version(),
        routes = snapshot.route_count(),
        "routing status"
    );
}

fn check_config(config: &AppConfig, factory: &AdapterFactory) -> Result<()> {
    load_data_source(config)?;
    let adapters = factory.build_all(config)?;
    let summary = serde_json::json!({
        "session": config.session.name,
        "use_measurement_routing": config.session.use_measurement_routing,
        "adapters": adapters
            .inputs()
            .statuses()
            .into_iter()
            .chain(adapters.actions().statuses())
            .chain(adapters.outputs().statuses())
            .map(|status| status.name)
            .collect::<Vec<_>>(),
    });
    adapters.dispose();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn load_data_source(config: &AppConfig) -> Result<Option<Arc<DataSource>>> {
    let Some(path) = &config.data_source else {
        return Ok(None);
    };
    let source = DataSource::load(path)
        .with_context(|| format!("unable to load data source {}", path.display()))?;
    info!(
        path = %path.display(),
        tables = source.table_names().count(),
        "data source loaded"
    );
    Ok(Some(Arc::new(source)))
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}
