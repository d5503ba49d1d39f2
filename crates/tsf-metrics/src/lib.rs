//! ---
//! tsf_section: "03-observability"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Metrics collection and export utilities."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address (resolves an ephemeral `:0` port).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "tsfd_starts_total",
            "Total number of times the TSF daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tsfd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("tsfd_build_info", "Build metadata for the running daemon binary"),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

impl fmt::Debug for DaemonMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonMetrics").finish_non_exhaustive()
    }
}

/// Metrics describing routing table recomputation and dispatch.
#[derive(Clone)]
pub struct RoutingMetrics {
    calculations_total: IntCounter,
    routes: IntGauge,
    destinations: IntGaugeVec,
    calculation_seconds: Histogram,
    routed_total: IntCounter,
    unrouted_total: IntCounter,
}

impl RoutingMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let calculations_total = IntCounter::with_opts(Opts::new(
            "tsf_routing_calculations_total",
            "Number of completed routing table calculations",
        ))?;
        registry.register(Box::new(calculations_total.clone()))?;

        let routes = IntGauge::with_opts(Opts::new(
            "tsf_routing_routes",
            "Distinct measurement keys with at least one routed destination",
        ))?;
        registry.register(Box::new(routes.clone()))?;

        let destinations = IntGaugeVec::new(
            Opts::new(
                "tsf_routing_destinations",
                "Destination adapters in the live routing table by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(destinations.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let calculation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tsf_routing_calculation_seconds",
                "Wall time spent building a routing table",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(calculation_seconds.clone()))?;

        let routed_total = IntCounter::with_opts(Opts::new(
            "tsf_measurements_routed_total",
            "Measurements delivered to at least one keyed destination",
        ))?;
        registry.register(Box::new(routed_total.clone()))?;

        let unrouted_total = IntCounter::with_opts(Opts::new(
            "tsf_measurements_unrouted_total",
            "Measurements with no keyed destination",
        ))?;
        registry.register(Box::new(unrouted_total.clone()))?;

        Ok(Self {
            calculations_total,
            routes,
            destinations,
            calculation_seconds,
            routed_total,
            unrouted_total,
        })
    }

    /// Record a finished calculation.
    pub fn record_calculation(
        &self,
        seconds: f64,
        routes: usize,
        action_broadcast: usize,
        output_broadcast: usize,
    ) {
        self.calculations_total.inc();
        self.calculation_seconds.observe(seconds);
        self.routes.set(routes as i64);
        self.destinations
            .with_label_values(&["action_broadcast"])
            .set(action_broadcast as i64);
        self.destinations
            .with_label_values(&["output_broadcast"])
            .set(output_broadcast as i64);
    }

    pub fn set_keyed_destinations(&self, actions: usize, outputs: usize) {
        self.destinations
            .with_label_values(&["action"])
            .set(actions as i64);
        self.destinations
            .with_label_values(&["output"])
            .set(outputs as i64);
    }

    pub fn record_dispatch(&self, routed: usize, unrouted: usize) {
        if routed > 0 {
            self.routed_total.inc_by(routed as u64);
        }
        if unrouted > 0 {
            self.unrouted_total.inc_by(unrouted as u64);
        }
    }

    pub fn calculations(&self) -> u64 {
        self.calculations_total.get()
    }
}

impl fmt::Debug for RoutingMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingMetrics")
            .field("calculations", &self.calculations_total.get())
            .field("routes", &self.routes.get())
            .finish()
    }
}

/// Metrics raised by the session orchestrator.
#[derive(Clone)]
pub struct SessionMetrics {
    initialization_failures: IntCounterVec,
    dumped_total: IntCounterVec,
}

impl SessionMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let initialization_failures = IntCounterVec::new(
            Opts::new(
                "tsf_adapter_initialization_failures_total",
                "Adapters that failed to initialise, by collection",
            ),
            &["collection"],
        )?;
        registry.register(Box::new(initialization_failures.clone()))?;

        let dumped_total = IntCounterVec::new(
            Opts::new(
                "tsf_measurements_dumped_total",
                "Unprocessed measurements discarded by output adapters under load",
            ),
            &["adapter"],
        )?;
        registry.register(Box::new(dumped_total.clone()))?;

        Ok(Self {
            initialization_failures,
            dumped_total,
        })
    }

    pub fn record_initialization_failure(&self, collection: &str) {
        self.initialization_failures
            .with_label_values(&[collection])
            .inc();
    }

    pub fn record_dumped(&self, adapter: &str, count: usize) {
        self.dumped_total
            .with_label_values(&[adapter])
            .inc_by(count as u64);
    }

    pub fn dumped(&self, adapter: &str) -> u64 {
        self.dumped_total.with_label_values(&[adapter]).get()
    }
}

impl fmt::Debug for SessionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;
