//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Session orchestration and lifecycle management."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! The session binds one input, one action and one output collection to a routing engine.
//!
//! Produced batches from inputs and actions arrive through a single dispatch subscription that
//! consults the routing mode under a recursive read lock. Switching mode takes the write lock, so
//! every batch is delivered under exactly one mode and filter configuration, while an action
//! adapter publishing from inside `process_measurements` re-enters dispatch on the same thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use tsf_adapters::{
    Adapter, AdapterEvent, AdapterEventKind, AdapterRef, AdapterStatus, AllAdaptersCollection,
    InitializationReport, NewMeasurements, Observers, OutputAdapter, StatusLevel,
    SubscriptionId,
};
use tsf_common::SessionConfig;
use tsf_measurement::{parse_input_measurement_keys, DataSource, MeasurementKey};
use tsf_metrics::{RoutingMetrics, SessionMetrics, SharedRegistry};
use tsf_routing::{RoutingEngine, RoutingSnapshot};

use crate::{Result, SessionError};

#[derive(Debug, Clone, Copy)]
enum Hub {
    Batches,
    AdapterEvents,
    RoutingEvents,
}

struct SessionInner {
    config: SessionConfig,
    reference: AdapterRef,
    adapters: AllAdaptersCollection,
    routing: RoutingEngine,
    use_routing: RwLock<bool>,
    data_source: RwLock<Option<Arc<DataSource>>>,
    events: Observers<AdapterEvent>,
    metrics: Option<SessionMetrics>,
    subscriptions: Mutex<Vec<(Hub, SubscriptionId)>>,
    disposed: AtomicBool,
}

/// Single entry and exit point for a set of adapters and their routing.
pub struct IaonSession {
    inner: Arc<SessionInner>,
}

impl IaonSession {
    pub fn new(config: SessionConfig, adapters: AllAdaptersCollection) -> Result<Self> {
        Self::build(config, adapters, None)
    }

    /// Like [`IaonSession::new`], registering routing and session metrics in `registry`.
    pub fn with_registry(
        config: SessionConfig,
        adapters: AllAdaptersCollection,
        registry: SharedRegistry,
    ) -> Result<Self> {
        Self::build(config, adapters, Some(registry))
    }

    fn build(
        config: SessionConfig,
        adapters: AllAdaptersCollection,
        registry: Option<SharedRegistry>,
    ) -> Result<Self> {
        let (routing_metrics, session_metrics) = match registry {
            Some(registry) => (
                Some(RoutingMetrics::new(registry.clone())?),
                Some(SessionMetrics::new(registry)?),
            ),
            None => (None, None),
        };
        let routing = RoutingEngine::new(
            &config.name,
            adapters.inputs().clone(),
            adapters.actions().clone(),
            adapters.outputs().clone(),
            routing_metrics,
        )?;
        let use_routing = config.use_measurement_routing;
        adapters.set_process_measurement_filter(!use_routing);

        let inner = Arc::new(SessionInner {
            reference: AdapterRef {
                name: Arc::from(config.name.as_str()),
                instance: tsf_adapters::events::next_instance_id(),
            },
            config,
            adapters,
            routing,
            use_routing: RwLock::new(use_routing),
            data_source: RwLock::new(None),
            events: Observers::new(),
            metrics: session_metrics,
            subscriptions: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });
        SessionInner::wire(&inner);
        info!(session = %inner.reference, routing = use_routing, "session created");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn adapters(&self) -> &AllAdaptersCollection {
        &self.inner.adapters
    }

    pub fn routing(&self) -> &RoutingEngine {
        &self.inner.routing
    }

    /// Status, exception and key-update notifications from every adapter and the routing engine.
    pub fn events(&self) -> &Observers<AdapterEvent> {
        &self.inner.events
    }

    pub fn data_source(&self) -> Option<Arc<DataSource>> {
        self.inner.data_source.read().clone()
    }

    /// Share metadata with every adapter. Adapters pick it up on their next initialization.
    pub fn set_data_source(&self, data_source: Option<Arc<DataSource>>) {
        *self.inner.data_source.write() = data_source.clone();
        self.inner.adapters.set_data_source(data_source);
    }

    pub fn use_measurement_routing(&self) -> bool {
        *self.inner.use_routing.read()
    }

    /// Switch between keyed routing and broadcast.
    ///
    /// Blocks until in-flight batches finish. Must not be called from inside adapter
    /// processing. Once adapters are initialized, turning routing on first builds the table on
    /// the calling thread, so the first routed batch already has destinations.
    pub fn set_use_measurement_routing(&self, enabled: bool) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_live()?;
        if enabled && !*inner.use_routing.read() && inner.adapters.is_initialized() {
            inner.routing.calculate_now()?;
        }
        {
            let mut mode = inner.use_routing.write();
            if *mode == enabled {
                return Ok(());
            }
            *mode = enabled;
            inner.adapters.set_process_measurement_filter(!enabled);
        }
        info!(session = %inner.reference, routing = enabled, "measurement routing mode changed");
        if enabled {
            // key updates between the calculation and the flip were skipped
            inner.recalculate()?;
        }
        Ok(())
    }

    /// Narrow connect-on-demand to the dependency chain of these keys and recalculate.
    pub fn set_input_measurement_keys_restriction(
        &self,
        keys: Option<Vec<MeasurementKey>>,
    ) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner.routing.set_input_measurement_keys_restriction(normalize(keys));
        self.recalculate_routing_tables()
    }

    pub fn input_measurement_keys_restriction(&self) -> Option<Arc<[MeasurementKey]>> {
        self.inner.routing.input_measurement_keys_restriction()
    }

    /// Initialize every adapter (outputs, inputs, then actions), start them when `auto_start`
    /// is set and queue the first routing calculation.
    ///
    /// Individual adapter failures are reported in the returned report and through
    /// [`IaonSession::events`]; they never abort the session.
    pub fn initialize(&self, auto_start: bool) -> Result<InitializationReport> {
        let inner = &self.inner;
        inner.ensure_live()?;
        inner.apply_configured_restriction()?;

        let report = inner.adapters.initialize();
        if let Some(metrics) = &inner.metrics {
            for _ in &report.outputs.failed {
                metrics.record_initialization_failure(inner.adapters.outputs().name());
            }
            for _ in &report.inputs.failed {
                metrics.record_initialization_failure(inner.adapters.inputs().name());
            }
            for _ in &report.actions.failed {
                metrics.record_initialization_failure(inner.adapters.actions().name());
            }
        }
        if !report.is_complete() {
            inner.raise_status(
                StatusLevel::Warning,
                format!(
                    "{} adapter(s) failed to initialize: {}",
                    report.failed().len(),
                    report.failed().join(", ")
                ),
            );
        }

        if auto_start {
            inner.adapters.start();
        }
        inner.recalculate()?;
        info!(
            session = %inner.reference,
            initialized = report.initialized(),
            failed = report.failed().len(),
            "session initialized"
        );
        Ok(report)
    }

    /// Queue a routing recalculation when routing mode is on and the session has initialized its
    /// adapters. Members that failed are routed as broadcast targets until they recover.
    pub fn recalculate_routing_tables(&self) -> Result<()> {
        self.inner.recalculate()
    }

    /// Block until no routing calculation is queued or running.
    pub fn wait_for_routing(&self, timeout: Duration) -> bool {
        self.inner.routing.wait_idle(timeout)
    }

    pub fn routing_snapshot(&self) -> Arc<RoutingSnapshot> {
        self.inner.routing.snapshot()
    }

    /// Status snapshot of every adapter, outputs first.
    pub fn statuses(&self) -> Vec<AdapterStatus> {
        let adapters = &self.inner.adapters;
        let mut statuses = adapters.outputs().statuses();
        statuses.extend(adapters.inputs().statuses());
        statuses.extend(adapters.actions().statuses());
        statuses
    }

    pub fn start(&self) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner.adapters.start();
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.adapters.stop();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Stop adapters, unwire events, dispose the routing engine, then the adapters.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.adapters.stop();
        inner.unwire();
        inner.routing.dispose();
        inner.adapters.dispose();
        inner.events.clear();
        info!(session = %inner.reference, "session disposed");
    }
}

impl Drop for IaonSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for IaonSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IaonSession")
            .field("name", &self.inner.config.name)
            .field("routing", &*self.inner.use_routing.read())
            .field("adapters", &self.inner.adapters.len())
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}

impl SessionInner {
    fn wire(inner: &Arc<Self>) {
        let mut subscriptions = Vec::with_capacity(3);

        let weak: Weak<Self> = Arc::downgrade(inner);
        let id = inner
            .adapters
            .new_measurements()
            .subscribe(move |batch: &NewMeasurements| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(batch);
                }
            });
        subscriptions.push((Hub::Batches, id));

        let weak: Weak<Self> = Arc::downgrade(inner);
        let id = inner.adapters.events().subscribe(move |event: &AdapterEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_adapter_event(event);
            }
        });
        subscriptions.push((Hub::AdapterEvents, id));

        let weak: Weak<Self> = Arc::downgrade(inner);
        let id = inner.routing.events().subscribe(move |event: &AdapterEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.events.notify(event);
            }
        });
        subscriptions.push((Hub::RoutingEvents, id));

        *inner.subscriptions.lock() = subscriptions;
    }

    fn unwire(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (hub, id) in subscriptions {
            match hub {
                Hub::Batches => self.adapters.new_measurements().unsubscribe(id),
                Hub::AdapterEvents => self.adapters.events().unsubscribe(id),
                Hub::RoutingEvents => self.routing.events().unsubscribe(id),
            };
        }
        debug!(session = %self.reference, "session events unwired");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(SessionError::Disposed {
                session: self.config.name.clone(),
            });
        }
        Ok(())
    }

    fn dispatch(&self, batch: &NewMeasurements) {
        if self.is_disposed() {
            return;
        }
        let routing = self.use_routing.read_recursive();
        if *routing {
            self.routing.route(&batch.measurements);
        } else {
            self.routing.broadcast(&batch.measurements);
        }
    }

    fn on_adapter_event(&self, event: &AdapterEvent) {
        match &event.kind {
            AdapterEventKind::InputMeasurementKeysUpdated
            | AdapterEventKind::OutputMeasurementsUpdated
            | AdapterEventKind::Disposed => {
                if let Err(err) = self.recalculate() {
                    debug!(session = %self.reference, error = %err, "routing recalculation skipped");
                }
            }
            AdapterEventKind::UnprocessedMeasurements(count) => {
                self.handle_unprocessed(&event.source, *count);
            }
            AdapterEventKind::Status { .. } | AdapterEventKind::ProcessException { .. } => {}
        }
        self.events.notify(event);
    }

    fn recalculate(&self) -> Result<()> {
        self.ensure_live()?;
        if !*self.use_routing.read_recursive() {
            return Ok(());
        }
        if !self.adapters.is_initialized() {
            debug!(session = %self.reference, "routing calculation deferred until adapters are initialized");
            return Ok(());
        }
        self.routing.calculate_routing_tables()?;
        Ok(())
    }

    fn apply_configured_restriction(&self) -> Result<()> {
        let Some(expression) = self.config.input_measurement_keys_restriction.as_deref() else {
            return Ok(());
        };
        let data_source = self.data_source.read().clone();
        let keys = parse_input_measurement_keys(
            data_source.as_deref(),
            expression,
            tsf_measurement::DEFAULT_MEASUREMENT_TABLE,
        )?;
        let keys = normalize(Some(keys));
        info!(
            session = %self.reference,
            keys = keys.as_ref().map_or(0, Vec::len),
            "input measurement keys restriction applied"
        );
        self.routing.set_input_measurement_keys_restriction(keys);
        Ok(())
    }

    /// Warn about, or trim, adapters that are falling behind.
    fn handle_unprocessed(&self, source: &AdapterRef, count: usize) {
        let warning = self.config.measurement_warning_threshold;
        let dumping = self.config.measurement_dumping_threshold;

        if count > dumping {
            match self.output_adapter(source) {
                Some(output) => {
                    output.remove_measurements(dumping);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_dumped(&source.name, dumping);
                    }
                    self.raise_status(
                        StatusLevel::Alarm,
                        format!(
                            "{dumping} unprocessed measurements were removed from output adapter \
                             {source}: queue size of {count} exceeded the dumping threshold"
                        ),
                    );
                    self.raise_status(
                        StatusLevel::Warning,
                        format!(
                            "output adapter {source} is not keeping up with incoming data, \
                             check its connection and resources"
                        ),
                    );
                }
                None => self.raise_status(
                    StatusLevel::Warning,
                    format!(
                        "CRITICAL: {source} has {count} unprocessed measurements, above the \
                         dumping threshold of {dumping}"
                    ),
                ),
            }
        } else if count > warning {
            let prefix = if count >= dumping.saturating_sub(warning) {
                "CRITICAL: "
            } else {
                ""
            };
            self.raise_status(
                StatusLevel::Warning,
                format!(
                    "{prefix}{source} has {count} unprocessed measurements, above the warning \
                     threshold of {warning}"
                ),
            );
        }
    }

    fn output_adapter(&self, source: &AdapterRef) -> Option<Arc<dyn OutputAdapter>> {
        self.adapters
            .outputs()
            .snapshot()
            .into_iter()
            .find(|output| output.base().instance() == source.instance)
    }

    fn raise_status(&self, level: StatusLevel, message: String) {
        match level {
            StatusLevel::Info => info!(session = %self.reference, "{}", message),
            StatusLevel::Warning => warn!(session = %self.reference, "{}", message),
            StatusLevel::Alarm => error!(session = %self.reference, alarm = true, "{}", message),
        }
        self.events.notify(&AdapterEvent {
            source: self.reference.clone(),
            kind: AdapterEventKind::Status { level, message },
        });
    }
}

/// Sort and dedupe; an empty list means no restriction.
fn normalize(keys: Option<Vec<MeasurementKey>>) -> Option<Vec<MeasurementKey>> {
    let mut keys = keys?;
    keys.sort();
    keys.dedup();
    (!keys.is_empty()).then_some(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsf_adapters::testing::RecordingOutputAdapter;

    fn session_with(output: Arc<RecordingOutputAdapter>) -> IaonSession {
        let config = SessionConfig {
            measurement_warning_threshold: 100,
            measurement_dumping_threshold: 500,
            ..SessionConfig::default()
        };
        let adapters = AllAdaptersCollection::empty();
        adapters.outputs().add(output);
        IaonSession::new(config, adapters).unwrap()
    }

    fn statuses(session: &IaonSession) -> Arc<Mutex<Vec<(StatusLevel, String)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.events().subscribe(move |event| {
            if let AdapterEventKind::Status { level, message } = &event.kind {
                sink.lock().push((*level, message.clone()));
            }
        });
        seen
    }

    #[test]
    fn normalize_drops_empty_restrictions() {
        assert_eq!(normalize(None), None);
        assert_eq!(normalize(Some(Vec::new())), None);
        let keys = normalize(Some(vec![
            "B:1".parse().unwrap(),
            "A:1".parse().unwrap(),
            "B:1".parse().unwrap(),
        ]))
        .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].to_string(), "A:1");
    }

    #[test]
    fn backlog_above_dumping_threshold_is_trimmed() {
        let output = RecordingOutputAdapter::new("ARCHIVE").shared();
        output.set_backlog(800);
        let session = session_with(output.clone());
        let seen = statuses(&session);

        output.base().raise_unprocessed(800);

        assert_eq!(output.removed(), 500);
        let seen = seen.lock();
        assert_eq!(seen[0].0, StatusLevel::Alarm);
        assert_eq!(seen[1].0, StatusLevel::Warning);
    }

    #[test]
    fn backlog_near_dumping_threshold_is_critical() {
        let output = RecordingOutputAdapter::new("ARCHIVE").shared();
        let session = session_with(output.clone());
        let seen = statuses(&session);

        output.base().raise_unprocessed(150);
        output.base().raise_unprocessed(450);
        output.base().raise_unprocessed(50);

        assert_eq!(output.removed(), 0);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].1.starts_with("CRITICAL"));
        assert!(seen[1].1.starts_with("CRITICAL"));
    }

    #[test]
    fn disposed_session_rejects_operations() {
        let session = session_with(RecordingOutputAdapter::new("OUT").shared());
        session.dispose();
        assert!(session.is_disposed());
        assert!(matches!(
            session.initialize(true),
            Err(SessionError::Disposed { .. })
        ));
        assert!(session.set_use_measurement_routing(false).is_err());
        assert!(session.adapters().is_empty());
    }
}
