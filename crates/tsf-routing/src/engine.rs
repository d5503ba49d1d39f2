//! ---
//! tsf_section: "05-measurement-routing"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Routing table engine and connect-on-demand resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Routing table engine.
//!
//! A calculation snapshots the action and output collections, waits for each member to
//! initialize (bounded by its own timeout), builds a fresh [`RoutingSnapshot`] in local state and
//! swaps it in under the write lock. Dispatch clones the current snapshot under the read lock and
//! delivers outside of it, so an action adapter publishing synchronously from
//! `process_measurements` re-enters dispatch without contention.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};
use tsf_adapters::{
    ActionAdapter, ActionAdapterCollection, Adapter, AdapterEvent, AdapterEventKind, AdapterRef,
    Consumes, InputAdapterCollection, Observers, OutputAdapter, OutputAdapterCollection,
    StatusLevel,
};
use tsf_measurement::{Measurement, MeasurementKey};
use tsf_metrics::RoutingMetrics;

use crate::demand::resolve_connect_on_demand;
use crate::snapshot::{RoutingSnapshot, RoutingSnapshotBuilder};
use crate::worker::CoalescingWorker;
use crate::{Result, RoutingError};

/// Granularity of the initialization wait so disposal is noticed promptly.
const READINESS_POLL: Duration = Duration::from_millis(50);

/// Counts from one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Measurements with at least one keyed destination.
    pub routed: usize,
    /// Measurements no keyed destination asked for.
    pub unrouted: usize,
    /// `queue_measurements_for_processing` calls made.
    pub deliveries: usize,
}

struct EngineInner {
    reference: AdapterRef,
    inputs: InputAdapterCollection,
    actions: ActionAdapterCollection,
    outputs: OutputAdapterCollection,
    snapshot: RwLock<Arc<RoutingSnapshot>>,
    calculation: Mutex<()>,
    restriction: RwLock<Option<Arc<[MeasurementKey]>>>,
    events: Observers<AdapterEvent>,
    metrics: Option<RoutingMetrics>,
    disposed: AtomicBool,
}

/// Owns the live routing table and the worker that recomputes it.
pub struct RoutingEngine {
    inner: Arc<EngineInner>,
    worker: CoalescingWorker,
}

impl RoutingEngine {
    pub fn new(
        name: &str,
        inputs: InputAdapterCollection,
        actions: ActionAdapterCollection,
        outputs: OutputAdapterCollection,
        metrics: Option<RoutingMetrics>,
    ) -> Result<Self> {
        let inner = Arc::new(EngineInner {
            reference: AdapterRef {
                name: Arc::from(format!("{name} routing")),
                instance: tsf_adapters::events::next_instance_id(),
            },
            inputs,
            actions,
            outputs,
            snapshot: RwLock::new(Arc::new(RoutingSnapshot::empty())),
            calculation: Mutex::new(()),
            restriction: RwLock::new(None),
            events: Observers::new(),
            metrics,
            disposed: AtomicBool::new(false),
        });
        let job: Weak<EngineInner> = Arc::downgrade(&inner);
        let hook: Weak<EngineInner> = Arc::downgrade(&inner);
        let worker = CoalescingWorker::spawn(
            format!("{name}-routing"),
            move || {
                if let Some(inner) = job.upgrade() {
                    inner.calculate();
                }
            },
            move |message| {
                if let Some(inner) = hook.upgrade() {
                    inner.calculation_panicked(message);
                }
            },
        )?;
        Ok(Self { inner, worker })
    }

    pub fn reference(&self) -> AdapterRef {
        self.inner.reference.clone()
    }

    /// Status and exception notifications raised by the engine.
    pub fn events(&self) -> &Observers<AdapterEvent> {
        &self.inner.events
    }

    /// Queue a recalculation. Returns immediately; concurrent requests coalesce.
    pub fn calculate_routing_tables(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) || !self.worker.request() {
            return Err(RoutingError::Disposed);
        }
        Ok(())
    }

    /// Calculate and swap in a new table on the calling thread. Serialized with the worker.
    ///
    /// Blocks while adapters that are not yet initialized are waited on. Must not be called from
    /// inside adapter processing.
    pub fn calculate_now(&self) -> Result<()> {
        if self.inner.is_disposed() {
            return Err(RoutingError::Disposed);
        }
        self.inner.calculate();
        Ok(())
    }

    /// Narrow connect-on-demand to the dependency chain of these keys. `None` or empty uses
    /// full adapter demand. Takes effect on the next calculation.
    pub fn set_input_measurement_keys_restriction(&self, keys: Option<Vec<MeasurementKey>>) {
        *self.inner.restriction.write() = keys.map(Arc::from);
    }

    pub fn input_measurement_keys_restriction(&self) -> Option<Arc<[MeasurementKey]>> {
        self.inner.restriction.read().clone()
    }

    /// The table currently used for dispatch.
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.inner.current()
    }

    /// Calculations completed by the worker.
    pub fn calculations(&self) -> u64 {
        self.worker.completed()
    }

    /// Block until no calculation is queued or running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.worker.wait_idle(timeout)
    }

    /// Deliver a batch to keyed and broadcast destinations.
    pub fn route(&self, measurements: &[Measurement]) -> DispatchSummary {
        self.inner.route(measurements)
    }

    /// Hand the whole batch to both consuming collections; each member filters for itself.
    pub fn broadcast(&self, measurements: &[Measurement]) {
        if measurements.is_empty() {
            return;
        }
        self.inner.actions.queue_measurements_for_processing(measurements);
        self.inner.outputs.queue_measurements_for_processing(measurements);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Stop the worker and release the table. Any calculation in progress finishes first.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.worker.shutdown();
        *self.inner.snapshot.write() = Arc::new(RoutingSnapshot::empty());
        self.inner.events.clear();
        debug!(engine = %self.inner.reference, "routing engine disposed");
    }
}

impl Drop for RoutingEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("name", &self.inner.reference.name)
            .field("snapshot", &*self.inner.current())
            .field("worker", &self.worker)
            .finish()
    }
}

impl EngineInner {
    fn current(&self) -> Arc<RoutingSnapshot> {
        self.snapshot.read().clone()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn raise(&self, kind: AdapterEventKind) {
        self.events.notify(&AdapterEvent {
            source: self.reference.clone(),
            kind,
        });
    }

    fn status(&self, message: String) {
        info!(engine = %self.reference, "{}", message);
        self.raise(AdapterEventKind::Status {
            level: StatusLevel::Info,
            message,
        });
    }

    fn calculation_panicked(&self, message: &str) {
        error!(engine = %self.reference, panic = %message, "route calculation panicked");
        self.raise(AdapterEventKind::ProcessException {
            message: format!("route calculation failed: {message}"),
        });
    }

    /// Wait for an adapter to initialize. False on timeout or engine disposal.
    fn wait_ready<T: ?Sized + Adapter>(&self, adapter: &T) -> bool {
        let base = adapter.base();
        let deadline = base.initialization_timeout().map(|timeout| Instant::now() + timeout);
        loop {
            if base.wait_for_initialized(Some(READINESS_POLL)) {
                return true;
            }
            if self.is_disposed() || base.is_disposed() {
                return false;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
        }
    }

    fn calculate(&self) {
        let _serial = self.calculation.lock();
        if self.is_disposed() {
            return;
        }
        let started = Instant::now();
        debug!(engine = %self.reference, "starting measurement route calculation");

        let inputs = self.inputs.snapshot();
        let actions = self.actions.snapshot();
        let outputs = self.outputs.snapshot();

        let mut builder = RoutingSnapshotBuilder::new();
        for action in &actions {
            let keys = self.declared_keys(&**action);
            builder.add_action(action.clone(), keys.as_deref());
        }
        for output in &outputs {
            let keys = self.declared_keys(&**output);
            builder.add_output(output.clone(), keys.as_deref());
        }
        if self.is_disposed() {
            return;
        }

        let snapshot = {
            let mut live = self.snapshot.write();
            let snapshot = Arc::new(builder.build(live.version() + 1));
            *live = snapshot.clone();
            snapshot
        };

        let restriction = self.restriction.read().clone();
        resolve_connect_on_demand(&inputs, &actions, &outputs, restriction.as_deref());

        let elapsed = started.elapsed();
        let routes = snapshot.route_count();
        let destinations = actions.len() + outputs.len();
        if let Some(metrics) = &self.metrics {
            metrics.record_calculation(
                elapsed.as_secs_f64(),
                routes,
                snapshot.action_broadcast().len(),
                snapshot.output_broadcast().len(),
            );
            let (keyed_actions, keyed_outputs) = snapshot.keyed_destination_counts();
            metrics.set_keyed_destinations(keyed_actions, keyed_outputs);
        }
        debug!(
            engine = %self.reference,
            version = snapshot.version(),
            routes,
            destinations,
            elapsed_ms = elapsed.as_millis() as u64,
            "routing table swapped"
        );
        self.status(format!(
            "Calculated {} route{} for {} destination{} in {:.3}s",
            routes,
            if routes == 1 { "" } else { "s" },
            destinations,
            if destinations == 1 { "" } else { "s" },
            elapsed.as_secs_f64()
        ));
    }

    /// Declared input keys of a ready adapter. An adapter that never became ready is routed as a
    /// broadcast target for this cycle.
    fn declared_keys<T: ?Sized + Adapter>(&self, adapter: &T) -> Option<Arc<[MeasurementKey]>> {
        if self.wait_ready(adapter) {
            return adapter.base().input_measurement_keys();
        }
        if !self.is_disposed() {
            warn!(
                engine = %self.reference,
                adapter = %adapter.name(),
                "adapter not initialized in time, routing as broadcast for this cycle"
            );
            self.raise(AdapterEventKind::Status {
                level: StatusLevel::Warning,
                message: format!(
                    "{} was not initialized in time and receives all measurements until the next route calculation",
                    adapter.name()
                ),
            });
        }
        None
    }

    fn route(&self, measurements: &[Measurement]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if measurements.is_empty() {
            return summary;
        }
        let snapshot = self.current();

        let mut action_batches: IndexMap<u64, (Arc<dyn ActionAdapter>, Vec<Measurement>)> =
            IndexMap::new();
        let mut output_batches: IndexMap<u64, (Arc<dyn OutputAdapter>, Vec<Measurement>)> =
            IndexMap::new();

        for measurement in measurements {
            let actions = snapshot.action_destinations(&measurement.key);
            let outputs = snapshot.output_destinations(&measurement.key);
            if actions.is_empty() && outputs.is_empty() {
                summary.unrouted += 1;
                continue;
            }
            summary.routed += 1;
            for action in actions {
                action_batches
                    .entry(action.base().instance())
                    .or_insert_with(|| (action.clone(), Vec::new()))
                    .1
                    .push(measurement.clone());
            }
            for output in outputs {
                output_batches
                    .entry(output.base().instance())
                    .or_insert_with(|| (output.clone(), Vec::new()))
                    .1
                    .push(measurement.clone());
            }
        }

        for (action, batch) in action_batches.values() {
            summary.deliveries += deliver(&**action, batch);
        }
        for action in snapshot.action_broadcast() {
            summary.deliveries += deliver(&**action, measurements);
        }
        for (output, batch) in output_batches.values() {
            summary.deliveries += deliver(&**output, batch);
        }
        for output in snapshot.output_broadcast() {
            summary.deliveries += deliver(&**output, measurements);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_dispatch(summary.routed, summary.unrouted);
        }
        trace!(
            engine = %self.reference,
            routed = summary.routed,
            unrouted = summary.unrouted,
            deliveries = summary.deliveries,
            "batch routed"
        );
        summary
    }
}

fn deliver<T: ?Sized + Consumes>(adapter: &T, measurements: &[Measurement]) -> usize {
    if !adapter.is_enabled() {
        return 0;
    }
    adapter.queue_measurements_for_processing(measurements);
    1
}
