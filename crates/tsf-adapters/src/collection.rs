//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Homogeneous, ordered adapter collections.
//!
//! A collection re-raises every member notification on its own hubs so a parent needs one
//! subscription per signal. Members announcing disposal are detached automatically.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use tsf_measurement::{DataSource, Measurement, MeasurementKey};

use crate::adapter::{ActionAdapter, Adapter, Consumes, InputAdapter, OutputAdapter};
use crate::base::AdapterStatus;
use crate::events::{
    next_instance_id, AdapterEvent, AdapterEventKind, AdapterRef, NewMeasurements, Observers,
    StatusLevel, SubscriptionId,
};
use crate::AdapterError;

pub type InputAdapterCollection = AdapterCollection<dyn InputAdapter>;
pub type ActionAdapterCollection = AdapterCollection<dyn ActionAdapter>;
pub type OutputAdapterCollection = AdapterCollection<dyn OutputAdapter>;

/// Outcome of [`AdapterCollection::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionInitialization {
    pub initialized: usize,
    /// Adapter name and failure reason for every member that did not initialize.
    pub failed: Vec<(String, String)>,
}

struct Member<T: ?Sized> {
    adapter: Arc<T>,
    event_subscription: SubscriptionId,
    measurement_subscription: SubscriptionId,
}

struct CollectionShared<T: ?Sized> {
    reference: AdapterRef,
    members: RwLock<Vec<Member<T>>>,
    events: Observers<AdapterEvent>,
    new_measurements: Observers<NewMeasurements>,
    process_filter: AtomicBool,
    data_source: RwLock<Option<Arc<DataSource>>>,
}

/// Ordered, name-addressable set of adapters of one capability.
///
/// Cloning yields another handle to the same collection.
pub struct AdapterCollection<T: ?Sized + Adapter> {
    shared: Arc<CollectionShared<T>>,
}

impl<T: ?Sized + Adapter> Clone for AdapterCollection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: ?Sized + Adapter> AdapterCollection<T> {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            shared: Arc::new(CollectionShared {
                reference: AdapterRef {
                    name: Arc::from(name.as_ref()),
                    instance: next_instance_id(),
                },
                members: RwLock::new(Vec::new()),
                events: Observers::new(),
                new_measurements: Observers::new(),
                process_filter: AtomicBool::new(true),
                data_source: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.reference.name
    }

    pub fn reference(&self) -> AdapterRef {
        self.shared.reference.clone()
    }

    /// Add an adapter and forward its notifications. Re-adding a member is a no-op.
    pub fn add(&self, adapter: Arc<T>) -> bool {
        let instance = adapter.base().instance();
        let mut members = self.shared.members.write();
        if members
            .iter()
            .any(|member| member.adapter.base().instance() == instance)
        {
            return false;
        }

        let base = adapter.base();
        base.set_process_measurement_filter(self.shared.process_filter.load(Ordering::Relaxed));
        if base.data_source().is_none() {
            base.set_data_source(self.shared.data_source.read().clone());
        }

        let weak: Weak<CollectionShared<T>> = Arc::downgrade(&self.shared);
        let event_subscription = base.events().subscribe({
            let weak = weak.clone();
            move |event: &AdapterEvent| {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                shared.events.notify(event);
                if event.kind == AdapterEventKind::Disposed {
                    shared.detach(event.source.instance);
                }
            }
        });
        let measurement_subscription = base.new_measurements().subscribe(move |batch| {
            if let Some(shared) = weak.upgrade() {
                shared.new_measurements.notify(batch);
            }
        });

        debug!(collection = %self.name(), adapter = %base.name(), "adapter added");
        members.push(Member {
            adapter,
            event_subscription,
            measurement_subscription,
        });
        true
    }

    /// Remove a member by instance, unwiring its notifications.
    pub fn remove(&self, adapter: &AdapterRef) -> Option<Arc<T>> {
        self.shared.detach(adapter.instance)
    }

    pub fn remove_by_name(&self, name: &str) -> Option<Arc<T>> {
        let instance = self.get(name)?.base().instance();
        self.shared.detach(instance)
    }

    /// Member lookup by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.shared
            .members
            .read()
            .iter()
            .find(|member| member.adapter.base().name().eq_ignore_ascii_case(name))
            .map(|member| member.adapter.clone())
    }

    pub fn get_by_id(&self, id: u32) -> Option<Arc<T>> {
        self.shared
            .members
            .read()
            .iter()
            .find(|member| member.adapter.base().id() == id)
            .map(|member| member.adapter.clone())
    }

    pub fn contains(&self, adapter: &AdapterRef) -> bool {
        self.shared
            .members
            .read()
            .iter()
            .any(|member| member.adapter.base().instance() == adapter.instance)
    }

    pub fn len(&self) -> usize {
        self.shared.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.members.read().is_empty()
    }

    /// Stable copy of the current members, taken under the collection lock.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.shared
            .members
            .read()
            .iter()
            .map(|member| member.adapter.clone())
            .collect()
    }

    /// Initialize every member. A failing member is reported and skipped; the rest still run.
    pub fn initialize(&self) -> CollectionInitialization {
        let mut outcome = CollectionInitialization::default();
        for adapter in self.snapshot() {
            match adapter.initialize() {
                Ok(()) => outcome.initialized += 1,
                Err(err) => {
                    let failure = AdapterError::PartialInitialization {
                        collection: self.name().to_owned(),
                        adapter: adapter.name().to_owned(),
                        reason: err.to_string(),
                    };
                    warn!(collection = %self.name(), adapter = %adapter.name(), error = %err, "adapter failed to initialize");
                    self.shared.events.notify(&AdapterEvent {
                        source: self.reference(),
                        kind: AdapterEventKind::ProcessException {
                            message: failure.to_string(),
                        },
                    });
                    outcome
                        .failed
                        .push((adapter.name().to_owned(), err.to_string()));
                }
            }
        }
        info!(
            collection = %self.name(),
            initialized = outcome.initialized,
            failed = outcome.failed.len(),
            "collection initialized"
        );
        outcome
    }

    /// Start every auto-start member. Connect-on-demand members stay stopped.
    pub fn start(&self) {
        for adapter in self.snapshot() {
            if !adapter.base().auto_start() {
                debug!(collection = %self.name(), adapter = %adapter.name(), "deferring connect-on-demand adapter");
                continue;
            }
            if let Err(err) = adapter.start() {
                warn!(collection = %self.name(), adapter = %adapter.name(), error = %err, "adapter failed to start");
            }
        }
    }

    pub fn stop(&self) {
        for adapter in self.snapshot() {
            adapter.stop();
        }
    }

    /// Dispose every member and empty the collection.
    pub fn dispose(&self) {
        for adapter in self.snapshot() {
            adapter.dispose();
        }
        let remaining: Vec<u64> = self
            .shared
            .members
            .read()
            .iter()
            .map(|member| member.adapter.base().instance())
            .collect();
        for instance in remaining {
            self.shared.detach(instance);
        }
    }

    /// True when every member reports initialized.
    pub fn all_initialized(&self) -> bool {
        self.snapshot()
            .iter()
            .all(|adapter| adapter.base().is_initialized())
    }

    /// Distinct union of every member's declared input keys, computed on demand.
    pub fn input_measurement_keys(&self) -> Vec<MeasurementKey> {
        let mut keys: Vec<MeasurementKey> = self
            .snapshot()
            .iter()
            .filter_map(|adapter| adapter.base().input_measurement_keys())
            .flat_map(|keys| keys.iter().cloned().collect::<Vec<_>>())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Distinct union of every member's declared output keys, computed on demand.
    pub fn output_measurement_keys(&self) -> Vec<MeasurementKey> {
        let mut keys: Vec<MeasurementKey> = self
            .snapshot()
            .iter()
            .filter_map(|adapter| adapter.base().output_measurement_keys())
            .flatten()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Declared output measurements of every member, first definition per key wins.
    pub fn output_measurements(&self) -> Vec<Measurement> {
        let mut seen = std::collections::HashSet::new();
        self.snapshot()
            .iter()
            .filter_map(|adapter| adapter.base().output_measurements())
            .flat_map(|outputs| outputs.iter().cloned().collect::<Vec<_>>())
            .filter(|output| seen.insert(output.key.clone()))
            .collect()
    }

    pub fn process_measurement_filter(&self) -> bool {
        self.shared.process_filter.load(Ordering::Relaxed)
    }

    /// Switch member-side filtering for this collection and every member.
    pub fn set_process_measurement_filter(&self, enabled: bool) {
        self.shared.process_filter.store(enabled, Ordering::Relaxed);
        for adapter in self.snapshot() {
            adapter.base().set_process_measurement_filter(enabled);
        }
    }

    /// Share a data source with current and future members.
    pub fn set_data_source(&self, data_source: Option<Arc<DataSource>>) {
        *self.shared.data_source.write() = data_source.clone();
        for adapter in self.snapshot() {
            adapter.base().set_data_source(data_source.clone());
        }
    }

    pub fn statuses(&self) -> Vec<AdapterStatus> {
        self.snapshot().iter().map(|adapter| adapter.status()).collect()
    }

    pub fn events(&self) -> &Observers<AdapterEvent> {
        &self.shared.events
    }

    pub fn new_measurements(&self) -> &Observers<NewMeasurements> {
        &self.shared.new_measurements
    }

    pub fn raise_status(&self, level: StatusLevel, message: impl Into<String>) {
        self.shared.events.notify(&AdapterEvent {
            source: self.reference(),
            kind: AdapterEventKind::Status {
                level,
                message: message.into(),
            },
        });
    }
}

impl<T: ?Sized + Consumes> AdapterCollection<T> {
    /// Broadcast a batch to every enabled member; each applies its own filter.
    pub fn queue_measurements_for_processing(&self, measurements: &[Measurement]) {
        for adapter in self.snapshot() {
            if adapter.is_enabled() {
                adapter.queue_measurements_for_processing(measurements);
            }
        }
    }
}

impl<T: ?Sized + OutputAdapter> AdapterCollection<T> {
    /// Sum of every member's queued but unprocessed measurements.
    pub fn unprocessed_measurements(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|adapter| adapter.unprocessed_measurements())
            .sum()
    }
}

impl<T: ?Sized> CollectionShared<T>
where
    T: Adapter,
{
    fn detach(&self, instance: u64) -> Option<Arc<T>> {
        let member = {
            let mut members = self.members.write();
            let position = members
                .iter()
                .position(|member| member.adapter.base().instance() == instance)?;
            members.remove(position)
        };
        let base = member.adapter.base();
        base.events().unsubscribe(member.event_subscription);
        base.new_measurements()
            .unsubscribe(member.measurement_subscription);
        debug!(collection = %self.reference.name, adapter = %base.name(), "adapter removed");
        Some(member.adapter)
    }
}

impl<T: ?Sized + Adapter> fmt::Debug for AdapterCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCollection")
            .field("name", &self.name())
            .field("members", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingActionAdapter, RecordingOutputAdapter};
    use std::sync::atomic::AtomicUsize;

    fn key(raw: &str) -> MeasurementKey {
        raw.parse().unwrap()
    }

    fn counting(collection: &OutputAdapterCollection) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        collection.events().subscribe(move |event| {
            if event.is_key_update() {
                inner.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    #[test]
    fn readding_does_not_duplicate_forwarding() {
        let collection = OutputAdapterCollection::new("Outputs");
        let count = counting(&collection);
        let adapter = RecordingOutputAdapter::new("OUT").shared();

        assert!(collection.add(adapter.clone()));
        assert!(!collection.add(adapter.clone()));
        adapter.base().set_input_measurement_keys(Some(vec![key("A:1")]));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let removed = collection.remove(&adapter.reference()).unwrap();
        assert_eq!(removed.name(), "OUT");
        adapter.base().set_input_measurement_keys(None);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(collection.add(adapter.clone()));
        adapter.base().set_input_measurement_keys(None);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.base().events().len(), 1);
    }

    #[test]
    fn initialization_is_best_effort() {
        let collection = OutputAdapterCollection::new("Outputs");
        let exceptions = Arc::new(AtomicUsize::new(0));
        {
            let exceptions = exceptions.clone();
            collection.events().subscribe(move |event| {
                if matches!(event.kind, AdapterEventKind::ProcessException { .. }) {
                    exceptions.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        let first = RecordingOutputAdapter::new("FIRST").shared();
        let broken = RecordingOutputAdapter::new("BROKEN").shared();
        broken.fail_configuration(true);
        let last = RecordingOutputAdapter::new("LAST").shared();
        collection.add(first.clone());
        collection.add(broken.clone());
        collection.add(last.clone());

        let outcome = collection.initialize();
        assert_eq!(outcome.initialized, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "BROKEN");
        assert!(first.is_initialized() && last.is_initialized());
        assert!(!broken.is_initialized());
        // adapter exception forwarded plus the collection's partial-initialization report
        assert_eq!(exceptions.load(Ordering::SeqCst), 2);
        assert!(!collection.all_initialized());
    }

    #[test]
    fn start_skips_connect_on_demand_members() {
        let collection = OutputAdapterCollection::new("Outputs");
        let eager = RecordingOutputAdapter::new("EAGER").shared();
        let lazy = RecordingOutputAdapter::new("LAZY").connect_on_demand().shared();
        collection.add(eager.clone());
        collection.add(lazy.clone());
        collection.initialize();
        collection.start();
        assert!(eager.is_enabled());
        assert!(!lazy.is_enabled());
        collection.stop();
        assert!(!eager.is_enabled());
    }

    #[test]
    fn key_unions_are_distinct_and_live() {
        let collection = ActionAdapterCollection::new("Actions");
        let a = RecordingActionAdapter::new("A")
            .with_input_keys(&["X:2", "X:1"])
            .with_outputs(&["Y:1"])
            .shared();
        let b = RecordingActionAdapter::new("B")
            .with_input_keys(&["X:2", "X:3"])
            .with_outputs(&["Y:1", "Y:2"])
            .shared();
        let unfiltered = RecordingActionAdapter::new("C").shared();
        collection.add(a.clone());
        collection.add(b.clone());
        collection.add(unfiltered);

        assert_eq!(
            collection.input_measurement_keys(),
            [key("X:1"), key("X:2"), key("X:3")]
        );
        assert_eq!(collection.output_measurement_keys(), [key("Y:1"), key("Y:2")]);
        assert_eq!(collection.output_measurements().len(), 2);

        b.base().set_input_measurement_keys(Some(vec![key("X:9")]));
        assert_eq!(
            collection.input_measurement_keys(),
            [key("X:1"), key("X:2"), key("X:9")]
        );
        collection.remove_by_name("a");
        assert_eq!(collection.input_measurement_keys(), [key("X:9")]);
    }

    #[test]
    fn disposed_members_detach_themselves() {
        let collection = OutputAdapterCollection::new("Outputs");
        let adapter = RecordingOutputAdapter::new("OUT").shared();
        collection.add(adapter.clone());
        adapter.dispose();
        assert!(collection.is_empty());
        assert!(!collection.contains(&adapter.reference()));
    }

    #[test]
    fn broadcast_queue_skips_disabled_and_applies_member_filter() {
        let collection = OutputAdapterCollection::new("Outputs");
        let filtered = RecordingOutputAdapter::new("F").with_input_keys(&["K:1"]).shared();
        let everything = RecordingOutputAdapter::new("E").shared();
        let stopped = RecordingOutputAdapter::new("S").shared();
        for adapter in [&filtered, &everything, &stopped] {
            collection.add((*adapter).clone());
            adapter.initialize().unwrap();
        }
        filtered.start().unwrap();
        everything.start().unwrap();

        collection.queue_measurements_for_processing(&[
            Measurement::new(key("K:1"), 1.0),
            Measurement::new(key("K:2"), 2.0),
        ]);
        assert_eq!(filtered.received().len(), 1);
        assert_eq!(everything.received().len(), 2);
        assert!(stopped.received().is_empty());
    }

    #[test]
    fn filter_flag_propagates_to_members() {
        let collection = OutputAdapterCollection::new("Outputs");
        let adapter = RecordingOutputAdapter::new("OUT").shared();
        collection.set_process_measurement_filter(false);
        collection.add(adapter.clone());
        assert!(!adapter.base().process_measurement_filter());
        collection.set_process_measurement_filter(true);
        assert!(adapter.base().process_measurement_filter());
    }
}
