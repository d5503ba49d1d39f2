//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! The aggregate of the three typed collections a session owns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use tsf_measurement::DataSource;

use crate::collection::{
    ActionAdapterCollection, CollectionInitialization, InputAdapterCollection,
    OutputAdapterCollection,
};
use crate::events::{AdapterEvent, NewMeasurements, Observers, SubscriptionId};

/// Per-collection outcome of [`AllAdaptersCollection::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializationReport {
    pub outputs: CollectionInitialization,
    pub inputs: CollectionInitialization,
    pub actions: CollectionInitialization,
}

impl InitializationReport {
    pub fn initialized(&self) -> usize {
        self.outputs.initialized + self.inputs.initialized + self.actions.initialized
    }

    /// Names of every adapter that failed, in initialization order.
    pub fn failed(&self) -> Vec<&str> {
        [&self.outputs, &self.inputs, &self.actions]
            .into_iter()
            .flat_map(|outcome| outcome.failed.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed().is_empty()
    }
}

struct Forwarded {
    events: Observers<AdapterEvent>,
    new_measurements: Observers<NewMeasurements>,
}

/// Input, action and output collections managed as one unit.
pub struct AllAdaptersCollection {
    inputs: InputAdapterCollection,
    actions: ActionAdapterCollection,
    outputs: OutputAdapterCollection,
    forwarded: Arc<Forwarded>,
    subscriptions: Vec<(u8, SubscriptionId, SubscriptionId)>,
    initialized: AtomicBool,
}

impl AllAdaptersCollection {
    pub fn new(
        inputs: InputAdapterCollection,
        actions: ActionAdapterCollection,
        outputs: OutputAdapterCollection,
    ) -> Self {
        let forwarded = Arc::new(Forwarded {
            events: Observers::new(),
            new_measurements: Observers::new(),
        });
        let mut subscriptions = Vec::with_capacity(3);

        macro_rules! forward {
            ($slot:expr, $collection:expr) => {{
                let weak = Arc::downgrade(&forwarded);
                let events = $collection.events().subscribe(move |event| {
                    if let Some(forwarded) = weak.upgrade() {
                        forwarded.events.notify(event);
                    }
                });
                let weak = Arc::downgrade(&forwarded);
                let batches = $collection.new_measurements().subscribe(move |batch| {
                    if let Some(forwarded) = weak.upgrade() {
                        forwarded.new_measurements.notify(batch);
                    }
                });
                subscriptions.push(($slot, events, batches));
            }};
        }
        forward!(0, inputs);
        forward!(1, actions);
        forward!(2, outputs);

        Self {
            inputs,
            actions,
            outputs,
            forwarded,
            subscriptions,
            initialized: AtomicBool::new(false),
        }
    }

    /// Empty collections named after their role.
    pub fn empty() -> Self {
        Self::new(
            InputAdapterCollection::new("Input Adapters"),
            ActionAdapterCollection::new("Action Adapters"),
            OutputAdapterCollection::new("Output Adapters"),
        )
    }

    pub fn inputs(&self) -> &InputAdapterCollection {
        &self.inputs
    }

    pub fn actions(&self) -> &ActionAdapterCollection {
        &self.actions
    }

    pub fn outputs(&self) -> &OutputAdapterCollection {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.actions.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events from every member of every collection.
    pub fn events(&self) -> &Observers<AdapterEvent> {
        &self.forwarded.events
    }

    pub fn new_measurements(&self) -> &Observers<NewMeasurements> {
        &self.forwarded.new_measurements
    }

    /// Outputs first so sinks are ready before producers, then inputs, then actions.
    pub fn initialize(&self) -> InitializationReport {
        let report = InitializationReport {
            outputs: self.outputs.initialize(),
            inputs: self.inputs.initialize(),
            actions: self.actions.initialize(),
        };
        info!(
            initialized = report.initialized(),
            failed = report.failed().len(),
            "adapters initialized"
        );
        self.initialized.store(true, Ordering::Release);
        report
    }

    /// Set once [`AllAdaptersCollection::initialize`] has run, whatever individual members
    /// reported. Members that failed stay uninitialized on their own.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        self.outputs.start();
        self.inputs.start();
        self.actions.start();
    }

    pub fn stop(&self) {
        self.inputs.stop();
        self.actions.stop();
        self.outputs.stop();
    }

    pub fn dispose(&self) {
        self.initialized.store(false, Ordering::Release);
        self.inputs.dispose();
        self.actions.dispose();
        self.outputs.dispose();
    }

    /// True only when every member is initialized.
    pub fn all_initialized(&self) -> bool {
        self.inputs.all_initialized()
            && self.actions.all_initialized()
            && self.outputs.all_initialized()
    }

    /// Apply member-side filtering to the consuming collections.
    pub fn set_process_measurement_filter(&self, enabled: bool) {
        self.actions.set_process_measurement_filter(enabled);
        self.outputs.set_process_measurement_filter(enabled);
    }

    pub fn set_data_source(&self, data_source: Option<Arc<DataSource>>) {
        self.inputs.set_data_source(data_source.clone());
        self.actions.set_data_source(data_source.clone());
        self.outputs.set_data_source(data_source);
    }
}

impl Drop for AllAdaptersCollection {
    fn drop(&mut self) {
        for (slot, events, batches) in self.subscriptions.drain(..) {
            match slot {
                0 => {
                    self.inputs.events().unsubscribe(events);
                    self.inputs.new_measurements().unsubscribe(batches);
                }
                1 => {
                    self.actions.events().unsubscribe(events);
                    self.actions.new_measurements().unsubscribe(batches);
                }
                _ => {
                    self.outputs.events().unsubscribe(events);
                    self.outputs.new_measurements().unsubscribe(batches);
                }
            }
        }
    }
}

impl fmt::Debug for AllAdaptersCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllAdaptersCollection")
            .field("inputs", &self.inputs)
            .field("actions", &self.actions)
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::testing::{RecordingActionAdapter, RecordingInputAdapter, RecordingOutputAdapter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tsf_measurement::{Measurement, MeasurementKey};

    #[test]
    fn aggregate_forwards_member_notifications() {
        let all = AllAdaptersCollection::empty();
        let input = RecordingInputAdapter::new("IN").shared();
        let output = RecordingOutputAdapter::new("OUT").shared();
        all.inputs().add(input.clone());
        all.outputs().add(output.clone());

        let batches = Arc::new(AtomicUsize::new(0));
        let key_updates = Arc::new(AtomicUsize::new(0));
        {
            let batches = batches.clone();
            all.new_measurements().subscribe(move |_| {
                batches.fetch_add(1, Ordering::SeqCst);
            });
            let key_updates = key_updates.clone();
            all.events().subscribe(move |event| {
                if event.is_key_update() {
                    key_updates.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        input.produce(vec![Measurement::new(MeasurementKey::new("S", 1), 1.0)]);
        output.base().set_input_measurement_keys(None);
        assert_eq!(batches.load(Ordering::SeqCst), 1);
        assert_eq!(key_updates.load(Ordering::SeqCst), 1);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn report_lists_failures_in_initialization_order() {
        let all = AllAdaptersCollection::empty();
        let broken_action = RecordingActionAdapter::new("BAD-ACTION").shared();
        broken_action.fail_configuration(true);
        let broken_output = RecordingOutputAdapter::new("BAD-OUTPUT").shared();
        broken_output.fail_configuration(true);
        all.actions().add(broken_action);
        all.outputs().add(broken_output);
        all.inputs().add(RecordingInputAdapter::new("IN").shared());

        assert!(!all.is_initialized());
        let report = all.initialize();
        assert_eq!(report.initialized(), 1);
        assert_eq!(report.failed(), ["BAD-OUTPUT", "BAD-ACTION"]);
        assert!(!report.is_complete());
        assert!(!all.all_initialized());
        assert!(all.is_initialized());

        all.dispose();
        assert!(!all.is_initialized());
    }

    #[test]
    fn dropping_the_aggregate_unwires_collections() {
        let inputs = InputAdapterCollection::new("Inputs");
        let all = AllAdaptersCollection::new(
            inputs.clone(),
            ActionAdapterCollection::new("Actions"),
            OutputAdapterCollection::new("Outputs"),
        );
        assert_eq!(inputs.events().len(), 1);
        drop(all);
        assert!(inputs.events().is_empty());
        assert!(inputs.new_measurements().is_empty());
    }
}
