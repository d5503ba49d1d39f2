//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "test"
//! tsf_description: "Recording adapters for exercising collections, routing and sessions."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Adapters that record what they receive. Enabled with the `testing` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tsf_common::Settings;
use tsf_measurement::{Measurement, MeasurementKey};

use crate::adapter::{ActionAdapter, Adapter, Consumes, InputAdapter, OutputAdapter, Produces};
use crate::base::AdapterBase;
use crate::{AdapterError, Result};

#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<Vec<Measurement>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_configure: AtomicBool,
}

impl Recorder {
    fn record(&self, measurements: &[Measurement]) {
        self.batches.lock().push(measurements.to_vec());
    }

    fn configure(&self, name: &str) -> Result<()> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(AdapterError::Configuration {
                adapter: name.to_owned(),
                message: "configured to fail".to_owned(),
            });
        }
        Ok(())
    }
}

macro_rules! recorder_accessors {
    () => {
        /// Every batch received, in arrival order.
        pub fn batches(&self) -> Vec<Vec<Measurement>> {
            self.recorder.batches.lock().clone()
        }

        /// All received measurements flattened.
        pub fn received(&self) -> Vec<Measurement> {
            self.recorder.batches.lock().iter().flatten().cloned().collect()
        }

        pub fn starts(&self) -> usize {
            self.recorder.starts.load(Ordering::SeqCst)
        }

        pub fn stops(&self) -> usize {
            self.recorder.stops.load(Ordering::SeqCst)
        }

        /// Make the next `initialize` fail with a configuration error.
        pub fn fail_configuration(&self, fail: bool) {
            self.recorder.fail_configure.store(fail, Ordering::SeqCst);
        }

        pub fn with_input_keys(self, keys: &[&str]) -> Self {
            self.base.set_input_measurement_keys(Some(parse_keys(keys)));
            self
        }

        pub fn with_outputs(self, keys: &[&str]) -> Self {
            self.base.set_output_measurements(Some(
                parse_keys(keys)
                    .into_iter()
                    .map(Measurement::definition)
                    .collect(),
            ));
            self
        }

        pub fn connect_on_demand(self) -> Self {
            self.base.set_auto_start(false);
            self
        }
    };
}

fn parse_keys(keys: &[&str]) -> Vec<MeasurementKey> {
    keys.iter()
        .map(|raw| {
            raw.parse()
                .unwrap_or_else(|err| panic!("invalid test key {raw}: {err}"))
        })
        .collect()
}

/// Input adapter whose measurements are injected by the test.
pub struct RecordingInputAdapter {
    base: AdapterBase,
    recorder: Recorder,
}

impl RecordingInputAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            base: AdapterBase::new(name),
            recorder: Recorder::default(),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Publish measurements as if they arrived from a device.
    pub fn produce(&self, measurements: Vec<Measurement>) {
        self.recorder.record(&measurements);
        self.publish(measurements);
    }

    recorder_accessors!();
}

impl Adapter for RecordingInputAdapter {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn configure(&self, _settings: &Settings) -> Result<()> {
        self.recorder.configure(self.base.name())
    }

    fn on_start(&self) -> Result<()> {
        self.recorder.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_stop(&self) {
        self.recorder.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Produces for RecordingInputAdapter {}
impl InputAdapter for RecordingInputAdapter {}

/// Action adapter that records input and, when forwarding is on, re-publishes every received
/// value once per declared output definition.
pub struct RecordingActionAdapter {
    base: AdapterBase,
    recorder: Recorder,
    forward: AtomicBool,
}

impl RecordingActionAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            base: AdapterBase::new(name),
            recorder: Recorder::default(),
            forward: AtomicBool::new(true),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn forwarding(self, forward: bool) -> Self {
        self.forward.store(forward, Ordering::SeqCst);
        self
    }

    recorder_accessors!();
}

impl Adapter for RecordingActionAdapter {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn configure(&self, _settings: &Settings) -> Result<()> {
        self.recorder.configure(self.base.name())
    }

    fn on_start(&self) -> Result<()> {
        self.recorder.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_stop(&self) {
        self.recorder.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Consumes for RecordingActionAdapter {
    fn process_measurements(&self, measurements: &[Measurement]) {
        self.recorder.record(measurements);
        if !self.forward.load(Ordering::SeqCst) {
            return;
        }
        let Some(outputs) = self.base.output_measurements() else {
            return;
        };
        let produced: Vec<Measurement> = measurements
            .iter()
            .flat_map(|input| {
                outputs
                    .iter()
                    .map(move |output| output.produce(input.value, input.timestamp))
            })
            .collect();
        self.publish(produced);
    }
}

impl Produces for RecordingActionAdapter {}
impl ActionAdapter for RecordingActionAdapter {}

/// Output adapter that records batches and reports a configurable backlog.
pub struct RecordingOutputAdapter {
    base: AdapterBase,
    recorder: Recorder,
    backlog: AtomicUsize,
    removed: AtomicUsize,
}

impl RecordingOutputAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            base: AdapterBase::new(name),
            recorder: Recorder::default(),
            backlog: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_backlog(&self, backlog: usize) {
        self.backlog.store(backlog, Ordering::SeqCst);
    }

    /// Total measurements discarded through `remove_measurements`.
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    recorder_accessors!();
}

impl Adapter for RecordingOutputAdapter {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn configure(&self, _settings: &Settings) -> Result<()> {
        self.recorder.configure(self.base.name())
    }

    fn on_start(&self) -> Result<()> {
        self.recorder.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_stop(&self) {
        self.recorder.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Consumes for RecordingOutputAdapter {
    fn process_measurements(&self, measurements: &[Measurement]) {
        self.recorder.record(measurements);
    }
}

impl OutputAdapter for RecordingOutputAdapter {
    fn unprocessed_measurements(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    fn remove_measurements(&self, count: usize) {
        let backlog = self.backlog.load(Ordering::SeqCst);
        let removed = count.min(backlog);
        self.backlog.fetch_sub(removed, Ordering::SeqCst);
        self.removed.fetch_add(removed, Ordering::SeqCst);
    }
}
