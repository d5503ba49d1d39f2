//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Lifecycle state shared by every adapter variant.
//!
//! [`AdapterBase`] uses interior mutability throughout so adapters can be shared as
//! `Arc<dyn ActionAdapter>` between collections, the routing engine and producer threads.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use tsf_common::settings::parse_bool;
use tsf_common::Settings;
use tsf_measurement::{
    parse_input_measurement_keys, parse_output_measurements, DataSource, Measurement,
    MeasurementKey, DEFAULT_MEASUREMENT_TABLE,
};

use crate::command::CommandTable;
use crate::events::{
    next_instance_id, AdapterEvent, AdapterEventKind, AdapterRef, NewMeasurements, Observers,
    StatusLevel,
};
use crate::{AdapterError, Result};

/// Default bound on how long `start` waits for initialization.
pub const DEFAULT_INITIALIZATION_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Default number of processed measurements between progress status messages.
pub const DEFAULT_MEASUREMENT_REPORTING_INTERVAL: u64 = 100_000;

const INPUT_KEYS_SETTING: &str = "inputMeasurementKeys";
const OUTPUTS_SETTING: &str = "outputMeasurements";
const REPORTING_INTERVAL_SETTING: &str = "measurementReportingInterval";
const INITIALIZATION_TIMEOUT_SETTING: &str = "initializationTimeout";
const CONNECT_ON_DEMAND_SETTING: &str = "connectOnDemand";
const AUTO_START_SETTING: &str = "autoStart";
const MEASUREMENT_TABLE_SETTING: &str = "measurementTable";

#[derive(Debug, Default, Clone, Copy)]
struct RunTimes {
    started: Option<DateTime<Utc>>,
    stopped: Option<DateTime<Utc>>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

/// Serialisable snapshot of an adapter's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub name: String,
    pub id: u32,
    pub enabled: bool,
    pub initialized: bool,
    pub auto_start: bool,
    pub process_measurement_filter: bool,
    pub input_keys: Option<usize>,
    pub output_measurements: Option<usize>,
    pub requested_input_keys: Option<usize>,
    pub requested_output_keys: Option<usize>,
    pub processed_measurements: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub run_time_seconds: Option<f64>,
    pub detail: Option<String>,
}

/// Shared state and bookkeeping for one adapter instance.
pub struct AdapterBase {
    name: Arc<str>,
    instance: u64,
    id: AtomicU32,
    connection_string: RwLock<String>,
    settings: RwLock<Settings>,
    data_source: RwLock<Option<Arc<DataSource>>>,
    measurement_table: RwLock<String>,
    initialized: Mutex<bool>,
    initialized_signal: Condvar,
    enabled: AtomicBool,
    auto_start: AtomicBool,
    input_keys: RwLock<Option<Arc<[MeasurementKey]>>>,
    outputs: RwLock<Option<Arc<[Measurement]>>>,
    requested_inputs: RwLock<Option<Arc<[MeasurementKey]>>>,
    requested_outputs: RwLock<Option<Arc<[MeasurementKey]>>>,
    initialization_timeout: RwLock<Option<Duration>>,
    reporting_interval: AtomicU64,
    processed: AtomicU64,
    process_filter: AtomicBool,
    times: Mutex<RunTimes>,
    disposed: AtomicBool,
    lifecycle: Mutex<()>,
    events: Observers<AdapterEvent>,
    new_measurements: Observers<NewMeasurements>,
    commands: CommandTable,
}

impl AdapterBase {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            instance: next_instance_id(),
            id: AtomicU32::new(0),
            connection_string: RwLock::new(String::new()),
            settings: RwLock::new(Settings::new()),
            data_source: RwLock::new(None),
            measurement_table: RwLock::new(DEFAULT_MEASUREMENT_TABLE.to_owned()),
            initialized: Mutex::new(false),
            initialized_signal: Condvar::new(),
            enabled: AtomicBool::new(false),
            auto_start: AtomicBool::new(true),
            input_keys: RwLock::new(None),
            outputs: RwLock::new(None),
            requested_inputs: RwLock::new(None),
            requested_outputs: RwLock::new(None),
            initialization_timeout: RwLock::new(Some(DEFAULT_INITIALIZATION_TIMEOUT)),
            reporting_interval: AtomicU64::new(DEFAULT_MEASUREMENT_REPORTING_INTERVAL),
            processed: AtomicU64::new(0),
            process_filter: AtomicBool::new(true),
            times: Mutex::new(RunTimes::default()),
            disposed: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            events: Observers::new(),
            new_measurements: Observers::new(),
            commands: CommandTable::new(),
        }
    }

    pub fn with_id(self, id: u32) -> Self {
        self.id.store(id, Ordering::Relaxed);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn reference(&self) -> AdapterRef {
        AdapterRef {
            name: self.name.clone(),
            instance: self.instance,
        }
    }

    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::Relaxed);
    }

    // -- settings -------------------------------------------------------------------------

    pub fn connection_string(&self) -> String {
        self.connection_string.read().clone()
    }

    /// Assign and parse the connection string. Takes effect on the next `initialize`.
    pub fn set_connection_string(&self, connection_string: &str) -> Result<()> {
        let parsed = Settings::parse(connection_string)?;
        *self.settings.write() = parsed;
        *self.connection_string.write() = connection_string.to_owned();
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn data_source(&self) -> Option<Arc<DataSource>> {
        self.data_source.read().clone()
    }

    pub fn set_data_source(&self, data_source: Option<Arc<DataSource>>) {
        *self.data_source.write() = data_source;
    }

    pub fn measurement_table(&self) -> String {
        self.measurement_table.read().clone()
    }

    /// Parse a setting that must be present.
    pub fn required_setting<T>(&self, settings: &Settings, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = settings.get(key).ok_or_else(|| AdapterError::MissingSetting {
            adapter: self.name.to_string(),
            key: key.to_owned(),
        })?;
        self.parse_setting(key, raw)
    }

    /// Parse an optional setting, falling back to `default` when absent.
    pub fn optional_setting<T>(&self, settings: &Settings, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match settings.get(key) {
            Some(raw) => self.parse_setting(key, raw),
            None => Ok(default),
        }
    }

    fn parse_setting<T>(&self, key: &str, raw: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        raw.trim()
            .parse::<T>()
            .map_err(|err| AdapterError::InvalidSetting {
                adapter: self.name.to_string(),
                key: key.to_owned(),
                value: raw.to_owned(),
                reason: err.to_string(),
            })
    }

    /// Apply the settings every adapter understands: declared keys, reporting interval,
    /// initialization timeout and the auto-start switches.
    pub(crate) fn apply_common_settings(&self, settings: &Settings) -> Result<()> {
        if let Some(table) = settings.get(MEASUREMENT_TABLE_SETTING) {
            *self.measurement_table.write() = table.trim().to_owned();
        }
        let table = self.measurement_table();
        let data_source = self.data_source();

        if let Some(value) = settings.get(INPUT_KEYS_SETTING) {
            let keys = parse_input_measurement_keys(data_source.as_deref(), value, &table)
                .map_err(|source| AdapterError::FilterExpression {
                    adapter: self.name.to_string(),
                    key: INPUT_KEYS_SETTING.to_owned(),
                    source,
                })?;
            self.set_input_measurement_keys(Some(keys));
        }

        if let Some(value) = settings.get(OUTPUTS_SETTING) {
            let outputs = parse_output_measurements(data_source.as_deref(), value, &table)
                .map_err(|source| AdapterError::FilterExpression {
                    adapter: self.name.to_string(),
                    key: OUTPUTS_SETTING.to_owned(),
                    source,
                })?;
            self.set_output_measurements(Some(outputs));
        }

        let interval = self.optional_setting(
            settings,
            REPORTING_INTERVAL_SETTING,
            self.measurement_reporting_interval(),
        )?;
        self.set_measurement_reporting_interval(interval);

        if settings.contains(INITIALIZATION_TIMEOUT_SETTING) {
            let millis: i64 = self.required_setting(settings, INITIALIZATION_TIMEOUT_SETTING)?;
            // negative means wait forever
            let timeout = u64::try_from(millis).ok().map(Duration::from_millis);
            self.set_initialization_timeout(timeout);
        }

        if let Some(value) = settings.get(CONNECT_ON_DEMAND_SETTING) {
            self.set_auto_start(!parse_bool(value));
        }
        if let Some(value) = settings.get(AUTO_START_SETTING) {
            self.set_auto_start(parse_bool(value));
        }
        Ok(())
    }

    // -- lifecycle flags ------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Set the initialized flag, waking anyone blocked in [`AdapterBase::wait_for_initialized`].
    pub fn set_initialized(&self, initialized: bool) {
        let mut flag = self.initialized.lock();
        *flag = initialized;
        if initialized {
            self.initialized_signal.notify_all();
        }
    }

    /// Block until initialized. `None` waits forever. Returns false on timeout or disposal.
    pub fn wait_for_initialized(&self, timeout: Option<Duration>) -> bool {
        let mut flag = self.initialized.lock();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        while !*flag {
            if self.is_disposed() {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .initialized_signal
                        .wait_until(&mut flag, deadline)
                        .timed_out()
                    {
                        return *flag;
                    }
                }
                None => self.initialized_signal.wait(&mut flag),
            }
        }
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn lifecycle_lock(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock()
    }

    pub(crate) fn mark_started(&self) {
        self.enabled.store(true, Ordering::Release);
        let mut times = self.times.lock();
        times.started = Some(Utc::now());
        times.started_at = Some(Instant::now());
        times.stopped = None;
        times.stopped_at = None;
    }

    pub(crate) fn mark_stopped(&self) {
        self.enabled.store(false, Ordering::Release);
        let mut times = self.times.lock();
        times.stopped = Some(Utc::now());
        times.stopped_at = Some(Instant::now());
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.times.lock().started
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.times.lock().stopped
    }

    /// Time spent running since the last start, up to the last stop when stopped.
    pub fn run_time(&self) -> Option<Duration> {
        let times = *self.times.lock();
        let started = times.started_at?;
        let end = times.stopped_at.unwrap_or_else(Instant::now);
        Some(end.saturating_duration_since(started))
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start.load(Ordering::Relaxed)
    }

    pub fn set_auto_start(&self, auto_start: bool) {
        self.auto_start.store(auto_start, Ordering::Relaxed);
    }

    /// `None` means wait forever.
    pub fn initialization_timeout(&self) -> Option<Duration> {
        *self.initialization_timeout.read()
    }

    pub fn set_initialization_timeout(&self, timeout: Option<Duration>) {
        *self.initialization_timeout.write() = timeout;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(AdapterError::Disposed {
                adapter: self.name.to_string(),
            });
        }
        Ok(())
    }

    /// Release waiters, announce disposal and drop every subscription.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _flag = self.initialized.lock();
            self.initialized_signal.notify_all();
        }
        self.events.notify(&AdapterEvent {
            source: self.reference(),
            kind: AdapterEventKind::Disposed,
        });
        self.events.clear();
        self.new_measurements.clear();
        debug!(adapter = %self.name, "adapter disposed");
    }

    // -- declared measurements ------------------------------------------------------------

    /// Sorted, distinct input keys. `None` accepts every measurement.
    pub fn input_measurement_keys(&self) -> Option<Arc<[MeasurementKey]>> {
        self.input_keys.read().clone()
    }

    /// Replace the declared input keys and announce the change.
    pub fn set_input_measurement_keys(&self, keys: Option<Vec<MeasurementKey>>) {
        *self.input_keys.write() = keys.map(sorted_keys);
        self.notify(AdapterEventKind::InputMeasurementKeysUpdated);
    }

    pub fn output_measurements(&self) -> Option<Arc<[Measurement]>> {
        self.outputs.read().clone()
    }

    /// Replace the declared output measurements and announce the change.
    pub fn set_output_measurements(&self, outputs: Option<Vec<Measurement>>) {
        *self.outputs.write() = outputs.map(Arc::from);
        self.notify(AdapterEventKind::OutputMeasurementsUpdated);
    }

    /// Keys of the declared output measurements, sorted and distinct.
    pub fn output_measurement_keys(&self) -> Option<Vec<MeasurementKey>> {
        self.outputs.read().as_ref().map(|outputs| {
            let mut keys: Vec<MeasurementKey> =
                outputs.iter().map(|output| output.key.clone()).collect();
            keys.sort();
            keys.dedup();
            keys
        })
    }

    pub fn requested_input_measurement_keys(&self) -> Option<Arc<[MeasurementKey]>> {
        self.requested_inputs.read().clone()
    }

    pub fn set_requested_input_measurement_keys(&self, keys: Option<Vec<MeasurementKey>>) {
        *self.requested_inputs.write() = keys.map(sorted_keys);
    }

    pub fn requested_output_measurement_keys(&self) -> Option<Arc<[MeasurementKey]>> {
        self.requested_outputs.read().clone()
    }

    pub fn set_requested_output_measurement_keys(&self, keys: Option<Vec<MeasurementKey>>) {
        *self.requested_outputs.write() = keys.map(sorted_keys);
    }

    /// Membership test against the declared input keys; true for everything when undeclared.
    pub fn is_input_measurement(&self, key: &MeasurementKey) -> bool {
        match self.input_keys.read().as_ref() {
            Some(keys) => keys.binary_search(key).is_ok(),
            None => true,
        }
    }

    pub fn process_measurement_filter(&self) -> bool {
        self.process_filter.load(Ordering::Relaxed)
    }

    pub fn set_process_measurement_filter(&self, enabled: bool) {
        self.process_filter.store(enabled, Ordering::Relaxed);
    }

    // -- processing statistics -------------------------------------------------------------

    pub fn measurement_reporting_interval(&self) -> u64 {
        self.reporting_interval.load(Ordering::Relaxed)
    }

    pub fn set_measurement_reporting_interval(&self, interval: u64) {
        self.reporting_interval.store(interval, Ordering::Relaxed);
    }

    pub fn processed_measurements(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Count processed measurements, raising a status message each time a reporting interval
    /// boundary is crossed.
    pub fn count_processed(&self, count: usize) {
        if count == 0 {
            return;
        }
        let count = count as u64;
        let before = self.processed.fetch_add(count, Ordering::Relaxed);
        let after = before + count;
        let interval = self.measurement_reporting_interval();
        if interval > 0 && before / interval != after / interval {
            self.raise_status(
                StatusLevel::Info,
                format!("{} measurements processed so far", after),
            );
        }
    }

    pub fn status(&self) -> AdapterStatus {
        let times = *self.times.lock();
        AdapterStatus {
            name: self.name.to_string(),
            id: self.id(),
            enabled: self.is_enabled(),
            initialized: self.is_initialized(),
            auto_start: self.auto_start(),
            process_measurement_filter: self.process_measurement_filter(),
            input_keys: self.input_keys.read().as_ref().map(|keys| keys.len()),
            output_measurements: self.outputs.read().as_ref().map(|outputs| outputs.len()),
            requested_input_keys: self.requested_inputs.read().as_ref().map(|keys| keys.len()),
            requested_output_keys: self
                .requested_outputs
                .read()
                .as_ref()
                .map(|keys| keys.len()),
            processed_measurements: self.processed_measurements(),
            start_time: times.started,
            stop_time: times.stopped,
            run_time_seconds: self.run_time().map(|elapsed| elapsed.as_secs_f64()),
            detail: None,
        }
    }

    // -- notifications --------------------------------------------------------------------

    pub fn events(&self) -> &Observers<AdapterEvent> {
        &self.events
    }

    pub fn new_measurements(&self) -> &Observers<NewMeasurements> {
        &self.new_measurements
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    fn notify(&self, kind: AdapterEventKind) {
        self.events.notify(&AdapterEvent {
            source: self.reference(),
            kind,
        });
    }

    /// Log and broadcast a status message.
    pub fn raise_status(&self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            StatusLevel::Info => info!(adapter = %self.name, "{}", message),
            StatusLevel::Warning => warn!(adapter = %self.name, "{}", message),
            StatusLevel::Alarm => error!(adapter = %self.name, alarm = true, "{}", message),
        }
        self.notify(AdapterEventKind::Status { level, message });
    }

    /// Log and broadcast a processing exception.
    pub fn raise_exception(&self, err: &AdapterError) {
        error!(adapter = %self.name, error = %err, "adapter exception");
        self.notify(AdapterEventKind::ProcessException {
            message: err.to_string(),
        });
    }

    /// Report the current depth of an internal processing queue.
    pub fn raise_unprocessed(&self, count: usize) {
        self.notify(AdapterEventKind::UnprocessedMeasurements(count));
    }

    /// Hand newly produced measurements to whoever routes them.
    pub fn publish_measurements(&self, measurements: Vec<Measurement>) {
        if measurements.is_empty() {
            return;
        }
        self.new_measurements.notify(&NewMeasurements {
            source: self.reference(),
            measurements: Arc::from(measurements),
        });
    }
}

impl fmt::Debug for AdapterBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBase")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("enabled", &self.is_enabled())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn sorted_keys(mut keys: Vec<MeasurementKey>) -> Arc<[MeasurementKey]> {
    keys.sort();
    keys.dedup();
    Arc::from(keys)
}
