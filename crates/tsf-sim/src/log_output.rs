//! ---
//! tsf_section: "11-simulation"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Logging output adapter backed by a bounded queue."
//! tsf_version: "v0.1.0"
//! tsf_owner: "tbd"
//! ---
//! Output adapter that queues routed measurements and logs them from its own thread.
//!
//! Settings: `queueCapacity` (default 10000), `flushInterval` (ms, 100) and `batchSize` (1000).
//! The queue depth is reported after every flush so the session can warn about, or trim, a
//! falling-behind archive.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use tsf_adapters::{
    Adapter, AdapterBase, AdapterError, Consumes, MeasurementQueue, OutputAdapter, Result,
};
use tsf_common::Settings;
use tsf_measurement::Measurement;

use crate::ticker::Ticker;

const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
const DEFAULT_BATCH_SIZE: usize = 1_000;

struct LogShared {
    base: AdapterBase,
    queue: RwLock<Arc<MeasurementQueue>>,
    batch_size: AtomicUsize,
    archived: AtomicU64,
    last: Mutex<Option<Measurement>>,
}

impl LogShared {
    fn queue(&self) -> Arc<MeasurementQueue> {
        self.queue.read().clone()
    }

    /// Drain one batch and report what is left.
    fn flush(&self) -> usize {
        let queue = self.queue();
        let drained = queue.drain(self.batch_size.load(Ordering::Relaxed));
        if let Some(newest) = drained.last() {
            debug!(
                adapter = %self.base.name(),
                count = drained.len(),
                key = %newest.key,
                value = newest.adjusted_value(),
                "archived measurements"
            );
            self.archived
                .fetch_add(drained.len() as u64, Ordering::Relaxed);
            *self.last.lock() = Some(newest.clone());
        }
        let depth = queue.depth();
        if depth > 0 {
            self.base.raise_unprocessed(depth);
        }
        drained.len()
    }
}

pub struct LogOutputAdapter {
    shared: Arc<LogShared>,
    flush_interval: Mutex<Duration>,
    ticker: Mutex<Option<Ticker>>,
}

impl LogOutputAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            shared: Arc::new(LogShared {
                base: AdapterBase::new(name),
                queue: RwLock::new(Arc::new(MeasurementQueue::new(DEFAULT_QUEUE_CAPACITY))),
                batch_size: AtomicUsize::new(DEFAULT_BATCH_SIZE),
                archived: AtomicU64::new(0),
                last: Mutex::new(None),
            }),
            flush_interval: Mutex::new(Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS)),
            ticker: Mutex::new(None),
        }
    }

    /// Measurements drained and logged so far.
    pub fn archived(&self) -> u64 {
        self.shared.archived.load(Ordering::Relaxed)
    }

    /// Most recent measurement logged.
    pub fn last_archived(&self) -> Option<Measurement> {
        self.shared.last.lock().clone()
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue().capacity()
    }

    /// Drain one batch on the calling thread.
    pub fn flush(&self) -> usize {
        self.shared.flush()
    }

    fn stop_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
    }
}

impl Adapter for LogOutputAdapter {
    fn base(&self) -> &AdapterBase {
        &self.shared.base
    }

    fn configure(&self, settings: &Settings) -> Result<()> {
        let base = self.base();
        let capacity: usize =
            base.optional_setting(settings, "queueCapacity", DEFAULT_QUEUE_CAPACITY)?;
        let interval: u64 =
            base.optional_setting(settings, "flushInterval", DEFAULT_FLUSH_INTERVAL_MS)?;
        let batch_size: usize = base.optional_setting(settings, "batchSize", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(AdapterError::InvalidSetting {
                adapter: base.name().to_owned(),
                key: "batchSize".to_owned(),
                value: batch_size.to_string(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if capacity != self.queue_capacity() {
            *self.shared.queue.write() = Arc::new(MeasurementQueue::new(capacity));
        }
        self.shared.batch_size.store(batch_size, Ordering::Relaxed);
        *self.flush_interval.lock() = Duration::from_millis(interval.max(1));
        Ok(())
    }

    fn on_start(&self) -> Result<()> {
        self.stop_ticker();
        let interval = *self.flush_interval.lock();
        let shared = self.shared.clone();
        let ticker = Ticker::spawn(format!("{}-flush", self.name()), interval, move || {
            shared.flush();
        })
        .map_err(|err| AdapterError::Processing {
            adapter: self.name().to_owned(),
            message: format!("unable to spawn flush thread: {err}"),
        })?;
        *self.ticker.lock() = Some(ticker);
        Ok(())
    }

    fn on_stop(&self) {
        self.stop_ticker();
        info!(
            adapter = %self.name(),
            archived = self.archived(),
            queued = self.unprocessed_measurements(),
            "log output stopped"
        );
    }

    fn status_detail(&self) -> Option<String> {
        let queue = self.shared.queue();
        Some(format!(
            "{} archived, {} of {} queued, {} rejected",
            self.archived(),
            queue.depth(),
            queue.capacity(),
            queue.rejected()
        ))
    }
}

impl Consumes for LogOutputAdapter {
    fn process_measurements(&self, measurements: &[Measurement]) {
        let accepted = self.shared.queue().try_enqueue(measurements);
        if accepted < measurements.len() {
            warn!(
                adapter = %self.name(),
                rejected = measurements.len() - accepted,
                "log output queue full"
            );
        }
    }
}

impl OutputAdapter for LogOutputAdapter {
    fn unprocessed_measurements(&self) -> usize {
        self.shared.queue().depth()
    }

    fn remove_measurements(&self, count: usize) {
        let removed = self.shared.queue().discard(count);
        debug!(adapter = %self.name(), removed, "queued measurements discarded");
    }
}

impl Drop for LogOutputAdapter {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
