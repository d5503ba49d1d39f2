//! ---
//! tsf_section: "11-simulation"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Averaging action adapter."
//! tsf_version: "v0.1.0"
//! tsf_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;
use tsf_adapters::{
    ActionAdapter, Adapter, AdapterBase, AdapterError, CommandResponse, Consumes, Produces,
    Result,
};
use tsf_common::Settings;
use tsf_measurement::Measurement;

const DEFAULT_FRAMES_PER_AVERAGE: usize = 10;

#[derive(Debug, Default)]
struct Window {
    sum: f64,
    count: usize,
}

/// Publishes the mean of every `framesPerAverage` received values on each output measurement.
pub struct AverageActionAdapter {
    base: AdapterBase,
    window: Arc<Mutex<Window>>,
    frames_per_average: AtomicUsize,
    published: AtomicUsize,
}

impl AverageActionAdapter {
    pub fn new(name: &str) -> Self {
        let window = Arc::new(Mutex::new(Window::default()));
        let base = AdapterBase::new(name);
        {
            let window = Arc::downgrade(&window);
            base.commands().register(
                "ResetWindow",
                "Discards the values accumulated toward the next average",
                move |_| {
                    if let Some(window) = window.upgrade() {
                        *window.lock() = Window::default();
                    }
                    Ok(CommandResponse::Done)
                },
            );
        }
        Self {
            base,
            window,
            frames_per_average: AtomicUsize::new(DEFAULT_FRAMES_PER_AVERAGE),
            published: AtomicUsize::new(0),
        }
    }

    pub fn frames_per_average(&self) -> usize {
        self.frames_per_average.load(Ordering::Relaxed)
    }

    /// Averages published so far.
    pub fn published(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }

    /// Fold values into the window, returning each completed mean with its closing timestamp.
    fn accumulate(&self, measurements: &[Measurement]) -> Vec<(f64, DateTime<Utc>)> {
        let target = self.frames_per_average();
        let mut window = self.window.lock();
        let mut completed = Vec::new();
        for measurement in measurements {
            window.sum += measurement.adjusted_value();
            window.count += 1;
            if window.count >= target {
                completed.push((window.sum / window.count as f64, measurement.timestamp));
                *window = Window::default();
            }
        }
        completed
    }
}

impl Adapter for AverageActionAdapter {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn configure(&self, settings: &Settings) -> Result<()> {
        let frames: usize =
            self.base
                .optional_setting(settings, "framesPerAverage", DEFAULT_FRAMES_PER_AVERAGE)?;
        if frames == 0 {
            return Err(AdapterError::InvalidSetting {
                adapter: self.name().to_owned(),
                key: "framesPerAverage".to_owned(),
                value: frames.to_string(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.base.output_measurements().is_none() {
            return Err(AdapterError::Configuration {
                adapter: self.name().to_owned(),
                message: "outputMeasurements must be defined".to_owned(),
            });
        }
        self.frames_per_average.store(frames, Ordering::Relaxed);
        *self.window.lock() = Window::default();
        Ok(())
    }

    fn status_detail(&self) -> Option<String> {
        Some(format!(
            "{} averages over {} values published",
            self.published(),
            self.frames_per_average()
        ))
    }
}

impl Consumes for AverageActionAdapter {
    fn process_measurements(&self, measurements: &[Measurement]) {
        let completed = self.accumulate(measurements);
        if completed.is_empty() {
            return;
        }
        let Some(outputs) = self.base.output_measurements() else {
            return;
        };
        let produced: Vec<Measurement> = completed
            .iter()
            .flat_map(|(mean, timestamp)| {
                outputs
                    .iter()
                    .map(move |output| output.produce(*mean, *timestamp))
            })
            .collect();
        self.published.fetch_add(completed.len(), Ordering::Relaxed);
        trace!(adapter = %self.name(), averages = completed.len(), "averages published");
        self.publish(produced);
    }
}

impl Produces for AverageActionAdapter {}
impl ActionAdapter for AverageActionAdapter {}
