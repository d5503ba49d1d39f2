//! ---
//! tsf_section: "11-simulation"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Synthetic phasor-like input adapter."
//! tsf_version: "v0.1.0"
//! tsf_owner: "tbd"
//! ---
//! Input adapter generating one sine wave per declared output measurement.
//!
//! Settings: `frequency` (Hz, default 0.2), `amplitude` (5.0), `offset` (100.0),
//! `noiseSigma` (0.2), `publishInterval` (ms, 100) and an optional `seed`.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;
use tracing::{debug, trace};
use tsf_adapters::{
    Adapter, AdapterBase, AdapterError, CommandResponse, InputAdapter, Produces, Result,
};
use tsf_common::Settings;
use tsf_measurement::Measurement;

use crate::ticker::Ticker;

#[derive(Debug, Clone, Copy)]
struct Waveform {
    frequency_hz: f64,
    amplitude: f64,
    offset: f64,
    noise_sigma: f64,
    interval: Duration,
}

impl Default for Waveform {
    fn default() -> Self {
        Self {
            frequency_hz: 0.2,
            amplitude: 5.0,
            offset: 100.0,
            noise_sigma: 0.2,
            interval: Duration::from_millis(100),
        }
    }
}

struct Generator {
    waveform: Waveform,
    rng: StdRng,
    noise: Normal<f64>,
    epoch: Instant,
}

impl Generator {
    fn new(waveform: Waveform, seed: Option<u64>) -> std::result::Result<Self, String> {
        let noise = Normal::new(0.0, waveform.noise_sigma).map_err(|err| err.to_string())?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            waveform,
            rng,
            noise,
            epoch: Instant::now(),
        })
    }

    /// One value per definition, phase shifted evenly across the set.
    fn frame(&mut self, definitions: &[Measurement]) -> Vec<Measurement> {
        let t = self.epoch.elapsed().as_secs_f64();
        let timestamp = Utc::now();
        let count = definitions.len().max(1) as f64;
        let Waveform {
            frequency_hz,
            amplitude,
            offset,
            ..
        } = self.waveform;
        definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                let phase = 2.0 * PI * index as f64 / count;
                let value = offset
                    + amplitude * (2.0 * PI * frequency_hz * t + phase).sin()
                    + self.noise.sample(&mut self.rng);
                definition.produce(value, timestamp)
            })
            .collect()
    }
}

struct SyntheticShared {
    base: AdapterBase,
    generator: Mutex<Option<Generator>>,
    frames: AtomicU64,
}

impl SyntheticShared {
    fn publish_frame(&self) -> usize {
        let Some(definitions) = self.base.output_measurements() else {
            return 0;
        };
        let frame = match self.generator.lock().as_mut() {
            Some(generator) => generator.frame(&definitions),
            None => return 0,
        };
        let published = frame.len();
        self.base.publish_measurements(frame);
        self.frames.fetch_add(1, Ordering::Relaxed);
        trace!(adapter = %self.base.name(), published, "synthetic frame published");
        published
    }
}

pub struct SyntheticInputAdapter {
    shared: Arc<SyntheticShared>,
    waveform: Mutex<Waveform>,
    ticker: Mutex<Option<Ticker>>,
}

impl SyntheticInputAdapter {
    pub fn new(name: &str) -> Self {
        let shared = Arc::new(SyntheticShared {
            base: AdapterBase::new(name),
            generator: Mutex::new(None),
            frames: AtomicU64::new(0),
        });
        let weak: Weak<SyntheticShared> = Arc::downgrade(&shared);
        shared.base.commands().register(
            "PublishFrame",
            "Generates and publishes one frame immediately",
            move |_| {
                let published = weak.upgrade().map_or(0, |shared| shared.publish_frame());
                Ok(CommandResponse::Text(format!("published {published} measurements")))
            },
        );
        Self {
            shared,
            waveform: Mutex::new(Waveform::default()),
            ticker: Mutex::new(None),
        }
    }

    /// Frames published since creation.
    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    /// Generate and publish one frame on the calling thread.
    pub fn publish_frame(&self) -> usize {
        self.shared.publish_frame()
    }

    fn stop_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
    }
}

impl Adapter for SyntheticInputAdapter {
    fn base(&self) -> &AdapterBase {
        &self.shared.base
    }

    fn configure(&self, settings: &Settings) -> Result<()> {
        let base = self.base();
        if base.output_measurements().map_or(true, |outputs| outputs.is_empty()) {
            return Err(AdapterError::Configuration {
                adapter: base.name().to_owned(),
                message: "outputMeasurements must name at least one measurement".to_owned(),
            });
        }
        let defaults = Waveform::default();
        let waveform = Waveform {
            frequency_hz: base.optional_setting(settings, "frequency", defaults.frequency_hz)?,
            amplitude: base.optional_setting(settings, "amplitude", defaults.amplitude)?,
            offset: base.optional_setting(settings, "offset", defaults.offset)?,
            noise_sigma: base.optional_setting(settings, "noiseSigma", defaults.noise_sigma)?,
            interval: Duration::from_millis(base.optional_setting(
                settings,
                "publishInterval",
                defaults.interval.as_millis() as u64,
            )?),
        };
        let seed = settings
            .get("seed")
            .map(|_| base.required_setting::<u64>(settings, "seed"))
            .transpose()?;
        let generator =
            Generator::new(waveform, seed).map_err(|reason| AdapterError::InvalidSetting {
                adapter: base.name().to_owned(),
                key: "noiseSigma".to_owned(),
                value: waveform.noise_sigma.to_string(),
                reason,
            })?;
        *self.shared.generator.lock() = Some(generator);
        *self.waveform.lock() = waveform;
        Ok(())
    }

    fn on_start(&self) -> Result<()> {
        self.stop_ticker();
        let interval = self.waveform.lock().interval;
        let shared = self.shared.clone();
        let ticker = Ticker::spawn(format!("{}-synthetic", self.name()), interval, move || {
            shared.publish_frame();
        })
        .map_err(|err| AdapterError::Processing {
            adapter: self.name().to_owned(),
            message: format!("unable to spawn generator thread: {err}"),
        })?;
        *self.ticker.lock() = Some(ticker);
        debug!(adapter = %self.name(), interval_ms = interval.as_millis() as u64, "synthetic generator running");
        Ok(())
    }

    fn on_stop(&self) {
        self.stop_ticker();
    }

    fn status_detail(&self) -> Option<String> {
        let waveform = *self.waveform.lock();
        Some(format!(
            "{} frames published, {:.3} Hz around {:.2} (amplitude {:.2})",
            self.frames(),
            waveform.frequency_hz,
            waveform.offset,
            waveform.amplitude
        ))
    }
}

impl Produces for SyntheticInputAdapter {}
impl InputAdapter for SyntheticInputAdapter {}

impl Drop for SyntheticInputAdapter {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
