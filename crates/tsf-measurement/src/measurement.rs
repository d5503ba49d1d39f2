//! ---
//! tsf_section: "02-measurement-data-model"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Measurement identity, values and metadata resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::MeasurementKey;

/// A single timestamped value of a measurement stream.
///
/// Measurements are cloned when produced and never mutated once queued for routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub key: MeasurementKey,
    #[serde(default)]
    pub signal_id: Option<Uuid>,
    #[serde(default)]
    pub tag_name: Option<String>,
    pub value: f64,
    #[serde(default)]
    pub adder: f64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    pub timestamp: DateTime<Utc>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Measurement {
    /// New measurement stamped with the current time.
    pub fn new(key: MeasurementKey, value: f64) -> Self {
        Self::at(key, value, Utc::now())
    }

    pub fn at(key: MeasurementKey, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            signal_id: None,
            tag_name: None,
            value,
            adder: 0.0,
            multiplier: 1.0,
            timestamp,
        }
    }

    /// Output definition for a key; the value is irrelevant until produced.
    pub fn definition(key: MeasurementKey) -> Self {
        Self::at(key, 0.0, DateTime::<Utc>::default())
    }

    pub fn with_signal_id(mut self, signal_id: Uuid) -> Self {
        self.signal_id = Some(signal_id);
        self
    }

    pub fn with_tag_name(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = Some(tag_name.into());
        self
    }

    pub fn with_scaling(mut self, adder: f64, multiplier: f64) -> Self {
        self.adder = adder;
        self.multiplier = multiplier;
        self
    }

    /// Produce a new measurement from this definition carrying `value` at `timestamp`.
    pub fn produce(&self, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            timestamp,
            ..self.clone()
        }
    }

    /// Raw value with the configured linear scaling applied.
    pub fn adjusted_value(&self) -> f64 {
        self.value * self.multiplier + self.adder
    }
}
