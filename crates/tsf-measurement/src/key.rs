//! ---
//! tsf_section: "02-measurement-data-model"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Measurement identity, values and metadata resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::MeasurementError;

/// Identity of a measurement stream: a source namespace plus a numeric point id.
///
/// Ordering compares the source ordinally and then the id, so sorted key slices support
/// binary-search membership tests. The source is reference counted to keep clones cheap on the
/// routing path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasurementKey {
    source: Arc<str>,
    id: u64,
}

impl MeasurementKey {
    pub fn new(source: impl AsRef<str>, id: u64) -> Self {
        Self {
            source: Arc::from(source.as_ref()),
            id,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

impl FromStr for MeasurementKey {
    type Err = MeasurementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (source, id) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| MeasurementError::InvalidKey(s.to_owned()))?;
        let source = source.trim();
        if source.is_empty() {
            return Err(MeasurementError::InvalidKey(s.to_owned()));
        }
        let id = id
            .trim()
            .parse::<u64>()
            .map_err(|_| MeasurementError::InvalidKey(s.to_owned()))?;
        Ok(Self::new(source, id))
    }
}

impl Serialize for MeasurementKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MeasurementKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
