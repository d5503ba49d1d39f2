//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Shared primitives and utilities for the core runtime."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;
use crate::settings::Settings;

fn default_session_name() -> String {
    "iaon".to_owned()
}

fn default_use_measurement_routing() -> bool {
    true
}

fn default_warning_threshold() -> usize {
    100_000
}

fn default_dumping_threshold() -> usize {
    500_000
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for the TSF daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Optional JSON file holding the measurement metadata tables.
    #[serde(default)]
    pub data_source: Option<PathBuf>,
    #[serde(default)]
    pub input_adapters: Vec<AdapterConfig>,
    #[serde(default)]
    pub action_adapters: Vec<AdapterConfig>,
    #[serde(default)]
    pub output_adapters: Vec<AdapterConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "TSF_CONFIG";

    /// Load configuration from disk, respecting the `TSF_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        validate_adapters("input_adapters", &self.input_adapters)?;
        validate_adapters("action_adapters", &self.action_adapters)?;
        validate_adapters("output_adapters", &self.output_adapters)?;
        Ok(())
    }

    /// Total number of configured adapters across all collections.
    pub fn adapter_count(&self) -> usize {
        self.input_adapters.len() + self.action_adapters.len() + self.output_adapters.len()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_adapters(section: &str, adapters: &[AdapterConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for adapter in adapters {
        adapter.validate(section)?;
        if !names.insert(adapter.name.to_lowercase()) {
            return Err(anyhow!(
                "{} declares adapter '{}' more than once",
                section,
                adapter.name
            ));
        }
    }
    Ok(())
}

/// Session-wide switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_name")]
    pub name: String,
    #[serde(default = "default_use_measurement_routing")]
    pub use_measurement_routing: bool,
    #[serde(default = "default_warning_threshold")]
    pub measurement_warning_threshold: usize,
    #[serde(default = "default_dumping_threshold")]
    pub measurement_dumping_threshold: usize,
    /// Keys (or a `FILTER` expression) limiting which inputs connect-on-demand considers.
    #[serde(default)]
    pub input_measurement_keys_restriction: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            use_measurement_routing: default_use_measurement_routing(),
            measurement_warning_threshold: default_warning_threshold(),
            measurement_dumping_threshold: default_dumping_threshold(),
            input_measurement_keys_restriction: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("session name must not be empty"));
        }
        if self.measurement_warning_threshold >= self.measurement_dumping_threshold {
            return Err(anyhow!(
                "measurement_warning_threshold ({}) must be lower than measurement_dumping_threshold ({})",
                self.measurement_warning_threshold,
                self.measurement_dumping_threshold
            ));
        }
        Ok(())
    }
}

/// One adapter entry in any of the three adapter lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,
    #[serde(default)]
    pub id: u32,
    pub type_name: String,
    #[serde(default)]
    pub connection_string: String,
}

impl AdapterConfig {
    pub fn validate(&self, section: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("{} contains an adapter without a name", section));
        }
        if self.type_name.trim().is_empty() {
            return Err(anyhow!(
                "{} adapter '{}' must declare a type_name",
                section,
                self.name
            ));
        }
        self.settings().with_context(|| {
            format!(
                "{} adapter '{}' has a malformed connection_string",
                section, self.name
            )
        })?;
        Ok(())
    }

    /// Parse the connection string into a settings map.
    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings::parse(&self.connection_string)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
data_source = "configs/metadata.json"

[session]
name = "bench"
use_measurement_routing = false

[[input_adapters]]
name = "PMU1"
id = 1
type_name = "SyntheticInput"
connection_string = "outputMeasurements={PPA:1;PPA:2};frequency=30"

[[output_adapters]]
name = "LOG"
type_name = "LogOutput"
"#;

    #[test]
    fn parses_sections_with_defaults() {
        let config: AppConfig = SAMPLE.parse().expect("config parses");
        assert_eq!(config.session.name, "bench");
        assert!(!config.session.use_measurement_routing);
        assert_eq!(config.session.measurement_warning_threshold, 100_000);
        assert_eq!(config.session.measurement_dumping_threshold, 500_000);
        assert_eq!(config.adapter_count(), 2);
        assert_eq!(config.output_adapters[0].id, 0);
        let settings = config.input_adapters[0].settings().unwrap();
        assert_eq!(settings.get("OUTPUTMEASUREMENTS"), Some("PPA:1;PPA:2"));
        assert!(config.metrics.enabled);
    }

    #[test]
    fn duplicate_adapter_names_are_rejected() {
        let content = r#"
[[action_adapters]]
name = "avg"
type_name = "AverageAction"

[[action_adapters]]
name = "AVG"
type_name = "AverageAction"
"#;
        let err = content.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn threshold_ordering_is_enforced() {
        let content = r#"
[session]
measurement_warning_threshold = 10
measurement_dumping_threshold = 5
"#;
        assert!(content.parse::<AppConfig>().is_err());
    }

    #[test]
    fn malformed_connection_string_is_rejected() {
        let content = r#"
[[output_adapters]]
name = "bad"
type_name = "LogOutput"
connection_string = "inputMeasurementKeys={PPA:1"
"#;
        assert!(content.parse::<AppConfig>().is_err());
    }

    #[test]
    fn load_with_source_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsf.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let missing = dir.path().join("missing.toml");
        std::env::remove_var(AppConfig::ENV_CONFIG_PATH);
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.session.name, "bench");
    }
}
