//! ---
//! tsf_section: "11-simulation"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Type-name adapter factory used by the daemon."
//! tsf_version: "v0.1.0"
//! tsf_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use tracing::debug;
use tsf_adapters::{ActionAdapter, Adapter, AllAdaptersCollection, InputAdapter, OutputAdapter};
use tsf_common::{AdapterConfig, AppConfig};

use crate::average::AverageActionAdapter;
use crate::log_output::LogOutputAdapter;
use crate::synthetic::SyntheticInputAdapter;

type Constructor<T> = Box<dyn Fn(&str) -> Arc<T> + Send + Sync>;

/// Maps configured `type_name`s to adapter constructors. Lookups ignore case.
pub struct AdapterFactory {
    inputs: IndexMap<String, Constructor<dyn InputAdapter>>,
    actions: IndexMap<String, Constructor<dyn ActionAdapter>>,
    outputs: IndexMap<String, Constructor<dyn OutputAdapter>>,
}

impl AdapterFactory {
    /// A factory with no registered types.
    pub fn new() -> Self {
        Self {
            inputs: IndexMap::new(),
            actions: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// A factory knowing the adapters shipped in this crate.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register_input("SyntheticInput", |name| {
            Arc::new(SyntheticInputAdapter::new(name))
        });
        factory.register_action("AverageAction", |name| {
            Arc::new(AverageActionAdapter::new(name))
        });
        factory.register_output("LogOutput", |name| Arc::new(LogOutputAdapter::new(name)));
        factory
    }

    pub fn register_input<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn(&str) -> Arc<dyn InputAdapter> + Send + Sync + 'static,
    {
        self.inputs
            .insert(type_name.to_lowercase(), Box::new(constructor));
    }

    pub fn register_action<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn(&str) -> Arc<dyn ActionAdapter> + Send + Sync + 'static,
    {
        self.actions
            .insert(type_name.to_lowercase(), Box::new(constructor));
    }

    pub fn register_output<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn(&str) -> Arc<dyn OutputAdapter> + Send + Sync + 'static,
    {
        self.outputs
            .insert(type_name.to_lowercase(), Box::new(constructor));
    }

    pub fn build_input(&self, config: &AdapterConfig) -> Result<Arc<dyn InputAdapter>> {
        build(&self.inputs, "input", config)
    }

    pub fn build_action(&self, config: &AdapterConfig) -> Result<Arc<dyn ActionAdapter>> {
        build(&self.actions, "action", config)
    }

    pub fn build_output(&self, config: &AdapterConfig) -> Result<Arc<dyn OutputAdapter>> {
        build(&self.outputs, "output", config)
    }

    /// Instantiate and configure every adapter in `config` into fresh collections.
    pub fn build_all(&self, config: &AppConfig) -> Result<AllAdaptersCollection> {
        let adapters = AllAdaptersCollection::empty();
        for entry in &config.input_adapters {
            adapters.inputs().add(self.build_input(entry)?);
        }
        for entry in &config.action_adapters {
            adapters.actions().add(self.build_action(entry)?);
        }
        for entry in &config.output_adapters {
            adapters.outputs().add(self.build_output(entry)?);
        }
        debug!(adapters = adapters.len(), "adapters built from configuration");
        Ok(adapters)
    }

    /// Registered type names per variant.
    pub fn type_names(&self) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        (
            self.inputs.keys().map(String::as_str).collect(),
            self.actions.keys().map(String::as_str).collect(),
            self.outputs.keys().map(String::as_str).collect(),
        )
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (inputs, actions, outputs) = self.type_names();
        f.debug_struct("AdapterFactory")
            .field("inputs", &inputs)
            .field("actions", &actions)
            .field("outputs", &outputs)
            .finish()
    }
}

fn build<T: ?Sized + Adapter>(
    constructors: &IndexMap<String, Constructor<T>>,
    variant: &str,
    config: &AdapterConfig,
) -> Result<Arc<T>> {
    let constructor = constructors
        .get(&config.type_name.to_lowercase())
        .ok_or_else(|| {
            anyhow!(
                "unknown {} adapter type '{}' for adapter '{}'",
                variant,
                config.type_name,
                config.name
            )
        })?;
    let adapter = constructor(&config.name);
    let base = adapter.base();
    base.set_id(config.id);
    base.set_connection_string(&config.connection_string)
        .with_context(|| format!("invalid connection string for adapter '{}'", config.name))?;
    Ok(adapter)
}
