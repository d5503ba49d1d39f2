//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Capability traits.
//!
//! Implementors provide [`Adapter::base`] plus whichever hooks they need; the lifecycle
//! operations (`initialize`, `start`, `stop`, `set_enabled`, `dispose`, command invocation) are
//! provided on top of [`AdapterBase`].

use tracing::{debug, info};
use tsf_common::settings::parse_bool;
use tsf_common::Settings;
use tsf_measurement::{Measurement, MeasurementKey};

use crate::base::{AdapterBase, AdapterStatus};
use crate::command::CommandResponse;
use crate::events::AdapterRef;
use crate::{AdapterError, Result};

/// Lifecycle contract shared by every adapter variant.
pub trait Adapter: Send + Sync + 'static {
    fn base(&self) -> &AdapterBase;

    /// Read adapter specific settings. Runs after the common settings have been applied.
    fn configure(&self, _settings: &Settings) -> Result<()> {
        Ok(())
    }

    /// Begin producing or consuming. Called with the adapter initialized but not yet enabled.
    fn on_start(&self) -> Result<()> {
        Ok(())
    }

    fn on_stop(&self) {}

    fn on_dispose(&self) {}

    /// Free-form text appended to the status snapshot.
    fn status_detail(&self) -> Option<String> {
        None
    }

    fn name(&self) -> &str {
        self.base().name()
    }

    fn reference(&self) -> AdapterRef {
        self.base().reference()
    }

    fn is_enabled(&self) -> bool {
        self.base().is_enabled()
    }

    fn is_initialized(&self) -> bool {
        self.base().is_initialized()
    }

    /// Parse the connection string into typed state.
    ///
    /// Clears the initialized flag on entry and sets it only when every setting was applied.
    fn initialize(&self) -> Result<()> {
        let base = self.base();
        base.ensure_not_disposed()?;
        base.set_initialized(false);

        let settings = base.settings();
        let outcome = base
            .apply_common_settings(&settings)
            .and_then(|()| self.configure(&settings));
        match outcome {
            Ok(()) => {
                base.set_initialized(true);
                debug!(adapter = %base.name(), "adapter initialized");
                Ok(())
            }
            Err(err) => {
                base.raise_exception(&err);
                Err(err)
            }
        }
    }

    /// Start the adapter, restarting it when already running.
    ///
    /// Blocks up to the initialization timeout waiting for the adapter to be initialized. A
    /// timeout is reported through the exception event and leaves the adapter stopped.
    fn start(&self) -> Result<()> {
        let base = self.base();
        base.ensure_not_disposed()?;
        let _transition = base.lifecycle_lock();
        if base.is_enabled() {
            stop_locked(self);
        }
        start_locked(self)
    }

    /// Stop the adapter. Idempotent.
    fn stop(&self) {
        let _transition = self.base().lifecycle_lock();
        stop_locked(self);
    }

    /// Start or stop only when the requested state differs from the current one.
    fn set_enabled(&self, enabled: bool) -> Result<()> {
        let base = self.base();
        base.ensure_not_disposed()?;
        let _transition = base.lifecycle_lock();
        match (enabled, base.is_enabled()) {
            (true, false) => start_locked(self),
            (false, true) => {
                stop_locked(self);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn is_input_measurement(&self, key: &MeasurementKey) -> bool {
        self.base().is_input_measurement(key)
    }

    fn status(&self) -> AdapterStatus {
        let mut status = self.base().status();
        status.detail = self.status_detail();
        status
    }

    /// Run a management command by name: the built-ins first, then registered commands.
    fn invoke(&self, command: &str, args: &[&str]) -> Result<CommandResponse> {
        let base = self.base();
        match command.to_ascii_lowercase().as_str() {
            "start" => self.start().map(|()| CommandResponse::Done),
            "stop" => {
                self.stop();
                Ok(CommandResponse::Done)
            }
            "initialize" => self.initialize().map(|()| CommandResponse::Done),
            "setinitializedstate" => {
                let value = args.first().ok_or_else(|| AdapterError::InvalidCommandArgument {
                    adapter: base.name().to_owned(),
                    command: command.to_owned(),
                    message: "expected true or false".to_owned(),
                })?;
                base.set_initialized(parse_bool(value));
                Ok(CommandResponse::Done)
            }
            "getstatus" => Ok(CommandResponse::Status(Box::new(self.status()))),
            _ => base.commands().invoke(base.name(), command, args),
        }
    }

    /// Stop, release resources and announce disposal so containing collections detach.
    fn dispose(&self) {
        if self.base().is_disposed() {
            return;
        }
        self.stop();
        self.on_dispose();
        self.base().dispose();
    }
}

fn start_locked<A: Adapter + ?Sized>(adapter: &A) -> Result<()> {
    let base = adapter.base();
    let timeout = base.initialization_timeout();
    if !base.wait_for_initialized(timeout) {
        let err = AdapterError::InitializationTimeout {
            adapter: base.name().to_owned(),
            timeout: timeout.unwrap_or_default(),
        };
        base.raise_exception(&err);
        return Err(err);
    }
    if let Err(err) = adapter.on_start() {
        base.raise_exception(&err);
        return Err(err);
    }
    base.mark_started();
    info!(adapter = %base.name(), "adapter started");
    Ok(())
}

fn stop_locked<A: Adapter + ?Sized>(adapter: &A) {
    let base = adapter.base();
    if !base.is_enabled() {
        return;
    }
    adapter.on_stop();
    base.mark_stopped();
    info!(adapter = %base.name(), processed = base.processed_measurements(), "adapter stopped");
}

/// Adapters that produce measurements.
pub trait Produces: Adapter {
    /// Publish a batch through the adapter's new-measurements hub.
    fn publish(&self, measurements: Vec<Measurement>) {
        self.base().publish_measurements(measurements);
    }

    fn output_measurement_keys(&self) -> Option<Vec<MeasurementKey>> {
        self.base().output_measurement_keys()
    }
}

/// Adapters that consume measurements.
pub trait Consumes: Adapter {
    /// Take ownership of a batch for processing. Must return quickly.
    fn process_measurements(&self, measurements: &[Measurement]);

    /// Entry point used by routing and broadcast dispatch.
    ///
    /// When the measurement filter is active the batch is reduced to declared input keys
    /// before [`Consumes::process_measurements`] sees it.
    fn queue_measurements_for_processing(&self, measurements: &[Measurement]) {
        let base = self.base();
        if base.process_measurement_filter() && base.input_measurement_keys().is_some() {
            let filtered: Vec<Measurement> = measurements
                .iter()
                .filter(|measurement| base.is_input_measurement(&measurement.key))
                .cloned()
                .collect();
            if filtered.is_empty() {
                return;
            }
            self.process_measurements(&filtered);
            base.count_processed(filtered.len());
        } else {
            if measurements.is_empty() {
                return;
            }
            self.process_measurements(measurements);
            base.count_processed(measurements.len());
        }
    }
}

/// Sources of measurements (devices, files, simulators).
pub trait InputAdapter: Produces {}

/// Transforms that consume measurements and produce new ones.
pub trait ActionAdapter: Consumes + Produces {}

/// Sinks that terminate the flow (archives, publishers).
pub trait OutputAdapter: Consumes {
    /// Measurements queued but not yet processed.
    fn unprocessed_measurements(&self) -> usize {
        0
    }

    /// Discard up to `count` queued measurements, oldest first.
    fn remove_measurements(&self, _count: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingActionAdapter, RecordingOutputAdapter};
    use std::time::Duration;

    fn key(raw: &str) -> MeasurementKey {
        raw.parse().unwrap()
    }

    #[test]
    fn start_requires_initialization() {
        let output = RecordingOutputAdapter::new("OUT");
        output
            .base()
            .set_initialization_timeout(Some(Duration::from_millis(10)));
        let err = output.start().unwrap_err();
        assert!(matches!(err, AdapterError::InitializationTimeout { .. }));
        assert!(!output.is_enabled());

        output.initialize().unwrap();
        output.start().unwrap();
        assert!(output.is_enabled());
        assert!(output.base().start_time().is_some());
    }

    #[test]
    fn set_enabled_only_acts_on_transitions() {
        let output = RecordingOutputAdapter::new("OUT");
        output.initialize().unwrap();
        output.set_enabled(true).unwrap();
        output.set_enabled(true).unwrap();
        assert_eq!(output.starts(), 1);

        output.set_enabled(false).unwrap();
        output.set_enabled(false).unwrap();
        assert_eq!(output.stops(), 1);

        output.start().unwrap();
        output.start().unwrap();
        assert_eq!(output.starts(), 3);
        assert_eq!(output.stops(), 2);
    }

    #[test]
    fn failed_initialization_leaves_flag_clear() {
        let output = RecordingOutputAdapter::new("OUT");
        output
            .base()
            .set_connection_string("inputMeasurementKeys={FILTER ActiveMeasurements WHERE TRUE}")
            .unwrap();
        let err = output.initialize().unwrap_err();
        assert!(matches!(err, AdapterError::FilterExpression { .. }));
        assert!(!output.is_initialized());
    }

    #[test]
    fn queue_filters_only_when_enabled_and_declared() {
        let action = RecordingActionAdapter::new("ACT");
        let batch = vec![
            Measurement::new(key("A:1"), 1.0),
            Measurement::new(key("A:2"), 2.0),
        ];

        action.queue_measurements_for_processing(&batch);
        assert_eq!(action.received().len(), 2);

        action
            .base()
            .set_input_measurement_keys(Some(vec![key("A:2")]));
        action.queue_measurements_for_processing(&batch);
        assert_eq!(action.received().len(), 3);
        assert_eq!(action.received()[2].key, key("A:2"));

        action.base().set_process_measurement_filter(false);
        action.queue_measurements_for_processing(&batch);
        assert_eq!(action.received().len(), 5);
        assert_eq!(action.base().processed_measurements(), 5);
    }

    #[test]
    fn builtin_and_registered_commands() {
        let output = RecordingOutputAdapter::new("OUT");
        output.invoke("SetInitializedState", &["true"]).unwrap();
        assert!(output.is_initialized());
        output.invoke("start", &[]).unwrap();
        match output.invoke("GetStatus", &[]).unwrap() {
            CommandResponse::Status(status) => {
                assert!(status.enabled);
                assert_eq!(status.name, "OUT");
            }
            other => panic!("unexpected response {other:?}"),
        }
        output
            .base()
            .commands()
            .register("Ping", "Replies pong", |_| Ok(CommandResponse::Text("pong".into())));
        assert_eq!(
            output.invoke("PING", &[]).unwrap(),
            CommandResponse::Text("pong".into())
        );
        assert!(output.invoke("SetInitializedState", &[]).is_err());
    }

    #[test]
    fn dispose_stops_and_rejects_further_starts() {
        let output = RecordingOutputAdapter::new("OUT");
        output.initialize().unwrap();
        output.start().unwrap();
        output.dispose();
        assert!(!output.is_enabled());
        assert!(matches!(output.start(), Err(AdapterError::Disposed { .. })));
    }
}
