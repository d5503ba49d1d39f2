//! ---
//! tsf_section: "05-measurement-routing"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Routing table engine and connect-on-demand resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Connect-on-demand resolution.
//!
//! After each routing calculation, adapters with `auto_start` off are started or stopped
//! according to whether the session can feed their inputs or needs their outputs. An action
//! adapter stays enabled when either side is requested.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};
use tsf_adapters::{ActionAdapter, Adapter, InputAdapter, OutputAdapter};
use tsf_measurement::MeasurementKey;

/// What the session can produce and what it needs produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemandSets {
    pub available_outputs: BTreeSet<MeasurementKey>,
    pub demanded_inputs: BTreeSet<MeasurementKey>,
}

impl DemandSets {
    /// Global unions over every adapter in the session.
    pub fn global(
        inputs: &[Arc<dyn InputAdapter>],
        actions: &[Arc<dyn ActionAdapter>],
        outputs: &[Arc<dyn OutputAdapter>],
    ) -> Self {
        let mut sets = Self::default();
        for adapter in inputs {
            sets.available_outputs.extend(output_keys(&**adapter));
        }
        for adapter in actions {
            sets.available_outputs.extend(output_keys(&**adapter));
            sets.demanded_inputs.extend(input_keys(&**adapter));
        }
        for adapter in outputs {
            sets.demanded_inputs.extend(input_keys(&**adapter));
        }
        sets
    }

    /// Walk the dependency chain upstream from a key restriction.
    ///
    /// Action adapters producing any demanded key are pulled in, and their inputs become demanded
    /// in turn, until no new action adapter qualifies. Input adapters are then pulled in the same
    /// way. Only the adapters reached contribute available outputs.
    pub fn restricted(
        restriction: &[MeasurementKey],
        inputs: &[Arc<dyn InputAdapter>],
        actions: &[Arc<dyn ActionAdapter>],
    ) -> Self {
        let mut demanded: BTreeSet<MeasurementKey> = restriction.iter().cloned().collect();
        let mut available = BTreeSet::new();

        let reached_actions = walk(actions, &mut demanded);
        for adapter in &reached_actions {
            available.extend(output_keys(&***adapter));
        }
        let reached_inputs = walk(inputs, &mut demanded);
        for adapter in &reached_inputs {
            available.extend(output_keys(&***adapter));
        }
        debug!(
            actions = reached_actions.len(),
            inputs = reached_inputs.len(),
            demanded = demanded.len(),
            "dependency chain traversed"
        );

        Self {
            available_outputs: available,
            demanded_inputs: demanded,
        }
    }
}

fn walk<'a, T: ?Sized + Adapter>(
    candidates: &'a [Arc<T>],
    demanded: &mut BTreeSet<MeasurementKey>,
) -> Vec<&'a Arc<T>> {
    let mut reached: Vec<&Arc<T>> = Vec::new();
    loop {
        let found: Vec<&Arc<T>> = candidates
            .iter()
            .filter(|adapter| {
                !reached
                    .iter()
                    .any(|seen| seen.base().instance() == adapter.base().instance())
            })
            .filter(|adapter| {
                output_keys(&***adapter)
                    .iter()
                    .any(|key| demanded.contains(key))
            })
            .collect();
        if found.is_empty() {
            return reached;
        }
        for adapter in &found {
            demanded.extend(input_keys(&***adapter));
        }
        reached.extend(found);
    }
}

fn input_keys<T: ?Sized + Adapter>(adapter: &T) -> Vec<MeasurementKey> {
    adapter
        .base()
        .input_measurement_keys()
        .map(|keys| keys.to_vec())
        .unwrap_or_default()
}

fn output_keys<T: ?Sized + Adapter>(adapter: &T) -> Vec<MeasurementKey> {
    adapter.base().output_measurement_keys().unwrap_or_default()
}

fn intersect(
    keys: &[MeasurementKey],
    with: &BTreeSet<MeasurementKey>,
) -> Option<Vec<MeasurementKey>> {
    let shared: Vec<MeasurementKey> = keys
        .iter()
        .filter(|key| with.contains(*key))
        .cloned()
        .collect();
    (!shared.is_empty()).then_some(shared)
}

fn has_keys(keys: &Option<Arc<[MeasurementKey]>>) -> bool {
    keys.as_ref().is_some_and(|keys| !keys.is_empty())
}

/// Set the requested input keys only when they differ, since adapters may resubscribe on change.
fn request_inputs<T: ?Sized + Adapter>(adapter: &T, requested: Option<Vec<MeasurementKey>>) {
    let base = adapter.base();
    if base.requested_input_measurement_keys().as_deref() != requested.as_deref() {
        base.set_requested_input_measurement_keys(requested);
    }
}

fn request_outputs<T: ?Sized + Adapter>(adapter: &T, requested: Option<Vec<MeasurementKey>>) {
    let base = adapter.base();
    if base.requested_output_measurement_keys().as_deref() != requested.as_deref() {
        base.set_requested_output_measurement_keys(requested);
    }
}

fn enable<T: ?Sized + Adapter>(adapter: &T, enabled: bool) {
    if let Err(err) = adapter.set_enabled(enabled) {
        warn!(adapter = %adapter.name(), enabled, error = %err, "connect-on-demand transition failed");
    }
}

/// Start or stop every connect-on-demand adapter according to the session's demand.
///
/// A non-empty `restriction` narrows demand to its upstream dependency chain; otherwise the
/// global unions are used.
pub fn resolve_connect_on_demand(
    inputs: &[Arc<dyn InputAdapter>],
    actions: &[Arc<dyn ActionAdapter>],
    outputs: &[Arc<dyn OutputAdapter>],
    restriction: Option<&[MeasurementKey]>,
) -> DemandSets {
    let sets = match restriction {
        Some(restriction) if !restriction.is_empty() => {
            DemandSets::restricted(restriction, inputs, actions)
        }
        _ => DemandSets::global(inputs, actions, outputs),
    };

    let on_demand_actions: Vec<&Arc<dyn ActionAdapter>> = actions
        .iter()
        .filter(|adapter| !adapter.base().auto_start())
        .collect();

    // Input side: what can be fed to each adapter.
    for action in &on_demand_actions {
        let requested = if sets.available_outputs.is_empty() {
            None
        } else {
            intersect(&input_keys(&***action), &sets.available_outputs)
        };
        request_inputs(&***action, requested);
    }
    for output in outputs.iter().filter(|adapter| !adapter.base().auto_start()) {
        let requested = if sets.available_outputs.is_empty() {
            None
        } else {
            intersect(&input_keys(&**output), &sets.available_outputs)
        };
        let enabled = requested.is_some();
        request_inputs(&**output, requested);
        enable(&**output, enabled);
    }

    // Output side: what is needed from each adapter.
    for action in &on_demand_actions {
        let requested = if sets.demanded_inputs.is_empty() {
            None
        } else {
            intersect(&output_keys(&***action), &sets.demanded_inputs)
        };
        let enabled = requested.is_some()
            || has_keys(&action.base().requested_input_measurement_keys());
        request_outputs(&***action, requested);
        enable(&***action, enabled);
    }
    for input in inputs.iter().filter(|adapter| !adapter.base().auto_start()) {
        let requested = if sets.demanded_inputs.is_empty() {
            None
        } else {
            intersect(&output_keys(&**input), &sets.demanded_inputs)
        };
        let enabled = requested.is_some();
        request_outputs(&**input, requested);
        enable(&**input, enabled);
    }

    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsf_adapters::testing::{
        RecordingActionAdapter, RecordingInputAdapter, RecordingOutputAdapter,
    };

    fn key(raw: &str) -> MeasurementKey {
        raw.parse().unwrap()
    }

    fn ready<T: Adapter>(adapter: T) -> Arc<T> {
        adapter.base().set_initialized(true);
        Arc::new(adapter)
    }

    #[test]
    fn on_demand_output_follows_available_outputs() {
        let input = ready(RecordingInputAdapter::new("IN").with_outputs(&["K:1"]));
        let fed = ready(
            RecordingOutputAdapter::new("FED")
                .with_input_keys(&["K:1", "K:9"])
                .connect_on_demand(),
        );
        let starved = ready(
            RecordingOutputAdapter::new("STARVED")
                .with_input_keys(&["K:2"])
                .connect_on_demand(),
        );
        let inputs: Vec<Arc<dyn InputAdapter>> = vec![input];
        let outputs: Vec<Arc<dyn OutputAdapter>> = vec![fed.clone(), starved.clone()];

        resolve_connect_on_demand(&inputs, &[], &outputs, None);
        assert!(fed.is_enabled());
        assert_eq!(
            fed.base().requested_input_measurement_keys().as_deref(),
            Some(&[key("K:1")][..])
        );
        assert!(!starved.is_enabled());
        assert!(starved.base().requested_input_measurement_keys().is_none());
    }

    #[test]
    fn on_demand_action_needs_either_side() {
        let input = ready(RecordingInputAdapter::new("IN").with_outputs(&["A:1"]));
        let fed_only = ready(
            RecordingActionAdapter::new("FED-ONLY")
                .with_input_keys(&["A:1"])
                .with_outputs(&["X:1"])
                .connect_on_demand(),
        );
        let wanted_only = ready(
            RecordingActionAdapter::new("WANTED-ONLY")
                .with_input_keys(&["Z:1"])
                .with_outputs(&["B:1"])
                .connect_on_demand(),
        );
        let neither = ready(
            RecordingActionAdapter::new("NEITHER")
                .with_input_keys(&["Z:2"])
                .with_outputs(&["Y:1"])
                .connect_on_demand(),
        );
        let sink = ready(RecordingOutputAdapter::new("SINK").with_input_keys(&["B:1"]));

        let inputs: Vec<Arc<dyn InputAdapter>> = vec![input];
        let actions: Vec<Arc<dyn ActionAdapter>> =
            vec![fed_only.clone(), wanted_only.clone(), neither.clone()];
        let outputs: Vec<Arc<dyn OutputAdapter>> = vec![sink];

        resolve_connect_on_demand(&inputs, &actions, &outputs, None);
        assert!(fed_only.is_enabled());
        assert!(wanted_only.is_enabled());
        assert_eq!(
            wanted_only.base().requested_output_measurement_keys().as_deref(),
            Some(&[key("B:1")][..])
        );
        assert!(!neither.is_enabled());
    }

    #[test]
    fn on_demand_input_disabled_without_demand() {
        let wanted = ready(
            RecordingInputAdapter::new("WANTED")
                .with_outputs(&["P:1", "P:2"])
                .connect_on_demand(),
        );
        let idle = ready(
            RecordingInputAdapter::new("IDLE")
                .with_outputs(&["Q:1"])
                .connect_on_demand(),
        );
        let sink = ready(RecordingOutputAdapter::new("SINK").with_input_keys(&["P:2"]));
        let inputs: Vec<Arc<dyn InputAdapter>> = vec![wanted.clone(), idle.clone()];
        let outputs: Vec<Arc<dyn OutputAdapter>> = vec![sink];

        resolve_connect_on_demand(&inputs, &[], &outputs, None);
        assert!(wanted.is_enabled());
        assert_eq!(
            wanted.base().requested_output_measurement_keys().as_deref(),
            Some(&[key("P:2")][..])
        );
        assert!(!idle.is_enabled());
    }

    #[test]
    fn restriction_walks_the_chain_upstream() {
        let pmu = ready(
            RecordingInputAdapter::new("PMU")
                .with_outputs(&["PMU:1"])
                .connect_on_demand(),
        );
        let other = ready(
            RecordingInputAdapter::new("OTHER")
                .with_outputs(&["OTHER:1"])
                .connect_on_demand(),
        );
        let calc = ready(
            RecordingActionAdapter::new("CALC")
                .with_input_keys(&["STAGE:1"])
                .with_outputs(&["CALC:1"])
                .connect_on_demand(),
        );
        let stage = ready(
            RecordingActionAdapter::new("STAGE")
                .with_input_keys(&["PMU:1"])
                .with_outputs(&["STAGE:1"])
                .connect_on_demand(),
        );
        let inputs: Vec<Arc<dyn InputAdapter>> = vec![pmu.clone(), other.clone()];
        let actions: Vec<Arc<dyn ActionAdapter>> = vec![calc.clone(), stage.clone()];

        let sets = resolve_connect_on_demand(&inputs, &actions, &[], Some(&[key("CALC:1")]));
        assert!(sets.demanded_inputs.contains(&key("PMU:1")));
        assert!(sets.available_outputs.contains(&key("STAGE:1")));
        assert!(!sets.available_outputs.contains(&key("OTHER:1")));
        assert!(pmu.is_enabled());
        assert!(!other.is_enabled());
        assert!(calc.is_enabled());
        assert!(stage.is_enabled());
    }

    #[test]
    fn auto_start_adapters_are_left_alone() {
        let input = ready(RecordingInputAdapter::new("IN").with_outputs(&["K:1"]));
        let sink = ready(RecordingOutputAdapter::new("SINK").with_input_keys(&["K:2"]));
        let inputs: Vec<Arc<dyn InputAdapter>> = vec![input.clone()];
        let outputs: Vec<Arc<dyn OutputAdapter>> = vec![sink.clone()];
        resolve_connect_on_demand(&inputs, &[], &outputs, None);
        assert!(!input.is_enabled());
        assert!(!sink.is_enabled());
        assert!(sink.base().requested_input_measurement_keys().is_none());
    }
}
