//! ---
//! tsf_section: "05-measurement-routing"
//! tsf_subsection: "tests"
//! tsf_type: "test"
//! tsf_scope: "code"
//! tsf_description: "Routing completeness, atomic swap, coalescing and connect-on-demand checks."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tsf_adapters::testing::{
    RecordingActionAdapter, RecordingInputAdapter, RecordingOutputAdapter,
};
use tsf_adapters::{
    ActionAdapterCollection, Adapter, InputAdapterCollection, OutputAdapterCollection,
};
use tsf_measurement::{Measurement, MeasurementKey};
use tsf_metrics::{new_registry, RoutingMetrics};
use tsf_routing::RoutingEngine;

const IDLE: Duration = Duration::from_secs(10);

struct Fixture {
    inputs: InputAdapterCollection,
    actions: ActionAdapterCollection,
    outputs: OutputAdapterCollection,
    engine: RoutingEngine,
}

impl Fixture {
    fn new(metrics: Option<RoutingMetrics>) -> Self {
        let inputs = InputAdapterCollection::new("Inputs");
        let actions = ActionAdapterCollection::new("Actions");
        let outputs = OutputAdapterCollection::new("Outputs");
        let engine = RoutingEngine::new(
            "fixture",
            inputs.clone(),
            actions.clone(),
            outputs.clone(),
            metrics,
        )
        .expect("spawn routing worker");
        Self {
            inputs,
            actions,
            outputs,
            engine,
        }
    }

    fn recalculate(&self) {
        self.engine.calculate_routing_tables().unwrap();
        assert!(self.engine.wait_idle(IDLE));
    }
}

fn key(raw: &str) -> MeasurementKey {
    raw.parse().unwrap()
}

fn running<T: Adapter>(adapter: T) -> Arc<T> {
    adapter.initialize().unwrap();
    adapter.start().unwrap();
    Arc::new(adapter)
}

#[test]
fn keyed_destination_receives_each_measurement_once() {
    let fixture = Fixture::new(None);
    let output = running(RecordingOutputAdapter::new("OUT").with_input_keys(&["K:1", "K:2"]));
    fixture.outputs.add(output.clone());
    fixture.outputs.add(output.clone());
    fixture.recalculate();

    assert_eq!(fixture.engine.snapshot().output_destinations(&key("K:1")).len(), 1);
    fixture.engine.route(&[
        Measurement::new(key("K:1"), 1.0),
        Measurement::new(key("K:2"), 2.0),
        Measurement::new(key("K:3"), 3.0),
    ]);
    let received: Vec<String> = output
        .received()
        .iter()
        .map(|measurement| measurement.key.to_string())
        .collect();
    assert_eq!(received, ["K:1", "K:2"]);
}

#[test]
fn unfiltered_destinations_see_every_key() {
    let fixture = Fixture::new(None);
    let action = running(RecordingActionAdapter::new("ALL-ACTIONS").forwarding(false));
    let output = running(RecordingOutputAdapter::new("ALL-OUTPUTS"));
    fixture.actions.add(action.clone());
    fixture.outputs.add(output.clone());
    fixture.recalculate();

    let batch: Vec<Measurement> = (0..25)
        .map(|id| Measurement::new(MeasurementKey::new("RANDOM", id * 7919), id as f64))
        .collect();
    let summary = fixture.engine.route(&batch);
    assert_eq!(summary.unrouted, 25);
    assert_eq!(action.received().len(), 25);
    assert_eq!(output.received().len(), 25);
}

#[test]
fn readers_never_observe_a_partial_table() {
    let fixture = Arc::new(Fixture::new(None));
    let first: Vec<String> = (1..=50).map(|id| format!("LOW:{id}")).collect();
    let second: Vec<String> = (1..=50).map(|id| format!("HIGH:{id}")).collect();
    let first_refs: Vec<&str> = first.iter().map(String::as_str).collect();
    let output = running(RecordingOutputAdapter::new("SWAP").with_input_keys(&first_refs));
    fixture.outputs.add(output.clone());
    fixture.recalculate();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let fixture = fixture.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut observed = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    let snapshot = fixture.engine.snapshot();
                    let keys = snapshot.keys();
                    assert_eq!(keys.len(), 50, "table size changed mid-swap");
                    let source = keys[0].source().to_owned();
                    assert!(
                        keys.iter().all(|key| key.source() == source),
                        "mixed key sets in one table"
                    );
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for round in 0..20 {
        let keys = if round % 2 == 0 { &second } else { &first };
        output.base().set_input_measurement_keys(Some(
            keys.iter().map(|raw| key(raw)).collect(),
        ));
        fixture.recalculate();
    }
    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.join().expect("reader panicked") > 0);
    }
    assert!(fixture.engine.snapshot().version() >= 21);
}

#[test]
fn trigger_storm_runs_at_most_one_extra_calculation() {
    let fixture = Fixture::new(None);
    let slow = RecordingOutputAdapter::new("SLOW")
        .with_input_keys(&["K:1"])
        .shared();
    slow.base()
        .set_initialization_timeout(Some(Duration::from_millis(300)));
    fixture.outputs.add(slow);

    fixture.engine.calculate_routing_tables().unwrap();
    thread::sleep(Duration::from_millis(50));
    for _ in 0..50 {
        fixture.engine.calculate_routing_tables().unwrap();
    }
    assert!(fixture.engine.wait_idle(IDLE));
    assert_eq!(fixture.engine.calculations(), 2);
}

#[test]
fn connect_on_demand_output_follows_available_keys() {
    let fixture = Fixture::new(None);
    let input = running(RecordingInputAdapter::new("IN").with_outputs(&["K1:1"]));
    let wanted = RecordingOutputAdapter::new("WANTED")
        .with_input_keys(&["K1:1"])
        .connect_on_demand()
        .shared();
    let unwanted = RecordingOutputAdapter::new("UNWANTED")
        .with_input_keys(&["K2:1"])
        .connect_on_demand()
        .shared();
    wanted.initialize().unwrap();
    unwanted.initialize().unwrap();
    fixture.inputs.add(input);
    fixture.outputs.add(wanted.clone());
    fixture.outputs.add(unwanted.clone());
    fixture.recalculate();

    assert!(wanted.is_enabled());
    assert!(!unwanted.is_enabled());

    wanted.base().set_input_measurement_keys(Some(vec![key("K2:1")]));
    fixture.recalculate();
    assert!(!wanted.is_enabled());
}

#[test]
fn restriction_limits_on_demand_inputs() {
    let fixture = Fixture::new(None);
    let needed = RecordingInputAdapter::new("NEEDED")
        .with_outputs(&["PMU:1"])
        .connect_on_demand()
        .shared();
    let spare = RecordingInputAdapter::new("SPARE")
        .with_outputs(&["PMU:2"])
        .connect_on_demand()
        .shared();
    needed.initialize().unwrap();
    spare.initialize().unwrap();
    let sink = running(RecordingOutputAdapter::new("SINK").with_input_keys(&["PMU:1", "PMU:2"]));
    fixture.inputs.add(needed.clone());
    fixture.inputs.add(spare.clone());
    fixture.outputs.add(sink);

    fixture.recalculate();
    assert!(needed.is_enabled() && spare.is_enabled());

    fixture
        .engine
        .set_input_measurement_keys_restriction(Some(vec![key("PMU:1")]));
    fixture.recalculate();
    assert!(needed.is_enabled());
    assert!(!spare.is_enabled());
}

#[test]
fn calculations_are_recorded_in_metrics() {
    let registry = new_registry();
    let metrics = RoutingMetrics::new(registry.clone()).unwrap();
    let fixture = Fixture::new(Some(metrics.clone()));
    fixture
        .outputs
        .add(running(RecordingOutputAdapter::new("OUT").with_input_keys(&["M:1"])));
    fixture.recalculate();
    fixture.engine.route(&[
        Measurement::new(key("M:1"), 1.0),
        Measurement::new(key("M:2"), 1.0),
    ]);

    assert_eq!(metrics.calculations(), 1);
    let families = registry.gather();
    let routes = families
        .iter()
        .find(|family| family.get_name() == "tsf_routing_routes")
        .expect("routes gauge registered");
    assert_eq!(routes.get_metric()[0].get_gauge().get_value(), 1.0);
}
