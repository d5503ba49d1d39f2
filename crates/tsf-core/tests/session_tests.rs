//! ---
//! tsf_section: "01-core-functionality"
//! tsf_subsection: "tests"
//! tsf_type: "test"
//! tsf_scope: "code"
//! tsf_description: "Session orchestration and lifecycle management."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tsf_adapters::testing::{
    RecordingActionAdapter, RecordingInputAdapter, RecordingOutputAdapter,
};
use tsf_adapters::{Adapter, AdapterEventKind, AllAdaptersCollection, StatusLevel};
use tsf_common::SessionConfig;
use tsf_core::{IaonSession, SessionError};
use tsf_measurement::{Measurement, MeasurementKey};
use tsf_metrics::new_registry;

const IDLE: Duration = Duration::from_secs(10);

fn key(raw: &str) -> MeasurementKey {
    raw.parse().unwrap()
}

fn received_keys(output: &RecordingOutputAdapter) -> Vec<String> {
    output
        .received()
        .iter()
        .map(|measurement| measurement.key.to_string())
        .collect()
}

struct TwoHop {
    input: Arc<RecordingInputAdapter>,
    action: Arc<RecordingActionAdapter>,
    output: Arc<RecordingOutputAdapter>,
    session: IaonSession,
}

fn two_hop(config: SessionConfig) -> TwoHop {
    let input = RecordingInputAdapter::new("PMU").with_outputs(&["A:1"]).shared();
    let action = RecordingActionAdapter::new("SCALE")
        .with_input_keys(&["A:1"])
        .with_outputs(&["B:1"])
        .shared();
    let output = RecordingOutputAdapter::new("ARCHIVE")
        .with_input_keys(&["B:1"])
        .shared();

    let adapters = AllAdaptersCollection::empty();
    adapters.inputs().add(input.clone());
    adapters.actions().add(action.clone());
    adapters.outputs().add(output.clone());
    let session = IaonSession::new(config, adapters).unwrap();
    TwoHop {
        input,
        action,
        output,
        session,
    }
}

#[test]
fn measurement_crosses_two_routing_hops() {
    let fixture = two_hop(SessionConfig::default());
    let report = fixture.session.initialize(true).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.initialized(), 3);
    assert!(fixture.session.wait_for_routing(IDLE));

    fixture
        .input
        .produce(vec![Measurement::new(key("A:1"), 5.0)]);

    let seen_by_action: Vec<String> = fixture
        .action
        .received()
        .iter()
        .map(|measurement| measurement.key.to_string())
        .collect();
    assert_eq!(seen_by_action, ["A:1"]);
    let delivered = fixture.output.received();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key, key("B:1"));
    assert_eq!(delivered[0].value, 5.0);
}

#[test]
fn unrouted_keys_are_dropped_in_routing_mode() {
    let fixture = two_hop(SessionConfig::default());
    fixture.session.initialize(true).unwrap();
    assert!(fixture.session.wait_for_routing(IDLE));

    fixture.input.produce(vec![
        Measurement::new(key("A:1"), 1.0),
        Measurement::new(key("Z:9"), 2.0),
        Measurement::new(key("A:1"), 3.0),
    ]);

    let batches = fixture.action.batches();
    assert_eq!(batches.len(), 1);
    let values: Vec<f64> = batches[0].iter().map(|measurement| measurement.value).collect();
    assert_eq!(values, [1.0, 3.0]);
    assert_eq!(received_keys(&fixture.output), ["B:1", "B:1"]);
}

#[test]
fn broadcast_mode_relies_on_adapter_filters() {
    let config = SessionConfig {
        use_measurement_routing: false,
        ..SessionConfig::default()
    };
    let fixture = two_hop(config);
    fixture.session.initialize(true).unwrap();
    assert!(!fixture.session.use_measurement_routing());
    assert_eq!(fixture.session.routing().calculations(), 0);

    fixture.input.produce(vec![
        Measurement::new(key("A:1"), 1.0),
        Measurement::new(key("B:1"), 2.0),
        Measurement::new(key("C:1"), 3.0),
    ]);

    assert_eq!(fixture.action.received().len(), 1);
    // the direct B:1 plus the one the action derived from A:1
    assert_eq!(received_keys(&fixture.output), ["B:1", "B:1"]);
}

#[test]
fn switching_to_routing_builds_the_table() {
    let config = SessionConfig {
        use_measurement_routing: false,
        ..SessionConfig::default()
    };
    let fixture = two_hop(config);
    fixture.session.initialize(true).unwrap();

    fixture.session.set_use_measurement_routing(true).unwrap();
    assert!(fixture.session.wait_for_routing(IDLE));
    assert!(fixture.session.routing_snapshot().is_routed(&key("A:1")));
    assert!(!fixture.action.base().process_measurement_filter());

    fixture.session.set_use_measurement_routing(false).unwrap();
    assert!(fixture.action.base().process_measurement_filter());
    assert!(fixture.output.base().process_measurement_filter());
}

#[test]
fn key_updates_trigger_recalculation() {
    let fixture = two_hop(SessionConfig::default());
    fixture.session.initialize(true).unwrap();
    assert!(fixture.session.wait_for_routing(IDLE));
    let before = fixture.session.routing().calculations();

    fixture
        .output
        .base()
        .set_input_measurement_keys(Some(vec![key("A:1")]));
    assert!(fixture.session.wait_for_routing(IDLE));

    assert!(fixture.session.routing().calculations() > before);
    let snapshot = fixture.session.routing_snapshot();
    assert_eq!(snapshot.output_destinations(&key("A:1")).len(), 1);
    assert!(snapshot.output_destinations(&key("B:1")).is_empty());
}

#[test]
fn failed_adapter_is_reported_without_blocking_routing() {
    let registry = new_registry();
    let input = RecordingInputAdapter::new("PMU").with_outputs(&["A:1"]).shared();
    let healthy = RecordingOutputAdapter::new("HEALTHY")
        .with_input_keys(&["A:1"])
        .shared();
    let broken = RecordingOutputAdapter::new("BROKEN")
        .with_input_keys(&["A:1"])
        .shared();
    broken.fail_configuration(true);
    broken
        .base()
        .set_initialization_timeout(Some(Duration::from_millis(100)));
    let adapters = AllAdaptersCollection::empty();
    adapters.inputs().add(input.clone());
    adapters.outputs().add(healthy.clone());
    adapters.outputs().add(broken.clone());
    let session =
        IaonSession::with_registry(SessionConfig::default(), adapters, registry.clone()).unwrap();

    let warnings = Arc::new(Mutex::new(Vec::new()));
    {
        let warnings = warnings.clone();
        session.events().subscribe(move |event| {
            if let AdapterEventKind::Status {
                level: StatusLevel::Warning,
                message,
            } = &event.kind
            {
                warnings.lock().push(message.clone());
            }
        });
    }

    let report = session.initialize(true).unwrap();
    assert_eq!(report.failed(), ["BROKEN"]);
    assert!(warnings.lock().iter().any(|message| message.contains("BROKEN")));
    assert!(session.wait_for_routing(IDLE));
    assert!(session.routing().calculations() >= 1);
    assert!(!broken.is_enabled());

    input.produce(vec![Measurement::new(key("A:1"), 4.0)]);
    assert_eq!(received_keys(&healthy), ["A:1"]);
    assert!(broken.received().is_empty());

    let failures = registry
        .gather()
        .into_iter()
        .find(|family| family.get_name() == "tsf_adapter_initialization_failures_total")
        .expect("failure counter registered");
    assert_eq!(failures.get_metric()[0].get_counter().get_value(), 1.0);
}

#[test]
fn reinitialized_adapter_is_routed_by_its_new_keys() {
    let input = RecordingInputAdapter::new("PMU")
        .with_outputs(&["A:1", "A:2"])
        .shared();
    let output = RecordingOutputAdapter::new("ARCHIVE")
        .with_input_keys(&["A:1"])
        .shared();
    let adapters = AllAdaptersCollection::empty();
    adapters.inputs().add(input.clone());
    adapters.outputs().add(output.clone());
    let session = IaonSession::new(SessionConfig::default(), adapters).unwrap();
    session.initialize(true).unwrap();
    assert!(session.wait_for_routing(IDLE));
    let before = session.routing().calculations();

    output
        .base()
        .set_connection_string("inputMeasurementKeys=A:2")
        .unwrap();
    output.invoke("Initialize", &[]).unwrap();
    assert!(session.wait_for_routing(IDLE));

    assert!(session.routing().calculations() > before);
    assert!(output.is_initialized());
    input.produce(vec![
        Measurement::new(key("A:1"), 1.0),
        Measurement::new(key("A:2"), 2.0),
    ]);
    assert_eq!(received_keys(&output), ["A:2"]);
}

#[test]
fn first_batch_after_enabling_routing_is_delivered() {
    for _ in 0..20 {
        let input = RecordingInputAdapter::new("PMU").with_outputs(&["A:1"]).shared();
        let output = RecordingOutputAdapter::new("ARCHIVE")
            .with_input_keys(&["A:1"])
            .shared();
        let adapters = AllAdaptersCollection::empty();
        adapters.inputs().add(input.clone());
        adapters.outputs().add(output.clone());
        let config = SessionConfig {
            use_measurement_routing: false,
            ..SessionConfig::default()
        };
        let session = IaonSession::new(config, adapters).unwrap();
        session.initialize(true).unwrap();

        session.set_use_measurement_routing(true).unwrap();
        input.produce(vec![Measurement::new(key("A:1"), 1.0)]);

        assert_eq!(received_keys(&output), ["A:1"]);
        session.dispose();
    }
}

#[test]
fn connect_on_demand_output_starts_after_routing() {
    let input = RecordingInputAdapter::new("PMU").with_outputs(&["A:1"]).shared();
    let wanted = RecordingOutputAdapter::new("WANTED")
        .with_input_keys(&["A:1"])
        .connect_on_demand()
        .shared();
    let idle = RecordingOutputAdapter::new("IDLE")
        .with_input_keys(&["Q:1"])
        .connect_on_demand()
        .shared();
    let adapters = AllAdaptersCollection::empty();
    adapters.inputs().add(input.clone());
    adapters.outputs().add(wanted.clone());
    adapters.outputs().add(idle.clone());
    let session = IaonSession::new(SessionConfig::default(), adapters).unwrap();

    session.initialize(true).unwrap();
    assert!(session.wait_for_routing(IDLE));

    assert!(input.is_enabled());
    assert!(wanted.is_enabled());
    assert!(!idle.is_enabled());
    assert_eq!(
        wanted
            .base()
            .requested_input_measurement_keys()
            .as_deref()
            .map(<[MeasurementKey]>::len),
        Some(1)
    );

    input.produce(vec![Measurement::new(key("A:1"), 7.0)]);
    assert_eq!(received_keys(&wanted), ["A:1"]);
    assert!(idle.received().is_empty());
}

#[test]
fn configured_restriction_limits_on_demand_inputs() {
    let config = SessionConfig {
        input_measurement_keys_restriction: Some("PMU:1".to_owned()),
        ..SessionConfig::default()
    };
    let needed = RecordingInputAdapter::new("NEEDED")
        .with_outputs(&["PMU:1"])
        .connect_on_demand()
        .shared();
    let spare = RecordingInputAdapter::new("SPARE")
        .with_outputs(&["PMU:2"])
        .connect_on_demand()
        .shared();
    let sink = RecordingOutputAdapter::new("SINK")
        .with_input_keys(&["PMU:1", "PMU:2"])
        .shared();
    let adapters = AllAdaptersCollection::empty();
    adapters.inputs().add(needed.clone());
    adapters.inputs().add(spare.clone());
    adapters.outputs().add(sink);
    let session = IaonSession::new(config, adapters).unwrap();

    session.initialize(true).unwrap();
    assert!(session.wait_for_routing(IDLE));

    assert_eq!(
        session.input_measurement_keys_restriction().as_deref(),
        Some(&[key("PMU:1")][..])
    );
    assert!(needed.is_enabled());
    assert!(!spare.is_enabled());

    session.set_input_measurement_keys_restriction(None).unwrap();
    assert!(session.wait_for_routing(IDLE));
    assert!(spare.is_enabled());
}

#[test]
fn dispose_stops_adapters_and_detaches_dispatch() {
    let fixture = two_hop(SessionConfig::default());
    fixture.session.initialize(true).unwrap();
    assert!(fixture.session.wait_for_routing(IDLE));

    fixture.session.dispose();
    assert!(fixture.session.is_disposed());
    assert!(fixture.session.routing().is_disposed());
    assert!(!fixture.input.is_enabled());
    assert!(fixture.output.stops() >= 1);

    fixture
        .input
        .produce(vec![Measurement::new(key("A:1"), 1.0)]);
    assert!(fixture.action.received().is_empty());
    assert!(matches!(
        fixture.session.recalculate_routing_tables(),
        Err(SessionError::Disposed { .. })
    ));
}
