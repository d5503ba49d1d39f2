//! ---
//! tsf_section: "05-measurement-routing"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Routing table engine and connect-on-demand resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tsf_adapters::{ActionAdapter, Adapter, OutputAdapter};
use tsf_measurement::MeasurementKey;

/// Immutable routing table: keyed destinations plus broadcast targets.
pub struct RoutingSnapshot {
    version: u64,
    action_routes: HashMap<MeasurementKey, Vec<Arc<dyn ActionAdapter>>>,
    output_routes: HashMap<MeasurementKey, Vec<Arc<dyn OutputAdapter>>>,
    action_broadcast: Vec<Arc<dyn ActionAdapter>>,
    output_broadcast: Vec<Arc<dyn OutputAdapter>>,
}

impl RoutingSnapshot {
    /// A table that routes nothing.
    pub fn empty() -> Self {
        Self {
            version: 0,
            action_routes: HashMap::new(),
            output_routes: HashMap::new(),
            action_broadcast: Vec::new(),
            output_broadcast: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn action_destinations(&self, key: &MeasurementKey) -> &[Arc<dyn ActionAdapter>] {
        self.action_routes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn output_destinations(&self, key: &MeasurementKey) -> &[Arc<dyn OutputAdapter>] {
        self.output_routes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn action_broadcast(&self) -> &[Arc<dyn ActionAdapter>] {
        &self.action_broadcast
    }

    pub fn output_broadcast(&self) -> &[Arc<dyn OutputAdapter>] {
        &self.output_broadcast
    }

    /// True when the key has at least one keyed destination.
    pub fn is_routed(&self, key: &MeasurementKey) -> bool {
        self.action_routes.contains_key(key) || self.output_routes.contains_key(key)
    }

    /// Every key with a keyed destination, sorted.
    pub fn keys(&self) -> Vec<MeasurementKey> {
        let mut keys: Vec<MeasurementKey> = self
            .action_routes
            .keys()
            .chain(self.output_routes.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Number of distinct routed keys.
    pub fn route_count(&self) -> usize {
        self.keys().len()
    }

    /// Distinct keyed action and output destinations.
    pub fn keyed_destination_counts(&self) -> (usize, usize) {
        fn distinct<T: ?Sized + Adapter>(
            routes: &HashMap<MeasurementKey, Vec<Arc<T>>>,
        ) -> usize {
            let mut instances: Vec<u64> = routes
                .values()
                .flatten()
                .map(|adapter| adapter.base().instance())
                .collect();
            instances.sort_unstable();
            instances.dedup();
            instances.len()
        }
        (distinct(&self.action_routes), distinct(&self.output_routes))
    }
}

impl fmt::Debug for RoutingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingSnapshot")
            .field("version", &self.version)
            .field("action_routes", &self.action_routes.len())
            .field("output_routes", &self.output_routes.len())
            .field("action_broadcast", &self.action_broadcast.len())
            .field("output_broadcast", &self.output_broadcast.len())
            .finish()
    }
}

/// Accumulates destinations into fresh maps before they are published as a snapshot.
#[derive(Default)]
pub struct RoutingSnapshotBuilder {
    action_routes: HashMap<MeasurementKey, Vec<Arc<dyn ActionAdapter>>>,
    output_routes: HashMap<MeasurementKey, Vec<Arc<dyn OutputAdapter>>>,
    action_broadcast: Vec<Arc<dyn ActionAdapter>>,
    output_broadcast: Vec<Arc<dyn OutputAdapter>>,
}

impl RoutingSnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action adapter under each key, or as a broadcast target when `keys` is `None`.
    pub fn add_action(&mut self, adapter: Arc<dyn ActionAdapter>, keys: Option<&[MeasurementKey]>) {
        register(&mut self.action_routes, &mut self.action_broadcast, adapter, keys);
    }

    pub fn add_output(&mut self, adapter: Arc<dyn OutputAdapter>, keys: Option<&[MeasurementKey]>) {
        register(&mut self.output_routes, &mut self.output_broadcast, adapter, keys);
    }

    pub fn build(self, version: u64) -> RoutingSnapshot {
        RoutingSnapshot {
            version,
            action_routes: self.action_routes,
            output_routes: self.output_routes,
            action_broadcast: self.action_broadcast,
            output_broadcast: self.output_broadcast,
        }
    }
}

fn register<T: ?Sized + Adapter>(
    routes: &mut HashMap<MeasurementKey, Vec<Arc<T>>>,
    broadcast: &mut Vec<Arc<T>>,
    adapter: Arc<T>,
    keys: Option<&[MeasurementKey]>,
) {
    let instance = adapter.base().instance();
    let listed = |list: &Vec<Arc<T>>| {
        list.iter()
            .any(|existing| existing.base().instance() == instance)
    };
    match keys {
        None => {
            if !listed(&*broadcast) {
                broadcast.push(adapter);
            }
        }
        Some(keys) => {
            for key in keys {
                let destinations = routes.entry(key.clone()).or_default();
                if !listed(&*destinations) {
                    destinations.push(adapter.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsf_adapters::testing::{RecordingActionAdapter, RecordingOutputAdapter};

    fn key(raw: &str) -> MeasurementKey {
        raw.parse().unwrap()
    }

    #[test]
    fn destinations_are_deduplicated_per_key() {
        let output = RecordingOutputAdapter::new("OUT").shared();
        let mut builder = RoutingSnapshotBuilder::new();
        let keys = [key("P:1"), key("P:2")];
        builder.add_output(output.clone(), Some(&keys));
        builder.add_output(output.clone(), Some(&keys[..1]));
        builder.add_output(output.clone(), None);
        builder.add_output(output, None);
        let snapshot = builder.build(3);

        assert_eq!(snapshot.version(), 3);
        assert_eq!(snapshot.output_destinations(&key("P:1")).len(), 1);
        assert_eq!(snapshot.output_destinations(&key("P:2")).len(), 1);
        assert_eq!(snapshot.output_broadcast().len(), 1);
        assert_eq!(snapshot.keyed_destination_counts(), (0, 1));
    }

    #[test]
    fn unknown_keys_have_no_destinations() {
        let action = RecordingActionAdapter::new("ACT").shared();
        let mut builder = RoutingSnapshotBuilder::new();
        builder.add_action(action, Some(&[key("A:1")]));
        let snapshot = builder.build(1);
        assert!(snapshot.is_routed(&key("A:1")));
        assert!(!snapshot.is_routed(&key("A:2")));
        assert!(snapshot.action_destinations(&key("A:2")).is_empty());
        assert_eq!(snapshot.keys(), [key("A:1")]);
        assert_eq!(snapshot.route_count(), 1);
        assert_eq!(RoutingSnapshot::empty().route_count(), 0);
    }
}
