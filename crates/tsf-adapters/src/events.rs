//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Explicit observer registration for adapter notifications.
//!
//! Every adapter, collection and the session expose [`Observers`] hubs. Handlers are invoked
//! synchronously on the notifying thread, outside of the hub's lock, so a handler may freely
//! subscribe or unsubscribe (including itself) while being notified.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tsf_measurement::Measurement;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique instance number for an adapter or collection.
pub fn next_instance_id() -> u64 {
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

/// Handle returned by [`Observers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A list of callbacks interested in one kind of event.
pub struct Observers<E> {
    next: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns false when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn notify(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("subscriptions", &self.len())
            .finish()
    }
}

/// Cheap identity of an event source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterRef {
    pub name: Arc<str>,
    pub instance: u64,
}

impl fmt::Display for AdapterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Alarm,
}

/// Lifecycle and diagnostic notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEventKind {
    Status { level: StatusLevel, message: String },
    ProcessException { message: String },
    InputMeasurementKeysUpdated,
    OutputMeasurementsUpdated,
    UnprocessedMeasurements(usize),
    Disposed,
}

/// Notification raised by an adapter, forwarded unchanged by its collections.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterEvent {
    pub source: AdapterRef,
    pub kind: AdapterEventKind,
}

impl AdapterEvent {
    pub fn is_key_update(&self) -> bool {
        matches!(
            self.kind,
            AdapterEventKind::InputMeasurementKeysUpdated
                | AdapterEventKind::OutputMeasurementsUpdated
        )
    }
}

/// A batch of measurements produced by an input or action adapter.
#[derive(Debug, Clone)]
pub struct NewMeasurements {
    pub source: AdapterRef,
    pub measurements: Arc<[Measurement]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_reaches_every_subscriber_until_unsubscribed() {
        let hub: Observers<u32> = Observers::new();
        let total = Arc::new(AtomicUsize::new(0));

        let first = {
            let total = total.clone();
            hub.subscribe(move |value| {
                total.fetch_add(*value as usize, Ordering::SeqCst);
            })
        };
        {
            let total = total.clone();
            hub.subscribe(move |value| {
                total.fetch_add(*value as usize * 10, Ordering::SeqCst);
            });
        }

        hub.notify(&1);
        assert_eq!(total.load(Ordering::SeqCst), 11);

        assert!(hub.unsubscribe(first));
        assert!(!hub.unsubscribe(first));
        hub.notify(&1);
        assert_eq!(total.load(Ordering::SeqCst), 21);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn handlers_may_unsubscribe_during_notification() {
        let hub: Arc<Observers<()>> = Arc::new(Observers::new());
        let slot = Arc::new(parking_lot::Mutex::new(None::<SubscriptionId>));
        let id = {
            let weak = Arc::downgrade(&hub);
            let slot = slot.clone();
            hub.subscribe(move |_| {
                if let (Some(hub), Some(id)) = (weak.upgrade(), *slot.lock()) {
                    hub.unsubscribe(id);
                }
            })
        };
        *slot.lock() = Some(id);
        hub.notify(&());
        assert!(hub.is_empty());
    }

    #[test]
    fn instance_ids_are_unique() {
        let a = next_instance_id();
        let b = next_instance_id();
        assert_ne!(a, b);
    }
}
