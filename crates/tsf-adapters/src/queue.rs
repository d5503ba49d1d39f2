//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Bounded per-adapter measurement queue.
//!
//! Consumers that process on their own thread enqueue from
//! [`Consumes::process_measurements`](crate::Consumes::process_measurements) and drain on their
//! worker. The queue never blocks the routing thread: anything beyond capacity is rejected and
//! counted so backpressure stays visible.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tsf_measurement::Measurement;

#[derive(Debug)]
pub struct MeasurementQueue {
    sender: mpsc::Sender<Measurement>,
    receiver: Mutex<mpsc::Receiver<Measurement>>,
    capacity: usize,
    rejected: AtomicU64,
}

impl MeasurementQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
            rejected: AtomicU64::new(0),
        }
    }

    /// Enqueue as many measurements as fit, returning how many were accepted.
    pub fn try_enqueue(&self, measurements: &[Measurement]) -> usize {
        let mut accepted = 0;
        for measurement in measurements {
            match self.sender.try_send(measurement.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    let dropped = (measurements.len() - accepted) as u64;
                    self.rejected.fetch_add(dropped, Ordering::Relaxed);
                    break;
                }
            }
        }
        accepted
    }

    /// Take up to `max` queued measurements without waiting.
    pub fn drain(&self, max: usize) -> Vec<Measurement> {
        let mut receiver = self.receiver.lock();
        let mut drained = Vec::new();
        while drained.len() < max {
            match receiver.try_recv() {
                Ok(measurement) => drained.push(measurement),
                Err(_) => break,
            }
        }
        drained
    }

    /// Discard up to `count` of the oldest measurements, returning how many were dropped.
    pub fn discard(&self, count: usize) -> usize {
        self.drain(count).len()
    }

    pub fn depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Measurements turned away because the queue was full.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
