//! ---
//! tsf_section: "05-measurement-routing"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Routing table engine and connect-on-demand resolution."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
//! Single-slot coalescing job runner.
//!
//! Requests set a dirty flag; one dedicated thread clears it and runs the job. Requests that
//! arrive while the job runs collapse into exactly one follow-up run, so a storm of triggers
//! costs at most the run in flight plus one more. A panicking run is caught and handed to the
//! panic hook; the worker keeps serving requests.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::{Result, RoutingError};

#[derive(Debug, Default)]
struct WorkerState {
    dirty: bool,
    running: bool,
    shutdown: bool,
    completed: u64,
}

#[derive(Default)]
struct WorkerShared {
    state: Mutex<WorkerState>,
    wake: Condvar,
    idle: Condvar,
}

pub struct CoalescingWorker {
    name: String,
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl CoalescingWorker {
    /// Spawn the worker thread. `job` runs once per coalesced request; `on_panic` receives the
    /// message of any run that panicked.
    pub fn spawn<F, P>(name: impl Into<String>, job: F, on_panic: P) -> Result<Self>
    where
        F: Fn() + Send + 'static,
        P: Fn(&str) + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(WorkerShared::default());
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn({
                let shared = shared.clone();
                let name = name.clone();
                move || run(&name, &shared, job, on_panic)
            })
            .map_err(|source| RoutingError::WorkerSpawn {
                name: name.clone(),
                source,
            })?;
        let thread_id = handle.thread().id();
        Ok(Self {
            name,
            shared,
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask for one more run. Returns false once the worker has shut down.
    pub fn request(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }
        if !state.dirty {
            state.dirty = true;
            self.shared.wake.notify_one();
        } else {
            trace!(worker = %self.name, "request coalesced");
        }
        true
    }

    /// Runs finished so far.
    pub fn completed(&self) -> u64 {
        self.shared.state.lock().completed
    }

    pub fn is_busy(&self) -> bool {
        let state = self.shared.state.lock();
        state.dirty || state.running
    }

    /// Block until nothing is pending or running. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while (state.dirty || state.running) && !state.shutdown {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return !(state.dirty || state.running);
            }
        }
        true
    }

    /// Stop accepting requests and join the thread once any run in progress ends.
    ///
    /// Called from the worker thread itself the join is skipped.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.dirty = false;
            self.shared.wake.notify_all();
            self.shared.idle.notify_all();
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if thread::current().id() == self.thread_id {
                return;
            }
            if handle.join().is_err() {
                debug!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

fn run<F: Fn(), P: Fn(&str)>(name: &str, shared: &WorkerShared, job: F, on_panic: P) {
    loop {
        {
            let mut state = shared.state.lock();
            while !state.dirty && !state.shutdown {
                shared.wake.wait(&mut state);
            }
            if state.shutdown {
                break;
            }
            state.dirty = false;
            state.running = true;
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&job)) {
            let message = panic_message(payload.as_ref());
            error!(worker = %name, panic = %message, "worker job panicked");
            on_panic(&message);
        }

        let mut state = shared.state.lock();
        state.running = false;
        state.completed += 1;
        if !state.dirty {
            shared.idle.notify_all();
        }
    }
    debug!(worker = %name, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl Drop for CoalescingWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for CoalescingWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("CoalescingWorker")
            .field("name", &self.name)
            .field("dirty", &state.dirty)
            .field("running", &state.running)
            .field("completed", &state.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn triggers_during_a_run_collapse_into_one_more() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));

        let worker = CoalescingWorker::spawn(
            "coalesce-test",
            {
                let runs = runs.clone();
                let gate = gate.clone();
                let started_tx = Mutex::new(started_tx);
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let _ = started_tx.lock().send(());
                    let (open, signal) = &*gate;
                    let mut open = open.lock();
                    while !*open {
                        signal.wait(&mut open);
                    }
                }
            },
            |_| {},
        )
        .unwrap();

        assert!(worker.request());
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..100 {
            worker.request();
        }
        {
            let (open, signal) = &*gate;
            *open.lock() = true;
            signal.notify_all();
        }
        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(worker.completed(), 2);
    }

    #[test]
    fn shutdown_rejects_further_requests() {
        let worker = CoalescingWorker::spawn("shutdown-test", || {}, |_| {}).unwrap();
        assert!(worker.request());
        assert!(worker.wait_idle(Duration::from_secs(5)));
        worker.shutdown();
        assert!(!worker.request());
        assert!(!worker.is_busy());
    }

    #[test]
    fn panicking_run_leaves_the_worker_usable() {
        let runs = Arc::new(AtomicUsize::new(0));
        let panics = Arc::new(Mutex::new(Vec::new()));
        let worker = CoalescingWorker::spawn(
            "panic-test",
            {
                let runs = runs.clone();
                move || {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first run fails");
                    }
                }
            },
            {
                let panics = panics.clone();
                move |message: &str| panics.lock().push(message.to_owned())
            },
        )
        .unwrap();

        assert!(worker.request());
        assert!(worker.wait_idle(Duration::from_secs(5)));
        assert_eq!(*panics.lock(), ["first run fails"]);

        assert!(worker.request());
        assert!(worker.wait_idle(Duration::from_millis(500)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(worker.completed(), 2);
        assert!(!worker.is_busy());
    }
}
