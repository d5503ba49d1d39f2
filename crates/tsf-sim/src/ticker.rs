//! ---
//! tsf_section: "11-simulation"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Demonstration adapters and the type-name factory."
//! tsf_version: "v0.1.0"
//! tsf_owner: "tbd"
//! ---
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Background thread running a closure at a fixed interval until stopped.
pub(crate) struct Ticker {
    name: String,
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub(crate) fn spawn<F>(name: String, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let handle = thread::Builder::new().name(name.clone()).spawn({
            let stop = stop.clone();
            move || loop {
                {
                    let (stopped, signal) = &*stop;
                    let mut stopped = stopped.lock();
                    if !*stopped {
                        signal.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        break;
                    }
                }
                tick();
            }
        })?;
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for the current tick to finish.
    pub(crate) fn stop(mut self) {
        {
            let (stopped, signal) = &*self.stop;
            *stopped.lock() = true;
            signal.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                debug!(thread = %self.name, "ticker thread panicked");
            }
        }
    }
}
