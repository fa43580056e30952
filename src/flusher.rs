//! Periodic background flush helper.
//!
//! Each metadata summary owns one flusher. The flusher runs the supplied
//! closure on a fixed interval; failures are logged and swallowed so a bad
//! flush never crashes the process or stops the timer. The next successful
//! flush (or the synchronous append-time metadata write) restores coverage.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

/// A background thread invoking a flush closure on a fixed interval.
pub struct PeriodicFlusher {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicFlusher {
    /// Spawn a flusher calling `flush` every `interval` until stopped.
    pub fn start<F>(name: &str, interval: Duration, flush: F) -> Self
    where
        F: Fn() -> crate::error::LogResult<()> + Send + 'static,
    {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = stop.clone();
        let thread_name = name.to_string();
        let handle = std::thread::spawn(move || {
            let (lock, cvar) = &*thread_stop;
            let mut stopped = match lock.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            loop {
                // Predicate first: a stop signalled before this thread was
                // scheduled must not wait out a whole interval.
                if *stopped {
                    return;
                }
                let (guard, timeout) = match cvar.wait_timeout(stopped, interval) {
                    Ok(r) => r,
                    Err(_) => return,
                };
                stopped = guard;
                if *stopped {
                    return;
                }
                if timeout.timed_out() {
                    if let Err(e) = flush() {
                        warn!(summary = %thread_name, error = %e, "periodic flush failed");
                    }
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the flush thread to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        let (lock, cvar) = &*self.stop;
        if let Ok(mut stopped) = lock.lock() {
            *stopped = true;
        }
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicFlusher {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}
