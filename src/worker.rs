//! Pipeline workers
//!
//! Every top-level pipeline role (chunk routing, per-stream decoding,
//! frame assembly) runs as a long-running single-threaded worker. Shutdown
//! is cooperative: close the worker's inputs first so blocking waits
//! return, then `finish` to flip the running flag, then `join`.

use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A worker body. `idle` is called repeatedly while the worker runs and is
/// expected to block on its inputs, not spin.
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    /// Runs on the worker thread before the idle loop.
    fn initialize(&mut self) {}

    /// One iteration of the worker's main task.
    fn idle(&mut self);

    /// Runs on the worker thread after the idle loop, while the worker
    /// drains its finalization path.
    fn finalize(&mut self) {}
}

/// Owning handle to a spawned worker thread.
pub struct ServiceHandle {
    name: &'static str,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn spawn<S: Service>(mut service: S) -> Self {
        let name = service.name();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!("{name}: started");
                service.initialize();
                while flag.load(Ordering::Acquire) {
                    service.idle();
                }
                service.finalize();
                info!("{name}: stopped");
            })
            .expect("spawn worker thread");

        Self {
            name,
            running,
            thread: Some(thread),
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the worker to end its idle loop. Non-blocking; the worker may
    /// still be inside a blocking wait until its inputs are closed.
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{}: worker panicked", self.name);
            }
        }
    }

    /// `finish` + `join`.
    pub fn stop(&mut self) {
        self.finish();
        self.join();
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
