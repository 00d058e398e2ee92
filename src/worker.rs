//! Cooperative cancellation and background thread handles.
//!
//! Every background worker (transport reader, detector, datagram reassembler)
//! runs on its own thread and polls a `StopSignal` at each bounded suspension
//! point. Shutdown latency is therefore bounded by the longest timeout a
//! worker blocks on, not instantaneous.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Shared stop flag. Cloning yields another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Handle to a running background thread.
///
/// `stop()` only raises the flag; `join()` waits for the thread to observe it.
/// Callers must join before releasing sockets or queues the worker uses.
#[derive(Debug)]
pub struct Worker {
    name: String,
    stop: StopSignal,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a named thread. The body receives its own stop handle.
    pub fn spawn<F>(name: impl Into<String>, stop: StopSignal, body: F) -> Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        let thread_stop = stop.clone();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(thread_stop))
            .with_context(|| format!("spawn {} thread", name))?;
        Ok(Self {
            name,
            stop,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Wait for the thread to exit.
    pub fn join(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} thread panicked", self.name))?;
        }
        Ok(())
    }

    /// Raise the stop flag and wait for the thread to exit.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.stop.stop();
            if join.join().is_err() {
                log::error!("{} thread panicked during drop", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn worker_exits_after_stop() {
        let worker = Worker::spawn("spin", StopSignal::new(), |stop| {
            while !stop.is_stopped() {
                std::thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();
        assert!(!worker.is_finished());
        worker.shutdown().unwrap();
    }

    #[test]
    fn stop_signal_is_shared_between_clones() {
        let a = StopSignal::new();
        let b = a.clone();
        assert!(!b.is_stopped());
        a.stop();
        assert!(b.is_stopped());
    }

    #[test]
    fn join_reports_panics() {
        let worker = Worker::spawn("boom", StopSignal::new(), |_| panic!("boom")).unwrap();
        assert!(worker.join().is_err());
    }
}
