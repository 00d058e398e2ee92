//! Bounded FIFOs connecting ingestion, detection and control.
//!
//! A `Queue` owns both ends of a `crossbeam_channel` so it never disconnects
//! while any clone is alive. Producers block on a full queue (backpressure)
//! but re-check their `StopSignal` every `POLL_INTERVAL`.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::time::Duration;

use crate::detect::FaceResult;
use crate::frame::DecodedFrame;
use crate::worker::StopSignal;

/// Longest time a blocked push waits before re-checking its stop signal.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type FrameQueue = Queue<DecodedFrame>;
pub type FaceQueue = Queue<FaceResult>;

/// Bounded multi-producer multi-consumer FIFO.
#[derive(Debug)]
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

/// Result of collapsing a queue to its newest element.
#[derive(Debug)]
pub struct Drained<T> {
    pub latest: Option<T>,
    /// Older elements removed without being acted on.
    pub discarded: usize,
}

impl<T> Default for Drained<T> {
    fn default() -> Self {
        Self {
            latest: None,
            discarded: 0,
        }
    }
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Push, blocking while the queue is full.
    ///
    /// Returns `Ok(false)` if `stop` was raised before room became available;
    /// the item is dropped in that case.
    pub fn push(&self, item: T, stop: &StopSignal) -> Result<bool> {
        let mut item = item;
        loop {
            if stop.is_stopped() {
                return Ok(false);
            }
            match self.tx.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => return Ok(true),
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(anyhow!("queue disconnected"));
                }
            }
        }
    }

    /// Non-blocking push. Returns the item back if the queue is full.
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        self.tx.try_send(item).map_err(|err| err.into_inner())
    }

    /// Pop the oldest element, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Empty the queue without blocking, keeping only the newest element.
    pub fn drain_latest(&self) -> Drained<T> {
        let mut drained = Drained::default();
        for item in self.rx.try_iter() {
            if drained.latest.replace(item).is_some() {
                drained.discarded += 1;
            }
        }
        drained
    }

    /// Wait up to `timeout` for at least one element, then drain to the newest.
    pub fn wait_latest(&self, timeout: Duration) -> Drained<T> {
        let Some(first) = self.pop_timeout(timeout) else {
            return Drained::default();
        };
        let mut drained = self.drain_latest();
        match drained.latest {
            Some(_) => drained.discarded += 1,
            None => drained.latest = Some(first),
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn preserves_fifo_order() {
        let queue = Queue::new(4);
        let stop = StopSignal::new();
        for i in 0..4 {
            assert!(queue.push(i, &stop).unwrap());
        }
        let popped: Vec<_> = (0..4)
            .filter_map(|_| queue.pop_timeout(Duration::from_millis(10)))
            .collect();
        assert_eq!(popped, vec![0, 1, 2, 3]);
    }

    #[test]
    fn drain_keeps_most_recent() {
        let queue = Queue::new(8);
        for i in 1..=3 {
            queue.try_push(i).unwrap();
        }
        let drained = queue.drain_latest();
        assert_eq!(drained.latest, Some(3));
        assert_eq!(drained.discarded, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn wait_latest_counts_first_element_as_discarded() {
        let queue = Queue::new(8);
        queue.try_push("a").unwrap();
        queue.try_push("b").unwrap();
        let drained = queue.wait_latest(Duration::from_millis(10));
        assert_eq!(drained.latest, Some("b"));
        assert_eq!(drained.discarded, 1);

        let empty = queue.wait_latest(Duration::from_millis(10));
        assert!(empty.latest.is_none());
        assert_eq!(empty.discarded, 0);
    }

    #[test]
    fn full_queue_push_observes_stop() {
        let queue = Queue::new(1);
        let stop = StopSignal::new();
        assert!(queue.push(1, &stop).unwrap());
        assert!(queue.try_push(2).is_err());

        let stopper = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stopper.stop();
        });
        let started = Instant::now();
        assert!(!queue.push(2, &stop).unwrap());
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
