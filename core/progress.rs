//! Best-effort progress notifications.
//!
//! Producers call [`ProgressReporter::emit`], which never blocks: snapshots go
//! through a bounded channel to a dispatcher thread that runs the subscriber
//! callbacks. When the channel is full the snapshot is dropped.

use log;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Flatten,
    Bundle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub processed: usize,
    pub current_path: String,
}

type Callback = Box<dyn Fn(&ProgressSnapshot) + Send + 'static>;

pub struct ProgressReporter {
    subscribers: Arc<Mutex<Vec<Callback>>>,
    has_subscribers: AtomicBool,
    sender: Mutex<Option<SyncSender<ProgressSnapshot>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
    dropped: AtomicUsize,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            has_subscribers: AtomicBool::new(false),
            sender: Mutex::new(None),
            dispatcher: Mutex::new(None),
            capacity: capacity.max(1),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Registers a callback. Callbacks run on the dispatcher thread, in
    /// subscription order, never on the producing thread.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ProgressSnapshot) + Send + 'static,
    {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Box::new(callback));
        }
        self.ensure_dispatcher();
        self.has_subscribers.store(true, Ordering::Release);
    }

    pub fn emit(&self, snapshot: ProgressSnapshot) {
        if !self.has_subscribers.load(Ordering::Acquire) {
            return;
        }
        let Ok(guard) = self.sender.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if let Some(tx) = guard.as_ref() {
            match tx.try_send(snapshot) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::trace!("Progress dispatcher gone, snapshot discarded.");
                }
            }
        }
    }

    /// Snapshots discarded because the dispatcher was behind.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting snapshots and waits until queued ones are delivered.
    pub fn shutdown(&self) {
        self.has_subscribers.store(false, Ordering::Release);
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handle = self.dispatcher.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("Progress subscriber panicked.");
            }
        }
    }

    fn ensure_dispatcher(&self) {
        let Ok(mut sender) = self.sender.lock() else {
            return;
        };
        if sender.is_some() {
            return;
        }
        let (tx, rx) = mpsc::sync_channel::<ProgressSnapshot>(self.capacity);
        let subscribers = Arc::clone(&self.subscribers);
        let handle = thread::spawn(move || {
            for snapshot in rx {
                if let Ok(subs) = subscribers.lock() {
                    for callback in subs.iter() {
                        callback(&snapshot);
                    }
                }
            }
        });
        *sender = Some(tx);
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            *dispatcher = Some(handle);
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decides when a producer should emit: every `every` items or every `interval`,
/// whichever comes first.
#[derive(Debug)]
pub struct ProgressThrottle {
    every: usize,
    interval: Duration,
    since_last: usize,
    last: Instant,
}

impl ProgressThrottle {
    pub fn new(every: usize, interval: Duration) -> Self {
        Self {
            every: every.max(1),
            interval,
            since_last: 0,
            last: Instant::now(),
        }
    }

    pub fn tick(&mut self) -> bool {
        self.since_last += 1;
        if self.since_last >= self.every || self.last.elapsed() >= self.interval {
            self.since_last = 0;
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn snapshot(n: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: Phase::Flatten,
            processed: n,
            current_path: format!("file_{n}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let reporter = ProgressReporter::new();
        for n in 0..1000 {
            reporter.emit(snapshot(n));
        }
        assert_eq!(reporter.dropped(), 0);
    }

    #[test]
    fn subscribers_receive_snapshots_in_order() {
        let reporter = ProgressReporter::new();
        let (tx, rx) = channel();
        reporter.subscribe(move |s| {
            let _ = tx.send(s.processed);
        });
        for n in 0..10 {
            reporter.emit(snapshot(n));
        }
        reporter.shutdown();
        let seen: Vec<usize> = rx.try_iter().collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn slow_subscriber_never_blocks_emit() {
        let reporter = ProgressReporter::with_capacity(2);
        reporter.subscribe(|_| thread::sleep(Duration::from_millis(50)));
        let start = Instant::now();
        for n in 0..200 {
            reporter.emit(snapshot(n));
        }
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(reporter.dropped() > 0);
    }

    #[test]
    fn throttle_fires_every_n_items() {
        let mut throttle = ProgressThrottle::new(3, Duration::from_secs(3600));
        let fired: Vec<bool> = (0..6).map(|_| throttle.tick()).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn throttle_fires_on_interval() {
        let mut throttle = ProgressThrottle::new(1000, Duration::ZERO);
        assert!(throttle.tick());
    }
}
