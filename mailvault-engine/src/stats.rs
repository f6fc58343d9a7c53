//! Run counters and the periodic status line.
//!
//! `Stats` is a plain shared object: stages increment it from worker
//! threads, the CLI reads a snapshot at the end of a run, and an optional
//! [`StatusReporter`] logs a one-line summary on a timer. The status line is
//! always defined — before any work has happened it reads "no activity".

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// What a stage can count. Keys are fixed so the summary line has a stable
/// order regardless of which stage incremented first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKey {
    Published,
    Archived,
    Verified,
    Repaired,
    Skipped,
    Failed,
}

impl StatKey {
    pub const ALL: [StatKey; 6] = [
        StatKey::Published,
        StatKey::Archived,
        StatKey::Verified,
        StatKey::Repaired,
        StatKey::Skipped,
        StatKey::Failed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StatKey::Published => "published",
            StatKey::Archived => "archived",
            StatKey::Verified => "verified",
            StatKey::Repaired => "repaired",
            StatKey::Skipped => "skipped",
            StatKey::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Thread-safe counters for one run.
#[derive(Default)]
pub struct Stats {
    counters: Mutex<HashMap<StatKey, u64>>,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    pub fn increment(&self, key: StatKey) {
        self.add(key, 1);
    }

    pub fn add(&self, key: StatKey, amount: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(key).or_insert(0) += amount;
    }

    pub fn get(&self, key: StatKey) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(&key).copied().unwrap_or(0)
    }

    /// Copy of all counters, including zero entries, in `StatKey::ALL` order.
    pub fn snapshot(&self) -> Vec<(StatKey, u64)> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        StatKey::ALL
            .iter()
            .map(|key| (*key, counters.get(key).copied().unwrap_or(0)))
            .collect()
    }

    /// One-line summary of the nonzero counters, "no activity" when none.
    pub fn summary_line(&self) -> String {
        let parts: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(key, n)| format!("{} {}", n, key.label()))
            .collect();
        if parts.is_empty() {
            "no activity".to_owned()
        } else {
            parts.join(", ")
        }
    }

    pub fn log_status(&self) {
        info!(target: "status", "{}", self.summary_line());
    }
}

// ---------------------------------------------------------------------------
// StatusReporter
// ---------------------------------------------------------------------------

/// Background thread that logs the status line every `interval` until
/// stopped. Stopping is prompt: the loop waits on a channel, not a sleep.
pub struct StatusReporter {
    stop_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StatusReporter {
    pub fn start(stats: Arc<Stats>, interval: Duration) -> StatusReporter {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let spawned = thread::Builder::new().name("status".into()).spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => stats.log_status(),
                _ => break,
            }
        });
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("status reporter thread failed to start: {e}");
                None
            }
        };
        StatusReporter { stop_tx, handle }
    }

    pub fn stop(mut self) {
        self.stop_now();
    }

    fn stop_now(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.stop_now();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
