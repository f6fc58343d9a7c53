//! The interrupt hub: one process-wide cancellation flag plus a registry of
//! live pools, so a single signal fans out to every stage that happens to be
//! running.
//!
//! The hub is an explicit object — constructed once in `main`, handed to
//! every [`WorkerPool`](crate::pool::WorkerPool) by `Arc`. Tests build a
//! fresh hub instead of resetting shared state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::pool::PoolPhase;

/// Process-wide interrupt state shared by all pools.
#[derive(Default)]
pub struct InterruptHub {
    flag: AtomicBool,
    pools: Mutex<HashMap<u64, Arc<PoolSignal>>>,
    next_id: AtomicU64,
}

impl InterruptHub {
    pub fn new() -> InterruptHub {
        InterruptHub::default()
    }

    /// Set the global flag and interrupt every registered pool. Safe to call
    /// from a signal handler thread; idempotent.
    pub fn interrupt_all(&self) {
        let already = self.flag.swap(true, Ordering::SeqCst);
        let pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if !already {
            warn!("interrupt requested; stopping {} active pool(s)", pools.len());
        }
        for signal in pools.values() {
            signal.interrupt();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Number of currently registered pools.
    pub fn active_pools(&self) -> usize {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Clear the flag and forget any registered pools, for a fresh run.
    /// Prefer constructing a new hub; this exists for long-lived callers.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.pools.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn register(&self, signal: Arc<PoolSignal>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pools.lock().unwrap_or_else(PoisonError::into_inner).insert(id, signal);
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }
}

// ---------------------------------------------------------------------------
// Per-pool signal
// ---------------------------------------------------------------------------

/// Cancellation and lifecycle state for one pool, shared between the pool
/// handle, its queued jobs, and the hub registry.
pub(crate) struct PoolSignal {
    pub(crate) name: String,
    interrupted: AtomicBool,
    closing: AtomicBool,
    phase: AtomicU8,
}

impl PoolSignal {
    pub(crate) fn new(name: String) -> PoolSignal {
        PoolSignal {
            name,
            interrupted: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            phase: AtomicU8::new(PoolPhase::Idle as u8),
        }
    }

    pub(crate) fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            warn!("pool '{}' interrupted", self.name);
        }
        self.set_phase_unless_shut_down(PoolPhase::Interrupted);
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Mark the pool as draining: queued jobs complete as `Cancelled`.
    pub(crate) fn set_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn phase(&self) -> PoolPhase {
        PoolPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// `ShutDown` is terminal; every other transition goes through here.
    pub(crate) fn set_phase_unless_shut_down(&self, next: PoolPhase) {
        let _ = self.phase.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
            if cur == PoolPhase::ShutDown as u8 {
                None
            } else {
                Some(next as u8)
            }
        });
    }

    pub(crate) fn set_shut_down(&self) {
        self.phase.store(PoolPhase::ShutDown as u8, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
