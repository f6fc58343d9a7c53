//! Mailvault task-execution engine — bounded worker pools with cooperative
//! cancellation, shared across pipeline stages.
//!
//! Design rules:
//! - One [`InterruptHub`] per process, built in `main` and passed by `Arc`.
//!   No global state; tests construct their own hub.
//! - Cancellation is a value, not an unwind: a cancelled task surfaces as
//!   [`TaskOutcome::Cancelled`] and an interrupted `map` returns the results
//!   collected so far. Callers inspect interrupt state afterward.
//! - An in-flight task always runs to completion; only not-yet-started work
//!   is cancelled.
//!
//! Public API surface:
//! - [`interrupt`] — [`InterruptHub`]
//! - [`pool`] — [`WorkerPool`], [`TaskResult`], [`TaskOutcome`], [`TaskHandle`]
//! - [`stats`] — [`Stats`], [`StatKey`], [`StatusReporter`]
//! - [`error`] — [`PoolError`]

pub mod error;
pub mod interrupt;
pub mod pool;
pub mod stats;

pub use error::PoolError;
pub use interrupt::InterruptHub;
pub use pool::{PoolPhase, TaskHandle, TaskOutcome, TaskResult, WorkerPool};
pub use stats::{StatKey, Stats, StatusReporter};
