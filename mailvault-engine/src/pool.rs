//! Bounded worker pools over plain OS threads.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Running → {Completed | Interrupted} → ShutDown
//! ```
//!
//! A pool registers itself with the [`InterruptHub`] on construction and
//! unregisters on shutdown; `Drop` shuts down, so a pool held for the length
//! of a stage cleans up even on an early-error path. Shutdown joins the
//! workers: jobs already started run to completion, jobs still queued
//! complete as [`TaskOutcome::Cancelled`].
//!
//! # Cancellation contract
//!
//! `submit` refuses new work once the pool or the hub is interrupted.
//! `map` stops submitting and stops collecting when interrupted, and returns
//! whatever completed — silently. The caller decides what a short result
//! list means by checking [`WorkerPool::is_interrupted`] afterward.

use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::interrupt::{InterruptHub, PoolSignal};

/// Default progress-log cadence for `map`.
pub const DEFAULT_PROGRESS_EVERY: usize = 25;

type Job = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one submitted task. Failures inside the task are captured
/// here, never propagated to the submitter.
#[derive(Debug)]
pub enum TaskOutcome<R, E> {
    Done(R),
    Failed(E),
    /// The task was still queued when the pool was interrupted or drained.
    Cancelled,
}

/// One result per submitted unit of work, carrying the original item back
/// to the caller. Never silently dropped: `map` yields exactly one per
/// collected task, and `TaskHandle::wait` yields the one for its task.
#[derive(Debug)]
pub struct TaskResult<T, R, E> {
    pub item: T,
    pub outcome: TaskOutcome<R, E>,
}

impl<R, E> TaskOutcome<R, E> {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskOutcome::Done(_))
    }
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }
}

/// Waitable handle for a single `submit`.
#[derive(Debug)]
pub struct TaskHandle<T, R, E> {
    rx: mpsc::Receiver<TaskResult<T, R, E>>,
}

impl<T, R, E> TaskHandle<T, R, E> {
    /// Block until the task's result is available. `None` only if the pool's
    /// workers disappeared without running the job (shutdown mid-flight).
    pub fn wait(self) -> Option<TaskResult<T, R, E>> {
        self.rx.recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Pool phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolPhase {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Interrupted = 3,
    ShutDown = 4,
}

impl PoolPhase {
    pub(crate) fn from_u8(v: u8) -> PoolPhase {
        match v {
            1 => PoolPhase::Running,
            2 => PoolPhase::Completed,
            3 => PoolPhase::Interrupted,
            4 => PoolPhase::ShutDown,
            _ => PoolPhase::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed-size pool of OS worker threads fed from one job queue.
pub struct WorkerPool {
    signal: Arc<PoolSignal>,
    hub: Arc<InterruptHub>,
    hub_id: u64,
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    max_workers: usize,
    progress_every: usize,
}

impl WorkerPool {
    /// Spawn `max_workers` threads (at least one) and register with the hub.
    pub fn new(
        hub: Arc<InterruptHub>,
        max_workers: usize,
        name: &str,
    ) -> Result<WorkerPool, PoolError> {
        let max_workers = max_workers.max(1);
        let signal = Arc::new(PoolSignal::new(name.to_owned()));
        let hub_id = hub.register(Arc::clone(&signal));

        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(max_workers);
        for i in 0..max_workers {
            let rx = Arc::clone(&rx);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(rx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Unwind the half-built pool before reporting.
                    drop(tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    hub.unregister(hub_id);
                    return Err(PoolError::Spawn { pool: name.to_owned(), source: e });
                }
            }
        }
        debug!("pool '{name}' started with {max_workers} workers");
        Ok(WorkerPool {
            signal,
            hub,
            hub_id,
            tx: Some(tx),
            workers,
            max_workers,
            progress_every: DEFAULT_PROGRESS_EVERY,
        })
    }

    /// Override the `map` progress-log cadence (0 is treated as 1).
    pub fn with_progress_every(mut self, every: usize) -> WorkerPool {
        self.progress_every = every.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.signal.name
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn phase(&self) -> PoolPhase {
        self.signal.phase()
    }

    /// Pool-local flag OR the hub's global flag.
    pub fn is_interrupted(&self) -> bool {
        self.signal.is_interrupted() || self.hub.is_interrupted()
    }

    /// Stop admitting work and cancel queued jobs; in-flight tasks finish.
    pub fn interrupt(&self) {
        self.signal.interrupt();
    }

    /// Schedule one task. Fails fast when interrupted or shut down; failures
    /// inside `task` come back through the handle, not from here.
    pub fn submit<T, R, E, F>(&self, task: F, item: T) -> Result<TaskHandle<T, R, E>, PoolError>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: FnOnce(&T) -> Result<R, E> + Send + 'static,
    {
        if self.is_interrupted() {
            return Err(PoolError::Interrupted { pool: self.name().to_owned() });
        }
        let (tx, rx) = mpsc::channel();
        self.enqueue(task, item, tx)?;
        Ok(TaskHandle { rx })
    }

    /// Fan `items` out and collect results in completion order.
    ///
    /// Interrupted mid-submission: remaining items are never scheduled.
    /// Interrupted mid-collection: returns the results gathered so far.
    /// Either way the return is silent — check `is_interrupted()` after.
    pub fn map<T, R, E, F>(&self, task: F, items: Vec<T>) -> Vec<TaskResult<T, R, E>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(&T) -> Result<R, E> + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }
        self.signal.set_phase_unless_shut_down(PoolPhase::Running);
        info!("pool '{}': dispatching {} task(s) across {} workers", self.name(), total, self.max_workers);

        let task = Arc::new(task);
        let (tx, rx) = mpsc::channel();
        let mut submitted = 0usize;
        for item in items {
            if self.is_interrupted() {
                warn!(
                    "pool '{}': interrupted after submitting {submitted}/{total} task(s)",
                    self.name()
                );
                break;
            }
            let task = Arc::clone(&task);
            if self.enqueue(move |it: &T| (*task)(it), item, tx.clone()).is_err() {
                warn!("pool '{}': submission stopped, pool is shut down", self.name());
                break;
            }
            submitted += 1;
        }
        drop(tx);

        let mut results = Vec::with_capacity(submitted);
        while results.len() < submitted {
            if self.is_interrupted() {
                warn!(
                    "pool '{}': interrupted with {}/{submitted} result(s) collected",
                    self.name(),
                    results.len()
                );
                break;
            }
            match rx.recv() {
                Ok(result) => {
                    results.push(result);
                    let done = results.len();
                    if done % self.progress_every == 0 || done == submitted {
                        info!("pool '{}': progress {done}/{submitted}", self.name());
                    }
                }
                Err(_) => break,
            }
        }

        let next = if self.is_interrupted() { PoolPhase::Interrupted } else { PoolPhase::Completed };
        self.signal.set_phase_unless_shut_down(next);
        results
    }

    /// Close the queue, join the workers, unregister. Idempotent; called by
    /// `Drop`. Queued-but-unstarted jobs complete as `Cancelled`.
    pub fn shutdown(&mut self) {
        if self.tx.is_none() {
            return;
        }
        self.signal.set_closing();
        self.tx = None; // closes the channel; workers drain and exit
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.signal.set_shut_down();
        self.hub.unregister(self.hub_id);
        debug!("pool '{}' shut down", self.name());
    }

    fn enqueue<T, R, E, F>(
        &self,
        task: F,
        item: T,
        out: mpsc::Sender<TaskResult<T, R, E>>,
    ) -> Result<(), PoolError>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: FnOnce(&T) -> Result<R, E> + Send + 'static,
    {
        let signal = Arc::clone(&self.signal);
        let hub = Arc::clone(&self.hub);
        let job: Job = Box::new(move || {
            let outcome =
                if signal.is_interrupted() || signal.is_closing() || hub.is_interrupted() {
                    TaskOutcome::Cancelled
                } else {
                    match task(&item) {
                        Ok(value) => TaskOutcome::Done(value),
                        Err(e) => TaskOutcome::Failed(e),
                    }
                };
            // The collector may have stopped early; a closed channel is fine.
            let _ = out.send(TaskResult { item, outcome });
        });
        match &self.tx {
            Some(tx) => tx
                .send(job)
                .map_err(|_| PoolError::ShutDown { pool: self.name().to_owned() }),
            None => Err(PoolError::ShutDown { pool: self.name().to_owned() }),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = {
            let guard = rx.lock().unwrap_or_else(PoisonError::into_inner);
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break, // channel closed: pool is shutting down
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn hub() -> Arc<InterruptHub> {
        Arc::new(InterruptHub::new())
    }

    #[test]
    fn submit_runs_task_and_returns_item() {
        let pool = WorkerPool::new(hub(), 2, "t").expect("pool");
        let handle = pool
            .submit(|n: &u32| Ok::<u32, String>(n * 2), 21u32)
            .expect("submit");
        let result = handle.wait().expect("result");
        assert_eq!(result.item, 21);
        assert!(matches!(result.outcome, TaskOutcome::Done(42)));
    }

    #[test]
    fn task_failure_is_captured_not_propagated() {
        let pool = WorkerPool::new(hub(), 1, "t").expect("pool");
        let handle = pool
            .submit(|_: &u32| Err::<u32, String>("boom".into()), 1u32)
            .expect("submit");
        let result = handle.wait().expect("result");
        assert!(matches!(result.outcome, TaskOutcome::Failed(ref e) if e == "boom"));
    }

    #[test]
    fn map_returns_one_result_per_item_in_completion_order() {
        let pool = WorkerPool::new(hub(), 4, "t").expect("pool");
        let results = pool.map(|n: &u64| Ok::<u64, String>(n + 1), (0..50).collect());
        assert_eq!(results.len(), 50);
        assert!(results.iter().all(|r| r.outcome.is_done()));
        let mut items: Vec<u64> = results.iter().map(|r| r.item).collect();
        items.sort_unstable();
        assert_eq!(items, (0..50).collect::<Vec<_>>());
        assert_eq!(pool.phase(), PoolPhase::Completed);
    }

    #[test]
    fn map_on_empty_input_is_a_quiet_noop() {
        let pool = WorkerPool::new(hub(), 2, "t").expect("pool");
        let results = pool.map(|_: &u32| Ok::<u32, String>(0), vec![]);
        assert!(results.is_empty());
        assert_eq!(pool.phase(), PoolPhase::Idle);
    }

    #[test]
    fn submit_fails_fast_once_interrupted() {
        let pool = WorkerPool::new(hub(), 1, "t").expect("pool");
        pool.interrupt();
        let err = pool.submit(|_: &u32| Ok::<u32, String>(0), 1).unwrap_err();
        assert!(matches!(err, PoolError::Interrupted { .. }), "got: {err}");
        assert_eq!(pool.phase(), PoolPhase::Interrupted);
    }

    #[test]
    fn hub_interrupt_blocks_submission_on_every_pool() {
        let hub = hub();
        let a = WorkerPool::new(Arc::clone(&hub), 1, "a").expect("pool");
        let b = WorkerPool::new(Arc::clone(&hub), 1, "b").expect("pool");
        hub.interrupt_all();
        assert!(a.submit(|_: &u32| Ok::<u32, String>(0), 1).is_err());
        assert!(b.submit(|_: &u32| Ok::<u32, String>(0), 1).is_err());
    }

    #[test]
    fn interrupt_mid_map_returns_partial_results_silently() {
        let hub = hub();
        let pool = WorkerPool::new(Arc::clone(&hub), 1, "t").expect("pool");
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_in_task = Arc::clone(&ran);
        let hub_in_task = Arc::clone(&hub);
        let results = pool.map(
            move |n: &u32| {
                ran_in_task.fetch_add(1, Ordering::SeqCst);
                if *n == 2 {
                    // third task pulls the plug; the rest must not run
                    hub_in_task.interrupt_all();
                }
                std::thread::sleep(Duration::from_millis(5));
                Ok::<u32, String>(*n)
            },
            (0..40).collect(),
        );

        assert!(pool.is_interrupted());
        assert_eq!(pool.phase(), PoolPhase::Interrupted);
        assert!(results.len() < 40, "collection must stop early, got {}", results.len());
        // queued-but-unstarted tasks are cancelled, not executed
        assert!(ran.load(Ordering::SeqCst) < 40);
    }

    #[test]
    fn queued_jobs_cancel_on_shutdown() {
        let pool = WorkerPool::new(hub(), 1, "t").expect("pool");
        // first job blocks the single worker so the second stays queued
        let slow = pool
            .submit(
                |_: &u32| {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok::<u32, String>(0)
                },
                0u32,
            )
            .expect("submit slow");
        let queued = pool
            .submit(|_: &u32| Ok::<u32, String>(1), 1u32)
            .expect("submit queued");

        drop(pool); // shutdown: drain with closing flag set
        let slow = slow.wait().expect("slow result");
        assert!(slow.outcome.is_done(), "in-flight task runs to completion");
        let queued = queued.wait().expect("queued result");
        assert!(queued.outcome.is_cancelled(), "queued task must cancel");
    }

    #[test]
    fn shutdown_is_idempotent_and_unregisters() {
        let hub = hub();
        let mut pool = WorkerPool::new(Arc::clone(&hub), 2, "t").expect("pool");
        assert_eq!(hub.active_pools(), 1);
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.phase(), PoolPhase::ShutDown);
        assert_eq!(hub.active_pools(), 0);
    }

    #[test]
    fn drop_unregisters_from_hub() {
        let hub = hub();
        {
            let _pool = WorkerPool::new(Arc::clone(&hub), 2, "scoped").expect("pool");
            assert_eq!(hub.active_pools(), 1);
        }
        assert_eq!(hub.active_pools(), 0);
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let pool = WorkerPool::new(hub(), 0, "t").expect("pool");
        assert_eq!(pool.max_workers(), 1);
        let results = pool.map(|n: &u32| Ok::<u32, String>(*n), vec![1, 2, 3]);
        assert_eq!(results.len(), 3);
    }
}
