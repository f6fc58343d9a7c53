use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mailvault_engine::{
    InterruptHub, PoolPhase, StatKey, Stats, TaskOutcome, WorkerPool,
};

fn pool(hub: &Arc<InterruptHub>, workers: usize, name: &str) -> WorkerPool {
    WorkerPool::new(Arc::clone(hub), workers, name).expect("pool")
}

#[test]
fn pool_is_reusable_across_consecutive_maps() {
    let hub = Arc::new(InterruptHub::new());
    let pool = pool(&hub, 4, "upload");

    let first = pool.map(|n: &u32| Ok::<u32, String>(n * 10), vec![1, 2, 3]);
    assert_eq!(first.len(), 3);
    assert_eq!(pool.phase(), PoolPhase::Completed);

    let second = pool.map(|n: &u32| Ok::<u32, String>(n + 1), (0..10).collect());
    assert_eq!(second.len(), 10);
    assert!(second.iter().all(|r| r.outcome.is_done()));
}

#[test]
fn workers_count_into_shared_stats() {
    let hub = Arc::new(InterruptHub::new());
    let pool = pool(&hub, 3, "upload");
    let stats = Arc::new(Stats::new());

    let stats_in_task = Arc::clone(&stats);
    let results = pool.map(
        move |n: &u32| {
            if *n % 5 == 0 {
                stats_in_task.increment(StatKey::Skipped);
                return Err(format!("skipping {n}"));
            }
            stats_in_task.increment(StatKey::Published);
            Ok::<u32, String>(*n)
        },
        (0..20).collect(),
    );

    assert_eq!(results.len(), 20);
    assert_eq!(stats.get(StatKey::Published), 16);
    assert_eq!(stats.get(StatKey::Skipped), 4);
    assert_eq!(stats.summary_line(), "16 published, 4 skipped");
}

#[test]
fn mixed_outcomes_keep_their_items() {
    let hub = Arc::new(InterruptHub::new());
    let pool = pool(&hub, 2, "audit");

    let results = pool.map(
        |n: &u32| {
            if *n % 2 == 0 {
                Ok::<u32, String>(*n)
            } else {
                Err(format!("odd: {n}"))
            }
        },
        vec![0, 1, 2, 3],
    );

    for result in &results {
        match &result.outcome {
            TaskOutcome::Done(v) => assert_eq!(*v, result.item),
            TaskOutcome::Failed(msg) => assert_eq!(*msg, format!("odd: {}", result.item)),
            other => panic!("expected done or failed, got {other:?}"),
        }
    }
}

#[test]
fn hub_interrupt_halts_a_running_map() {
    let hub = Arc::new(InterruptHub::new());
    let pool = pool(&hub, 2, "upload");
    let executed = Arc::new(AtomicUsize::new(0));

    let executed_in_task = Arc::clone(&executed);
    let hub_in_task = Arc::clone(&hub);
    let results = pool.map(
        move |n: &usize| {
            let seen = executed_in_task.fetch_add(1, Ordering::SeqCst);
            if seen == 4 {
                hub_in_task.interrupt_all();
            }
            std::thread::sleep(Duration::from_millis(2));
            Ok::<usize, String>(*n)
        },
        (0..200).collect(),
    );

    assert!(pool.is_interrupted());
    assert!(
        results.len() < 200,
        "interrupt should truncate collection, got {} results",
        results.len()
    );
    assert!(
        executed.load(Ordering::SeqCst) < 200,
        "queued tasks should be cancelled, not executed"
    );
}

#[test]
fn fresh_pool_on_an_interrupted_hub_admits_nothing() {
    let hub = Arc::new(InterruptHub::new());
    hub.interrupt_all();

    let pool = pool(&hub, 2, "late");
    assert!(pool.is_interrupted());
    let results = pool.map(|n: &u32| Ok::<u32, String>(*n), vec![1, 2, 3]);
    assert!(results.is_empty(), "no task may run after a global interrupt");
}

#[test]
fn two_pools_drain_independently() {
    let hub = Arc::new(InterruptHub::new());
    let uploads = pool(&hub, 2, "upload");
    let hashes = pool(&hub, 2, "hash");
    assert_eq!(hub.active_pools(), 2);

    uploads.interrupt();
    assert!(uploads.is_interrupted());
    assert!(!hashes.is_interrupted(), "pool-local interrupt must not leak");

    let results = hashes.map(|n: &u32| Ok::<u32, String>(*n), vec![1, 2]);
    assert_eq!(results.len(), 2);

    drop(uploads);
    drop(hashes);
    assert_eq!(hub.active_pools(), 0);
}
