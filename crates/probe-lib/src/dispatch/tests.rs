//! Tests for the worker pool
//!
//! These tests verify:
//! - Every dispatched task contributes exactly once to the collected output
//! - No more than the configured number of tasks run at once
//! - A panicking task does not take its worker down
//! - Dispatch waits while every worker is busy
//! - Results of an abandoned batch never reach a later one

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_pending, task};

/// Task producing `count` copies of its id
struct RepeatTask {
    id: usize,
    count: usize,
}

#[async_trait]
impl Task<usize> for RepeatTask {
    async fn run(&self) -> Vec<usize> {
        tokio::task::yield_now().await;
        vec![self.id; self.count]
    }
}

/// Task that records how many tasks are running alongside it
struct ProbeConcurrencyTask {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Task<usize> for ProbeConcurrencyTask {
    async fn run(&self) -> Vec<usize> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        vec![now]
    }
}

/// Task that holds its worker until released
struct GateTask {
    gate: Arc<Notify>,
}

#[async_trait]
impl Task<usize> for GateTask {
    async fn run(&self) -> Vec<usize> {
        self.gate.notified().await;
        vec![1]
    }
}

struct PanickingTask;

#[async_trait]
impl Task<usize> for PanickingTask {
    async fn run(&self) -> Vec<usize> {
        panic!("task failure");
    }
}

fn repeat_tasks(sizes: &[usize]) -> Vec<BoxedTask<usize>> {
    sizes
        .iter()
        .enumerate()
        .map(|(id, &count)| Box::new(RepeatTask { id, count }) as BoxedTask<usize>)
        .collect()
}

#[tokio::test]
async fn test_collect_zero_returns_immediately() {
    let pool: WorkerPool<usize> = WorkerPool::new(2);
    let (_dispatcher, mut collector) = pool.batch();
    let merged = collector.collect(0).await.unwrap();
    assert!(merged.is_empty());
}

#[tokio::test]
async fn test_run_all_conserves_outputs() {
    let pool = WorkerPool::new(3);
    let sizes = [2, 0, 5, 1, 0, 3, 4, 0, 1, 2];

    let mut merged = pool.run_all(repeat_tasks(&sizes)).await.unwrap();
    merged.sort_unstable();

    let mut expected: Vec<usize> = sizes
        .iter()
        .enumerate()
        .flat_map(|(id, &count)| std::iter::repeat(id).take(count))
        .collect();
    expected.sort_unstable();

    assert_eq!(merged, expected);
}

#[tokio::test]
async fn test_pool_is_reused_across_batches() {
    let pool = WorkerPool::new(2);

    for _ in 0..3 {
        let merged = pool.run_all(repeat_tasks(&[1, 1, 1, 1, 1])).await.unwrap();
        assert_eq!(merged.len(), 5);
    }
}

#[tokio::test]
async fn test_single_worker_handles_many_tasks() {
    let pool = WorkerPool::new(1);
    let merged = pool.run_all(repeat_tasks(&[1; 20])).await.unwrap();
    assert_eq!(merged.len(), 20);
}

#[tokio::test]
async fn test_concurrency_bounded_by_pool_size() {
    let pool = WorkerPool::new(3);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<BoxedTask<usize>> = (0..12)
        .map(|_| {
            Box::new(ProbeConcurrencyTask {
                in_flight: Arc::clone(&in_flight),
                peak: Arc::clone(&peak),
            }) as BoxedTask<usize>
        })
        .collect();

    let merged = pool.run_all(tasks).await.unwrap();

    assert_eq!(merged.len(), 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_panicking_task_yields_empty_result() {
    let pool = WorkerPool::new(1);

    let tasks: Vec<BoxedTask<usize>> = vec![
        Box::new(PanickingTask),
        Box::new(RepeatTask { id: 7, count: 2 }),
    ];

    let merged = pool.run_all(tasks).await.unwrap();
    assert_eq!(merged, vec![7, 7]);
}

#[tokio::test]
async fn test_dispatch_and_collect_separately() {
    let pool = WorkerPool::new(2);
    let (dispatcher, mut collector) = pool.batch();

    for task in repeat_tasks(&[3, 3]) {
        dispatcher.dispatch(task).await.unwrap();
    }

    let merged = collector.collect(2).await.unwrap();
    assert_eq!(merged.len(), 6);
    assert_eq!(pool.size(), 2);
}

#[tokio::test]
async fn test_dispatch_waits_for_free_worker() {
    let pool = WorkerPool::new(1);
    let gate = Arc::new(Notify::new());
    let (dispatcher, mut collector) = pool.batch();

    dispatcher
        .dispatch(Box::new(GateTask {
            gate: Arc::clone(&gate),
        }))
        .await
        .unwrap();

    let mut second = task::spawn(dispatcher.dispatch(Box::new(RepeatTask { id: 2, count: 1 })));
    assert_pending!(second.poll());

    gate.notify_one();
    let merged = collector.collect(1).await.unwrap();
    assert_eq!(merged, vec![1]);

    // The worker re-registers right after publishing its result
    tokio::time::timeout(Duration::from_secs(1), async {
        while second.poll().is_pending() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(collector.collect(1).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn test_abandoned_batch_does_not_leak_results() {
    let pool = WorkerPool::new(1);
    let gate = Arc::new(Notify::new());

    {
        let (dispatcher, _collector) = pool.batch();
        dispatcher
            .dispatch(Box::new(GateTask {
                gate: Arc::clone(&gate),
            }))
            .await
            .unwrap();
    }
    gate.notify_one();

    let merged = pool.run_all(repeat_tasks(&[0, 0, 3])).await.unwrap();
    assert_eq!(merged, vec![2, 2, 2]);
}
