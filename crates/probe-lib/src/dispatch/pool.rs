//! Worker pool, dispatcher and result collector

use super::BoxedTask;
use crate::error::DispatchError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// A task together with the channel of the batch it belongs to
struct Job<T> {
    task: BoxedTask<T>,
    result_tx: mpsc::UnboundedSender<Vec<T>>,
}

/// Handle used to hand a job to one specific worker
struct WorkerSlot<T> {
    id: usize,
    job_tx: mpsc::Sender<Job<T>>,
}

impl<T> Clone for WorkerSlot<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            job_tx: self.job_tx.clone(),
        }
    }
}

/// Hands the tasks of one batch to free workers
pub struct Dispatcher<'p, T> {
    free_rx: &'p Mutex<mpsc::UnboundedReceiver<WorkerSlot<T>>>,
    result_tx: mpsc::UnboundedSender<Vec<T>>,
}

impl<T: Send + 'static> Dispatcher<'_, T> {
    /// Wait for a free worker and give it the task
    ///
    /// Blocks while every worker is busy. Dropping the returned future never
    /// loses a worker: the hand-off happens without an await point.
    pub async fn dispatch(&self, task: BoxedTask<T>) -> Result<(), DispatchError> {
        let slot = {
            let mut free = self.free_rx.lock().await;
            free.recv().await.ok_or(DispatchError::PoolClosed)?
        };

        debug!(worker = slot.id, task = %task.describe(), "Dispatching task");
        let job = Job {
            task,
            result_tx: self.result_tx.clone(),
        };

        // A registered worker has an empty queue
        slot.job_tx
            .try_send(job)
            .map_err(|_| DispatchError::PoolClosed)
    }
}

/// Merges the result lists published for one batch
pub struct Collector<T> {
    result_rx: mpsc::UnboundedReceiver<Vec<T>>,
}

impl<T: Send + 'static> Collector<T> {
    /// Wait until exactly `expected` task results have arrived and merge them
    pub async fn collect(&mut self, expected: usize) -> Result<Vec<T>, DispatchError> {
        let mut merged = Vec::new();
        for _ in 0..expected {
            let output = self
                .result_rx
                .recv()
                .await
                .ok_or(DispatchError::PoolClosed)?;
            merged.extend(output);
        }

        Ok(merged)
    }
}

/// Fixed-size pool of workers shared by successive batches
///
/// Every batch gets its own result channel, so an abandoned batch never
/// leaks results into the next one. Workers exit once the pool is dropped.
pub struct WorkerPool<T> {
    size: usize,
    free_rx: Mutex<mpsc::UnboundedReceiver<WorkerSlot<T>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `size` workers on the current tokio runtime
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (free_tx, free_rx) = mpsc::unbounded_channel();

        for id in 0..size {
            let (job_tx, job_rx) = mpsc::channel(1);
            let worker = Worker {
                slot: WorkerSlot { id, job_tx },
                job_rx,
                free_tx: free_tx.clone(),
            };
            tokio::spawn(worker.run());
        }

        debug!(workers = size, "Started worker pool");

        Self {
            size,
            free_rx: Mutex::new(free_rx),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Open a batch: a dispatcher and the collector receiving its results
    pub fn batch(&self) -> (Dispatcher<'_, T>, Collector<T>) {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        (
            Dispatcher {
                free_rx: &self.free_rx,
                result_tx,
            },
            Collector { result_rx },
        )
    }

    /// Dispatch every task and collect all of their results
    pub async fn run_all(&self, tasks: Vec<BoxedTask<T>>) -> Result<Vec<T>, DispatchError> {
        let expected = tasks.len();
        let (dispatcher, mut collector) = self.batch();
        for task in tasks {
            dispatcher.dispatch(task).await?;
        }
        collector.collect(expected).await
    }
}

struct Worker<T> {
    slot: WorkerSlot<T>,
    job_rx: mpsc::Receiver<Job<T>>,
    free_tx: mpsc::UnboundedSender<WorkerSlot<T>>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(mut self) {
        if self.free_tx.send(self.slot.clone()).is_err() {
            return;
        }

        loop {
            // The worker keeps a sender to its own queue, so the queue never
            // closes on its own; a closed free registry means the pool is gone.
            let job = tokio::select! {
                job = self.job_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = self.free_tx.closed() => break,
            };

            let output = run_isolated(self.slot.id, job.task).await;

            if job.result_tx.send(output).is_err() {
                debug!(worker = self.slot.id, "Batch abandoned, discarding result");
            }
            if self.free_tx.send(self.slot.clone()).is_err() {
                break;
            }
        }

        debug!(worker = self.slot.id, "Worker stopped");
    }
}

/// Run a task on its own tokio task so a panic cannot take the worker down
async fn run_isolated<T: Send + 'static>(worker: usize, task: BoxedTask<T>) -> Vec<T> {
    let description = task.describe();
    let handle = tokio::spawn(async move { task.run().await });

    match handle.await {
        Ok(output) => output,
        Err(e) => {
            warn!(worker, task = %description, error = %e, "Task aborted, publishing empty result");
            Vec::new()
        }
    }
}
