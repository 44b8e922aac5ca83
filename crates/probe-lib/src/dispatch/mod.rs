//! Bounded-concurrency task execution
//!
//! A fixed set of workers lives for the whole process. Each discovery cycle
//! opens a batch, hands its tasks to free workers through the batch's
//! [`Dispatcher`], blocking while every worker is busy, and then waits on the
//! batch's [`Collector`] until the expected number of result lists has
//! arrived.

mod pool;

#[cfg(test)]
mod tests;

pub use pool::{Collector, Dispatcher, WorkerPool};

pub use async_trait::async_trait;

/// A unit of work producing a list of results
///
/// Implementations absorb their own failures: a task that cannot do its
/// job returns an empty or partial list instead of an error.
#[async_trait]
pub trait Task<T>: Send + Sync {
    /// Execute the task
    async fn run(&self) -> Vec<T>;

    /// Short description used in logs
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Owned, type-erased task handed to a worker
pub type BoxedTask<T> = Box<dyn Task<T>>;
