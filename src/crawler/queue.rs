//! Bounded work queue
//!
//! A fixed number of permits gates how many tasks run at once. `submit`
//! waits for a free permit before spawning, so a caller looping over a large
//! batch never has more than `concurrency` tasks alive.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outputs of every task submitted to a queue
#[derive(Debug)]
pub struct Drained<T> {
    pub results: Vec<T>,

    /// Tasks that panicked instead of returning
    pub panicked: usize,
}

/// Runs submitted tasks with at most `concurrency` in flight
pub struct WorkQueue<T> {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Creates a queue. A concurrency of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            tasks: JoinSet::new(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Tasks currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.semaphore.available_permits()
    }

    /// Tasks spawned and not yet collected by `drain`
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for a free slot, then spawns `task`
    ///
    /// The permit is held until the task's future completes, including when
    /// it panics. Returns false if the queue can no longer accept work.
    pub async fn submit<F, Fut>(&mut self, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let permit = match self.semaphore.clone().acquire_owned().await.ok() {
            Some(permit) => permit,
            None => return false,
        };

        self.tasks.spawn(async move {
            let _permit = permit;
            task().await
        });
        true
    }

    /// Waits until every submitted task has completed
    ///
    /// Task outputs come back in completion order. A panicking task is
    /// logged and counted; it never takes the other tasks down with it.
    pub async fn drain(&mut self) -> Drained<T> {
        let mut results = Vec::with_capacity(self.tasks.len());
        let mut panicked = 0;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("Worker task failed: {}", e);
                    panicked += 1;
                }
            }
        }

        Drained { results, panicked }
    }
}
