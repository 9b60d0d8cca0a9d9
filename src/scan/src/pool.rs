//! Fixed-size worker pool with an unbounded queue
//!
//! Producers never block: `submit` buffers the task in memory and returns.
//! Memory is the only bound on queued work.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Task = BoxFuture<'static, ()>;

struct Counters {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl Counters {
    fn finish(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Runs submitted futures on a fixed number of tokio tasks
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Task>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters {
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let workers = (0..size)
            .map(|worker| {
                let receiver = receiver.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    loop {
                        let task = receiver.lock().await.recv().await;
                        let Some(task) = task else {
                            debug!("worker {} stopping", worker);
                            break;
                        };
                        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                            error!("worker {}: task panicked", worker);
                        }
                        counters.finish();
                    }
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            counters,
            workers: Mutex::new(workers),
            size,
        }
    }

    /// Queue `task`; returns `false` once the pool is closed
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        self.counters.outstanding.fetch_add(1, Ordering::AcqRel);
        if sender.send(task.boxed()).is_err() {
            self.counters.finish();
            return false;
        }
        true
    }

    /// Resolves once no task is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.counters.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Tasks queued or running
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop accepting tasks; queued tasks still run
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_every_task() {
        let pool = WorkerPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let done = done.clone();
            assert!(pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 100);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_tasks_may_submit_more_tasks() {
        let pool = Arc::new(WorkerPool::new(2));
        let done = Arc::new(AtomicUsize::new(0));

        fn spawn_chain(pool: Arc<WorkerPool>, done: Arc<AtomicUsize>, left: usize) {
            let next = pool.clone();
            pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
                if left > 0 {
                    spawn_chain(next, done, left - 1);
                }
            });
        }

        spawn_chain(pool.clone(), done.clone(), 49);
        pool.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_pool() {
        let pool = WorkerPool::new(1);
        tokio::time::timeout(Duration::from_secs(1), pool.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_wedge_pool() {
        let pool = WorkerPool::new(1);
        pool.submit(async { panic!("boom") });
        let done = Arc::new(AtomicUsize::new(0));
        let sink = done.clone();
        pool.submit(async move {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        pool.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_tasks() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(!pool.submit(async {}));
        pool.wait_idle().await;
    }
}
