//! Bounded-concurrency worker pool.
//!
//! A fixed number of executors pull jobs from one unbounded FIFO queue. Each job
//! is a task body followed by a continuation that receives the body's result,
//! or `None` when the body failed. Failures (errors and panics) in either half
//! are logged and swallowed so one bad item can never stall the batch.
//!
//! The drain barrier counts jobs from submission until their continuation has
//! finished, so tasks submitted by a running continuation keep [`WorkerPool::join`]
//! waiting.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use versebatch_shared::{Result, VersebatchError};

/// Identifier assigned to each submitted job, for log correlation.
pub type JobId = u64;

type Job = BoxFuture<'static, ()>;

struct QueuedJob {
    id: JobId,
    job: Job,
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<QueuedJob>>>;

/// Handle to a worker pool. Cloning is cheap and every clone submits to the
/// same queue, so continuations can hold one to enqueue follow-up work.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

struct Shared {
    tx: mpsc::UnboundedSender<QueuedJob>,
    queue: SharedQueue,
    /// Jobs submitted but not yet fully finished (body + continuation).
    outstanding: Arc<watch::Sender<usize>>,
    next_job: AtomicU64,
    /// Number of executors spawned; zero until `start`.
    workers: AtomicUsize,
}

impl WorkerPool {
    /// Create a pool with an empty queue and no executors yet.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);

        Self {
            shared: Arc::new(Shared {
                tx,
                queue: Arc::new(Mutex::new(rx)),
                outstanding: Arc::new(outstanding),
                next_job: AtomicU64::new(0),
                workers: AtomicUsize::new(0),
            }),
        }
    }

    /// Spawn exactly `worker_count` executors on the current tokio runtime.
    ///
    /// Executors are never torn down explicitly; they exit once every handle
    /// to the pool has been dropped and the queue closes.
    pub fn start(&self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(VersebatchError::config("worker count must be at least 1"));
        }

        self.shared
            .workers
            .compare_exchange(0, worker_count, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|running| {
                VersebatchError::config(format!(
                    "worker pool already started with {running} executors"
                ))
            })?;

        for worker in 0..worker_count {
            let queue = Arc::clone(&self.shared.queue);
            let outstanding = Arc::clone(&self.shared.outstanding);
            tokio::spawn(run_executor(worker, queue, outstanding));
        }

        info!(workers = worker_count, "worker pool started");
        Ok(())
    }

    /// Enqueue a task body and its continuation without blocking.
    ///
    /// The continuation always runs: with `Some(output)` when the body returned
    /// `Ok`, with `None` when it returned `Err` or panicked.
    pub fn submit<T, E, F, C, CF, CE>(&self, task: F, continuation: C) -> JobId
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        C: FnOnce(Option<T>) -> CF + Send + 'static,
        CF: Future<Output = std::result::Result<(), CE>> + Send + 'static,
        CE: Display + Send + 'static,
    {
        let id = self.shared.next_job.fetch_add(1, Ordering::Relaxed);

        let job = async move {
            let output = run_task_body(id, task).await;
            run_continuation(id, async move { continuation(output).await }).await;
        }
        .boxed();

        // Count before enqueueing so a concurrent join can never observe zero
        // while this job is in flight.
        self.shared.outstanding.send_modify(|n| *n += 1);

        if self.shared.tx.send(QueuedJob { id, job }).is_err() {
            self.shared
                .outstanding
                .send_modify(|n| *n = n.saturating_sub(1));
            error!(job = id, "queue closed; job dropped");
        } else {
            debug!(job = id, "job queued");
        }

        id
    }

    /// Wait until the queue is empty and every dequeued job, including jobs
    /// submitted while draining, has finished its continuation.
    pub async fn join(&self) -> Result<()> {
        let mut barrier = self.shared.outstanding.subscribe();

        if self.worker_count() == 0 && *barrier.borrow() > 0 {
            return Err(VersebatchError::config(
                "worker pool joined before it was started",
            ));
        }

        // The sender lives in `self`, so `wait_for` cannot observe a closed channel.
        let _ = barrier.wait_for(|outstanding| *outstanding == 0).await;
        debug!("worker pool drained");
        Ok(())
    }

    /// Jobs submitted and not yet finished.
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Executors spawned by [`WorkerPool::start`] (zero before start).
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::Acquire)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Executor loop
// ---------------------------------------------------------------------------

async fn run_executor(worker: usize, queue: SharedQueue, outstanding: Arc<watch::Sender<usize>>) {
    loop {
        let next = { queue.lock().await.recv().await };

        let Some(QueuedJob { id, job }) = next else {
            debug!(worker, "queue closed, executor exiting");
            return;
        };

        debug!(worker, job = id, "job started");
        job.await;

        // Unconditional: both halves of the job are panic-guarded.
        outstanding.send_modify(|n| *n = n.saturating_sub(1));
        debug!(worker, job = id, "job finished");
    }
}

async fn run_task_body<T, E, F>(id: JobId, task: F) -> Option<T>
where
    E: Display,
    F: Future<Output = std::result::Result<T, E>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            warn!(job = id, error = %e, "task failed; continuing without a result");
            None
        }
        Err(payload) => {
            error!(job = id, panic = %panic_message(payload.as_ref()), "task panicked; continuing without a result");
            None
        }
    }
}

async fn run_continuation<CE, CF>(id: JobId, continuation: CF)
where
    CE: Display,
    CF: Future<Output = std::result::Result<(), CE>>,
{
    match AssertUnwindSafe(continuation).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(job = id, error = %e, "continuation failed"),
        Err(payload) => {
            error!(job = id, panic = %panic_message(payload.as_ref()), "continuation panicked")
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn done(_: Option<u32>) -> futures::future::Ready<std::result::Result<(), VersebatchError>> {
        futures::future::ready(Ok(()))
    }

    #[tokio::test]
    async fn join_waits_for_every_continuation() {
        let pool = WorkerPool::new();
        pool.start(4).unwrap();

        let finished = Arc::new(AtomicUsize::new(0));
        for i in 0..20u64 {
            let finished = Arc::clone(&finished);
            pool.submit(
                async move {
                    tokio::time::sleep(Duration::from_millis(20 - i)).await;
                    Ok::<_, VersebatchError>(i)
                },
                move |result| async move {
                    assert!(result.is_some());
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, VersebatchError>(())
                },
            );
        }

        pool.join().await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 20);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn failed_task_yields_none_and_does_not_block_others() {
        let pool = WorkerPool::new();
        pool.start(2).unwrap();

        let results = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5u32 {
            let results = Arc::clone(&results);
            pool.submit(
                async move {
                    if i == 2 {
                        Err(VersebatchError::Task(format!("item {i} failed")))
                    } else {
                        Ok(i)
                    }
                },
                move |result| async move {
                    results.lock().unwrap().push((i, result));
                    Ok::<_, VersebatchError>(())
                },
            );
        }

        pool.join().await.unwrap();
        let mut results = results.lock().unwrap().clone();
        results.sort();
        assert_eq!(
            results,
            vec![(0, Some(0)), (1, Some(1)), (2, None), (3, Some(3)), (4, Some(4))]
        );
    }

    #[tokio::test]
    async fn panics_never_crash_the_executor() {
        let pool = WorkerPool::new();
        // A single executor: if it died, the later task would never run.
        pool.start(1).unwrap();

        let got_none = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&got_none);
        pool.submit(
            async {
                if true {
                    panic!("task body exploded");
                }
                Ok::<u32, VersebatchError>(0)
            },
            move |result| async move {
                flag.store(result.is_none(), Ordering::SeqCst);
                Ok::<_, VersebatchError>(())
            },
        );
        pool.submit(async { Ok::<u32, VersebatchError>(1) }, |_| async {
            if true {
                panic!("continuation exploded");
            }
            Ok::<(), VersebatchError>(())
        });
        pool.submit(async { Ok::<u32, VersebatchError>(2) }, |_| async {
            Err::<(), _>(VersebatchError::Task("continuation failed".into()))
        });

        let ran_after = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_after);
        pool.submit(async { Ok::<u32, VersebatchError>(3) }, move |result| async move {
            flag.store(result == Some(3), Ordering::SeqCst);
            Ok::<_, VersebatchError>(())
        });

        pool.join().await.unwrap();
        assert!(got_none.load(Ordering::SeqCst));
        assert!(ran_after.load(Ordering::SeqCst));
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn tasks_submitted_from_continuations_are_awaited() {
        let pool = WorkerPool::new();
        pool.start(2).unwrap();

        let second_stage = Arc::new(AtomicBool::new(false));
        let inner_pool = pool.clone();
        let flag = Arc::clone(&second_stage);
        pool.submit(async { Ok::<u32, VersebatchError>(1) }, move |_| async move {
            inner_pool.submit(
                async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok::<u32, VersebatchError>(2)
                },
                move |result| async move {
                    flag.store(result == Some(2), Ordering::SeqCst);
                    Ok::<_, VersebatchError>(())
                },
            );
            Ok::<_, VersebatchError>(())
        });

        pool.join().await.unwrap();
        assert!(second_stage.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        let pool = WorkerPool::new();
        pool.start(3).unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<u32, VersebatchError>(0)
                },
                done,
            );
        }

        pool.join().await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn join_on_idle_pool_returns_immediately() {
        let pool = WorkerPool::new();
        pool.start(1).unwrap();
        pool.join().await.unwrap();
    }

    #[tokio::test]
    async fn start_rejects_zero_and_double_start() {
        let pool = WorkerPool::new();
        assert!(pool.start(0).is_err());
        pool.start(2).unwrap();
        let err = pool.start(2).unwrap_err();
        assert!(err.to_string().contains("already started"));
        assert_eq!(pool.worker_count(), 2);
    }

    #[tokio::test]
    async fn join_before_start_is_an_error() {
        let pool = WorkerPool::new();
        pool.submit(async { Ok::<u32, VersebatchError>(0) }, done);
        assert!(pool.join().await.is_err());

        // Starting afterwards drains what was queued.
        pool.start(1).unwrap();
        pool.join().await.unwrap();
        assert_eq!(pool.outstanding(), 0);
    }
}
