//! Bounded worker pool for review tasks.
//!
//! A fixed number of workers pull tasks from a bounded submission queue and
//! run the supplied review function under a per-file deadline. Submission
//! is non-blocking: a full queue surfaces `PoolBusy` instead of unbounded
//! growth. Every accepted submission produces exactly one [`TaskResult`];
//! no ordering is guaranteed between tasks.
//!
//! Lifecycle: `created → running (start) → stopping (stop, once) → stopped`.
//! Closing the queue lets workers drain what is already queued; the cancel
//! signal makes them abort in-flight work and flush queued tasks as
//! `Cancelled` without invoking the reviewer.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{FileDescriptor, Issue, Result, ScanError};

/// Deadline for workers to exit after the queue closes.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by a review function.
pub type ReviewFuture = Pin<Box<dyn Future<Output = Result<Vec<Issue>>> + Send>>;

/// Per-file review function executed by the workers.
pub type ReviewFn = Arc<dyn Fn(Arc<FileDescriptor>) -> ReviewFuture + Send + Sync>;

// =============================================================================
// Tasks and Outcomes
// =============================================================================

/// One unit of work: review one file, deliver one result.
pub struct Task {
    pub id: usize,
    pub file: Arc<FileDescriptor>,
    pub result_tx: mpsc::Sender<TaskResult>,
}

/// How a task ended. The dead-letter decision is an exhaustive match on
/// this enum: everything except `Success` and `Cancelled` is eligible for
/// a pipeline-level retry.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Review completed; the list may be empty.
    Success(Vec<Issue>),
    /// The per-file deadline expired.
    Timeout,
    /// The reviewer failed with a retryable error.
    Transient(ScanError),
    /// The reviewer failed with a non-retryable error.
    Permanent(ScanError),
    /// The run was cancelled before or during this task.
    Cancelled,
}

impl TaskOutcome {
    /// Whether this outcome should be pushed to the dead-letter queue.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Timeout | Self::Transient(_) | Self::Permanent(_) => true,
            Self::Success(_) | Self::Cancelled => false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Result of processing one task. Delivered at most once.
#[derive(Debug)]
pub struct TaskResult {
    pub task_id: usize,
    pub file: Arc<FileDescriptor>,
    pub outcome: TaskOutcome,
    pub duration: Duration,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub capacity: usize,
    pub queued: usize,
    pub active: usize,
    pub total_tasks: u64,
    pub failed_tasks: u64,
    pub retried_tasks: u64,
}

// =============================================================================
// Worker Pool
// =============================================================================

#[derive(Debug)]
struct Shared {
    timeout_per_file: Duration,
    active: AtomicUsize,
    failed_tasks: AtomicU64,
    retried_tasks: AtomicU64,
}

/// Fixed-capacity worker pool with a bounded submission queue.
#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    shared: Arc<Shared>,
    task_tx: Mutex<Option<mpsc::Sender<Task>>>,
    task_rx: Mutex<Option<mpsc::Receiver<Task>>>,
    cancel_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    total_tasks: AtomicU64,
}

impl WorkerPool {
    /// Create a pool. `capacity` must be positive; a zero `queue_size`
    /// defaults to `2 × capacity`.
    pub fn new(capacity: usize, queue_size: usize, timeout_per_file: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(ScanError::InvalidCapacity);
        }
        let queue_size = if queue_size == 0 {
            capacity * 2
        } else {
            queue_size
        };

        let (task_tx, task_rx) = mpsc::channel(queue_size);
        let (cancel_tx, _) = watch::channel(false);

        Ok(Self {
            capacity,
            shared: Arc::new(Shared {
                timeout_per_file,
                active: AtomicUsize::new(0),
                failed_tasks: AtomicU64::new(0),
                retried_tasks: AtomicU64::new(0),
            }),
            task_tx: Mutex::new(Some(task_tx)),
            task_rx: Mutex::new(Some(task_rx)),
            cancel_tx,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            total_tasks: AtomicU64::new(0),
        })
    }

    /// Spawn the workers. May be called once.
    pub fn start(&self, review_fn: ReviewFn) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ScanError::PoolStopped);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::Pipeline("worker pool already started".into()));
        }

        let rx = self
            .lock(&self.task_rx)
            .take()
            .ok_or(ScanError::PoolStopped)?;
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = self.lock(&self.handles);
        for worker_id in 0..self.capacity {
            let shared = Arc::clone(&self.shared);
            let rx = Arc::clone(&rx);
            let cancel = self.cancel_tx.subscribe();
            let review_fn = Arc::clone(&review_fn);
            handles.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, shared, rx, cancel, review_fn).await;
            }));
        }

        Ok(())
    }

    /// Enqueue one task without blocking.
    pub fn submit(
        &self,
        id: usize,
        file: Arc<FileDescriptor>,
        result_tx: mpsc::Sender<TaskResult>,
    ) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ScanError::PoolStopped);
        }

        let tx = match self.lock(&self.task_tx).clone() {
            Some(tx) => tx,
            None => return Err(ScanError::PoolStopped),
        };

        match tx.try_send(Task {
            id,
            file,
            result_tx,
        }) {
            Ok(()) => {
                self.total_tasks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(ScanError::PoolBusy),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ScanError::PoolStopped),
        }
    }

    /// Submit tasks sequentially, stopping at the first failure.
    pub fn submit_batch(
        &self,
        first_id: usize,
        files: &[Arc<FileDescriptor>],
        result_tx: &mpsc::Sender<TaskResult>,
    ) -> Result<()> {
        for (offset, file) in files.iter().enumerate() {
            let id = first_id + offset;
            self.submit(id, Arc::clone(file), result_tx.clone())
                .map_err(|e| ScanError::Submit {
                    id,
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    /// Close the submission queue. Workers finish what is queued, then
    /// exit. Idempotent.
    pub fn close_queue(&self) {
        self.lock(&self.task_tx).take();
    }

    /// Signal cancellation: in-flight reviews are abandoned and queued
    /// tasks are flushed as `Cancelled`. Also closes the queue.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        self.close_queue();
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Stop the pool: close the queue and wait for the workers to drain
    /// and exit, bounded by a 30-second deadline. Idempotent; the second
    /// call returns `Ok` immediately.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.close_queue();

        let handles = std::mem::take(&mut *self.lock(&self.handles));
        let deadline = Instant::now() + STOP_TIMEOUT;

        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!(error = %join_err, "worker exited abnormally");
                }
                Err(_) => return Err(ScanError::StopTimeout),
            }
        }

        Ok(())
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let queued = self
            .lock(&self.task_tx)
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);

        PoolStats {
            capacity: self.capacity,
            queued,
            active: self.shared.active.load(Ordering::Relaxed),
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            failed_tasks: self.shared.failed_tasks.load(Ordering::Relaxed),
            retried_tasks: self.shared.retried_tasks.load(Ordering::Relaxed),
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| {
            tracing::error!("worker pool mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn worker_loop(
        worker_id: usize,
        shared: Arc<Shared>,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
        mut cancel: watch::Receiver<bool>,
        review_fn: ReviewFn,
    ) {
        loop {
            // Hold the receiver lock only while pulling the next task so
            // siblings can process in parallel.
            let task = {
                let mut guard = rx.lock().await;
                guard.recv().await
            };
            let Some(task) = task else {
                debug!(worker_id, "queue closed, worker exiting");
                return;
            };

            Self::process_task(&shared, task, &review_fn, &mut cancel).await;
        }
    }

    async fn process_task(
        shared: &Shared,
        task: Task,
        review_fn: &ReviewFn,
        cancel: &mut watch::Receiver<bool>,
    ) {
        let Task {
            id,
            file,
            result_tx,
        } = task;

        let started = Instant::now();

        // After cancellation, flush queued tasks without invoking the
        // reviewer so every accepted submission still yields a result.
        let outcome = if *cancel.borrow() {
            TaskOutcome::Cancelled
        } else {
            shared.active.fetch_add(1, Ordering::Relaxed);
            let review = review_fn(Arc::clone(&file));
            let outcome = tokio::select! {
                res = tokio::time::timeout(shared.timeout_per_file, review) => match res {
                    Ok(Ok(issues)) => TaskOutcome::Success(issues),
                    Ok(Err(e)) => {
                        if e.is_retryable() {
                            TaskOutcome::Transient(e)
                        } else {
                            TaskOutcome::Permanent(e)
                        }
                    }
                    Err(_) => TaskOutcome::Timeout,
                },
                _ = cancel.changed() => TaskOutcome::Cancelled,
            };
            shared.active.fetch_sub(1, Ordering::Relaxed);
            outcome
        };

        if !outcome.is_success() {
            shared.failed_tasks.fetch_add(1, Ordering::Relaxed);
            if outcome.should_retry() {
                shared.retried_tasks.fetch_add(1, Ordering::Relaxed);
            }
        }

        // The collector may already be gone; a closed channel swallows the
        // result rather than panicking the worker.
        let _ = result_tx
            .send(TaskResult {
                task_id: id,
                file,
                outcome,
                duration: started.elapsed(),
            })
            .await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_file(name: &str) -> Arc<FileDescriptor> {
        Arc::new(FileDescriptor {
            path: PathBuf::from(format!("/tmp/{name}")),
            relative: name.to_string(),
            size: 10,
            lines: 1,
            language: "go".to_string(),
        })
    }

    fn ok_review_fn() -> ReviewFn {
        Arc::new(|_file| -> ReviewFuture { Box::pin(async { Ok(Vec::new()) }) })
    }

    fn blocking_review_fn() -> ReviewFn {
        Arc::new(|_file| -> ReviewFuture {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            })
        })
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = WorkerPool::new(0, 4, Duration::from_secs(30)).unwrap_err();
        assert!(matches!(err, ScanError::InvalidCapacity));
    }

    #[test]
    fn queue_size_defaults_to_twice_capacity() {
        let pool = WorkerPool::new(3, 0, Duration::from_secs(30)).unwrap();
        let tx = pool.lock(&pool.task_tx).clone().unwrap();
        assert_eq!(tx.max_capacity(), 6);
    }

    #[tokio::test]
    async fn every_submission_yields_exactly_one_result() {
        let pool = WorkerPool::new(2, 8, Duration::from_secs(30)).unwrap();
        pool.start(ok_review_fn()).unwrap();

        let (result_tx, mut result_rx) = mpsc::channel(8);
        for i in 0..5 {
            pool.submit(i, test_file(&format!("f{i}.go")), result_tx.clone())
                .unwrap();
        }
        drop(result_tx);
        pool.stop().await.unwrap();

        let mut seen = Vec::new();
        while let Some(result) = result_rx.recv().await {
            assert!(result.outcome.is_success());
            seen.push(result.task_id);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn backpressure_surfaces_pool_busy() {
        // capacity 1, queue 2: one in flight plus two queued fills the
        // pool; the fourth submission must be refused.
        let pool = WorkerPool::new(1, 2, Duration::from_secs(30)).unwrap();
        pool.start(blocking_review_fn()).unwrap();

        let (result_tx, _result_rx) = mpsc::channel(8);

        pool.submit(0, test_file("a.go"), result_tx.clone()).unwrap();
        // Give the single worker a moment to pull the first task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.submit(1, test_file("b.go"), result_tx.clone()).unwrap();
        pool.submit(2, test_file("c.go"), result_tx.clone()).unwrap();

        let err = pool
            .submit(3, test_file("d.go"), result_tx.clone())
            .unwrap_err();
        assert!(matches!(err, ScanError::PoolBusy));

        pool.cancel();
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn submit_after_stop_is_rejected() {
        let pool = WorkerPool::new(1, 2, Duration::from_secs(30)).unwrap();
        pool.start(ok_review_fn()).unwrap();
        pool.stop().await.unwrap();

        let (result_tx, _rx) = mpsc::channel(1);
        let err = pool.submit(0, test_file("a.go"), result_tx).unwrap_err();
        assert!(matches!(err, ScanError::PoolStopped));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let pool = WorkerPool::new(2, 4, Duration::from_secs(30)).unwrap();
        pool.start(ok_review_fn()).unwrap();

        assert!(pool.stop().await.is_ok());
        assert!(pool.stop().await.is_ok());
    }

    #[tokio::test]
    async fn timeout_outcome_is_retryable() {
        let pool = WorkerPool::new(1, 2, Duration::from_millis(50)).unwrap();
        pool.start(blocking_review_fn()).unwrap();

        let (result_tx, mut result_rx) = mpsc::channel(1);
        pool.submit(0, test_file("slow.go"), result_tx).unwrap();

        let result = result_rx.recv().await.unwrap();
        assert!(matches!(result.outcome, TaskOutcome::Timeout));
        assert!(result.outcome.should_retry());

        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failing_review_maps_to_transient_or_permanent() {
        let failing: ReviewFn = Arc::new(|file| -> ReviewFuture {
            Box::pin(async move {
                if file.relative.starts_with("t") {
                    Err(ScanError::api("mock", "status 503: unavailable"))
                } else {
                    Err(ScanError::api("mock", "status 401: unauthorized"))
                }
            })
        });

        let pool = WorkerPool::new(1, 4, Duration::from_secs(30)).unwrap();
        pool.start(failing).unwrap();

        let (result_tx, mut result_rx) = mpsc::channel(2);
        pool.submit(0, test_file("t.go"), result_tx.clone()).unwrap();
        pool.submit(1, test_file("p.go"), result_tx.clone()).unwrap();
        drop(result_tx);
        pool.stop().await.unwrap();

        let mut transient = 0;
        let mut permanent = 0;
        while let Some(result) = result_rx.recv().await {
            match result.outcome {
                TaskOutcome::Transient(_) => transient += 1,
                TaskOutcome::Permanent(_) => permanent += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(transient, 1);
        assert_eq!(permanent, 1);
    }

    #[tokio::test]
    async fn cancel_flushes_queued_tasks_as_cancelled() {
        let pool = WorkerPool::new(1, 8, Duration::from_secs(30)).unwrap();
        pool.start(blocking_review_fn()).unwrap();

        let (result_tx, mut result_rx) = mpsc::channel(8);
        for i in 0..4 {
            pool.submit(i, test_file(&format!("f{i}.go")), result_tx.clone())
                .unwrap();
        }
        drop(result_tx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.cancel();
        pool.stop().await.unwrap();

        let mut cancelled = 0;
        while let Some(result) = result_rx.recv().await {
            assert!(matches!(result.outcome, TaskOutcome::Cancelled));
            assert!(!result.outcome.should_retry());
            cancelled += 1;
        }
        assert_eq!(cancelled, 4);
    }

    #[tokio::test]
    async fn closed_result_channel_does_not_panic_workers() {
        let pool = WorkerPool::new(2, 4, Duration::from_secs(30)).unwrap();
        pool.start(ok_review_fn()).unwrap();

        let (result_tx, result_rx) = mpsc::channel(4);
        drop(result_rx);

        for i in 0..3 {
            pool.submit(i, test_file(&format!("f{i}.go")), result_tx.clone())
                .unwrap();
        }
        drop(result_tx);

        assert!(pool.stop().await.is_ok());
        assert_eq!(pool.stats().total_tasks, 3);
    }

    #[tokio::test]
    async fn stats_reflect_counters() {
        let pool = WorkerPool::new(2, 4, Duration::from_secs(30)).unwrap();
        pool.start(ok_review_fn()).unwrap();

        let (result_tx, mut result_rx) = mpsc::channel(4);
        pool.submit(0, test_file("a.go"), result_tx.clone()).unwrap();
        pool.submit(1, test_file("b.go"), result_tx.clone()).unwrap();
        drop(result_tx);
        pool.stop().await.unwrap();

        while result_rx.recv().await.is_some() {}

        let stats = pool.stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.failed_tasks, 0);
        assert_eq!(stats.active, 0);
    }
}
