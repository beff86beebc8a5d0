//! Review pipeline: orchestrates the worker pool, the collector, and the
//! dead-letter retry pass.
//!
//! `run` streams the file list through the pool in batches, folds task
//! results into per-file reviews and severity counters, then drains a
//! bounded number of dead letters with direct reviewer calls. Successful
//! retries are merged back into the per-file result set. A per-file error
//! never halts the run; cancellation turns outstanding work into per-file
//! cancellation errors and still returns a result.
//!
//! There are two independent retry budgets: the reviewer's own transport
//! retry (inside `review_file`) and the pipeline's dead-letter pass here.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::deadletter::DeadLetterQueue;
use super::pool::{ReviewFn, TaskOutcome, TaskResult, WorkerPool};
use crate::reviewer::Reviewer;
use crate::types::{FileDescriptor, FileReview, Result, ReviewResult, ScanError};

// =============================================================================
// Configuration
// =============================================================================

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent reviewers in flight.
    pub max_workers: usize,
    /// Bound of the submission queue. Must cover the largest batch the
    /// caller submits, or `submit` reports the pool as busy.
    pub max_queue_size: usize,
    /// Dead letters retried per run.
    pub max_retries: u32,
    /// Deadline for a single file review.
    pub timeout_per_file: Duration,
    /// Dead-letter queue capacity.
    pub dead_letter_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_queue_size: 100,
            max_retries: 2,
            timeout_per_file: Duration::from_secs(30),
            dead_letter_size: 1000,
        }
    }
}

// =============================================================================
// Metrics
// =============================================================================

#[derive(Default)]
struct Metrics {
    files_processed: AtomicU64,
    files_failed: AtomicU64,
    files_retried: AtomicU64,
    retry_success: AtomicU64,
    total_issues: AtomicU64,
}

/// Point-in-time pipeline metrics. All counters are monotone.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_retried: u64,
    pub retry_success: u64,
    pub total_issues: u64,
}

impl Metrics {
    fn snapshot(&self) -> PipelineMetrics {
        PipelineMetrics {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_retried: self.files_retried.load(Ordering::Relaxed),
            retry_success: self.retry_success.load(Ordering::Relaxed),
            total_issues: self.total_issues.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Concurrent review pipeline. Single-shot: one `run` per instance.
pub struct Pipeline {
    config: PipelineConfig,
    reviewer: Arc<dyn Reviewer>,
    pool: Arc<WorkerPool>,
    dead_letters: Arc<DeadLetterQueue>,
    metrics: Arc<Metrics>,
    running: AtomicBool,
}

impl Pipeline {
    /// Build a pipeline, clamping the configuration to sane minimums.
    pub fn new(mut config: PipelineConfig, reviewer: Arc<dyn Reviewer>) -> Result<Self> {
        if config.max_workers == 0 {
            config.max_workers = 4;
        }
        if config.max_queue_size == 0 {
            config.max_queue_size = config.max_workers * 2;
        }
        if config.timeout_per_file == Duration::ZERO {
            config.timeout_per_file = Duration::from_secs(30);
        } else if config.timeout_per_file < Duration::from_secs(1) {
            config.timeout_per_file = Duration::from_secs(1);
        }
        if config.dead_letter_size == 0 {
            config.dead_letter_size = 1000;
        }

        let pool = WorkerPool::new(
            config.max_workers,
            config.max_queue_size,
            config.timeout_per_file,
        )?;

        let dead_letters = Arc::new(DeadLetterQueue::new(config.dead_letter_size));

        Ok(Self {
            config,
            reviewer,
            pool: Arc::new(pool),
            dead_letters,
            metrics: Arc::new(Metrics::default()),
            running: AtomicBool::new(false),
        })
    }

    /// Run the review over `files`.
    ///
    /// Returns a result covering every file; files cut short by
    /// cancellation carry a cancellation error. A submission failure that
    /// is not caused by cancellation aborts the run.
    pub async fn run(&self, files: Vec<Arc<FileDescriptor>>) -> Result<ReviewResult> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::Pipeline("pipeline is already running".into()));
        }

        let result = self.run_inner(files).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, files: Vec<Arc<FileDescriptor>>) -> Result<ReviewResult> {
        let start_time = Utc::now();
        let started = Instant::now();
        let total_files = files.len();

        // Watchdog enforcing the whole-run deadline via cancellation.
        let deadline = self.total_timeout(total_files);
        let watchdog_pool = Arc::clone(&self.pool);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let watchdog = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    warn!(deadline_secs = deadline.as_secs(), "pipeline deadline exceeded, cancelling");
                    watchdog_pool.cancel();
                }
                _ = done_rx => {}
            }
        });

        let reviewer = Arc::clone(&self.reviewer);
        let review_fn: ReviewFn = Arc::new(
            move |file: Arc<FileDescriptor>| -> super::pool::ReviewFuture {
                let reviewer = Arc::clone(&reviewer);
                Box::pin(async move { reviewer.review_file(&file).await })
            },
        );
        self.pool.start(review_fn)?;

        let (result_tx, result_rx) = mpsc::channel(total_files.max(1));
        let collector = tokio::spawn(collect_results(
            result_rx,
            Arc::clone(&self.dead_letters),
            Arc::clone(&self.metrics),
            self.config.timeout_per_file,
        ));

        // Submit in batches of twice the worker count: enough to keep the
        // queue primed, with a cancellation check between batches.
        let batch_size = self.config.max_workers * 2;
        let mut submit_err: Option<ScanError> = None;
        'submit: for (batch_idx, batch) in files.chunks(batch_size).enumerate() {
            if self.pool.is_cancelled() {
                break 'submit;
            }
            if let Err(e) = self
                .pool
                .submit_batch(batch_idx * batch_size, batch, &result_tx)
            {
                submit_err = Some(e);
                break 'submit;
            }
        }
        drop(result_tx);

        // Drain the pool, then the collector.
        let stop_result = self.pool.stop().await;
        let mut collected = collector
            .await
            .map_err(|e| ScanError::Pipeline(format!("collector task failed: {}", e)))?;
        let _ = done_tx.send(());
        watchdog.abort();

        if let Some(e) = submit_err {
            // Submission failures caused by cancellation are not errors;
            // the partial result below covers them.
            if !self.pool.is_cancelled() {
                return Err(e);
            }
        }
        stop_result?;

        if self.pool.is_cancelled() {
            fill_in_cancelled_files(&mut collected, &files);
        } else {
            self.process_dead_letters(&mut collected).await;
        }

        let mut result = collected.into_result();
        result.total_files = total_files;
        result.start_time = start_time;
        result.end_time = Utc::now();
        result.duration = started.elapsed();

        self.log_summary(&result);
        Ok(result)
    }

    /// Stop the pipeline: cancel in-flight work and shut the pool down.
    /// Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.pool.cancel();
        self.pool.stop().await
    }

    /// Pipeline metrics snapshot.
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }

    /// Dead letters still queued after the retry pass.
    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.len()
    }

    /// Retry dead letters with direct reviewer calls, bounded by the retry
    /// budget. Successes are merged into the collected per-file results;
    /// failures go back into the queue with an incremented attempt count.
    async fn process_dead_letters(&self, collected: &mut Collected) {
        for _ in 0..self.config.max_retries {
            let Some(dl) = self.dead_letters.pop() else {
                break;
            };

            debug!(file = %dl.file.relative, attempts = dl.attempts, "retrying dead letter");
            let retry_started = Instant::now();
            let outcome = tokio::time::timeout(
                self.config.timeout_per_file,
                self.reviewer.review_file(&dl.file),
            )
            .await;

            match outcome {
                Ok(Ok(issues)) => {
                    self.metrics.retry_success.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .total_issues
                        .fetch_add(issues.len() as u64, Ordering::Relaxed);
                    collected.merge_retry_success(&dl.file, issues, retry_started.elapsed());
                }
                Ok(Err(e)) => {
                    self.dead_letters
                        .push(dl.task_id, dl.file, e, dl.attempts + 1);
                }
                Err(_) => {
                    let err = ScanError::timeout("dead letter retry", self.config.timeout_per_file);
                    self.dead_letters
                        .push(dl.task_id, dl.file, err, dl.attempts + 1);
                }
            }
        }
    }

    /// Whole-run deadline: per-file budget times file count, floored at
    /// 30 seconds, plus a fixed overhead buffer, capped at 10 minutes.
    fn total_timeout(&self, num_files: usize) -> Duration {
        const OVERHEAD: Duration = Duration::from_secs(10);
        const FLOOR: Duration = Duration::from_secs(30);
        const CAP: Duration = Duration::from_secs(600);

        let base = self.config.timeout_per_file * num_files.max(1) as u32;
        (base.max(FLOOR) + OVERHEAD).min(CAP)
    }

    fn log_summary(&self, result: &ReviewResult) {
        info!(
            total_files = result.total_files,
            reviewed_files = result.reviewed_files,
            total_issues = result.total_issues,
            critical = result.critical_count,
            warnings = result.warning_count,
            info = result.info_count,
            duration_ms = result.duration.as_millis() as u64,
            "review completed"
        );

        let stats = self.pool.stats();
        debug!(
            active = stats.active,
            queued = stats.queued,
            total_tasks = stats.total_tasks,
            failed_tasks = stats.failed_tasks,
            retried_tasks = stats.retried_tasks,
            "worker pool stats"
        );

        let dead = self.dead_letters.len();
        if dead > 0 {
            warn!(dead_letters = dead, "unresolved dead letters remain");
        }
    }
}

// =============================================================================
// Collector
// =============================================================================

struct Collected {
    file_reviews: Vec<FileReview>,
    reviewed_files: usize,
    critical: usize,
    warning: usize,
    info: usize,
    total_issues: usize,
}

impl Collected {
    fn new() -> Self {
        Self {
            file_reviews: Vec::new(),
            reviewed_files: 0,
            critical: 0,
            warning: 0,
            info: 0,
            total_issues: 0,
        }
    }

    fn count_issues(&mut self, issues: &[crate::types::Issue]) {
        for issue in issues {
            self.total_issues += 1;
            match issue.severity {
                crate::types::Severity::Critical => self.critical += 1,
                crate::types::Severity::Warning => self.warning += 1,
                crate::types::Severity::Info => self.info += 1,
            }
        }
    }

    /// Replace a failed file review with the successful retry outcome and
    /// fold its issues into the counters.
    fn merge_retry_success(
        &mut self,
        file: &Arc<FileDescriptor>,
        issues: Vec<crate::types::Issue>,
        duration: Duration,
    ) {
        self.count_issues(&issues);
        self.reviewed_files += 1;

        if let Some(review) = self
            .file_reviews
            .iter_mut()
            .find(|r| Arc::ptr_eq(&r.file, file))
        {
            review.issues = issues;
            review.error = None;
            review.duration = duration;
        } else {
            self.file_reviews.push(FileReview {
                file: Arc::clone(file),
                issues,
                duration,
                error: None,
            });
        }
    }

    fn into_result(self) -> ReviewResult {
        ReviewResult {
            total_files: 0,
            reviewed_files: self.reviewed_files,
            total_issues: self.total_issues,
            critical_count: self.critical,
            warning_count: self.warning,
            info_count: self.info,
            file_reviews: self.file_reviews,
            ..ReviewResult::default()
        }
    }
}

async fn collect_results(
    mut result_rx: mpsc::Receiver<TaskResult>,
    dead_letters: Arc<DeadLetterQueue>,
    metrics: Arc<Metrics>,
    timeout_per_file: Duration,
) -> Collected {
    let mut collected = Collected::new();

    while let Some(task_result) = result_rx.recv().await {
        let mut review = FileReview {
            file: Arc::clone(&task_result.file),
            issues: Vec::new(),
            duration: task_result.duration,
            error: None,
        };

        let retry = task_result.outcome.should_retry();
        match task_result.outcome {
            TaskOutcome::Success(issues) => {
                collected.count_issues(&issues);
                collected.reviewed_files += 1;
                review.issues = issues;
                metrics.files_processed.fetch_add(1, Ordering::Relaxed);
                metrics
                    .total_issues
                    .fetch_add(review.issues.len() as u64, Ordering::Relaxed);
            }
            TaskOutcome::Cancelled => {
                review.error = Some(ScanError::Cancelled.to_string());
                metrics.files_failed.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Timeout => {
                let err = ScanError::timeout("review", timeout_per_file);
                review.error = Some(err.to_string());
                metrics.files_failed.fetch_add(1, Ordering::Relaxed);
                dead_letters.push(task_result.task_id, Arc::clone(&task_result.file), err, 1);
                metrics.files_retried.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Transient(err) | TaskOutcome::Permanent(err) => {
                review.error = Some(err.to_string());
                metrics.files_failed.fetch_add(1, Ordering::Relaxed);
                if retry {
                    dead_letters.push(task_result.task_id, Arc::clone(&task_result.file), err, 1);
                    metrics.files_retried.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        collected.file_reviews.push(review);
    }

    collected
}

/// After a cancelled run, give every file that never produced a task
/// result a cancellation-error review so the result still covers the whole
/// input set.
fn fill_in_cancelled_files(collected: &mut Collected, files: &[Arc<FileDescriptor>]) {
    for file in files {
        let present = collected
            .file_reviews
            .iter()
            .any(|r| Arc::ptr_eq(&r.file, file));
        if !present {
            collected.file_reviews.push(FileReview {
                file: Arc::clone(file),
                issues: Vec::new(),
                duration: Duration::ZERO,
                error: Some(ScanError::Cancelled.to_string()),
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
