//! Worker pool for processing jobs.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId};
use crate::metrics::{JobMetrics, WorkerMetrics};
use crate::queue::JobQueue;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum jobs processed at once.
    pub concurrency: usize,

    /// Wait between polls when the queue is empty.
    pub poll_interval: Duration,

    /// How long shutdown waits for in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&lumen_config::WorkerConfig> for WorkerPoolConfig {
    fn from(config: &lumen_config::WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            poll_interval: config.poll_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Handle a processor uses to report on the job it is running.
#[derive(Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Worker ID processing this job.
    pub worker_id: String,

    queue: Arc<dyn JobQueue>,
}

impl JobContext {
    /// Creates a context for `job`.
    pub fn new(job: &Job, worker_id: impl Into<String>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            job_id: job.id.clone(),
            attempt: job.attempts_made,
            worker_id: worker_id.into(),
            queue,
        }
    }

    /// Records job progress, usually 0-100.
    pub async fn report_progress(&self, progress: u32) -> JobResult<()> {
        self.queue.update_progress(&self.job_id, Value::from(progress)).await
    }

    /// Appends a log line to the job.
    pub async fn log(&self, line: impl Into<String>) -> JobResult<u64> {
        self.queue.add_log(&self.job_id, line.into()).await
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

/// Processes jobs taken from the queue.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Runs one job and returns its result.
    async fn process(&self, job: &Job, ctx: &JobContext) -> Result<Value, JobError>;
}

/// Worker pool for concurrent job processing.
pub struct WorkerPool {
    /// Unique pool ID.
    id: String,

    /// Job queue.
    queue: Arc<dyn JobQueue>,

    /// Processor run for every job.
    processor: Arc<dyn Processor>,

    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Stops the pool when cancelled.
    shutdown: CancellationToken,

    /// Running flag.
    running: AtomicBool,

    /// Jobs processed counter.
    jobs_processed: Arc<AtomicU64>,

    /// Jobs failed counter.
    jobs_failed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a new worker pool. Cancelling `shutdown` stops it.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn Processor>,
        config: WorkerPoolConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: format!("worker-pool-{}", Uuid::new_v4()),
            queue,
            processor,
            config,
            shutdown,
            running: AtomicBool::new(false),
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs the pool until the shutdown token is cancelled, then waits up
    /// to the shutdown timeout for in-flight jobs.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Internal("Worker pool already running".to_string()));
        }

        let concurrency = self.config.concurrency.max(1);
        info!(pool_id = %self.id, concurrency, "Starting worker pool");

        let semaphore = Arc::new(Semaphore::new(concurrency));

        loop {
            let permit = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| JobError::Internal(format!("Worker semaphore closed: {}", e)))?,
            };

            // A dequeue is never dropped halfway; a job taken during shutdown
            // still runs and is drained below.
            let next = self.queue.take_next().await;

            match next {
                Ok(Some(job)) => {
                    let span = tracing::info_span!("worker", job_id = %job.id, job_name = %job.name);
                    let task = JobTask {
                        pool_id: self.id.clone(),
                        queue: Arc::clone(&self.queue),
                        processor: Arc::clone(&self.processor),
                        jobs_processed: Arc::clone(&self.jobs_processed),
                        jobs_failed: Arc::clone(&self.jobs_failed),
                    };
                    report_in_flight(&self.id, &semaphore, concurrency);

                    let pool_id = self.id.clone();
                    let tracked = Arc::clone(&semaphore);
                    tokio::spawn(
                        async move {
                            task.execute(job).await;
                            drop(permit);
                            report_in_flight(&pool_id, &tracked, concurrency);
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => {
                    drop(permit);
                    self.idle().await;
                }
                Err(e) => {
                    drop(permit);
                    error!(pool_id = %self.id, error = %e, "Failed to take next job");
                    self.idle().await;
                }
            }
        }

        info!(pool_id = %self.id, "Waiting for workers to finish...");
        let all_permits = u32::try_from(concurrency).unwrap_or(u32::MAX);
        if timeout(self.config.shutdown_timeout, semaphore.acquire_many(all_permits))
            .await
            .is_err()
        {
            warn!(pool_id = %self.id, "Shutdown timeout elapsed with jobs still running");
        }

        self.running.store(false, Ordering::SeqCst);

        info!(
            pool_id = %self.id,
            processed = self.jobs_processed(),
            failed = self.jobs_failed(),
            "Worker pool stopped"
        );

        Ok(())
    }

    async fn idle(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// Stop the worker pool.
    pub fn stop(&self) {
        info!(pool_id = %self.id, "Stopping worker pool...");
        self.shutdown.cancel();
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the number of jobs processed.
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get the number of jobs failed.
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

fn report_in_flight(pool_id: &str, semaphore: &Semaphore, concurrency: usize) {
    let in_flight = concurrency.saturating_sub(semaphore.available_permits());
    WorkerMetrics::update_active(pool_id, in_flight as u64);
}

struct JobTask {
    pool_id: String,
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn Processor>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
}

impl JobTask {
    async fn execute(self, job: Job) {
        let ctx = JobContext::new(&job, self.pool_id.clone(), Arc::clone(&self.queue));
        let started = Instant::now();
        debug!(attempt = ctx.attempt, "Processing job");

        match self.processor.process(&job, &ctx).await {
            Ok(result) => {
                if let Err(e) = self.queue.complete(&job.id, result).await {
                    error!(error = %e, "Failed to mark job as complete");
                }
                self.jobs_processed.fetch_add(1, Ordering::Relaxed);
                JobMetrics::job_completed(&job.name, started.elapsed());
                debug!(elapsed = ?started.elapsed(), "Job completed successfully");
            }
            Err(e) => {
                warn!(error = %e, "Job execution failed");
                if let Err(e) = self.queue.fail(&job.id, e.to_string()).await {
                    error!(error = %e, "Failed to mark job as failed");
                }
                self.jobs_failed.fetch_add(1, Ordering::Relaxed);
                JobMetrics::job_failed(&job.name, started.elapsed());
            }
        }
    }
}
