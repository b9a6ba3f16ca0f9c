//! In-process job queue.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobLogs, NewJob};
use crate::metrics::JobMetrics;
use crate::queue::{JobQueue, UNKNOWN_STATE};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

struct Entry {
    job: Job,
    state: String,
    logs: Vec<String>,
}

/// Finished jobs kept before the oldest are evicted.
pub const DEFAULT_FINISHED_RETENTION: usize = 10_000;

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    waiting: VecDeque<JobId>,
    finished: VecDeque<JobId>,
}

/// Job queue held in process memory, for development and tests.
///
/// Jobs are lost when the process exits. Only the most recent finished jobs
/// are kept; older ones are evicted and then read as unknown.
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    max_finished: usize,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }
}

impl MemoryJobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue keeping at most `max_finished` finished jobs.
    pub fn with_retention(max_finished: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_finished,
        }
    }

    /// Overwrites the raw state of a job.
    ///
    /// Lets callers model backend states the queue itself never produces,
    /// such as `delayed`.
    pub fn set_raw_state(&self, id: &JobId, state: impl Into<String>) -> JobResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        entry.state = state.into();
        Ok(())
    }

    /// Number of jobs waiting to be taken.
    pub fn waiting_len(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Applies a terminal update and evicts the oldest finished jobs past the
    /// retention limit.
    fn finish(&self, id: &JobId, f: impl FnOnce(&mut Entry)) -> JobResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        f(entry);
        entry.job.finished_on = Some(Utc::now());

        if !inner.finished.contains(id) {
            inner.finished.push_back(id.clone());
        }
        while inner.finished.len() > self.max_finished {
            if let Some(evicted) = inner.finished.pop_front() {
                inner.jobs.remove(&evicted);
                debug!(job_id = %evicted, "Evicted finished job");
            }
        }
        Ok(())
    }

    fn with_entry<T>(&self, id: &JobId, f: impl FnOnce(&mut Entry) -> T) -> JobResult<T> {
        let mut inner = self.inner.lock();
        inner
            .jobs
            .get_mut(id)
            .map(f)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> JobResult<JobId> {
        let id = JobId::new();
        let name = job.name.clone();
        {
            let mut inner = self.inner.lock();
            inner.jobs.insert(
                id.clone(),
                Entry {
                    job: Job::new(id.clone(), job),
                    state: "waiting".to_string(),
                    logs: Vec::new(),
                },
            );
            inner.waiting.push_back(id.clone());
        }

        JobMetrics::job_enqueued("memory", &name);
        debug!(job_id = %id, job_name = %name, "Enqueued job in memory");
        Ok(id)
    }

    async fn get_job(&self, id: &JobId) -> JobResult<Option<Job>> {
        Ok(self.inner.lock().jobs.get(id).map(|entry| entry.job.clone()))
    }

    async fn get_state(&self, id: &JobId) -> JobResult<String> {
        Ok(self
            .inner
            .lock()
            .jobs
            .get(id)
            .map_or_else(|| UNKNOWN_STATE.to_string(), |entry| entry.state.clone()))
    }

    async fn get_job_logs(&self, id: &JobId, start: i64, end: i64) -> JobResult<JobLogs> {
        let inner = self.inner.lock();
        let Some(entry) = inner.jobs.get(id) else {
            return Ok(JobLogs::default());
        };

        let count = entry.logs.len();
        let (from, to) = inclusive_range(start, end, count);
        let logs = if from < to { entry.logs[from..to].to_vec() } else { Vec::new() };

        Ok(JobLogs {
            logs,
            count: count as u64,
        })
    }

    async fn take_next(&self) -> JobResult<Option<Job>> {
        let mut inner = self.inner.lock();
        while let Some(id) = inner.waiting.pop_front() {
            if let Some(entry) = inner.jobs.get_mut(&id) {
                entry.state = "active".to_string();
                entry.job.attempts_made += 1;
                entry.job.processed_on = Some(Utc::now());
                JobMetrics::job_dequeued(&entry.job.name);
                return Ok(Some(entry.job.clone()));
            }
        }
        Ok(None)
    }

    async fn update_progress(&self, id: &JobId, progress: Value) -> JobResult<()> {
        self.with_entry(id, |entry| entry.job.progress = progress)
    }

    async fn add_log(&self, id: &JobId, line: String) -> JobResult<u64> {
        self.with_entry(id, |entry| {
            entry.logs.push(line);
            entry.logs.len() as u64
        })
    }

    async fn complete(&self, id: &JobId, return_value: Value) -> JobResult<()> {
        self.finish(id, |entry| {
            entry.state = "completed".to_string();
            entry.job.progress = Value::from(100);
            entry.job.return_value = Some(return_value);
        })
    }

    async fn fail(&self, id: &JobId, reason: String) -> JobResult<()> {
        self.finish(id, |entry| {
            entry.state = "failed".to_string();
            entry.job.failed_reason = Some(reason);
        })
    }

    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}

/// Resolves a Redis-style inclusive range (negative indexes count from the
/// end) into slice bounds.
fn inclusive_range(start: i64, end: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let resolve = |i: i64| if i < 0 { len.saturating_add(i) } else { i };
    let from = resolve(start).max(0);
    let to = resolve(end).saturating_add(1).min(len);
    if from >= to {
        (0, 0)
    } else {
        (from as usize, to as usize)
    }
}
