//! Job queue abstraction.

use crate::error::JobResult;
use crate::job::{Job, JobId, JobLogs, NewJob};
use async_trait::async_trait;
use serde_json::Value;

/// Raw state reported for a job the queue does not know.
pub const UNKNOWN_STATE: &str = "unknown";

/// Job queue contract shared by producers, workers and status streams.
///
/// Raw states are strings so backends may report states beyond the four the
/// rest of the system understands; see [`crate::JobState::from_raw`].
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job in the waiting state.
    async fn enqueue(&self, job: NewJob) -> JobResult<JobId>;

    /// Get a job by ID.
    async fn get_job(&self, id: &JobId) -> JobResult<Option<Job>>;

    /// Get the raw state of a job, or [`UNKNOWN_STATE`] if it does not exist.
    async fn get_state(&self, id: &JobId) -> JobResult<String>;

    /// Get log lines `start..=end` (0-based, inclusive end).
    async fn get_job_logs(&self, id: &JobId, start: i64, end: i64) -> JobResult<JobLogs>;

    /// Move the oldest waiting job to active and return it.
    async fn take_next(&self) -> JobResult<Option<Job>>;

    /// Replace the progress of a job.
    async fn update_progress(&self, id: &JobId, progress: Value) -> JobResult<()>;

    /// Append a log line and return the new line count.
    async fn add_log(&self, id: &JobId, line: String) -> JobResult<u64>;

    /// Mark a job completed with its result.
    async fn complete(&self, id: &JobId, return_value: Value) -> JobResult<()>;

    /// Mark a job failed with a reason.
    async fn fail(&self, id: &JobId, reason: String) -> JobResult<()>;

    /// Health check.
    async fn health_check(&self) -> JobResult<()>;
}
