//! Job error types.

use lumen_core::LumenError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job execution failed.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Result extraction for a completed job failed.
    #[error("Result extraction failed: {0}")]
    Extraction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Redis pool could not be built from the configuration.
    #[error("Redis pool configuration error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if this error is caused by the backing store and may
    /// succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Redis(_) | JobError::Pool(_))
    }
}

impl From<LumenError> for JobError {
    fn from(err: LumenError) -> Self {
        match err {
            LumenError::Configuration(msg) => JobError::Configuration(msg),
            LumenError::NotFound { id, .. } => JobError::NotFound(id),
            other => JobError::Internal(other.to_string()),
        }
    }
}

impl From<JobError> for LumenError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => LumenError::not_found("Job", id),
            JobError::Configuration(msg) => LumenError::Configuration(msg),
            JobError::Redis(e) => LumenError::Cache(e.to_string()),
            JobError::Pool(e) => LumenError::Unavailable(format!("Redis pool: {}", e)),
            JobError::Serialization(e) => LumenError::validation(e.to_string()),
            other => LumenError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_retryable_execution_failed() {
        let err = JobError::ExecutionFailed("oops".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_is_retryable_redis() {
        let err = JobError::Redis(redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_lumen_error() {
        let job_err = JobError::from(LumenError::configuration("no redis host"));
        match job_err {
            JobError::Configuration(msg) => assert!(msg.contains("no redis host")),
            _ => panic!("Expected Configuration error"),
        }

        let job_err = JobError::from(LumenError::internal("database down"));
        assert!(matches!(job_err, JobError::Internal(msg) if msg.contains("database down")));
    }

    #[test]
    fn test_into_lumen_error_status() {
        let not_found: LumenError = JobError::NotFound("job-1".into()).into();
        assert_eq!(not_found.status_code(), 404);

        let redis: LumenError =
            JobError::Redis(redis::RedisError::from((redis::ErrorKind::IoError, "reset"))).into();
        assert_eq!(redis.error_code(), "CACHE_ERROR");

        let extraction: LumenError = JobError::Extraction("missing field".into()).into();
        assert_eq!(extraction.status_code(), 500);
    }

    #[test]
    fn test_error_display_not_found() {
        let err = JobError::NotFound("job-xyz".into());
        assert_eq!(err.to_string(), "Job not found: job-xyz");
    }
}
