//! Job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A job as submitted by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Job type name.
    pub name: String,
    /// Job payload.
    #[serde(default)]
    pub data: Value,
}

impl NewJob {
    /// Creates a job submission.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// A job as stored by the queue.
///
/// The raw state is not part of the record; it is read separately through
/// [`crate::JobQueue::get_state`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Job type name.
    pub name: String,

    /// Job payload.
    pub data: Value,

    /// Progress as reported by the worker. Usually a number 0-100.
    pub progress: Value,

    /// Result of a completed job.
    #[serde(rename = "returnvalue", skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,

    /// Failure reason of a failed job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,

    /// Number of times a worker picked the job up.
    pub attempts_made: u32,

    /// When the job was enqueued.
    pub timestamp: DateTime<Utc>,

    /// When a worker picked the job up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a freshly enqueued job record.
    pub fn new(id: JobId, submission: NewJob) -> Self {
        Self {
            id,
            name: submission.name,
            data: submission.data,
            progress: Value::from(0),
            return_value: None,
            failed_reason: None,
            attempts_made: 0,
            timestamp: Utc::now(),
            processed_on: None,
            finished_on: None,
        }
    }

    /// Progress as a whole number.
    ///
    /// Non-numeric progress reads as 0. Negative values clamp to 0. Values
    /// above 100 are passed through.
    pub fn progress_percent(&self) -> u32 {
        match self.progress.as_f64() {
            // Saturating float-to-int cast.
            Some(value) if value.is_finite() => value.max(0.0).round() as u32,
            _ => 0,
        }
    }
}

/// A page of job log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogs {
    /// Log lines in the requested range.
    pub logs: Vec<String>,
    /// Total number of log lines the job has.
    pub count: u64,
}
