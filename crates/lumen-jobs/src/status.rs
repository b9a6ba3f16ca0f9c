//! Canonical job states and the status events pushed to stream subscribers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Message of the terminal event emitted when the job does not exist.
pub const JOB_NOT_FOUND_MESSAGE: &str = "Job not found";

/// Message of the terminal event emitted when a poll fails.
pub const STATUS_CHECK_FAILED_MESSAGE: &str = "Status check failed";

/// Event field names that result extractors may not overwrite.
pub const RESERVED_FIELDS: [&str; 6] = ["state", "progress", "message", "finished", "error", "logs"];

/// Canonical job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued, delayed, or in any state this system does not model.
    #[default]
    Waiting,
    /// Picked up by a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobState {
    /// Maps a raw queue state. Anything unrecognised collapses to `Waiting`.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Waiting,
        }
    }

    /// Returns the lowercase state name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `Completed` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-state human-readable messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusMessages {
    /// Message for `waiting`.
    pub waiting: String,
    /// Message for `active`.
    pub active: String,
    /// Message for `completed`.
    pub completed: String,
    /// Message for `failed`.
    pub failed: String,
}

impl Default for StatusMessages {
    fn default() -> Self {
        Self {
            waiting: "Job is queued".to_string(),
            active: "Job is being processed".to_string(),
            completed: "Job completed".to_string(),
            failed: "Job failed".to_string(),
        }
    }
}

impl StatusMessages {
    /// Returns the message for a state.
    pub fn for_state(&self, state: JobState) -> &str {
        match state {
            JobState::Waiting => &self.waiting,
            JobState::Active => &self.active,
            JobState::Completed => &self.completed,
            JobState::Failed => &self.failed,
        }
    }
}

/// One normalized status update for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Canonical state.
    pub state: JobState,
    /// Progress, usually 0-100.
    pub progress: u32,
    /// Human-readable message.
    pub message: String,
    /// True iff `state` is terminal. The last event of every stream.
    pub finished: bool,
    /// Failure reason; only set on `failed` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Log lines, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    /// Fields produced by a result extractor on completion.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusEvent {
    /// Creates an event for a state. `finished` follows the state.
    pub fn new(state: JobState, progress: u32, message: impl Into<String>) -> Self {
        Self {
            state,
            progress,
            message: message.into(),
            finished: state.is_terminal(),
            error: None,
            logs: None,
            extra: Map::new(),
        }
    }

    /// The event emitted before the first poll.
    pub fn initial(messages: &StatusMessages) -> Self {
        Self::new(JobState::Waiting, 0, messages.for_state(JobState::Waiting))
    }

    /// Terminal event for a job the queue does not know.
    pub fn not_found() -> Self {
        Self::synthetic_failure(JOB_NOT_FOUND_MESSAGE)
    }

    /// Terminal event for a poll that failed.
    pub fn status_check_failed() -> Self {
        Self::synthetic_failure(STATUS_CHECK_FAILED_MESSAGE)
    }

    fn synthetic_failure(message: &str) -> Self {
        let mut event = Self::new(JobState::Failed, 0, message);
        event.error = Some(message.to_string());
        event
    }

    /// Merges extractor output, skipping keys that collide with event fields.
    ///
    /// Returns the keys that were skipped.
    pub fn merge_extra(&mut self, fields: Map<String, Value>) -> Vec<String> {
        let mut skipped = Vec::new();
        for (key, value) in fields {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                skipped.push(key);
            } else {
                self.extra.insert(key, value);
            }
        }
        skipped
    }
}
