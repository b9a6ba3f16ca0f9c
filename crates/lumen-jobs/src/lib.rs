//! Lumen Jobs - job lifecycle core
//!
//! - A queue contract ([`JobQueue`]) with a Redis backend over one
//!   process-wide connection pool ([`SharedConnection`]) and an in-process
//!   backend ([`MemoryJobQueue`])
//! - [`JobStatusStreamer`], which turns a polled job into an ordered stream of
//!   [`StatusEvent`]s for one subscriber
//! - A [`WorkerPool`] that runs a [`Processor`] over queued jobs
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_jobs::{JobStatusStreamer, MemoryJobQueue, NewJob, StreamOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let queue = Arc::new(MemoryJobQueue::new());
//! let id = queue.enqueue(NewJob::new("article", json!({"topic": "tides"}))).await?;
//!
//! let streamer = JobStatusStreamer::new(queue);
//! let mut events = streamer.stream(id, StreamOptions::default(), CancellationToken::new());
//! while let Some(event) = events.next().await {
//!     println!("{} {}%", event.state, event.progress);
//! }
//! ```

pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod status;
pub mod streamer;
pub mod worker;

pub use error::{JobError, JobResult};
pub use job::{Job, JobId, JobLogs, NewJob};
pub use memory::{MemoryJobQueue, DEFAULT_FINISHED_RETENTION};
pub use metrics::{register_metrics, JobMetrics, StreamMetrics, WorkerMetrics};
#[cfg(any(test, feature = "mocks"))]
pub use queue::MockJobQueue;
pub use queue::{JobQueue, UNKNOWN_STATE};
pub use redis::{create_pool, RedisJobQueue, RedisKeys, SharedConnection};
pub use status::{JobState, StatusEvent, StatusMessages, JOB_NOT_FOUND_MESSAGE, STATUS_CHECK_FAILED_MESSAGE};
pub use streamer::{
    JobStatusStreamer, ResultExtractor, StatusStream, StreamOptions, StreamOutcome, DEFAULT_POLL_INTERVAL,
    LOG_TAIL_LINES, MIN_POLL_INTERVAL,
};
pub use worker::{JobContext, Processor, WorkerPool, WorkerPoolConfig};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::queue::JobQueue;
    pub use crate::worker::Processor;
    pub use crate::{JobContext, JobError, JobId, JobResult, StatusEvent};
}
