//! Push-style status streams over a polled job queue.
//!
//! A [`JobStatusStreamer`] turns one job's queue state into an ordered
//! sequence of [`StatusEvent`]s for a single subscriber:
//!
//! 1. a `waiting` event is emitted before the first poll;
//! 2. the queue is polled every `poll_interval`, one poll at a time, and each
//!    poll produces one event;
//! 3. the stream ends after the first event with `finished = true`, or
//!    silently when the subscriber goes away.
//!
//! Failures never reach the subscriber as errors. A missing job, a failed
//! queue read or a failing result extractor each become a terminal `failed`
//! event.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId};
use crate::metrics::StreamMetrics;
use crate::queue::JobQueue;
use crate::status::{JobState, StatusEvent, StatusMessages};
use futures::Stream;
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn, Instrument};

/// Default interval between two polls of the same job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Number of log lines attached to an event when logs are requested.
pub const LOG_TAIL_LINES: i64 = 100;

const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Shortest poll interval; shorter requests are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Builds extra event fields from a completed job.
pub type ResultExtractor = Arc<dyn Fn(&Job) -> Result<Map<String, Value>, JobError> + Send + Sync>;

/// How a status stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The job did not exist.
    NotFound,
    /// The job completed.
    Completed,
    /// The job failed.
    Failed,
    /// A poll failed.
    Errored,
    /// The subscriber went away before the job finished.
    Disconnected,
}

impl StreamOutcome {
    /// Returns the outcome label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stream options.
#[derive(Clone)]
pub struct StreamOptions {
    /// Interval between polls.
    pub poll_interval: Duration,
    /// Attach the first [`LOG_TAIL_LINES`] log lines to every polled event.
    pub include_logs: bool,
    /// Per-state messages.
    pub messages: StatusMessages,
    /// Extra fields for the completion event.
    pub extractor: Option<ResultExtractor>,
    /// Events buffered ahead of a slow subscriber.
    pub channel_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            include_logs: false,
            messages: StatusMessages::default(),
            extractor: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl StreamOptions {
    /// Sets the poll interval, raised to at least [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Requests log lines on polled events.
    #[must_use]
    pub fn with_logs(mut self, include_logs: bool) -> Self {
        self.include_logs = include_logs;
        self
    }

    /// Overrides the per-state messages.
    #[must_use]
    pub fn with_messages(mut self, messages: StatusMessages) -> Self {
        self.messages = messages;
        self
    }

    /// Sets the result extractor.
    #[must_use]
    pub fn with_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Job) -> Result<Map<String, Value>, JobError> + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Sets the subscriber buffer size.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("poll_interval", &self.poll_interval)
            .field("include_logs", &self.include_logs)
            .field("messages", &self.messages)
            .field("extractor", &self.extractor.is_some())
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

/// Opens status streams against a job queue.
#[derive(Clone)]
pub struct JobStatusStreamer {
    queue: Arc<dyn JobQueue>,
}

impl JobStatusStreamer {
    /// Creates a streamer over `queue`.
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Opens a stream for `job_id`.
    ///
    /// The stream runs on its own task until it reaches a terminal event,
    /// `cancel` fires, or the returned [`StatusStream`] is dropped. Must be
    /// called within a Tokio runtime.
    pub fn stream(&self, job_id: JobId, options: StreamOptions, cancel: CancellationToken) -> StatusStream {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let span = tracing::info_span!("job_status_stream", job_id = %job_id);

        StreamMetrics::stream_opened();
        let task = tokio::spawn(
            run_stream(Arc::clone(&self.queue), job_id, options, cancel.clone(), tx).instrument(span),
        );

        StatusStream {
            events: ReceiverStream::new(rx),
            task: Some(task),
            _guard: cancel.drop_guard(),
        }
    }
}

/// Subscriber side of one status stream.
///
/// Dropping it cancels the stream.
pub struct StatusStream {
    events: ReceiverStream<StatusEvent>,
    task: Option<JoinHandle<StreamOutcome>>,
    _guard: DropGuard,
}

impl StatusStream {
    /// Stops receiving and waits for the stream task to end.
    ///
    /// If the stream had not finished yet it is cancelled and the outcome is
    /// [`StreamOutcome::Disconnected`].
    pub async fn close(mut self) -> JobResult<StreamOutcome> {
        let task = self.task.take();
        drop(self);
        match task {
            Some(task) => task
                .await
                .map_err(|e| JobError::Internal(format!("Status stream task failed: {}", e))),
            None => Ok(StreamOutcome::Disconnected),
        }
    }
}

impl Stream for StatusStream {
    type Item = StatusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl fmt::Debug for StatusStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusStream").finish_non_exhaustive()
    }
}

async fn run_stream(
    queue: Arc<dyn JobQueue>,
    job_id: JobId,
    options: StreamOptions,
    cancel: CancellationToken,
    tx: mpsc::Sender<StatusEvent>,
) -> StreamOutcome {
    debug!(poll_interval = ?options.poll_interval, include_logs = options.include_logs, "Status stream opened");

    let outcome = poll_until_finished(queue.as_ref(), &job_id, &options, &cancel, &tx).await;

    StreamMetrics::stream_closed(outcome.as_str());
    info!(outcome = %outcome, "Status stream closed");
    outcome
}

async fn poll_until_finished(
    queue: &dyn JobQueue,
    job_id: &JobId,
    options: &StreamOptions,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<StatusEvent>,
) -> StreamOutcome {
    if !emit(tx, cancel, StatusEvent::initial(&options.messages)).await {
        return StreamOutcome::Disconnected;
    }

    let period = options.poll_interval.max(MIN_POLL_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamOutcome::Disconnected,
            _ = ticker.tick() => {}
        }

        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamOutcome::Disconnected,
            polled = poll_once(queue, job_id, options) => polled,
        };

        let (event, outcome) = match polled {
            Ok(Some(event)) => {
                StreamMetrics::poll(false);
                let outcome = match event.state {
                    JobState::Completed => Some(StreamOutcome::Completed),
                    JobState::Failed => Some(StreamOutcome::Failed),
                    JobState::Waiting | JobState::Active => None,
                };
                (event, outcome)
            }
            Ok(None) => {
                StreamMetrics::poll(false);
                debug!("Job not found");
                (StatusEvent::not_found(), Some(StreamOutcome::NotFound))
            }
            Err(e) => {
                StreamMetrics::poll(true);
                warn!(error = %e, "Status check failed");
                (StatusEvent::status_check_failed(), Some(StreamOutcome::Errored))
            }
        };

        if !emit(tx, cancel, event).await {
            return StreamOutcome::Disconnected;
        }
        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}

/// Reads the job once and builds its event, or `None` if it does not exist.
async fn poll_once(queue: &dyn JobQueue, job_id: &JobId, options: &StreamOptions) -> JobResult<Option<StatusEvent>> {
    let Some(job) = queue.get_job(job_id).await? else {
        return Ok(None);
    };

    let raw_state = queue.get_state(job_id).await?;
    let state = JobState::from_raw(&raw_state);
    let mut event = StatusEvent::new(state, job.progress_percent(), options.messages.for_state(state));

    match state {
        JobState::Failed => event.error = Some(job.failed_reason.clone().unwrap_or_default()),
        JobState::Completed => {
            if let Some(extract) = &options.extractor {
                let skipped = event.merge_extra(extract(&job)?);
                if !skipped.is_empty() {
                    debug!(?skipped, "Extractor fields collide with event fields, skipped");
                }
            }
        }
        JobState::Waiting | JobState::Active => {}
    }

    if options.include_logs {
        let logs = queue.get_job_logs(job_id, 0, LOG_TAIL_LINES - 1).await?;
        event.logs = Some(logs.logs);
    }

    Ok(Some(event))
}

/// Sends an event unless the stream was cancelled. Returns false if the
/// subscriber is gone.
async fn emit(tx: &mpsc::Sender<StatusEvent>, cancel: &CancellationToken, event: StatusEvent) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::memory::MemoryJobQueue;
    use crate::queue::MockJobQueue;
    use crate::JobLogs;
    use futures::StreamExt;
    use serde_json::json;

    const INTERVAL: Duration = Duration::from_millis(2000);

    fn job(id: &str, progress: Value) -> Job {
        let mut job = Job::new(JobId::from(id), NewJob::new("article", json!({})));
        job.progress = progress;
        job
    }

    async fn collect(stream: StatusStream) -> Vec<StatusEvent> {
        stream.collect().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_event_precedes_any_poll() {
        let mut mock = MockJobQueue::new();
        mock.expect_get_job().never();

        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let mut stream = streamer.stream(JobId::from("1"), StreamOptions::default(), CancellationToken::new());

        let first = stream.next().await.unwrap();
        assert_eq!(first.state, JobState::Waiting);
        assert_eq!(first.progress, 0);
        assert!(!first.finished);

        assert_eq!(stream.close().await.unwrap(), StreamOutcome::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_on_first_poll() {
        let mut mock = MockJobQueue::new();
        mock.expect_get_job().times(1).returning(|_| Ok(None));

        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let stream = streamer.stream(JobId::from("missing"), StreamOptions::default(), CancellationToken::new());
        let events = collect(stream).await;

        assert_eq!(events.len(), 2);
        let last = &events[1];
        assert_eq!(last.state, JobState::Failed);
        assert_eq!(last.message, "Job not found");
        assert!(last.finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_then_completion() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!({}))).await.unwrap();
        let streamer = JobStatusStreamer::new(queue.clone());
        let options = StreamOptions::default()
            .with_extractor(|job| Ok(job.return_value.clone().and_then(|v| v.as_object().cloned()).unwrap_or_default()));
        let mut stream = streamer.stream(id.clone(), options, CancellationToken::new());

        assert_eq!(stream.next().await.unwrap().state, JobState::Waiting);

        queue.take_next().await.unwrap();
        queue.update_progress(&id, json!(40)).await.unwrap();
        let active = stream.next().await.unwrap();
        assert_eq!(active.state, JobState::Active);
        assert_eq!(active.progress, 40);
        assert!(!active.finished);

        queue.complete(&id, json!({"articleId": "a-1"})).await.unwrap();
        let done = stream.next().await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.finished);
        assert_eq!(done.extra.get("articleId"), Some(&json!("a-1")));
        assert!(done.error.is_none());

        assert!(stream.next().await.is_none());
        assert_eq!(stream.close().await.unwrap(), StreamOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_carries_reason() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!({}))).await.unwrap();
        queue.fail(&id, "provider rejected prompt".to_string()).await.unwrap();

        let streamer = JobStatusStreamer::new(queue);
        let events = collect(streamer.stream(id, StreamOptions::default(), CancellationToken::new())).await;

        let last = events.last().unwrap();
        assert_eq!(last.state, JobState::Failed);
        assert_eq!(last.error.as_deref(), Some("provider rejected prompt"));
        assert_eq!(events.iter().filter(|e| e.finished).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_finishes() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!({}))).await.unwrap();
        queue.fail(&id, "provider rejected prompt".to_string()).await.unwrap();

        let options = StreamOptions::default().with_poll_interval(Duration::ZERO);
        assert_eq!(options.poll_interval, MIN_POLL_INTERVAL);

        let raw = StreamOptions {
            poll_interval: Duration::ZERO,
            ..StreamOptions::default()
        };

        for options in [options, raw] {
            let streamer = JobStatusStreamer::new(queue.clone());
            let mut stream = streamer.stream(id.clone(), options, CancellationToken::new());
            let mut events = Vec::new();
            while let Some(event) = stream.next().await {
                events.push(event);
            }
            assert_eq!(events.first().unwrap().state, JobState::Waiting);
            assert!(events.last().unwrap().finished);
            assert_eq!(stream.close().await.unwrap(), StreamOutcome::Failed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_messages_reach_events() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!({}))).await.unwrap();
        let messages = StatusMessages {
            waiting: "Queued for drafting".to_string(),
            active: "Drafting article".to_string(),
            completed: "Article ready".to_string(),
            ..StatusMessages::default()
        };
        let streamer = JobStatusStreamer::new(queue.clone());
        let mut stream = streamer.stream(
            id.clone(),
            StreamOptions::default().with_messages(messages),
            CancellationToken::new(),
        );

        assert_eq!(stream.next().await.unwrap().message, "Queued for drafting");

        queue.take_next().await.unwrap();
        let active = stream.next().await.unwrap();
        assert_eq!(active.state, JobState::Active);
        assert_eq!(active.message, "Drafting article");

        queue.complete(&id, json!(null)).await.unwrap();
        let done = stream.next().await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.message, "Article ready");
        assert!(done.finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_without_reason_has_empty_error() {
        let mut mock = MockJobQueue::new();
        mock.expect_get_job().returning(|id| Ok(Some(job(id.as_str(), json!(10)))));
        mock.expect_get_state().returning(|_| Ok("failed".to_string()));

        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let events = collect(streamer.stream(JobId::from("1"), StreamOptions::default(), CancellationToken::new())).await;

        assert_eq!(events.last().unwrap().error.as_deref(), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_after_progress() {
        let mut mock = MockJobQueue::new();
        let mut calls = 0;
        mock.expect_get_job().times(2).returning(move |id| {
            calls += 1;
            if calls == 1 {
                Ok(Some(job(id.as_str(), json!(70))))
            } else {
                Err(JobError::Internal("connection reset".to_string()))
            }
        });
        mock.expect_get_state().times(1).returning(|_| Ok("active".to_string()));

        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let events = collect(streamer.stream(JobId::from("1"), StreamOptions::default(), CancellationToken::new())).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[1].progress, 70);
        let last = &events[2];
        assert_eq!(last.state, JobState::Failed);
        assert_eq!(last.message, "Status check failed");
        assert_eq!(last.progress, 0);
        assert!(last.finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extractor_failure_is_a_poll_failure() {
        let mut mock = MockJobQueue::new();
        mock.expect_get_job().returning(|id| Ok(Some(job(id.as_str(), json!(100)))));
        mock.expect_get_state().returning(|_| Ok("completed".to_string()));

        let options =
            StreamOptions::default().with_extractor(|_| Err(JobError::Extraction("returnvalue missing".to_string())));
        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let stream = streamer.stream(JobId::from("1"), options, CancellationToken::new());
        let events = collect(stream).await;

        let last = events.last().unwrap();
        assert_eq!(last.message, "Status check failed");
        assert_eq!(last.state, JobState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_raw_state_maps_to_waiting() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!({}))).await.unwrap();
        queue.set_raw_state(&id, "delayed").unwrap();

        let streamer = JobStatusStreamer::new(queue);
        let mut stream = streamer.stream(id, StreamOptions::default(), CancellationToken::new());
        stream.next().await.unwrap();

        let polled = stream.next().await.unwrap();
        assert_eq!(polled.state, JobState::Waiting);
        assert!(!polled.finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logs_requested() {
        let mut mock = MockJobQueue::new();
        mock.expect_get_job().returning(|id| Ok(Some(job(id.as_str(), json!(100)))));
        mock.expect_get_state().returning(|_| Ok("completed".to_string()));
        mock.expect_get_job_logs()
            .withf(|_, start, end| *start == 0 && *end == 99)
            .times(1)
            .returning(|_, _, _| {
                Ok(JobLogs {
                    logs: vec!["outline ready".to_string(), "draft ready".to_string()],
                    count: 2,
                })
            });

        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let options = StreamOptions::default().with_logs(true);
        let events = collect(streamer.stream(JobId::from("1"), options, CancellationToken::new())).await;

        assert!(events[0].logs.is_none());
        assert_eq!(events[1].logs.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_once_per_interval() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!({}))).await.unwrap();
        let streamer = JobStatusStreamer::new(queue);
        let mut stream = streamer.stream(id, StreamOptions::default().with_poll_interval(INTERVAL), CancellationToken::new());

        stream.next().await.unwrap();
        let started = Instant::now();
        stream.next().await.unwrap();
        assert_eq!(started.elapsed(), INTERVAL);
        stream.next().await.unwrap();
        assert_eq!(started.elapsed(), INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_terminal_stops_silently() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!({}))).await.unwrap();
        let cancel = CancellationToken::new();
        let streamer = JobStatusStreamer::new(queue);
        let mut stream = streamer.stream(id, StreamOptions::default(), cancel.clone());

        stream.next().await.unwrap();
        stream.next().await.unwrap();
        cancel.cancel();

        tokio::time::sleep(INTERVAL * 2).await;
        assert!(stream.next().await.is_none());
        assert_eq!(stream.close().await.unwrap(), StreamOutcome::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_cancels_polling() {
        let mut mock = MockJobQueue::new();
        mock.expect_get_job().never();
        let cancel = CancellationToken::new();

        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let stream = streamer.stream(JobId::from("1"), StreamOptions::default(), cancel.clone());
        drop(stream);

        assert!(cancel.is_cancelled());
        tokio::time::sleep(INTERVAL * 3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_natural_end_is_noop() {
        let mut mock = MockJobQueue::new();
        mock.expect_get_job().times(1).returning(|_| Ok(None));
        let cancel = CancellationToken::new();

        let streamer = JobStatusStreamer::new(Arc::new(mock));
        let mut stream = streamer.stream(JobId::from("1"), StreamOptions::default(), cancel.clone());
        while stream.next().await.is_some() {}

        cancel.cancel();
        assert_eq!(stream.close().await.unwrap(), StreamOutcome::NotFound);
    }
}
