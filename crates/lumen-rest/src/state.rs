//! Application state for Axum handlers.

use lumen_config::StreamConfig;
use lumen_jobs::{JobQueue, JobStatusStreamer, StreamOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub streamer: JobStatusStreamer,
    pub stream_config: StreamConfig,
    pub metrics: Option<PrometheusHandle>,
    /// Cancelled on server shutdown; ends every open status stream.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(queue: Arc<dyn JobQueue>, stream_config: StreamConfig) -> Self {
        Self {
            streamer: JobStatusStreamer::new(Arc::clone(&queue)),
            queue,
            stream_config,
            metrics: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Attaches the Prometheus handle rendered by the metrics endpoint.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Ties open status streams to `shutdown`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Stream options derived from the configured stream settings.
    pub fn stream_options(&self, include_logs: bool) -> StreamOptions {
        StreamOptions::default()
            .with_poll_interval(self.stream_config.poll_interval())
            .with_channel_capacity(self.stream_config.channel_capacity)
            .with_logs(include_logs)
    }
}
