//! Job REST API controller.

use crate::responses::{created, ok, ApiResponse, ApiResult, AppError};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use lumen_core::LumenError;
use lumen_jobs::{JobId, JobState, NewJob};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tracing::{debug, warn};

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/events", get(job_events))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for enqueuing a job.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Job type name.
    pub name: String,
    /// Job payload.
    #[serde(default)]
    pub data: Value,
}

/// Response for an enqueued job.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub id: String,
}

/// Response for job details.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: String,
    pub name: String,
    pub state: JobState,
    pub raw_state: String,
    pub progress: u32,
    pub data: Value,
    pub return_value: Option<Value>,
    pub failed_reason: Option<String>,
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Query parameters for the event stream.
#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    /// Attach job log lines to polled events.
    #[serde(default)]
    pub logs: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateJobResponse>>), AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(LumenError::validation("Job name must not be empty").into());
    }

    let id = state.queue.enqueue(NewJob::new(name, request.data)).await?;
    debug!(job_id = %id, job_name = %name, "Job accepted");

    Ok(created(CreateJobResponse { id: id.to_string() }))
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<JobResponse> {
    let id = JobId::from(job_id);
    let job = state
        .queue
        .get_job(&id)
        .await?
        .ok_or_else(|| LumenError::not_found("Job", &id))?;
    let raw_state = state.queue.get_state(&id).await?;

    ok(JobResponse {
        id: job.id.to_string(),
        state: JobState::from_raw(&raw_state),
        raw_state,
        progress: job.progress_percent(),
        name: job.name,
        data: job.data,
        return_value: job.return_value,
        failed_reason: job.failed_reason,
        attempts_made: job.attempts_made,
        created_at: job.timestamp,
        processed_at: job.processed_on,
        finished_at: job.finished_on,
    })
}

/// Streams status events for one job as Server-Sent Events.
///
/// The stream ends after the terminal event. A client disconnect drops the
/// response body, which cancels polling.
async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let options = state.stream_options(params.logs);
    let events = state
        .streamer
        .stream(JobId::from(job_id), options, state.shutdown.child_token())
        .filter_map(|event| async move {
            match Event::default().json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    warn!(error = %e, "Failed to encode status event");
                    None
                }
            }
        });

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.stream_config.keep_alive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use lumen_config::StreamConfig;
    use lumen_jobs::{JobQueue, MemoryJobQueue};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(queue: Arc<MemoryJobQueue>) -> Router {
        let stream_config = StreamConfig {
            poll_interval_ms: 10,
            ..StreamConfig::default()
        };
        router().with_state(AppState::new(queue, stream_config))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_create_job() {
        let queue = Arc::new(MemoryJobQueue::new());
        let request = Request::post("/jobs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"article","data":{"topic":"tides"}}"#))
            .unwrap();

        let response = app(queue.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        let id = JobId::from(body["data"]["id"].as_str().unwrap());
        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.data, json!({"topic": "tides"}));
        assert_eq!(queue.waiting_len(), 1);
    }

    #[tokio::test]
    async fn test_create_job_rejects_blank_name() {
        let queue = Arc::new(MemoryJobQueue::new());
        let request = Request::post("/jobs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"  "}"#))
            .unwrap();

        let response = app(queue.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(queue.waiting_len(), 0);
    }

    #[tokio::test]
    async fn test_get_job() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!(null))).await.unwrap();
        queue.set_raw_state(&id, "delayed").unwrap();

        let request = Request::get(format!("/jobs/{}", id)).body(Body::empty()).unwrap();
        let response = app(queue).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["data"]["state"], "waiting");
        assert_eq!(body["data"]["raw_state"], "delayed");
        assert_eq!(body["data"]["progress"], 0);
    }

    #[tokio::test]
    async fn test_get_unknown_job() {
        let request = Request::get("/jobs/nope").body(Body::empty()).unwrap();
        let response = app(Arc::new(MemoryJobQueue::new())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_events_stream_until_terminal() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!(null))).await.unwrap();
        queue.take_next().await.unwrap();
        queue.add_log(&id, "done drafting".to_string()).await.unwrap();
        queue.complete(&id, json!({"text": "..."})).await.unwrap();

        let request = Request::get(format!("/jobs/{}/events?logs=true", id))
            .body(Body::empty())
            .unwrap();
        let response = app(queue).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let text = body_text(response).await;
        let events: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["state"], "waiting");
        assert_eq!(events[0]["finished"], false);
        assert_eq!(events[1]["state"], "completed");
        assert_eq!(events[1]["progress"], 100);
        assert_eq!(events[1]["finished"], true);
        assert_eq!(events[1]["logs"], json!(["done drafting"]));
    }

    #[tokio::test]
    async fn test_events_end_on_shutdown() {
        let queue = Arc::new(MemoryJobQueue::new());
        let id = queue.enqueue(NewJob::new("article", json!(null))).await.unwrap();
        let shutdown = tokio_util::sync::CancellationToken::new();
        let state = AppState::new(queue, StreamConfig::default()).with_shutdown(shutdown.clone());

        let request = Request::get(format!("/jobs/{}/events", id)).body(Body::empty()).unwrap();
        let response = router().with_state(state).oneshot(request).await.unwrap();
        shutdown.cancel();

        let text = body_text(response).await;
        assert!(!text.contains(r#""finished":true"#));
    }

    #[tokio::test]
    async fn test_events_for_unknown_job() {
        let request = Request::get("/jobs/missing/events").body(Body::empty()).unwrap();
        let response = app(Arc::new(MemoryJobQueue::new())).oneshot(request).await.unwrap();

        let text = body_text(response).await;
        assert!(text.contains(r#""message":"Job not found""#));
        assert!(text.contains(r#""finished":true"#));
    }
}
