//! Integration tests for the generation worker against a local fake provider.
//!
//! The fake provider answers 429 for every key listed as exhausted and echoes
//! the request for any other key.

use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use lumen_config::ProviderConfig;
use lumen_jobs::{JobId, JobQueue, MemoryJobQueue, NewJob, WorkerPool, WorkerPoolConfig};
use lumen_resilience::CredentialSet;
use lumen_server::{provider_rotator, GenerationProcessor};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KEY_HEADER: &str = "x-test-api-key";

#[derive(Clone, Default)]
struct FakeProvider {
    exhausted: Arc<HashSet<String>>,
    seen_keys: Arc<Mutex<Vec<String>>>,
}

async fn generate(
    State(provider): State<FakeProvider>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let key = headers
        .get(KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    provider.seen_keys.lock().unwrap().push(key.clone());

    if provider.exhausted.contains(&key) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}})),
        );
    }
    if body.get("reject").is_some() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": {"code": 400}})));
    }
    (StatusCode::OK, Json(json!({"key": key, "request": body})))
}

async fn start_provider(exhausted: &[&str]) -> (String, FakeProvider) {
    let provider = FakeProvider {
        exhausted: Arc::new(exhausted.iter().map(|k| (*k).to_string()).collect()),
        seen_keys: Arc::default(),
    };
    let app = Router::new()
        .route("/generate", post(generate))
        .with_state(provider.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/generate", addr), provider)
}

struct Harness {
    queue: Arc<MemoryJobQueue>,
    shutdown: CancellationToken,
    worker: tokio::task::JoinHandle<()>,
}

fn start_worker(endpoint: String, keys: &[&str]) -> Harness {
    let config = ProviderConfig {
        endpoint,
        api_key_header: KEY_HEADER.to_string(),
        request_timeout_secs: 5,
        max_attempts: None,
    };
    let rotator = Arc::new(provider_rotator(&config, CredentialSet::new(keys.iter().copied()).unwrap()).unwrap());

    let queue = Arc::new(MemoryJobQueue::new());
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(
        queue.clone(),
        Arc::new(GenerationProcessor::new(rotator, None)),
        WorkerPoolConfig {
            concurrency: 1,
            poll_interval: Duration::from_millis(5),
            shutdown_timeout: Duration::from_secs(1),
        },
        shutdown.clone(),
    );
    let worker = tokio::spawn(async move {
        pool.run().await.unwrap();
    });

    Harness { queue, shutdown, worker }
}

async fn wait_until_finished(queue: &MemoryJobQueue, id: &JobId) -> String {
    for _ in 0..500 {
        let state = queue.get_state(id).await.unwrap();
        if state == "completed" || state == "failed" {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rotates_past_exhausted_keys() {
    let (endpoint, provider) = start_provider(&["key-a", "key-b"]).await;
    let harness = start_worker(endpoint, &["key-a", "key-b", "key-c"]);

    let id = harness
        .queue
        .enqueue(NewJob::new("article", json!({"prompt": "Write about tides"})))
        .await
        .unwrap();
    assert_eq!(wait_until_finished(&harness.queue, &id).await, "completed");

    let job = harness.queue.get_job(&id).await.unwrap().unwrap();
    let result = job.return_value.unwrap();
    assert_eq!(result["key"], "key-c");
    assert_eq!(result["request"]["contents"][0]["parts"][0]["text"], "Write about tides");
    assert_eq!(*provider.seen_keys.lock().unwrap(), vec!["key-a", "key-b", "key-c"]);

    let logs = harness.queue.get_job_logs(&id, 0, 99).await.unwrap().logs;
    assert_eq!(logs, vec!["Sending generation request", "Generation finished"]);

    // The rotation sticks for the next job.
    let next = harness.queue.enqueue(NewJob::new("article", json!({"prompt": "Again"}))).await.unwrap();
    assert_eq!(wait_until_finished(&harness.queue, &next).await, "completed");
    assert_eq!(provider.seen_keys.lock().unwrap().last().map(String::as_str), Some("key-c"));

    harness.shutdown.cancel();
    harness.worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fails_when_every_key_is_exhausted() {
    let (endpoint, provider) = start_provider(&["key-a", "key-b"]).await;
    let harness = start_worker(endpoint, &["key-a", "key-b"]);

    let id = harness.queue.enqueue(NewJob::new("article", json!({"prompt": "x"}))).await.unwrap();
    assert_eq!(wait_until_finished(&harness.queue, &id).await, "failed");

    let job = harness.queue.get_job(&id).await.unwrap().unwrap();
    assert!(job.failed_reason.unwrap().contains("429"));
    assert_eq!(provider.seen_keys.lock().unwrap().len(), 2);

    harness.shutdown.cancel();
    harness.worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_other_errors_do_not_rotate() {
    let (endpoint, provider) = start_provider(&[]).await;
    let harness = start_worker(endpoint, &["key-a", "key-b"]);

    let id = harness.queue.enqueue(NewJob::new("article", json!({"reject": true}))).await.unwrap();
    assert_eq!(wait_until_finished(&harness.queue, &id).await, "failed");

    let job = harness.queue.get_job(&id).await.unwrap().unwrap();
    assert!(job.failed_reason.unwrap().contains("400"));
    assert_eq!(*provider.seen_keys.lock().unwrap(), vec!["key-a"]);

    harness.shutdown.cancel();
    harness.worker.await.unwrap();
}
