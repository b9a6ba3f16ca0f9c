//! Generation jobs: the provider client and the processor the worker pool runs.

use async_trait::async_trait;
use lumen_config::ProviderConfig;
use lumen_core::{LumenError, LumenResult};
use lumen_jobs::{Job, JobContext, JobError, Processor};
use lumen_resilience::{CredentialRotator, CredentialSet, ProviderError};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the generation provider, bound to one API key.
#[derive(Clone)]
pub struct ProviderClient {
    http: Client,
    endpoint: Arc<str>,
    api_key_header: Arc<str>,
    api_key: String,
}

impl ProviderClient {
    /// Sends one generation request.
    ///
    /// Non-success responses become a [`ProviderError`] carrying the HTTP
    /// status, so an exhausted quota is classified as rate limited.
    pub async fn generate(&self, payload: &Value) -> Result<Value, ProviderError> {
        let response = self
            .http
            .post(self.endpoint.as_ref())
            .header(self.api_key_header.as_ref(), &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                let error = ProviderError::new(format!("Provider request failed: {}", e));
                match e.status() {
                    Some(status) => error.with_status(status.as_u16()),
                    None => error,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http(
                status.as_u16(),
                format!("Provider returned {}: {}", status, truncate(&body, MAX_ERROR_BODY)),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::new(format!("Invalid provider response: {}", e)))
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Builds the rotator handing out provider clients, one per credential.
pub fn provider_rotator(
    config: &ProviderConfig,
    credentials: CredentialSet,
) -> LumenResult<CredentialRotator<ProviderClient>> {
    let http = Client::builder()
        .timeout(config.request_timeout())
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .build()
        .map_err(|e| LumenError::Internal(format!("Failed to create HTTP client: {}", e)))?;
    let endpoint: Arc<str> = Arc::from(config.endpoint.as_str());
    let api_key_header: Arc<str> = Arc::from(config.api_key_header.as_str());

    Ok(CredentialRotator::new(credentials, move |api_key: &str| ProviderClient {
        http: http.clone(),
        endpoint: Arc::clone(&endpoint),
        api_key_header: Arc::clone(&api_key_header),
        api_key: api_key.to_string(),
    }))
}

/// Runs generation jobs against the provider with credential rotation.
pub struct GenerationProcessor {
    rotator: Arc<CredentialRotator<ProviderClient>>,
    max_attempts: Option<usize>,
}

impl GenerationProcessor {
    /// Creates a processor. `max_attempts` defaults to one per credential.
    pub fn new(rotator: Arc<CredentialRotator<ProviderClient>>, max_attempts: Option<usize>) -> Self {
        Self { rotator, max_attempts }
    }
}

#[async_trait]
impl Processor for GenerationProcessor {
    async fn process(&self, job: &Job, ctx: &JobContext) -> Result<Value, JobError> {
        let payload = request_body(&job.data);
        ctx.log("Sending generation request").await?;
        ctx.report_progress(10).await?;

        let payload = &payload;
        let response = self
            .rotator
            .with_rotation(
                move |client: ProviderClient| async move { client.generate(payload).await },
                self.max_attempts,
            )
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        debug!(credential_index = self.rotator.current_index(), "Generation succeeded");
        ctx.log("Generation finished").await?;
        ctx.report_progress(90).await?;
        Ok(response)
    }
}

/// Builds the provider request for a job payload.
///
/// A payload with a string `prompt` is wrapped in a single-turn request;
/// anything else is forwarded unchanged.
fn request_body(data: &Value) -> Value {
    match data.get("prompt").and_then(Value::as_str) {
        Some(prompt) => json!({ "contents": [{ "parts": [{ "text": prompt }] }] }),
        None => data.clone(),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
