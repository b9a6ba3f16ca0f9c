//! Rate-limit classification of provider errors.

use lumen_core::LumenError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP status signalling an exhausted quota.
pub const TOO_MANY_REQUESTS: u16 = 429;

const RATE_LIMIT_MARKERS: [&str; 3] = ["429", "RESOURCE_EXHAUSTED", "rate limit"];

/// Returns true if an error message carries a rate-limit marker.
///
/// Matching is case-sensitive.
#[must_use]
pub fn message_signals_rate_limit(message: &str) -> bool {
    RATE_LIMIT_MARKERS.iter().any(|marker| message.contains(marker))
}

/// An error that can tell whether it was caused by an exceeded quota.
pub trait RateLimitSignal {
    /// Human-readable error message inspected for rate-limit markers.
    fn signal_message(&self) -> String;

    /// Structured status codes carried by the error, if any.
    fn signal_status_codes(&self) -> Vec<u16> {
        Vec::new()
    }

    /// Whether the error indicates an exceeded quota.
    fn is_rate_limited(&self) -> bool {
        self.signal_status_codes().contains(&TOO_MANY_REQUESTS) || message_signals_rate_limit(&self.signal_message())
    }
}

/// Structured error returned by a generation provider.
///
/// Mirrors the JSON shape providers commonly return, where either `status`
/// or `httpStatusCode` carries the HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ProviderError {
    /// Status code reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// HTTP status code of the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    /// Error message.
    pub message: String,
}

impl ProviderError {
    /// Creates an error without a status code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            http_status_code: None,
            message: message.into(),
        }
    }

    /// Creates an error from a non-success HTTP response.
    pub fn from_http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: None,
            http_status_code: Some(status),
            message: message.into(),
        }
    }

    /// Sets the provider-reported status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl RateLimitSignal for ProviderError {
    fn signal_message(&self) -> String {
        self.message.clone()
    }

    fn signal_status_codes(&self) -> Vec<u16> {
        self.status.into_iter().chain(self.http_status_code).collect()
    }
}

impl RateLimitSignal for anyhow::Error {
    fn signal_message(&self) -> String {
        format!("{:#}", self)
    }

    fn signal_status_codes(&self) -> Vec<u16> {
        self.chain()
            .filter_map(|cause| cause.downcast_ref::<ProviderError>())
            .flat_map(ProviderError::signal_status_codes)
            .collect()
    }
}

impl RateLimitSignal for LumenError {
    fn signal_message(&self) -> String {
        self.to_string()
    }

    fn signal_status_codes(&self) -> Vec<u16> {
        match self {
            Self::RateLimitExceeded => vec![TOO_MANY_REQUESTS],
            Self::Other(inner) => inner.signal_status_codes(),
            _ => Vec::new(),
        }
    }
}

impl From<ProviderError> for LumenError {
    fn from(err: ProviderError) -> Self {
        if err.is_rate_limited() {
            Self::RateLimitExceeded
        } else {
            Self::ExternalService {
                service: "generation-provider".to_string(),
                message: err.message,
            }
        }
    }
}
