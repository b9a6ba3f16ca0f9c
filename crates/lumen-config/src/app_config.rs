//! Application configuration structures.

use lumen_core::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Backing store (Redis) configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Generation API credentials.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Job status streaming configuration.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Generation provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Logging and tracing configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "lumen".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Enable CORS.
    pub cors_enabled: bool,
    /// CORS allowed origins.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Redis connection configuration.
///
/// Either `url` or the discrete `host`/`port`/`password` fields describe the
/// connection; `url` wins when both are present.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Use Redis. When disabled the in-process queue backs the service.
    pub enabled: bool,
    /// Full connection URL (`redis://` or `rediss://`).
    pub url: Option<String>,
    /// Host used when no URL is configured.
    pub host: String,
    /// Port used when no URL is configured.
    pub port: u16,
    /// ACL username used when no URL is configured.
    pub username: Option<String>,
    /// Password used when no URL is configured.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
    /// Use TLS when no URL is configured.
    pub tls: bool,
    /// Connection pool size.
    pub pool_size: usize,
    /// Upper bound for establishing a new connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Upper bound for waiting on a free pooled connection, in milliseconds.
    pub wait_timeout_ms: u64,
    /// Key prefix for all queue keys.
    pub key_prefix: String,
    /// Queue name jobs are enqueued on.
    pub queue_name: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            tls: false,
            pool_size: 16,
            connect_timeout_ms: 5_000,
            wait_timeout_ms: 5_000,
            key_prefix: "lumen".to_string(),
            queue_name: "generation".to_string(),
        }
    }
}

impl RedisConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the pool wait timeout as a Duration.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("tls", &self.tls)
            .field("pool_size", &self.pool_size)
            .field("key_prefix", &self.key_prefix)
            .field("queue_name", &self.queue_name)
            .finish_non_exhaustive()
    }
}

/// Generation API credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Interchangeable API keys, tried in order.
    pub api_keys: Vec<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .finish()
    }
}

/// Job status streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Interval between two polls of the same job, in milliseconds.
    pub poll_interval_ms: u64,
    /// Buffered events per subscriber before the poller waits for the client.
    pub channel_capacity: usize,
    /// SSE keep-alive comment interval, in seconds.
    pub keep_alive_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            channel_capacity: 16,
            keep_alive_secs: 15,
        }
    }
}

impl StreamConfig {
    /// Returns the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the keep-alive interval as a Duration.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Run the worker pool inside the server process.
    pub enabled: bool,
    /// Maximum jobs processed concurrently.
    pub concurrency: usize,
    /// Idle polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Shutdown grace period in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 4,
            poll_interval_ms: 500,
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Returns the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the shutdown timeout as a Duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Generation provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Endpoint the generation request is POSTed to.
    pub endpoint: String,
    /// Header carrying the API key.
    pub api_key_header: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum attempts per job; defaults to the number of credentials.
    pub max_attempts: Option<usize>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
                .to_string(),
            api_key_header: "x-goog-api-key".to_string(),
            request_timeout_secs: 120,
            max_attempts: None,
        }
    }
}

impl ProviderConfig {
    /// Returns the request timeout as a Duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus recorder.
    pub metrics_enabled: bool,
    /// Metrics endpoint path.
    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_path: "/metrics".to_string(),
        }
    }
}
