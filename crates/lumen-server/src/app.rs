//! Application bootstrap: wires configuration into the queue, worker pool and
//! HTTP server.

use crate::generation::{provider_rotator, GenerationProcessor};
use crate::startup;
use lumen_config::AppConfig;
use lumen_core::{LumenError, LumenResult};
use lumen_jobs::{JobQueue, MemoryJobQueue, RedisJobQueue, SharedConnection, WorkerPool, WorkerPoolConfig};
use lumen_resilience::CredentialSet;
use lumen_rest::{create_router, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A configured application, ready to serve.
pub struct App {
    config: AppConfig,
    queue: Arc<dyn JobQueue>,
    worker_pool: Option<Arc<WorkerPool>>,
    metrics: Option<PrometheusHandle>,
    shutdown: CancellationToken,
}

impl App {
    /// Builds every component from `config`.
    ///
    /// Fails when no API credentials are configured or the connection
    /// settings are malformed. Building does not contact Redis.
    pub fn build(config: AppConfig) -> LumenResult<Self> {
        let credentials = CredentialSet::new(config.credentials.api_keys.iter().cloned())?;
        info!(credentials = credentials.len(), "Loaded provider credentials");

        let queue = create_queue(&config)?;
        let shutdown = CancellationToken::new();

        let worker_pool = if config.worker.enabled {
            let rotator = Arc::new(provider_rotator(&config.provider, credentials)?);
            let processor = Arc::new(GenerationProcessor::new(rotator, config.provider.max_attempts));
            Some(Arc::new(WorkerPool::new(
                Arc::clone(&queue),
                processor,
                WorkerPoolConfig::from(&config.worker),
                shutdown.child_token(),
            )))
        } else {
            info!("Worker pool disabled");
            None
        };

        let metrics = if config.observability.metrics_enabled {
            Some(install_metrics_recorder()?)
        } else {
            None
        };

        Ok(Self {
            config,
            queue,
            worker_pool,
            metrics,
            shutdown,
        })
    }

    /// Token cancelled when the application shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The job queue in use.
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> axum::Router {
        let mut state = AppState::new(Arc::clone(&self.queue), self.config.stream.clone())
            .with_shutdown(self.shutdown.child_token());
        if let Some(handle) = &self.metrics {
            state = state.with_metrics(handle.clone());
        }
        create_router(state, &self.config.server, &self.config.observability)
    }

    /// Serves HTTP and runs the worker pool until Ctrl+C or SIGTERM.
    pub async fn run(self) -> LumenResult<()> {
        if let Err(e) = self.queue.health_check().await {
            warn!(error = %e, "Job queue is not reachable yet");
        }

        let worker = self.worker_pool.as_ref().map(|pool| spawn_worker_pool(Arc::clone(pool)));

        let addr = self.config.server.addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| LumenError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        startup::print_startup_info(&self.config);

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await
            .map_err(|e| LumenError::Internal(format!("HTTP server error: {}", e)));

        // The server may also stop on its own error.
        self.shutdown.cancel();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker pool task panicked");
            }
        }

        info!("Server shutdown complete");
        result
    }
}

/// Creates the Redis queue over the shared connection, or the in-memory queue
/// when Redis is disabled.
fn create_queue(config: &AppConfig) -> LumenResult<Arc<dyn JobQueue>> {
    if !config.redis.enabled {
        warn!("Redis disabled, jobs are kept in memory only");
        return Ok(Arc::new(MemoryJobQueue::new()));
    }

    let pool = SharedConnection::get_connection(&config.redis)?;
    Ok(Arc::new(RedisJobQueue::new(
        pool.clone(),
        &config.redis.key_prefix,
        &config.redis.queue_name,
    )))
}

fn spawn_worker_pool(pool: Arc<WorkerPool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = pool.run().await {
            error!(error = %e, "Worker pool stopped with error");
        }
    })
}

/// Installs the global Prometheus recorder and describes every metric.
fn install_metrics_recorder() -> LumenResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| LumenError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    lumen_jobs::register_metrics();
    lumen_resilience::register_metrics();
    Ok(handle)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
