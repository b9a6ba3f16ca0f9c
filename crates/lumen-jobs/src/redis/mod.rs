//! Redis-backed job queue implementation.

mod queue;

pub use queue::RedisJobQueue;

use crate::error::JobResult;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use lumen_config::RedisConfig;
use std::sync::OnceLock;
use tracing::info;

static SHARED_POOL: OnceLock<Pool> = OnceLock::new();

/// Process-wide Redis connection handle.
///
/// The pool is built on first use and lives for the rest of the process.
/// Building it does not dial Redis; connectivity errors surface when a
/// command is issued.
pub struct SharedConnection;

impl SharedConnection {
    /// Returns the shared pool, building it from `config` on first call.
    ///
    /// Later calls return the same pool and ignore `config`. Fails only on
    /// malformed settings.
    pub fn get_connection(config: &RedisConfig) -> JobResult<&'static Pool> {
        if let Some(pool) = SHARED_POOL.get() {
            return Ok(pool);
        }

        let pool = create_pool(config)?;
        Ok(SHARED_POOL.get_or_init(|| pool))
    }

    /// Returns the shared pool if it has been built.
    pub fn get() -> Option<&'static Pool> {
        SHARED_POOL.get()
    }
}

/// Create a Redis connection pool.
///
/// Waiting for a free connection, creating one, and recycling one are all
/// bounded, so commands against an unreachable server fail fast instead of
/// queueing.
pub fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    let target = config.resolve()?;

    info!(
        target = %target.redacted(),
        pool_size = config.pool_size,
        "Creating Redis connection pool for job queue..."
    );

    let mut cfg = Config::from_url(target.url());
    let mut pool_config = PoolConfig::new(config.pool_size);
    pool_config.timeouts = Timeouts {
        wait: Some(config.wait_timeout()),
        create: Some(config.connect_timeout()),
        recycle: Some(config.connect_timeout()),
    };
    cfg.pool = Some(pool_config);

    Ok(cfg.create_pool(Some(Runtime::Tokio1))?)
}

/// Redis key builder for one queue.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    base: String,
}

impl RedisKeys {
    /// Create a key builder for `queue` under `prefix`.
    pub fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue),
        }
    }

    /// Job hash key.
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:{}", self.base, job_id)
    }

    /// Prefix shared by every job hash key.
    pub fn job_prefix(&self) -> String {
        format!("{}:", self.base)
    }

    /// Job log list key.
    pub fn logs(&self, job_id: &str) -> String {
        format!("{}:{}:logs", self.base, job_id)
    }

    /// Waiting job ID list.
    pub fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    /// Active job ID list.
    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("lumen", "generation")
    }
}
