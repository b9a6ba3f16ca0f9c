//! Configuration loader with layered sources.

use crate::{AppConfig, ConfigValidator};
use config::{Config, ConfigError, Environment, File};
use lumen_core::{LumenError, LumenResult};
use std::path::Path;
use tracing::{debug, info};

/// Variable holding a comma-separated list of generation API keys.
pub const API_KEYS_VAR: &str = "GENAI_API_KEYS";
/// Single-key fallback used when [`API_KEYS_VAR`] is unset or empty.
pub const API_KEY_VAR: &str = "GENAI_API_KEY";

/// Loads the layered configuration from a directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a loader reading TOML files from `config_dir`.
    pub fn new(config_dir: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Loader for the default location (`./config`).
    pub fn from_default_location() -> Self {
        Self::new("./config")
    }

    /// Loads and validates the configuration.
    ///
    /// Sources are applied in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `LUMEN__` prefix
    /// 5. `REDIS_*`, `GENAI_API_KEYS` and `GENAI_API_KEY`
    ///
    /// `.env` is read first when present.
    pub fn load(&self) -> LumenResult<AppConfig> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = std::env::var("LUMEN_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        load_layered(&self.config_dir, &environment, |name| std::env::var(name).ok())
    }
}

/// Builds, overrides and validates the configuration.
///
/// `lookup` resolves the conventional unprefixed variables so callers can
/// substitute the process environment.
pub fn load_layered<F>(config_dir: &str, environment: &str, lookup: F) -> LumenResult<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    info!("Loading configuration for environment: {}", environment);

    let mut builder = Config::builder();

    for name in ["default", environment, "local"] {
        let path = format!("{}/{}.toml", config_dir, name);
        if Path::new(&path).exists() {
            debug!("Loading config from: {}", path);
            builder = builder.add_source(File::with_name(&path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("LUMEN")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("credentials.api_keys")
            .with_list_parse_key("server.cors_origins")
            .try_parsing(true),
    );

    let mut app_config: AppConfig = builder
        .build()
        .and_then(|config| config.try_deserialize::<AppConfig>())
        .map_err(config_error_to_lumen_error)?;

    if app_config.app.environment != environment {
        app_config.app.environment = environment.to_string();
    }

    apply_env_overrides(&mut app_config, lookup)?;

    ConfigValidator::validate(&app_config).map_err(|errors| {
        let joined = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        LumenError::Configuration(joined)
    })?;

    Ok(app_config)
}

/// Applies the conventional `REDIS_*` and `GENAI_API_KEY*` variables.
///
/// A present, non-empty variable replaces the layered value.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> LumenResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let redis = &mut config.redis;

    if let Some(url) = var("REDIS_URL") {
        redis.url = Some(url);
    }
    if let Some(host) = var("REDIS_HOST") {
        redis.host = host;
    }
    if let Some(port) = var("REDIS_PORT") {
        redis.port = port
            .parse()
            .map_err(|_| LumenError::Configuration(format!("REDIS_PORT is not a valid port: '{}'", port)))?;
    }
    if let Some(username) = var("REDIS_USERNAME") {
        redis.username = Some(username);
    }
    if let Some(password) = var("REDIS_PASSWORD") {
        redis.password = Some(password);
    }
    if let Some(db) = var("REDIS_DB") {
        redis.db = db
            .parse()
            .map_err(|_| LumenError::Configuration(format!("REDIS_DB is not a valid index: '{}'", db)))?;
    }
    if let Some(tls) = var("REDIS_TLS") {
        redis.tls = matches!(tls.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }

    let keys = var(API_KEYS_VAR)
        .map(|list| split_credentials(&list))
        .filter(|keys| !keys.is_empty())
        .or_else(|| var(API_KEY_VAR).map(|key| vec![key]));
    if let Some(keys) = keys {
        debug!(count = keys.len(), "Generation API keys taken from environment");
        config.credentials.api_keys = keys;
    }

    Ok(())
}

/// Splits a comma-separated credential list, dropping blank entries.
#[must_use]
pub fn split_credentials(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn config_error_to_lumen_error(err: ConfigError) -> LumenError {
    LumenError::Configuration(err.to_string())
}
