//! Configuration validation module.
//!
//! Collects every problem in one pass so an operator sees all of them at
//! startup rather than one per restart.

use crate::AppConfig;
use std::fmt;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// No generation API credential configured.
    MissingCredentials,
    /// A configured credential is blank.
    BlankCredential { index: usize },
    /// Port number is invalid (must be 1-65535).
    InvalidPort { name: String, value: u16 },
    /// Redis connection settings cannot be resolved.
    InvalidRedis { message: String },
    /// A size must be at least one.
    ZeroSize { name: String },
    /// Interval or timeout value must be positive.
    NonPositiveDuration { name: String },
    /// Sampling ratio must be between 0.0 and 1.0.
    InvalidSamplingRatio { value: f64 },
    /// Metrics path must be absolute.
    InvalidMetricsPath { value: String },
    /// Provider endpoint must be an http(s) URL.
    InvalidProviderEndpoint { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredentials => {
                write!(f, "At least one generation API key is required (GENAI_API_KEYS or GENAI_API_KEY)")
            }
            Self::BlankCredential { index } => write!(f, "Generation API key #{} is blank", index),
            Self::InvalidPort { name, value } => {
                write!(f, "Invalid port for {}: {} (must be 1-65535)", name, value)
            }
            Self::InvalidRedis { message } => write!(f, "Invalid Redis settings: {}", message),
            Self::ZeroSize { name } => write!(f, "'{}' must be at least 1", name),
            Self::NonPositiveDuration { name } => write!(f, "'{}' must be positive", name),
            Self::InvalidSamplingRatio { value } => {
                write!(f, "Invalid sampling ratio: {} (must be between 0.0 and 1.0)", value)
            }
            Self::InvalidMetricsPath { value } => {
                write!(f, "Metrics path must start with '/', got '{}'", value)
            }
            Self::InvalidProviderEndpoint { value } => {
                write!(f, "Provider endpoint must be an http(s) URL, got '{}'", value)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_credentials(config, &mut errors);
        Self::validate_server(config, &mut errors);
        Self::validate_redis(config, &mut errors);
        Self::validate_runtime(config, &mut errors);
        Self::validate_observability(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_credentials(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let keys = &config.credentials.api_keys;
        if keys.is_empty() {
            errors.push(ConfigValidationError::MissingCredentials);
            return;
        }
        for (index, key) in keys.iter().enumerate() {
            if key.trim().is_empty() {
                errors.push(ConfigValidationError::BlankCredential { index });
            }
        }
    }

    fn validate_server(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.server.port == 0 {
            errors.push(ConfigValidationError::InvalidPort {
                name: "server.port".to_string(),
                value: 0,
            });
        }
    }

    fn validate_redis(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let redis = &config.redis;
        if !redis.enabled {
            return;
        }

        if let Err(e) = redis.resolve() {
            errors.push(ConfigValidationError::InvalidRedis { message: e.to_string() });
        }
        if redis.pool_size == 0 {
            errors.push(ConfigValidationError::ZeroSize {
                name: "redis.pool_size".to_string(),
            });
        }
        if redis.connect_timeout_ms == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "redis.connect_timeout_ms".to_string(),
            });
        }
        if redis.wait_timeout_ms == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "redis.wait_timeout_ms".to_string(),
            });
        }
    }

    fn validate_runtime(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.stream.poll_interval_ms == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "stream.poll_interval_ms".to_string(),
            });
        }
        if config.stream.channel_capacity == 0 {
            errors.push(ConfigValidationError::ZeroSize {
                name: "stream.channel_capacity".to_string(),
            });
        }
        if config.worker.enabled {
            if config.worker.concurrency == 0 {
                errors.push(ConfigValidationError::ZeroSize {
                    name: "worker.concurrency".to_string(),
                });
            }
            if config.worker.poll_interval_ms == 0 {
                errors.push(ConfigValidationError::NonPositiveDuration {
                    name: "worker.poll_interval_ms".to_string(),
                });
            }
            let endpoint = &config.provider.endpoint;
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(ConfigValidationError::InvalidProviderEndpoint {
                    value: endpoint.clone(),
                });
            }
        }
    }

    fn validate_observability(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let ratio = config.telemetry.sampling_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            errors.push(ConfigValidationError::InvalidSamplingRatio { value: ratio });
        }
        if config.observability.metrics_enabled && !config.observability.metrics_path.starts_with('/') {
            errors.push(ConfigValidationError::InvalidMetricsPath {
                value: config.observability.metrics_path.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.credentials.api_keys = vec!["key-1".to_string()];
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = AppConfig::default();
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::MissingCredentials));
    }

    #[test]
    fn test_blank_credential_rejected() {
        let mut config = valid_config();
        config.credentials.api_keys.push("  ".to_string());
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors, vec![ConfigValidationError::BlankCredential { index: 1 }]);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = valid_config();
        config.stream.poll_interval_ms = 0;
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(
            &errors[0],
            ConfigValidationError::NonPositiveDuration { name } if name == "stream.poll_interval_ms"
        ));
    }

    #[test]
    fn test_redis_settings_skipped_when_disabled() {
        let mut config = valid_config();
        config.redis.enabled = false;
        config.redis.url = Some("http://not-redis".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.redis.url = Some("rediss://cache/#insecure".to_string());
        config.telemetry.sampling_ratio = 2.0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_error_display() {
        let err = ConfigValidationError::InvalidPort {
            name: "server.port".to_string(),
            value: 0,
        };
        assert!(err.to_string().contains("server.port"));
        assert!(ConfigValidationError::MissingCredentials.to_string().contains("GENAI_API_KEYS"));
    }
}
