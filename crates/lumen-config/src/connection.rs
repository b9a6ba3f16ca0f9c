//! Resolution of Redis connection settings into a single connection URL.

use crate::RedisConfig;
use lumen_core::{LumenError, LumenResult};
use url::Url;

const DEFAULT_REDIS_PORT: u16 = 6379;

/// A validated Redis connection target.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    url: String,
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Logical database index.
    pub db: i64,
    /// Encrypted transport with certificate validation.
    pub tls: bool,
}

impl ConnectionTarget {
    /// Returns the full connection URL, including credentials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns a log-safe description of the target.
    #[must_use]
    pub fn redacted(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        format!("{}://{}:{}/{}", scheme, self.host, self.port, self.db)
    }
}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionTarget").field(&self.redacted()).finish()
    }
}

impl RedisConfig {
    /// Resolves the configured connection into a [`ConnectionTarget`].
    ///
    /// A non-empty `url` takes precedence over the discrete fields. Only
    /// malformed settings fail here; nothing is dialed.
    pub fn resolve(&self) -> LumenResult<ConnectionTarget> {
        match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(raw) => target_from_url(raw),
            None => self.target_from_parts(),
        }
    }

    fn target_from_parts(&self) -> LumenResult<ConnectionTarget> {
        if self.host.trim().is_empty() {
            return Err(LumenError::configuration("Redis host cannot be empty"));
        }
        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!("{}://{}:{}/{}", scheme, self.host, self.port, self.db))
            .map_err(|e| LumenError::Configuration(format!("Invalid Redis host '{}': {}", self.host, e)))?;

        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username)
                .map_err(|()| LumenError::configuration("Redis username cannot be set on this URL"))?;
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|()| LumenError::configuration("Redis password cannot be set on this URL"))?;
        }

        Ok(ConnectionTarget {
            url: url.to_string(),
            host: self.host.clone(),
            port: self.port,
            db: self.db,
            tls: self.tls,
        })
    }
}

fn target_from_url(raw: &str) -> LumenResult<ConnectionTarget> {
    let url = Url::parse(raw).map_err(|e| LumenError::Configuration(format!("Invalid Redis URL: {}", e)))?;

    let tls = match url.scheme() {
        "redis" => false,
        "rediss" => true,
        other => {
            return Err(LumenError::Configuration(format!(
                "Redis URL must use redis:// or rediss://, got {}://",
                other
            )))
        }
    };

    if url.fragment() == Some("insecure") {
        return Err(LumenError::configuration(
            "Redis TLS certificate validation cannot be disabled (#insecure)",
        ));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| LumenError::configuration("Redis URL has no host"))?
        .to_string();

    let db = match url.path().trim_start_matches('/') {
        "" => 0,
        segment => segment
            .parse::<i64>()
            .map_err(|_| LumenError::Configuration(format!("Invalid Redis database index '{}'", segment)))?,
    };

    Ok(ConnectionTarget {
        url: raw.to_string(),
        host,
        port: url.port().unwrap_or(DEFAULT_REDIS_PORT),
        db,
        tls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_takes_precedence() {
        let config = RedisConfig {
            url: Some("rediss://:secret@cache.internal:6380/2".to_string()),
            host: "ignored".to_string(),
            ..Default::default()
        };

        let target = config.resolve().unwrap();
        assert!(target.tls);
        assert_eq!(target.host, "cache.internal");
        assert_eq!(target.port, 6380);
        assert_eq!(target.db, 2);
        assert_eq!(target.url(), "rediss://:secret@cache.internal:6380/2");
    }

    #[test]
    fn test_url_default_port_and_db() {
        let config = RedisConfig {
            url: Some("redis://localhost".to_string()),
            ..Default::default()
        };

        let target = config.resolve().unwrap();
        assert!(!target.tls);
        assert_eq!(target.port, 6379);
        assert_eq!(target.db, 0);
    }

    #[test]
    fn test_blank_url_falls_back_to_parts() {
        let config = RedisConfig {
            url: Some("   ".to_string()),
            host: "redis-primary".to_string(),
            port: 6390,
            password: Some("p@ss word".to_string()),
            ..Default::default()
        };

        let target = config.resolve().unwrap();
        assert_eq!(target.host, "redis-primary");
        assert_eq!(target.port, 6390);
        assert!(target.url().starts_with("redis://:p%40ss%20word@redis-primary:6390"));
    }

    #[test]
    fn test_parts_with_tls_and_username() {
        let config = RedisConfig {
            host: "secure-cache".to_string(),
            username: Some("worker".to_string()),
            password: Some("pw".to_string()),
            tls: true,
            db: 3,
            ..Default::default()
        };

        let target = config.resolve().unwrap();
        assert!(target.tls);
        assert_eq!(target.url(), "rediss://worker:pw@secure-cache:6379/3");
    }

    #[test]
    fn test_rejects_insecure_fragment() {
        let config = RedisConfig {
            url: Some("rediss://cache:6380/#insecure".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.resolve(), Err(LumenError::Configuration(_))));
    }

    #[test]
    fn test_rejects_foreign_scheme() {
        let config = RedisConfig {
            url: Some("http://cache:6379".to_string()),
            ..Default::default()
        };
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("redis://"));
    }

    #[test]
    fn test_rejects_bad_db_index() {
        let config = RedisConfig {
            url: Some("redis://cache:6379/primary".to_string()),
            ..Default::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_redacted_hides_password() {
        let config = RedisConfig {
            url: Some("redis://:topsecret@cache:6379/1".to_string()),
            ..Default::default()
        };
        let target = config.resolve().unwrap();
        assert_eq!(target.redacted(), "redis://cache:6379/1");
        assert!(!format!("{:?}", target).contains("topsecret"));
    }
}
