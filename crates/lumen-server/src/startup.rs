//! Server startup utilities.

use lumen_config::AppConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    __
   / /   __  ______ ___  ___  ____
  / /   / / / / __ `__ \/ _ \/ __ \
 / /___/ /_/ / / / / / /  __/ / / /
/_____/\__,_/_/ /_/ /_/\___/_/ /_/

                         Job Lifecycle Core
    "#);
}

/// Prints server startup information.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    let port = config.server.port;
    info!("{}", separator);
    info!("REST API:  http://0.0.0.0:{}/api/v1/jobs", port);
    info!("Events:    http://0.0.0.0:{}/api/v1/jobs/{{id}}/events", port);
    info!("Health:    http://0.0.0.0:{}/health", port);
    if config.observability.metrics_enabled {
        info!("Metrics:   http://0.0.0.0:{}{}", port, config.observability.metrics_path);
    }
    if config.redis.enabled {
        match config.redis.resolve() {
            Ok(target) => info!("Redis:     {}", target.redacted()),
            Err(e) => info!("Redis:     invalid settings ({})", e),
        }
    } else {
        info!("Queue:     in-memory");
    }
    info!("{}", separator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_banner_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_banner();
    }

    #[test]
    fn test_print_startup_info_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut config = AppConfig::default();
        print_startup_info(&config);

        config.redis.enabled = false;
        config.observability.metrics_enabled = false;
        print_startup_info(&config);
    }
}
