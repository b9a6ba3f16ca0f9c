//! # Lumen Server
//!
//! Main entry point: loads configuration, installs telemetry, then serves the
//! job API and runs the worker pool until shutdown.

use lumen_config::ConfigLoader;
use lumen_core::telemetry::{init_telemetry, shutdown_telemetry};
use lumen_core::LumenResult;
use lumen_server::{startup, App};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Telemetry may not be up yet when configuration fails.
        eprintln!("Application error: {}", e);
        error!("Application error: {}", e);
        shutdown_telemetry();
        std::process::exit(1);
    }
    shutdown_telemetry();
}

async fn run() -> LumenResult<()> {
    let config = ConfigLoader::from_default_location().load()?;

    init_telemetry(&config.telemetry)?;
    startup::print_banner();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    App::build(config)?.run().await
}
