//! # Lumen Config
//!
//! Configuration management for the Lumen services.
//! Values are layered from TOML files, `LUMEN__*` environment variables and
//! the conventional `REDIS_*` / `GENAI_API_KEY*` variables, then validated
//! before the process is allowed to start.

mod app_config;
mod connection;
mod loader;
mod validation;

pub use app_config::*;
pub use connection::*;
pub use loader::*;
pub use validation::*;
