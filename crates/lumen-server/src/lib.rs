//! # Lumen Server Library
//!
//! Bootstrap for the Lumen job lifecycle server: the generation processor the
//! worker pool runs and the wiring from configuration to a running HTTP
//! server.

pub mod app;
pub mod generation;
pub mod startup;

pub use app::App;
pub use generation::{provider_rotator, GenerationProcessor, ProviderClient};
