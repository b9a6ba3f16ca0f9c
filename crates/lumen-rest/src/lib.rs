//! # Lumen REST
//!
//! REST API layer using Axum for the Lumen job services.
//! Provides endpoints to enqueue and inspect jobs, a Server-Sent Events
//! stream of job status, health checks and the metrics scrape endpoint.

pub mod controllers;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
