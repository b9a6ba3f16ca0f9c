//! # Lumen Resilience
//!
//! Multi-credential rotate-and-retry for calls against a rate-limited
//! generation provider.

pub mod credentials;
pub mod rotator;
pub mod signal;

pub use credentials::*;
pub use rotator::*;
pub use signal::*;
