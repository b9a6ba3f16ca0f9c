//! # Lumen Core
//!
//! Error definitions, result aliases and telemetry bootstrap shared by every
//! Lumen crate.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
