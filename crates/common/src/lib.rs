//! Subforge Common Utilities
//!
//! Shared infrastructure for all Subforge crates:
//! - Error types and result aliases
//! - Timebase conversions between container units, microseconds and seconds
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod logging;
pub mod timebase;

pub use config::*;
pub use error::*;
pub use timebase::*;
