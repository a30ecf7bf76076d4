//! plume-utils: Common utilities shared across plume crates
//!
//! This crate provides:
//! - Unified error types ([`PlumeError`], [`Result`])
//! - Logging infrastructure ([`init_logging`], [`init_logging_with_filter`])

pub mod error;
pub mod logging;

// Re-export main types at crate root for convenience
pub use error::{PlumeError, Result};
pub use logging::{init_logging, init_logging_with_filter};
