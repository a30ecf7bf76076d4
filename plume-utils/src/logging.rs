//! Logging infrastructure for plume
//!
//! Provides unified logging setup using the tracing ecosystem. plume is a
//! library, so nothing here is called implicitly; embedding applications
//! (and tests) opt in.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::{PlumeError, Result};

/// Initialize logging to stderr
///
/// Uses the PLUME_LOG env var for the filter, defaults to "info"
pub fn init_logging() -> Result<()> {
    let filter = std::env::var("PLUME_LOG").unwrap_or_else(|_| "info".into());
    init_logging_with_filter(&filter)
}

/// Initialize logging to stderr with an explicit filter directive
/// (e.g. "debug" or "plume_client=trace,tokio=warn")
pub fn init_logging_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| PlumeError::invalid_argument(format!("invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| PlumeError::internal(format!("failed to init logging: {}", e)))?;

    Ok(())
}
