// =============================================================================
// Matrixon Matrix NextServer - Logging
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use matrixon_core::{MatrixonError, Result};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install the global tracing subscriber for the `log` filter directive.
///
/// An unparsable directive falls back to `warn`.
pub fn init_logging(log: &str) -> Result<()> {
    let filter_layer = match EnvFilter::try_new(log) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("It looks like your log filter is invalid. The following error occurred while parsing it: {e}");
            EnvFilter::new("warn")
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| MatrixonError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
