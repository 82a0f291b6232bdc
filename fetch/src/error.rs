//! Top-level error type for the fetcher binary.
//!
//! Only failures that stop a run before it starts live here. Per-entry
//! failures are recorded in the run report instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum FetcherError {
    /// Configuration could not be loaded or is incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The log subscriber could not be installed.
    #[error("could not initialise logging: {reason}")]
    Logging {
        /// Description of the failure.
        reason: String,
    },

    /// The output directory could not be prepared.
    #[error("cannot prepare output directory {}: {source}", .path.display())]
    OutputDir {
        /// Directory being created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for results using [`FetcherError`].
pub type Result<T> = std::result::Result<T, FetcherError>;
