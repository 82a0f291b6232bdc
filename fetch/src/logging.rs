//! Log subscriber installation for the binary.
//!
//! Library modules log through the `log` facade. The binary installs a
//! `tracing-subscriber` formatter, which also captures `log` records.
//! `RUST_LOG` takes precedence over the verbosity flags.

use tracing_subscriber::EnvFilter;

use crate::error::{FetcherError, Result};

/// Filter directive implied by `-v`/`-q` when `RUST_LOG` is unset.
#[must_use]
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr.
///
/// # Errors
///
/// Returns [`FetcherError::Logging`] if a subscriber is already installed.
pub fn init_logging(verbosity: u8, quiet: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| FetcherError::Logging {
            reason: err.to_string(),
        })
}
