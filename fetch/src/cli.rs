//! CLI argument definitions for the nuScenes fetcher.
//!
//! Parsing lives here so the binary stays focused on wiring collaborators
//! together.

use camino::Utf8PathBuf;
use clap::Parser;

use crate::auth::Secret;
use crate::config::ConfigOverrides;
use crate::resolve::Region;

/// Download, verify and extract the nuScenes archive catalog.
#[derive(Parser, Debug, Default)]
#[command(name = "nuscenes-fetch")]
#[command(version, about)]
#[command(long_about = concat!(
    "Download, verify and extract the nuScenes archive catalog.\n\n",
    "Each archive is fetched with a fresh login, checked against its published ",
    "digest while it streams to disk, unpacked next to where it was saved, and ",
    "then deleted. A failed archive never stops the run; re-running the command ",
    "retries whatever is left.\n\n",
    "Settings are read from the platform configuration directory ",
    "(or --config) and may be overridden by the flags below.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Fetch everything into /data/nuscenes from the Asia bucket:\n",
    "    $ NUSCENES_PASSWORD=... nuscenes-fetch --email me@example.com \\\n",
    "        --output-dir /data/nuscenes --region asia\n\n",
    "  Fetch only the test split, unattended:\n",
    "    $ nuscenes-fetch --only v1.0-test_meta.tgz --only v1.0-test_blobs.tgz --no-pause\n\n",
    "  Show the resolved settings without touching the network:\n",
    "    $ nuscenes-fetch --dry-run",
))]
pub struct Cli {
    /// Configuration file [default: platform config directory].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Directory for archives and their extracted contents.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<Utf8PathBuf>,

    /// Storage region to download from.
    #[arg(short, long, value_enum)]
    pub region: Option<Region>,

    /// Pause when free space drops below this many GB.
    #[arg(long, value_name = "GB")]
    pub min_free_gib: Option<u64>,

    /// Account email.
    #[arg(long, env = "NUSCENES_EMAIL", value_name = "EMAIL")]
    pub email: Option<String>,

    /// Account password.
    #[arg(long, env = "NUSCENES_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Process only this archive (can be repeated).
    #[arg(long, value_name = "FILE")]
    pub only: Vec<String>,

    /// Process entries again even if a completion stamp says they are done.
    #[arg(long)]
    pub reprocess: bool,

    /// Log a warning instead of waiting for Enter when space runs low.
    #[arg(long)]
    pub no_pause: bool,

    /// Show configuration and exit without downloading.
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with status 2 if any archive failed.
    #[arg(long)]
    pub strict: bool,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Hide progress bars and informational logs.
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

impl Cli {
    /// Settings given on the command line, for layering over the file.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            email: self.email.clone(),
            password: self.password.as_deref().map(Secret::new),
            output_dir: self.output_dir.clone().map(Utf8PathBuf::into_std_path_buf),
            region: self.region,
            min_free_gib: self.min_free_gib,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
