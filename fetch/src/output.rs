//! Operator-facing text.
//!
//! Progress notices and reports are written to an injected writer rather
//! than straight to stderr, so tests can capture them.

use std::io::Write;
use std::path::Path;

use crate::catalog::CatalogEntry;
use crate::resolve::Region;

/// Write `message` and a newline, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort output; a closed stderr must not end the run.
    }
}

/// Pick the singular or plural noun for `count`.
#[must_use]
pub fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

/// Resolved settings shown by `--dry-run`.
///
/// # Example
///
/// ```
/// use nuscenes_fetch::catalog::default_catalog;
/// use nuscenes_fetch::output::DryRunInfo;
/// use nuscenes_fetch::resolve::Region;
/// use std::path::Path;
///
/// let catalog = default_catalog().unwrap();
/// let info = DryRunInfo {
///     config_path: None,
///     email: "user@example.com",
///     output_dir: Path::new("/data/nuscenes"),
///     region: Region::Asia,
///     min_free_gib: 150,
///     pause_on_low_space: true,
///     honour_stamps: true,
///     catalog: &catalog,
/// };
///
/// let output = info.display_text();
/// assert!(output.contains("Dry run"));
/// assert!(output.contains("v1.0-test_meta.tgz"));
/// ```
#[derive(Debug)]
pub struct DryRunInfo<'a> {
    /// Configuration file that was loaded, if any.
    pub config_path: Option<&'a Path>,
    /// Account email.
    pub email: &'a str,
    /// Destination directory.
    pub output_dir: &'a Path,
    /// Storage region.
    pub region: Region,
    /// Free-space threshold in gibibytes.
    pub min_free_gib: u64,
    /// Whether low space waits for the operator.
    pub pause_on_low_space: bool,
    /// Whether completion stamps are honoured.
    pub honour_stamps: bool,
    /// Entries that would be processed.
    pub catalog: &'a [CatalogEntry],
}

impl DryRunInfo<'_> {
    /// Format the dry-run information for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let config = self
            .config_path
            .map_or_else(|| "(built-in defaults)".to_owned(), |path| path.display().to_string());
        let mut lines = vec![
            "Dry run - nothing will be downloaded or written".to_owned(),
            String::new(),
            format!("Config file: {config}"),
            format!("Account: {}", self.email),
            format!("Output directory: {}", self.output_dir.display()),
            format!("Region: {}", self.region),
            format!("Minimum free space: {} GB", self.min_free_gib),
            format!("Pause on low space: {}", self.pause_on_low_space),
            format!("Skip completed entries: {}", self.honour_stamps),
            String::new(),
            format!(
                "{} to process:",
                plural(self.catalog.len(), "Archive", "Archives")
            ),
        ];
        for entry in self.catalog {
            lines.push(format!("  - {} ({})", entry.identifier(), entry.expected_digest()));
        }
        lines.join("\n")
    }
}
