//! Textual transfer progress.
//!
//! The fetcher asks a [`ProgressFactory`] for one tracker per download. The
//! length hint only sizes the bar; it plays no part in verification.

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{prefix:>24.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str =
    "{spinner:.blue} {prefix:>24.cyan.bold} [{elapsed_precise}] {bytes} ({bytes_per_sec})";
const BAR_CHARS: &str = "█▓▒░  ";

/// Progress of a single transfer.
pub trait TransferTracker {
    /// Record `bytes` more bytes written.
    fn step(&mut self, bytes: u64);
    /// Mark the transfer finished.
    fn finish(&mut self);
}

/// Creates trackers for individual transfers.
pub trait ProgressFactory {
    /// Start tracking a transfer named `label` with an optional size hint.
    fn tracker(&self, label: &str, total_bytes: Option<u64>) -> Box<dyn TransferTracker>;
}

/// Terminal progress bars drawn on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarProgress {
    hidden: bool,
}

impl BarProgress {
    /// Bars drawn on stderr, or nothing at all when `hidden`.
    #[must_use]
    pub fn new(hidden: bool) -> Self {
        Self { hidden }
    }
}

impl ProgressFactory for BarProgress {
    fn tracker(&self, label: &str, total_bytes: Option<u64>) -> Box<dyn TransferTracker> {
        if self.hidden {
            return Box::new(BarTracker(ProgressBar::hidden()));
        }
        let (bar, template) = match total_bytes {
            Some(len) if len > 0 => (ProgressBar::new(len), BAR_TEMPLATE),
            _ => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style.progress_chars(BAR_CHARS));
        }
        bar.set_prefix(label.to_owned());
        Box::new(BarTracker(bar))
    }
}

struct BarTracker(ProgressBar);

impl TransferTracker for BarTracker {
    fn step(&mut self, bytes: u64) {
        self.0.inc(bytes);
    }

    fn finish(&mut self) {
        self.0.finish();
    }
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressFactory for SilentProgress {
    fn tracker(&self, _label: &str, _total_bytes: Option<u64>) -> Box<dyn TransferTracker> {
        Box::new(SilentTracker)
    }
}

struct SilentTracker;

impl TransferTracker for SilentTracker {
    fn step(&mut self, _bytes: u64) {}

    fn finish(&mut self) {}
}
