//! Free-space inspection and the manual operator gate.
//!
//! The guard is advisory: it reports capacity after every large disk write
//! and, when free space drops below the configured threshold, hands control
//! to an [`OperatorGate`] until a human confirms there is room to continue.
//! It never fails and never aborts the run.

use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Bytes in one gibibyte, the unit of the free-space threshold.
pub const BYTES_PER_GIB: u64 = 1 << 30;

/// Capacity of the filesystem holding a path, read fresh on every check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacitySnapshot {
    /// Size of the filesystem.
    pub total_bytes: u64,
    /// Bytes in use.
    pub used_bytes: u64,
    /// Bytes available to this process.
    pub free_bytes: u64,
}

impl CapacitySnapshot {
    /// Whole gibibytes free, rounded down.
    #[must_use]
    pub const fn free_gib(&self) -> u64 {
        self.free_bytes / BYTES_PER_GIB
    }

    /// Whole gibibytes in total, rounded down.
    #[must_use]
    pub const fn total_gib(&self) -> u64 {
        self.total_bytes / BYTES_PER_GIB
    }

    /// Return true when fewer than `min_free_gib` whole gibibytes are free.
    #[must_use]
    pub const fn is_below(&self, min_free_gib: u64) -> bool {
        self.free_gib() < min_free_gib
    }
}

/// Reads filesystem capacity for a path.
#[cfg_attr(test, mockall::automock)]
pub trait SpaceProbe {
    /// Return the current capacity of the filesystem containing `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the filesystem cannot be queried.
    fn capacity(&self, path: &Path) -> io::Result<CapacitySnapshot>;
}

/// Probe backed by `statvfs` (or `GetDiskFreeSpaceEx`) through `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemProbe;

impl SpaceProbe for FilesystemProbe {
    fn capacity(&self, path: &Path) -> io::Result<CapacitySnapshot> {
        let stats = fs2::statvfs(path)?;
        let total_bytes = stats.total_space();
        Ok(CapacitySnapshot {
            total_bytes,
            used_bytes: total_bytes.saturating_sub(stats.free_space()),
            free_bytes: stats.available_space(),
        })
    }
}

/// Blocks until an operator signals that work may continue.
///
/// The pipeline calls this only when free space is below the threshold.
#[cfg_attr(test, mockall::automock)]
pub trait OperatorGate {
    /// Wait for the operator after a low-space report for `path`.
    fn wait_for_operator(&self, path: &Path, snapshot: &CapacitySnapshot);
}

/// Interactive gate: prompts on stderr and waits for Enter on stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinGate;

impl OperatorGate for StdinGate {
    fn wait_for_operator(&self, path: &Path, snapshot: &CapacitySnapshot) {
        let mut stderr = io::stderr();
        crate::output::write_stderr_line(
            &mut stderr,
            format!(
                "WARNING: Only {} GB free at {}. Pausing for you to free up space...",
                snapshot.free_gib(),
                path.display()
            ),
        );
        crate::output::write_stderr_line(
            &mut stderr,
            "Press Enter to continue when space is available...",
        );
        let mut line = String::new();
        if let Err(err) = io::stdin().lock().read_line(&mut line) {
            warn!("could not read operator confirmation, continuing: {err}");
        }
    }
}

/// Unattended gate: logs the shortfall and continues immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinueGate;

impl OperatorGate for ContinueGate {
    fn wait_for_operator(&self, path: &Path, snapshot: &CapacitySnapshot) {
        warn!(
            "only {} GB free at {}; continuing without operator confirmation",
            snapshot.free_gib(),
            path.display()
        );
    }
}

/// Capacity check run after every state-changing disk operation.
pub struct SpaceGuard<'a> {
    probe: &'a dyn SpaceProbe,
    gate: &'a dyn OperatorGate,
    min_free_gib: u64,
}

impl<'a> SpaceGuard<'a> {
    /// Create a guard that gates below `min_free_gib` whole gibibytes.
    #[must_use]
    pub fn new(probe: &'a dyn SpaceProbe, gate: &'a dyn OperatorGate, min_free_gib: u64) -> Self {
        Self {
            probe,
            gate,
            min_free_gib,
        }
    }

    /// Report capacity at `path` and block on the gate when it is low.
    ///
    /// Always returns a snapshot. When the filesystem cannot be queried the
    /// failure is logged, an all-zero snapshot is returned, and the gate is
    /// not consulted.
    pub fn check_and_warn(&self, path: &Path, out: &mut dyn Write) -> CapacitySnapshot {
        let snapshot = match self.probe.capacity(path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("could not read free space at {}: {err}", path.display());
                crate::output::write_stderr_line(
                    out,
                    format!("Disk space at {}: unavailable ({err})", path.display()),
                );
                return CapacitySnapshot::default();
            }
        };

        crate::output::write_stderr_line(
            out,
            format!(
                "Disk space at {}: {} GB free / {} GB total",
                path.display(),
                snapshot.free_gib(),
                snapshot.total_gib()
            ),
        );
        info!(
            "capacity at {}: total={} used={} free={}",
            path.display(),
            snapshot.total_bytes,
            snapshot.used_bytes,
            snapshot.free_bytes
        );

        if snapshot.is_below(self.min_free_gib) {
            warn!(
                "free space {} GB is below the {} GB threshold at {}",
                snapshot.free_gib(),
                self.min_free_gib,
                path.display()
            );
            self.gate.wait_for_operator(path, &snapshot);
        }
        snapshot
    }
}
