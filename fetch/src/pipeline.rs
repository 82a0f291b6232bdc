//! Per-entry orchestration of authenticate, resolve, fetch and extract.
//!
//! Each catalog entry runs its whole chain before the next one starts. A
//! failure at any stage ends that entry only: it is recorded as an
//! [`EntryOutcome`] and the driver moves on. The run as a whole always
//! completes with a [`RunReport`].

use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::auth::{AuthError, Authenticator, Credential};
use crate::catalog::CatalogEntry;
use crate::digest::HexDigest;
use crate::extract::{ExtractionError, Extractor};
use crate::fetch::{ArtifactOrigin, FetchError, Fetcher};
use crate::output::{plural, write_stderr_line};
use crate::resolve::{Region, ResolutionError, UrlResolver};

/// Everything a run needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Account used for every login.
    pub credential: Credential,
    /// Directory archives are written to and extracted into.
    pub output_dir: PathBuf,
    /// Storage region for resolved URLs.
    pub region: Region,
    /// Entries to process, in order.
    pub catalog: Vec<CatalogEntry>,
    /// When true, entries with a matching completion stamp are skipped.
    pub honour_stamps: bool,
}

/// Stages an entry passes through after it leaves `PENDING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Exchanging the credential for a token.
    Authenticating,
    /// Asking the archive API for a download URL.
    Resolving,
    /// Downloading and verifying the archive.
    Fetching,
    /// Unpacking the archive.
    Extracting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authenticating => "authenticating",
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
        })
    }
}

/// Why an entry ended in `FAILED`.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// Login failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The archive API refused or could not be reached.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The transfer failed or did not verify.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The archive could not be unpacked.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl EntryError {
    /// Stage at which the entry failed.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Auth(_) => Stage::Authenticating,
            Self::Resolution(_) => Stage::Resolving,
            Self::Fetch(_) => Stage::Fetching,
            Self::Extraction(_) => Stage::Extracting,
        }
    }
}

/// How an entry reached `DONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The archive was fetched (or reused) and extracted during this run.
    Processed {
        /// Whether the archive was downloaded or already on disk.
        origin: ArtifactOrigin,
        /// Number of archive entries unpacked.
        extracted: usize,
    },
    /// A completion stamp showed the entry was finished by an earlier run.
    AlreadyComplete,
}

/// Terminal state of one entry.
#[derive(Debug)]
pub enum EntryState {
    /// The entry finished.
    Done(Completion),
    /// The entry failed; later entries were still attempted.
    Failed(EntryError),
}

/// Result of processing one catalog entry.
#[derive(Debug)]
pub struct EntryOutcome {
    identifier: String,
    state: EntryState,
}

impl EntryOutcome {
    /// Catalog identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Terminal state.
    #[must_use]
    pub fn state(&self) -> &EntryState {
        &self.state
    }

    /// Return true when the entry reached `DONE`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.state, EntryState::Done(_))
    }

    /// One-line description for the run report.
    #[must_use]
    pub fn report_line(&self) -> String {
        let id = &self.identifier;
        match &self.state {
            EntryState::Done(Completion::AlreadyComplete) => format!("  {id}: done (already complete)"),
            EntryState::Done(Completion::Processed { origin, extracted }) => {
                let how = match origin {
                    ArtifactOrigin::Downloaded => "downloaded",
                    ArtifactOrigin::Reused => "reused verified archive",
                };
                format!(
                    "  {id}: done ({how}, {extracted} {} extracted)",
                    plural(*extracted, "entry", "entries")
                )
            }
            EntryState::Failed(err) => format!("  {id}: failed while {}: {err}", err.stage()),
        }
    }
}

/// Outcome of a whole run.
///
/// This is not a `Result`: per-entry failures are data, and the run itself
/// cannot fail once it has started.
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<EntryOutcome>,
}

impl RunReport {
    /// Outcomes in catalog order.
    #[must_use]
    pub fn outcomes(&self) -> &[EntryOutcome] {
        &self.outcomes
    }

    /// Number of entries that reached `DONE`.
    #[must_use]
    pub fn done_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_done()).count()
    }

    /// Number of `DONE` entries skipped because of a completion stamp.
    #[must_use]
    pub fn already_complete_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.state, EntryState::Done(Completion::AlreadyComplete)))
            .count()
    }

    /// Number of entries that ended in `FAILED`.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.done_count()
    }

    /// Number of archives transferred over the network.
    #[must_use]
    pub fn downloaded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| {
                matches!(
                    outcome.state,
                    EntryState::Done(Completion::Processed {
                        origin: ArtifactOrigin::Downloaded,
                        ..
                    })
                )
            })
            .count()
    }

    /// Final summary line, printed whatever the outcome.
    ///
    /// # Examples
    ///
    /// ```
    /// use nuscenes_fetch::pipeline::RunReport;
    ///
    /// let report = RunReport::default();
    /// assert_eq!(
    ///     report.summary_line(),
    ///     "Processed 0 files: 0 done (0 already complete), 0 failed"
    /// );
    /// ```
    #[must_use]
    pub fn summary_line(&self) -> String {
        let total = self.outcomes.len();
        format!(
            "Processed {total} {}: {} done ({} already complete), {} failed",
            plural(total, "file", "files"),
            self.done_count(),
            self.already_complete_count(),
            self.failed_count()
        )
    }
}

/// Path of the completion stamp for `identifier` under `output_dir`.
#[must_use]
pub fn stamp_path(output_dir: &Path, identifier: &str) -> PathBuf {
    output_dir.join(format!(".{identifier}.done"))
}

fn stamp_matches(path: &Path, expected: &HexDigest) -> bool {
    fs::read_to_string(path).is_ok_and(|text| {
        HexDigest::try_from(text.trim()).is_ok_and(|recorded| recorded.matches(expected))
    })
}

/// Drives the catalog through the per-entry state machine.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    authenticator: &'a dyn Authenticator,
    resolver: &'a dyn UrlResolver,
    fetcher: Fetcher<'a>,
    extractor: Extractor<'a>,
}

impl<'a> Pipeline<'a> {
    /// Assemble a pipeline from its configuration and collaborators.
    #[must_use]
    pub fn new(
        config: &'a PipelineConfig,
        authenticator: &'a dyn Authenticator,
        resolver: &'a dyn UrlResolver,
        fetcher: Fetcher<'a>,
        extractor: Extractor<'a>,
    ) -> Self {
        Self {
            config,
            authenticator,
            resolver,
            fetcher,
            extractor,
        }
    }

    /// Process every catalog entry in order and report the results.
    ///
    /// Progress lines and the final report go to `out`.
    pub fn run(&self, out: &mut dyn Write) -> RunReport {
        let mut report = RunReport::default();
        for entry in &self.config.catalog {
            let state = match self.process_entry(entry, out) {
                Ok(completion) => EntryState::Done(completion),
                Err(err) => {
                    warn!(
                        "{} failed while {}: {err}",
                        entry.identifier(),
                        err.stage()
                    );
                    write_stderr_line(
                        out,
                        format!("Error while processing {}: {err}", entry.identifier()),
                    );
                    EntryState::Failed(err)
                }
            };
            report.outcomes.push(EntryOutcome {
                identifier: entry.identifier().to_owned(),
                state,
            });
        }

        write_stderr_line(out, "");
        for outcome in report.outcomes() {
            write_stderr_line(out, outcome.report_line());
        }
        write_stderr_line(out, report.summary_line());
        report
    }

    fn process_entry(&self, entry: &CatalogEntry, out: &mut dyn Write) -> Result<Completion, EntryError> {
        let identifier = entry.identifier();
        let stamp = stamp_path(&self.config.output_dir, identifier);
        if self.config.honour_stamps && stamp_matches(&stamp, entry.expected_digest()) {
            info!("{identifier} already extracted; completion stamp matches");
            write_stderr_line(out, format!("[DONE] {identifier} already extracted"));
            return Ok(Completion::AlreadyComplete);
        }

        write_stderr_line(out, "");
        write_stderr_line(out, format!("Logging in before downloading {identifier}"));
        let token = self.authenticator.obtain_token(&self.config.credential)?;

        write_stderr_line(out, format!("Requesting URL for: {identifier}"));
        let location = self.resolver.resolve(identifier, &token, self.config.region)?;
        debug!("{identifier} resolved");

        let destination = self.config.output_dir.join(identifier);
        let artifact = self
            .fetcher
            .fetch(&location, &destination, entry.expected_digest(), out)?;
        let extracted = self.extractor.extract(artifact.path(), out)?;

        if let Err(err) = fs::write(&stamp, format!("{}\n", entry.expected_digest())) {
            warn!("could not write completion stamp {}: {err}", stamp.display());
        }
        Ok(Completion::Processed {
            origin: artifact.origin(),
            extracted: extracted.len(),
        })
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
