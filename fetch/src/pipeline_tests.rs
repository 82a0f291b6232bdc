//! Unit tests for per-entry orchestration.
//!
//! These tests drive the pipeline with recording stubs and real archives in
//! a temporary directory, checking failure isolation, per-entry login, and
//! completion stamps.

use super::*;
use crate::auth::{MockAuthenticator, Secret};
use crate::digest::EMPTY_MD5;
use crate::extract::{ExtractionError, TarUnpacker};
use crate::progress::SilentProgress;
use crate::space::SpaceGuard;
use crate::test_utils::{
    CountingGate, FixedProbe, MemorySource, StubAuthenticator, StubResolver, md5_hex, tar_gz_bytes,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

/// Owned collaborators for one or more pipeline runs over the same directory.
struct Harness {
    temp: TempDir,
    source: MemorySource,
    authenticator: StubAuthenticator,
    resolver: StubResolver,
    probe: FixedProbe,
    gate: CountingGate,
}

impl Harness {
    fn new() -> Self {
        Self {
            temp: tempfile::tempdir().expect("temp dir"),
            source: MemorySource::default(),
            authenticator: StubAuthenticator::accepting(),
            resolver: StubResolver::default(),
            probe: FixedProbe::with_free_gib(500),
            gate: CountingGate::default(),
        }
    }

    /// Serve a gzip tar for `identifier` and return its catalog entry.
    fn archive(&mut self, identifier: &str) -> CatalogEntry {
        let member = format!("{identifier}.d/data.bin");
        let bytes = tar_gz_bytes(&[(member.as_str(), identifier.as_bytes())]).expect("archive");
        let digest = md5_hex(&bytes);
        let source = std::mem::take(&mut self.source);
        self.source = source.with_body(identifier, bytes);
        CatalogEntry::new(identifier, &digest).expect("entry")
    }

    fn config(&self, catalog: Vec<CatalogEntry>, honour_stamps: bool) -> PipelineConfig {
        PipelineConfig {
            credential: Credential::new("user@example.com", Secret::new("hunter2")),
            output_dir: self.temp.path().to_path_buf(),
            region: Region::Us,
            catalog,
            honour_stamps,
        }
    }

    fn run_with(&self, authenticator: &dyn Authenticator, config: &PipelineConfig) -> (RunReport, String) {
        let guard = SpaceGuard::new(&self.probe, &self.gate, 150);
        let fetcher = Fetcher::new(&self.source, &guard, &SilentProgress);
        let extractor = Extractor::new(&TarUnpacker, &guard);
        let pipeline = Pipeline::new(config, authenticator, &self.resolver, fetcher, extractor);
        let mut out = Vec::new();
        let report = pipeline.run(&mut out);
        (report, String::from_utf8(out).expect("utf-8 output"))
    }

    fn run(&self, config: &PipelineConfig) -> (RunReport, String) {
        self.run_with(&self.authenticator, config)
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

fn failed_stage(outcome: &EntryOutcome) -> Option<Stage> {
    match outcome.state() {
        EntryState::Failed(err) => Some(err.stage()),
        EntryState::Done(_) => None,
    }
}

#[rstest]
fn resolution_failure_does_not_stop_later_entries(mut harness: Harness) {
    let catalog = vec![
        harness.archive("a.tgz"),
        harness.archive("b.tgz"),
        harness.archive("c.tgz"),
    ];
    harness.resolver = StubResolver::rejecting(["b.tgz"]);
    let config = harness.config(catalog, true);

    let (report, text) = harness.run(&config);

    let states: Vec<_> = report.outcomes().iter().map(failed_stage).collect();
    assert_eq!(states, vec![None, Some(Stage::Resolving), None]);
    assert_eq!(report.summary_line(), "Processed 3 files: 2 done (0 already complete), 1 failed");
    assert!(text.contains("Error while processing b.tgz: failed to get URL for b.tgz: 404 - Not Found"));
    assert!(harness.temp.path().join("c.tgz.d/data.bin").is_file());
    assert_eq!(harness.source.opened(), vec!["mem://a.tgz", "mem://c.tgz"]);
}

#[rstest]
fn logs_in_again_for_every_entry(mut harness: Harness) {
    let catalog = vec![harness.archive("a.tgz"), harness.archive("b.tgz")];
    let config = harness.config(catalog, true);

    harness.run(&config);

    assert_eq!(harness.authenticator.calls(), 2);
    let tokens: Vec<_> = harness
        .resolver
        .requests()
        .into_iter()
        .map(|(_, token)| token)
        .collect();
    assert_eq!(tokens, vec!["token-1", "token-2"]);
}

#[rstest]
fn authentication_failure_is_per_entry(mut harness: Harness) {
    let catalog = vec![harness.archive("a.tgz"), harness.archive("b.tgz")];
    let config = harness.config(catalog, true);
    let mut authenticator = MockAuthenticator::new();
    authenticator.expect_obtain_token().times(2).returning(|credential| {
        Err(AuthError::Rejected {
            email: credential.email().to_owned(),
            status: 400,
            body: "NotAuthorizedException".to_owned(),
        })
    });

    let (report, _) = harness.run_with(&authenticator, &config);

    assert_eq!(report.failed_count(), 2);
    assert!(report
        .outcomes()
        .iter()
        .all(|outcome| failed_stage(outcome) == Some(Stage::Authenticating)));
    assert!(harness.resolver.requests().is_empty());
}

#[rstest]
fn rejected_login_is_attempted_for_every_entry(mut harness: Harness) {
    let catalog = vec![harness.archive("a.tgz"), harness.archive("b.tgz")];
    let config = harness.config(catalog, true);
    let authenticator = StubAuthenticator::rejecting();

    let (report, text) = harness.run_with(&authenticator, &config);

    assert_eq!(authenticator.calls(), 2);
    assert_eq!(harness.source.open_count(), 0);
    assert!(text.contains(
        "  b.tgz: failed while authenticating: login rejected for user@example.com (HTTP 400)"
    ));
    assert_eq!(report.summary_line(), "Processed 2 files: 0 done (0 already complete), 2 failed");
}

#[rstest]
fn second_run_is_satisfied_by_completion_stamps(mut harness: Harness) {
    let catalog = vec![harness.archive("a.tgz"), harness.archive("b.tgz")];
    let config = harness.config(catalog, true);

    let (first, _) = harness.run(&config);
    assert_eq!(first.downloaded_count(), 2);
    assert!(!harness.temp.path().join("a.tgz").exists(), "archive is consumed");

    let (second, text) = harness.run(&config);
    assert_eq!(second.already_complete_count(), 2);
    assert_eq!(second.downloaded_count(), 0);
    assert_eq!(harness.source.open_count(), 2);
    assert_eq!(harness.authenticator.calls(), 2);
    assert!(text.contains("[DONE] a.tgz already extracted"));
}

#[rstest]
fn reprocessing_ignores_stamps(mut harness: Harness) {
    let catalog = vec![harness.archive("a.tgz")];
    let config = harness.config(catalog.clone(), true);
    harness.run(&config);

    let reprocess = harness.config(catalog, false);
    let (report, _) = harness.run(&reprocess);

    assert_eq!(report.downloaded_count(), 1);
    assert_eq!(harness.source.open_count(), 2);
}

#[rstest]
fn stale_stamp_for_another_digest_is_ignored(mut harness: Harness) {
    let entry = harness.archive("a.tgz");
    std::fs::write(
        stamp_path(harness.temp.path(), "a.tgz"),
        "00000000000000000000000000000000\n",
    )
    .expect("write stamp");
    let config = harness.config(vec![entry], true);

    let (report, _) = harness.run(&config);

    assert_eq!(report.downloaded_count(), 1);
}

#[rstest]
fn empty_archive_with_empty_digest_fails_at_extraction(mut harness: Harness) {
    harness.source = MemorySource::default().with_body("a.tgz", Vec::new());
    let entry = CatalogEntry::new("a.tgz", EMPTY_MD5).expect("entry");
    let config = harness.config(vec![entry], true);

    let (report, text) = harness.run(&config);

    let outcome = report.outcomes().first().expect("one outcome");
    assert!(matches!(
        outcome.state(),
        EntryState::Failed(EntryError::Extraction(ExtractionError::EmptyArchive { .. }))
    ));
    assert!(harness.temp.path().join("a.tgz").exists(), "failed archive is kept");
    assert!(!stamp_path(harness.temp.path(), "a.tgz").exists());
    assert!(text.contains("Processed 1 file: 0 done (0 already complete), 1 failed"));
}

#[rstest]
fn digest_mismatch_fails_only_that_entry(mut harness: Harness) {
    let good = harness.archive("b.tgz");
    harness.source = std::mem::take(&mut harness.source).with_body("a.tgz", b"tampered".to_vec());
    let bad = CatalogEntry::new("a.tgz", &md5_hex(b"original")).expect("entry");
    let config = harness.config(vec![bad, good], true);

    let (report, _) = harness.run(&config);

    let states: Vec<_> = report.outcomes().iter().map(failed_stage).collect();
    assert_eq!(states, vec![Some(Stage::Fetching), None]);
    assert!(!stamp_path(harness.temp.path(), "a.tgz").exists());
    assert!(stamp_path(harness.temp.path(), "b.tgz").exists());
}

#[rstest]
fn report_lines_describe_each_entry(mut harness: Harness) {
    let catalog = vec![harness.archive("a.tgz"), harness.archive("b.tgz")];
    harness.resolver = StubResolver::rejecting(["b.tgz"]);
    let config = harness.config(catalog, true);

    let (report, _) = harness.run(&config);

    let lines: Vec<_> = report.outcomes().iter().map(EntryOutcome::report_line).collect();
    assert_eq!(lines.first().map(String::as_str), Some("  a.tgz: done (downloaded, 1 entry extracted)"));
    assert!(lines
        .get(1)
        .is_some_and(|line| line.starts_with("  b.tgz: failed while resolving:")));
}

#[rstest]
fn low_space_gates_after_download_and_extraction(mut harness: Harness) {
    harness.probe = FixedProbe::with_free_gib(1);
    let catalog = vec![harness.archive("a.tgz")];
    let config = harness.config(catalog, true);

    let (report, _) = harness.run(&config);

    assert_eq!(report.done_count(), 1);
    assert_eq!(harness.gate.waits(), 2);
}
