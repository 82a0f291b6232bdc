//! BDD tests for the per-entry download, verify and extract pipeline.

use nuscenes_fetch::auth::{Credential, Secret};
use nuscenes_fetch::catalog::CatalogEntry;
use nuscenes_fetch::digest::EMPTY_MD5;
use nuscenes_fetch::extract::{Extractor, TarUnpacker};
use nuscenes_fetch::fetch::Fetcher;
use nuscenes_fetch::pipeline::{EntryState, Pipeline, PipelineConfig, RunReport};
use nuscenes_fetch::progress::SilentProgress;
use nuscenes_fetch::resolve::Region;
use nuscenes_fetch::space::SpaceGuard;
use nuscenes_fetch::test_utils::{
    CountingGate, FixedProbe, MemorySource, StubAuthenticator, StubResolver, md5_hex, tar_gz_bytes,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Default)]
struct PipelineWorld {
    temp_dir: Option<tempfile::TempDir>,
    catalog: Vec<CatalogEntry>,
    source: MemorySource,
    rejected: Vec<String>,
    reports: Vec<RunReport>,
    output: String,
}

impl PipelineWorld {
    fn output_dir(&self) -> &std::path::Path {
        self.temp_dir.as_ref().expect("temp dir set").path()
    }

    fn serve(&mut self, identifier: &str, body: Vec<u8>) {
        let source = std::mem::take(&mut self.source);
        self.source = source.with_body(identifier, body);
    }

    fn last_report(&self) -> &RunReport {
        self.reports.last().expect("pipeline has run")
    }

    fn state_of(&self, identifier: &str) -> &EntryState {
        self.last_report()
            .outcomes()
            .iter()
            .find(|outcome| outcome.identifier() == identifier)
            .map(|outcome| outcome.state())
            .expect("entry is in the report")
    }
}

fn archive_for(identifier: &str) -> Vec<u8> {
    let member = format!("{identifier}.contents/sample.bin");
    tar_gz_bytes(&[(member.as_str(), identifier.as_bytes())]).expect("build archive")
}

#[fixture]
fn world() -> PipelineWorld {
    PipelineWorld {
        temp_dir: Some(tempfile::tempdir().expect("temp dir")),
        ..Default::default()
    }
}

#[given("a served archive \"{identifier}\"")]
fn given_served_archive(world: &mut PipelineWorld, identifier: String) {
    let bytes = archive_for(&identifier);
    let entry = CatalogEntry::new(identifier.as_str(), &md5_hex(&bytes)).expect("entry");
    world.serve(&identifier, bytes);
    world.catalog.push(entry);
}

#[given("a tampered archive \"{identifier}\"")]
fn given_tampered_archive(world: &mut PipelineWorld, identifier: String) {
    let bytes = archive_for(&identifier);
    let entry = CatalogEntry::new(identifier.as_str(), &md5_hex(&bytes)).expect("entry");
    world.serve(&identifier, b"tampered in transit".to_vec());
    world.catalog.push(entry);
}

#[given("an empty remote file \"{identifier}\" catalogued with the empty digest")]
fn given_empty_remote_file(world: &mut PipelineWorld, identifier: String) {
    world.serve(&identifier, Vec::new());
    world
        .catalog
        .push(CatalogEntry::new(identifier.as_str(), EMPTY_MD5).expect("entry"));
}

#[given("the archive API rejects \"{identifier}\"")]
fn given_rejected(world: &mut PipelineWorld, identifier: String) {
    world.rejected.push(identifier);
}

#[given("a corrupt partial file \"{identifier}\" in the output directory")]
fn given_corrupt_partial(world: &mut PipelineWorld, identifier: String) {
    std::fs::write(world.output_dir().join(identifier), b"partial").expect("seed partial file");
}

#[when("the pipeline runs")]
fn when_pipeline_runs(world: &mut PipelineWorld) {
    let config = PipelineConfig {
        credential: Credential::new("user@example.com", Secret::new("hunter2")),
        output_dir: world.output_dir().to_path_buf(),
        region: Region::Asia,
        catalog: world.catalog.clone(),
        honour_stamps: true,
    };
    let authenticator = StubAuthenticator::accepting();
    let resolver = StubResolver::rejecting(world.rejected.iter().cloned());
    let probe = FixedProbe::with_free_gib(500);
    let gate = CountingGate::default();
    let guard = SpaceGuard::new(&probe, &gate, 150);
    let fetcher = Fetcher::new(&world.source, &guard, &SilentProgress);
    let extractor = Extractor::new(&TarUnpacker, &guard);
    let pipeline = Pipeline::new(&config, &authenticator, &resolver, fetcher, extractor);

    let mut out = Vec::new();
    let report = pipeline.run(&mut out);
    world.output = String::from_utf8(out).expect("utf-8 output");
    world.reports.push(report);
}

#[then("entry \"{identifier}\" is done")]
fn then_entry_done(world: &mut PipelineWorld, identifier: String) {
    let state = world.state_of(&identifier);
    assert!(
        matches!(state, EntryState::Done(_)),
        "expected {identifier} to be done, got {state:?}"
    );
}

#[then("entry \"{identifier}\" failed while \"{stage}\"")]
fn then_entry_failed(world: &mut PipelineWorld, identifier: String, stage: String) {
    match world.state_of(&identifier) {
        EntryState::Failed(err) => assert_eq!(err.stage().to_string(), stage),
        other => panic!("expected {identifier} to fail, got {other:?}"),
    }
}

#[then("the summary reads \"{summary}\"")]
fn then_summary(world: &mut PipelineWorld, summary: String) {
    assert_eq!(world.last_report().summary_line(), summary);
    assert!(world.output.contains(&summary));
}

#[then("the archive \"{identifier}\" is kept on disk")]
fn then_archive_kept(world: &mut PipelineWorld, identifier: String) {
    assert!(world.output_dir().join(identifier).is_file());
}

#[then("the last run downloaded {count} archives")]
fn then_last_run_downloaded(world: &mut PipelineWorld, count: usize) {
    assert_eq!(world.last_report().downloaded_count(), count);
}

#[then("the remote source was opened {count} times")]
fn then_source_opened(world: &mut PipelineWorld, count: usize) {
    assert_eq!(world.source.open_count(), count);
}

#[then("the output mentions \"{text}\"")]
fn then_output_mentions(world: &mut PipelineWorld, text: String) {
    assert!(
        world.output.contains(&text),
        "expected output to mention {text:?}, got:\n{}",
        world.output
    );
}

#[scenario(
    path = "tests/features/pipeline.feature",
    name = "A rejected URL request does not stop later entries"
)]
fn scenario_failure_isolation(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/pipeline.feature",
    name = "A zero-byte archive with the empty digest fails at extraction"
)]
fn scenario_empty_archive(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/pipeline.feature",
    name = "A second run over the same directory does no work"
)]
fn scenario_second_run(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/pipeline.feature",
    name = "A corrupt leftover file is downloaded again"
)]
fn scenario_corrupt_leftover(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/pipeline.feature",
    name = "A tampered transfer fails only its own entry"
)]
fn scenario_tampered_transfer(world: PipelineWorld) {
    let _ = world;
}
