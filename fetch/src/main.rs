//! nuScenes fetcher CLI entrypoint.
//!
//! Loads configuration, wires the production collaborators into the
//! pipeline, and maps the outcome to an exit status.

use camino::Utf8Path;
use clap::Parser;
use std::io::Write;
use std::path::Path;

use nuscenes_fetch::auth::CognitoAuthenticator;
use nuscenes_fetch::cli::Cli;
use nuscenes_fetch::config::{FetchConfig, SystemBaseDirs};
use nuscenes_fetch::error::{FetcherError, Result};
use nuscenes_fetch::extract::{Extractor, TarUnpacker};
use nuscenes_fetch::fetch::{Fetcher, HttpSource};
use nuscenes_fetch::logging::init_logging;
use nuscenes_fetch::output::{DryRunInfo, write_stderr_line};
use nuscenes_fetch::pipeline::Pipeline;
use nuscenes_fetch::progress::BarProgress;
use nuscenes_fetch::resolve::ArchiveApiResolver;
use nuscenes_fetch::space::{ContinueGate, FilesystemProbe, OperatorGate, SpaceGuard, StdinGate};

/// Exit status when `--strict` is set and an archive failed.
const EXIT_ENTRY_FAILED: i32 = 2;

/// How a run that started cleanly ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// `--dry-run` printed the settings.
    DryRun,
    /// The catalog was processed.
    Completed {
        /// Entries that ended in `FAILED`.
        failed: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, cli.strict, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<RunOutcome> {
    init_logging(cli.verbosity, cli.quiet)?;

    let (mut config, config_path) =
        FetchConfig::load(cli.config.as_deref().map(Utf8Path::as_std_path), &SystemBaseDirs)?;
    config.apply_overrides(cli.overrides());
    let catalog = config.catalog_entries(&cli.only)?;

    if cli.dry_run {
        let output_dir = config.output_dir.as_deref().unwrap_or_else(|| Path::new("(not set)"));
        let info = DryRunInfo {
            config_path: config_path.as_deref(),
            email: config.email.as_deref().unwrap_or("(not set)"),
            output_dir,
            region: config.region,
            min_free_gib: config.min_free_gib,
            pause_on_low_space: !cli.no_pause,
            honour_stamps: !cli.reprocess,
            catalog: &catalog,
        };
        write_stderr_line(stderr, info.display_text());
        return Ok(RunOutcome::DryRun);
    }

    let pipeline_config = config.pipeline_config(catalog, !cli.reprocess)?;
    std::fs::create_dir_all(&pipeline_config.output_dir).map_err(|source| {
        FetcherError::OutputDir {
            path: pipeline_config.output_dir.clone(),
            source,
        }
    })?;

    let authenticator = CognitoAuthenticator::new(&config.auth_endpoint, &config.client_id);
    let resolver = ArchiveApiResolver::new(&config.api_base, &config.project);
    let gate: &dyn OperatorGate = if cli.no_pause {
        &ContinueGate
    } else {
        &StdinGate
    };
    let guard = SpaceGuard::new(&FilesystemProbe, gate, config.min_free_gib);
    let progress = BarProgress::new(cli.quiet);
    let fetcher =
        Fetcher::new(&HttpSource, &guard, &progress).with_chunk_size(config.chunk_size);
    let extractor = Extractor::new(&TarUnpacker, &guard);

    let pipeline = Pipeline::new(&pipeline_config, &authenticator, &resolver, fetcher, extractor);
    let report = pipeline.run(stderr);
    Ok(RunOutcome::Completed {
        failed: report.failed_count(),
    })
}

fn exit_code_for_run_result(result: Result<RunOutcome>, strict: bool, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(RunOutcome::Completed { failed }) if strict && failed > 0 => EXIT_ENTRY_FAILED,
        Ok(_) => 0,
        Err(err) => {
            write_stderr_line(stderr, err);
            1
        }
    }
}
