//! nuScenes fetcher library.
//!
//! This crate downloads a fixed catalog of large archives from an
//! authenticated API, verifies each against a known digest while it streams
//! to disk, unpacks it in place, and watches free disk space throughout. It
//! backs the `nuscenes-fetch` binary and can be driven programmatically with
//! injected collaborators for testing.
//!
//! # Modules
//!
//! - [`auth`] - Credential exchange for short-lived bearer tokens
//! - [`catalog`] - Archive identifiers and expected digests
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Configuration file, defaults and overrides
//! - [`digest`] - Streaming digests and hex digest validation
//! - [`error`] - Errors that stop a run before it starts
//! - [`extract`] - Archive unpacking with traversal protection
//! - [`fetch`] - Idempotent, verified streaming downloads
//! - [`logging`] - Log subscriber installation
//! - [`output`] - Operator-facing text
//! - [`pipeline`] - Per-entry orchestration and the run report
//! - [`progress`] - Transfer progress display
//! - [`resolve`] - Identifier to download URL resolution
//! - [`space`] - Free-space checks and the operator gate

pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod extract;
pub mod fetch;
mod http;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod space;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
