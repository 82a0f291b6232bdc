//! Shared test utilities for the fetch crate.
//!
//! Stub collaborators record how they were called so tests can assert on
//! network activity without a network, and archive builders produce real
//! tar containers in memory.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};

use crate::auth::{AuthError, Authenticator, BearerToken, Credential};
use crate::fetch::{FetchError, RemoteSource, RemoteStream};
use crate::resolve::{Region, ResolutionError, ResolvedLocation, UrlResolver};
use crate::space::{BYTES_PER_GIB, CapacitySnapshot, OperatorGate, SpaceProbe};

/// URL scheme used by [`StubResolver`] and understood by [`MemorySource`].
pub const MEMORY_SCHEME: &str = "mem://";

/// Lowercase hex MD5 of `bytes`.
#[must_use]
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn append_files<W: Write>(builder: &mut tar::Builder<W>, files: &[(&str, &[u8])]) -> io::Result<()> {
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents)?;
    }
    Ok(())
}

/// Build an uncompressed tar archive holding `files`.
///
/// # Errors
///
/// Returns an I/O error if the archive cannot be assembled.
pub fn tar_bytes(files: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    append_files(&mut builder, files)?;
    builder.into_inner()
}

/// Build a gzip-compressed tar archive holding `files`.
///
/// # Errors
///
/// Returns an I/O error if the archive cannot be assembled.
pub fn tar_gz_bytes(files: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    append_files(&mut builder, files)?;
    builder.into_inner()?.finish()
}

/// Build a zstd-compressed tar archive holding `files`.
///
/// # Errors
///
/// Returns an I/O error if the archive cannot be assembled.
pub fn tar_zst_bytes(files: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let encoder = zstd::Encoder::new(Vec::new(), 0)?;
    let mut builder = tar::Builder::new(encoder);
    append_files(&mut builder, files)?;
    builder.into_inner()?.finish()
}

/// Probe reporting a fixed capacity.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub CapacitySnapshot);

impl FixedProbe {
    /// Probe reporting `free_gib` free out of a 1 TiB disk.
    #[must_use]
    pub fn with_free_gib(free_gib: u64) -> Self {
        let total_bytes = 1024 * BYTES_PER_GIB;
        let free_bytes = free_gib * BYTES_PER_GIB;
        Self(CapacitySnapshot {
            total_bytes,
            used_bytes: total_bytes.saturating_sub(free_bytes),
            free_bytes,
        })
    }
}

impl SpaceProbe for FixedProbe {
    fn capacity(&self, _path: &Path) -> io::Result<CapacitySnapshot> {
        Ok(self.0)
    }
}

/// Gate that returns at once and remembers every path it was asked about.
#[derive(Debug, Default)]
pub struct CountingGate {
    paths: RefCell<Vec<PathBuf>>,
}

impl CountingGate {
    /// Number of times the gate was consulted.
    #[must_use]
    pub fn waits(&self) -> usize {
        self.paths.borrow().len()
    }

    /// Paths the gate was consulted for, in order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.borrow().clone()
    }
}

impl OperatorGate for CountingGate {
    fn wait_for_operator(&self, path: &Path, _snapshot: &CapacitySnapshot) {
        self.paths.borrow_mut().push(path.to_path_buf());
    }
}

/// Authenticator that issues numbered tokens, or rejects every login.
#[derive(Debug, Default)]
pub struct StubAuthenticator {
    reject: bool,
    calls: Cell<usize>,
}

impl StubAuthenticator {
    /// Authenticator that always succeeds.
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Authenticator that always answers HTTP 400.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            calls: Cell::new(0),
        }
    }

    /// Number of login attempts.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Authenticator for StubAuthenticator {
    fn obtain_token(&self, credential: &Credential) -> Result<BearerToken, AuthError> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if self.reject {
            return Err(AuthError::Rejected {
                email: credential.email().to_owned(),
                status: 400,
                body: "NotAuthorizedException".to_owned(),
            });
        }
        Ok(BearerToken::new(format!("token-{call}")))
    }
}

/// Resolver mapping each identifier to `mem://<identifier>`.
#[derive(Debug, Default)]
pub struct StubResolver {
    rejected: HashSet<String>,
    requests: RefCell<Vec<(String, String)>>,
}

impl StubResolver {
    /// Resolver that answers HTTP 404 for every identifier in `rejected`.
    #[must_use]
    pub fn rejecting<I, S>(rejected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rejected: rejected.into_iter().map(Into::into).collect(),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// `(identifier, token)` pairs seen, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.borrow().clone()
    }
}

impl UrlResolver for StubResolver {
    fn resolve(
        &self,
        identifier: &str,
        token: &BearerToken,
        _region: Region,
    ) -> Result<ResolvedLocation, ResolutionError> {
        self.requests
            .borrow_mut()
            .push((identifier.to_owned(), token.as_str().to_owned()));
        if self.rejected.contains(identifier) {
            return Err(ResolutionError::Rejected {
                identifier: identifier.to_owned(),
                status: 404,
                body: "Not Found".to_owned(),
            });
        }
        Ok(ResolvedLocation::new(format!("{MEMORY_SCHEME}{identifier}")))
    }
}

/// In-memory remote storage keyed by URL.
#[derive(Debug, Default)]
pub struct MemorySource {
    bodies: HashMap<String, Vec<u8>>,
    opened: RefCell<Vec<String>>,
}

impl MemorySource {
    /// Serve `body` for `mem://<identifier>`.
    #[must_use]
    pub fn with_body(mut self, identifier: &str, body: Vec<u8>) -> Self {
        self.bodies
            .insert(format!("{MEMORY_SCHEME}{identifier}"), body);
        self
    }

    /// Number of transfers started.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.borrow().len()
    }

    /// URLs opened, in order.
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }
}

impl RemoteSource for MemorySource {
    fn open(&self, location: &ResolvedLocation) -> Result<RemoteStream, FetchError> {
        let url = location.url().to_owned();
        self.opened.borrow_mut().push(url.clone());
        let body = self.bodies.get(&url).cloned().ok_or(FetchError::Transfer {
            url,
            reason: "HTTP 404 Not Found".to_owned(),
        })?;
        Ok(RemoteStream {
            content_length: Some(body.len() as u64),
            reader: Box::new(Cursor::new(body)),
        })
    }
}
