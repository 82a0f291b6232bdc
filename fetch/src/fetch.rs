//! Streaming download with incremental verification.
//!
//! A destination that already hashes to the expected digest is final and is
//! returned without touching the network. Anything else at that path is
//! treated as corrupt and overwritten by a fresh transfer, whose digest is
//! accumulated in the same loop that writes each chunk to disk.

use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::digest::{HexDigest, StreamingDigest, digest_file};
use crate::http::http_agent;
use crate::output::write_stderr_line;
use crate::progress::ProgressFactory;
use crate::resolve::ResolvedLocation;
use crate::space::SpaceGuard;

/// Transfer chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// An open remote resource.
pub struct RemoteStream {
    /// Sequential body reader.
    pub reader: Box<dyn Read>,
    /// Transfer-length hint, used only for progress display.
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens resolved locations for sequential reading.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteSource {
    /// Open `location` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transfer`] when the resource cannot be opened.
    fn open(&self, location: &ResolvedLocation) -> Result<RemoteStream, FetchError>;
}

/// Plain streamed GET through the shared `ureq` agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSource;

impl RemoteSource for HttpSource {
    fn open(&self, location: &ResolvedLocation) -> Result<RemoteStream, FetchError> {
        let url = location.url();
        let response = http_agent()
            .get(url)
            .call()
            .map_err(|err| FetchError::Transfer {
                url: url.to_owned(),
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transfer {
                url: url.to_owned(),
                reason: format!("HTTP {status}"),
            });
        }
        let content_length = response
            .headers()
            .get(ureq::http::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        Ok(RemoteStream {
            reader: Box::new(response.into_body().into_reader()),
            content_length,
        })
    }
}

/// Where a [`LocalArtifact`]'s bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// A verified file was already on disk.
    Reused,
    /// The file was transferred during this call.
    Downloaded,
}

/// A verified archive on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    path: PathBuf,
    digest: HexDigest,
    size_bytes: u64,
    origin: ArtifactOrigin,
}

impl LocalArtifact {
    /// Location on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verified digest of the file contents.
    #[must_use]
    pub fn digest(&self) -> &HexDigest {
        &self.digest
    }

    /// File size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Whether the file was reused or freshly downloaded.
    #[must_use]
    pub fn origin(&self) -> ArtifactOrigin {
        self.origin
    }
}

/// Errors raised while fetching an archive.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The completed transfer does not hash to the expected digest.
    #[error("digest mismatch for {}: got {actual}, expected {expected}", .path.display())]
    Integrity {
        /// Destination path of the transfer.
        path: PathBuf,
        /// Digest from the catalog.
        expected: HexDigest,
        /// Digest of the bytes received.
        actual: HexDigest,
    },

    /// The remote resource could not be opened or read.
    #[error("transfer from {url} failed: {reason}")]
    Transfer {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        reason: String,
    },

    /// Local storage could not be read or written.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Streams remote archives to disk, verifying as it writes.
pub struct Fetcher<'a> {
    source: &'a dyn RemoteSource,
    guard: &'a SpaceGuard<'a>,
    progress: &'a dyn ProgressFactory,
    chunk_size: usize,
}

impl<'a> Fetcher<'a> {
    /// Create a fetcher reading `DEFAULT_CHUNK_SIZE` bytes at a time.
    #[must_use]
    pub fn new(
        source: &'a dyn RemoteSource,
        guard: &'a SpaceGuard<'a>,
        progress: &'a dyn ProgressFactory,
    ) -> Self {
        Self {
            source,
            guard,
            progress,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the read chunk size. Zero is raised to one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make `destination` hold the content identified by `expected`.
    ///
    /// Returns immediately, without opening `location`, when the file
    /// already verifies. Otherwise downloads over it, checks the digest,
    /// and reports free space in the destination directory.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Integrity`] when the received bytes do not
    /// match, [`FetchError::Transfer`] when the remote read fails, and
    /// [`FetchError::Io`] for local storage failures.
    pub fn fetch(
        &self,
        location: &ResolvedLocation,
        destination: &Path,
        expected: &HexDigest,
        out: &mut dyn Write,
    ) -> Result<LocalArtifact, FetchError> {
        let parent = parent_dir(destination);
        fs::create_dir_all(parent).map_err(FetchError::io(parent))?;

        let label = display_name(destination);
        if destination.exists() {
            if let Some(artifact) = self.reuse_existing(destination, expected)? {
                info!("{label} already present with matching digest; skipping download");
                write_stderr_line(
                    out,
                    format!("[SKIP] {label} already exists and digest checks out"),
                );
                return Ok(artifact);
            }
            warn!("{label} exists but its digest does not match; downloading again");
            write_stderr_line(
                out,
                format!("[RE-DOWNLOAD] {label} digest mismatch, redownloading"),
            );
        }

        let artifact = self.download(location, destination, expected, &label)?;
        self.guard.check_and_warn(parent, out);
        Ok(artifact)
    }

    fn reuse_existing(
        &self,
        destination: &Path,
        expected: &HexDigest,
    ) -> Result<Option<LocalArtifact>, FetchError> {
        let actual =
            digest_file(destination, expected.algorithm()).map_err(FetchError::io(destination))?;
        if !actual.matches(expected) {
            debug!(
                "existing {} hashes to {actual}, expected {expected}",
                destination.display()
            );
            return Ok(None);
        }
        let size_bytes = fs::metadata(destination)
            .map_err(FetchError::io(destination))?
            .len();
        Ok(Some(LocalArtifact {
            path: destination.to_path_buf(),
            digest: actual,
            size_bytes,
            origin: ArtifactOrigin::Reused,
        }))
    }

    fn download(
        &self,
        location: &ResolvedLocation,
        destination: &Path,
        expected: &HexDigest,
        label: &str,
    ) -> Result<LocalArtifact, FetchError> {
        let RemoteStream {
            mut reader,
            content_length,
        } = self.source.open(location)?;
        debug!(
            "downloading {} ({} bytes advertised)",
            destination.display(),
            content_length.map_or_else(|| "unknown".to_owned(), |len| len.to_string())
        );

        let mut file = File::create(destination).map_err(FetchError::io(destination))?;
        let mut digest = StreamingDigest::new(expected.algorithm());
        let mut tracker = self.progress.tracker(label, content_length);
        let mut buffer = vec![0_u8; self.chunk_size];

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracker.finish();
                    return Err(FetchError::Transfer {
                        url: location.url().to_owned(),
                        reason: err.to_string(),
                    });
                }
            };
            let chunk = buffer.get(..bytes_read).unwrap_or_default();
            file.write_all(chunk).map_err(FetchError::io(destination))?;
            digest.update(chunk);
            tracker.step(bytes_read as u64);
        }
        tracker.finish();
        file.flush().map_err(FetchError::io(destination))?;

        let size_bytes = digest.bytes_seen();
        let actual = digest.finalize();
        if !actual.matches(expected) {
            return Err(FetchError::Integrity {
                path: destination.to_path_buf(),
                expected: expected.clone(),
                actual,
            });
        }
        info!("downloaded {label}: {size_bytes} bytes, digest {actual}");
        Ok(LocalArtifact {
            path: destination.to_path_buf(),
            digest: actual,
            size_bytes,
            origin: ArtifactOrigin::Downloaded,
        })
    }
}

/// Directory holding `path`, or `.` for a bare file name.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// File name of `path` for operator messages.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;
