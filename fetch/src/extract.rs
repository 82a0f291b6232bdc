//! Archive extraction with path traversal protection.
//!
//! Archives are unpacked into their own parent directory. The container
//! encoding is chosen from the file name suffix. A successfully unpacked
//! archive is deleted; one that fails is left on disk so the next run can
//! re-verify it without downloading again.

use log::{debug, info};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::fetch::{display_name, parent_dir};
use crate::output::write_stderr_line;
use crate::space::SpaceGuard;

/// Container encodings recognised by suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar (`.tgz`, `.tar.gz`).
    TarGz,
    /// Plain tar (`.tar`).
    Tar,
    /// Zstandard-compressed tar (`.tar.zst`, `.tzst`).
    TarZst,
}

impl ArchiveFormat {
    /// Infer the encoding from the file name of `path`.
    ///
    /// Matching is case-insensitive.
    ///
    /// # Examples
    ///
    /// ```
    /// use nuscenes_fetch::extract::ArchiveFormat;
    /// use std::path::Path;
    ///
    /// assert_eq!(
    ///     ArchiveFormat::from_path(Path::new("v1.0-mini.tgz")),
    ///     Some(ArchiveFormat::TarGz)
    /// );
    /// assert_eq!(ArchiveFormat::from_path(Path::new("notes.zip")), None);
    /// ```
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn decoder(self, file: File) -> io::Result<Box<dyn Read>> {
        let reader = BufReader::new(file);
        Ok(match self {
            Self::TarGz => Box::new(flate2::bufread::MultiGzDecoder::new(reader)),
            Self::Tar => Box::new(reader),
            Self::TarZst => Box::new(zstd::Decoder::with_buffer(reader)?),
        })
    }
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error while reading the container or writing its entries.
    #[error("cannot extract {}: {source}", .path.display())]
    Io {
        /// Archive being extracted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An entry attempts to escape the destination directory.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The container holds no entries, or the file is empty.
    #[error("{path} is not a valid archive: no entries found")]
    EmptyArchive {
        /// Archive being extracted.
        path: String,
    },

    /// The file name carries no recognised archive suffix.
    #[error("unsupported archive format: {path}")]
    UnsupportedFormat {
        /// Archive being extracted.
        path: String,
    },
}

impl ExtractionError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Unpacks an archive file into a directory.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveUnpacker {
    /// Unpack `archive_path` into `dest_dir`, returning entry paths in
    /// archive order.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::PathTraversal`] if any entry escapes
    /// `dest_dir`, [`ExtractionError::EmptyArchive`] when nothing was
    /// unpacked, [`ExtractionError::UnsupportedFormat`] for an unknown suffix,
    /// and [`ExtractionError::Io`] for a corrupt container.
    fn unpack(&self, archive_path: &Path, dest_dir: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// Tar unpacker covering every [`ArchiveFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TarUnpacker;

impl ArchiveUnpacker for TarUnpacker {
    fn unpack(&self, archive_path: &Path, dest_dir: &Path) -> Result<Vec<String>, ExtractionError> {
        let path_text = || archive_path.display().to_string();
        let format = ArchiveFormat::from_path(archive_path)
            .ok_or_else(|| ExtractionError::UnsupportedFormat { path: path_text() })?;

        let file = File::open(archive_path).map_err(ExtractionError::io(archive_path))?;
        let len = file
            .metadata()
            .map_err(ExtractionError::io(archive_path))?
            .len();
        if len == 0 {
            return Err(ExtractionError::EmptyArchive { path: path_text() });
        }

        let decoder = format
            .decoder(file)
            .map_err(ExtractionError::io(archive_path))?;
        let mut archive = tar::Archive::new(decoder);
        let mut unpacked = Vec::new();
        let entries = archive
            .entries()
            .map_err(ExtractionError::io(archive_path))?;
        for entry_result in entries {
            let mut entry = entry_result.map_err(ExtractionError::io(archive_path))?;
            let entry_path = entry
                .path()
                .map_err(ExtractionError::io(archive_path))?
                .into_owned();
            validate_entry_path(&entry_path)?;
            validate_link_target(&entry, &entry_path, archive_path)?;

            // `unpack_in` also refuses parents that resolve outside `dest_dir`.
            let inside = entry
                .unpack_in(dest_dir)
                .map_err(ExtractionError::io(archive_path))?;
            if !inside {
                return Err(ExtractionError::PathTraversal {
                    path: entry_path.display().to_string(),
                });
            }
            unpacked.push(entry_path.display().to_string());
        }

        if unpacked.is_empty() {
            return Err(ExtractionError::EmptyArchive { path: path_text() });
        }
        Ok(unpacked)
    }
}

/// Reject entry paths that are absolute or climb out through `..`.
fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Reject symbolic and hard links whose target is absolute or climbs out
/// through `..`.
fn validate_link_target<R: Read>(
    entry: &tar::Entry<'_, R>,
    entry_path: &Path,
    archive_path: &Path,
) -> Result<(), ExtractionError> {
    let kind = entry.header().entry_type();
    if !(kind.is_symlink() || kind.is_hard_link()) {
        return Ok(());
    }
    let Some(target) = entry
        .link_name()
        .map_err(ExtractionError::io(archive_path))?
    else {
        return Ok(());
    };
    validate_entry_path(&target).map_err(|_| ExtractionError::PathTraversal {
        path: format!("{} -> {}", entry_path.display(), target.display()),
    })
}

/// Unpacks verified archives in place and reclaims their space.
pub struct Extractor<'a> {
    unpacker: &'a dyn ArchiveUnpacker,
    guard: &'a SpaceGuard<'a>,
}

impl<'a> Extractor<'a> {
    /// Create an extractor that reports capacity through `guard`.
    #[must_use]
    pub fn new(unpacker: &'a dyn ArchiveUnpacker, guard: &'a SpaceGuard<'a>) -> Self {
        Self { unpacker, guard }
    }

    /// Unpack `archive` into its parent directory, delete it, then check
    /// free space there.
    ///
    /// Returns the unpacked entry paths.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError`] when the container is invalid or the
    /// archive cannot be removed. The archive is kept on failure and the
    /// space guard is not consulted.
    pub fn extract(&self, archive: &Path, out: &mut dyn Write) -> Result<Vec<String>, ExtractionError> {
        let parent = parent_dir(archive);
        let label = display_name(archive);
        write_stderr_line(out, format!("Extracting {label} ..."));

        let entries = self.unpacker.unpack(archive, parent)?;
        debug!("unpacked {} entries from {label}", entries.len());
        fs::remove_file(archive).map_err(ExtractionError::io(archive))?;
        info!("extracted {label} into {} and removed the archive", parent.display());
        write_stderr_line(out, format!("Extracted and removed {label}"));

        self.guard.check_and_warn(parent, out);
        Ok(entries)
    }
}
