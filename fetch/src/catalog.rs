//! The archive catalog: file names paired with known-good digests.
//!
//! Catalog order is processing order. Identifiers double as file names under
//! the output directory, so they must be plain names with no separators.

use std::collections::HashSet;

use crate::digest::{DigestError, HexDigest};

/// The nuScenes v1.0 archives and their published MD5 digests.
pub const NUSCENES_V1_CATALOG: [(&str, &str); 12] = [
    ("v1.0-trainval01_blobs.tgz", "cbf32d2ea6996fc599b32f724e7ce8f2"),
    ("v1.0-trainval02_blobs.tgz", "aeecea4878ec3831d316b382bb2f72da"),
    ("v1.0-trainval03_blobs.tgz", "595c29528351060f94c935e3aaf7b995"),
    ("v1.0-trainval04_blobs.tgz", "b55eae9b4aa786b478858a3fc92fb72d"),
    ("v1.0-trainval05_blobs.tgz", "1c815ed607a11be7446dcd4ba0e71ed0"),
    ("v1.0-trainval06_blobs.tgz", "7273eeea36e712be290472859063a678"),
    ("v1.0-trainval07_blobs.tgz", "46674d2b2b852b7a857d2c9a87fc755f"),
    ("v1.0-trainval08_blobs.tgz", "37524bd4edee2ab99678909334313adf"),
    ("v1.0-trainval09_blobs.tgz", "a7fcd6d9c0934e4052005aa0b84615c0"),
    ("v1.0-trainval10_blobs.tgz", "31e795f2c13f62533c727119b822d739"),
    ("v1.0-test_meta.tgz", "b0263f5c41b780a5a10ede2da99539eb"),
    ("v1.0-test_blobs.tgz", "e065445b6019ecc15c70ad9d99c47b33"),
];

/// Errors raised while building or filtering a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The identifier is not a plain file name.
    #[error("invalid catalog identifier {identifier:?}: {reason}")]
    InvalidIdentifier {
        /// Offending identifier.
        identifier: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The expected digest is not valid hex of a supported length.
    #[error("invalid digest for {identifier}: {source}")]
    InvalidDigest {
        /// Entry the digest belongs to.
        identifier: String,
        /// Underlying parse failure.
        #[source]
        source: DigestError,
    },

    /// The same identifier appears twice.
    #[error("duplicate catalog identifier {identifier}")]
    Duplicate {
        /// Repeated identifier.
        identifier: String,
    },

    /// A requested identifier is not in the catalog.
    #[error("{identifier} is not in the catalog")]
    UnknownIdentifier {
        /// Requested identifier.
        identifier: String,
    },
}

/// One archive to fetch and its expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    identifier: String,
    expected_digest: HexDigest,
}

impl CatalogEntry {
    /// Validate and build an entry.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidIdentifier`] for empty names, names
    /// containing path separators, or `.`/`..`, and
    /// [`CatalogError::InvalidDigest`] when the digest does not parse.
    pub fn new(identifier: impl Into<String>, digest: &str) -> Result<Self, CatalogError> {
        let identifier = identifier.into();
        if let Some(reason) = identifier_problem(&identifier) {
            return Err(CatalogError::InvalidIdentifier { identifier, reason });
        }
        let expected_digest =
            HexDigest::try_from(digest).map_err(|source| CatalogError::InvalidDigest {
                identifier: identifier.clone(),
                source,
            })?;
        Ok(Self {
            identifier,
            expected_digest,
        })
    }

    /// Remote file name, also used as the local file name.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Known-good digest of the archive.
    #[must_use]
    pub fn expected_digest(&self) -> &HexDigest {
        &self.expected_digest
    }
}

fn identifier_problem(identifier: &str) -> Option<&'static str> {
    if identifier.is_empty() {
        Some("identifier is empty")
    } else if identifier == "." || identifier == ".." {
        Some("identifier is a relative directory")
    } else if identifier.contains(['/', '\\']) {
        Some("identifier contains a path separator")
    } else {
        None
    }
}

/// Build a catalog from `(identifier, digest)` pairs, keeping their order.
///
/// # Errors
///
/// Returns the first invalid or duplicated entry.
pub fn build_catalog<'a, I>(pairs: I) -> Result<Vec<CatalogEntry>, CatalogError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (identifier, digest) in pairs {
        if !seen.insert(identifier) {
            return Err(CatalogError::Duplicate {
                identifier: identifier.to_owned(),
            });
        }
        entries.push(CatalogEntry::new(identifier, digest)?);
    }
    Ok(entries)
}

/// The built-in nuScenes v1.0 catalog.
///
/// # Errors
///
/// Never fails for the shipped table; the `Result` is kept so a malformed
/// edit surfaces as a [`CatalogError`] rather than a panic.
pub fn default_catalog() -> Result<Vec<CatalogEntry>, CatalogError> {
    build_catalog(NUSCENES_V1_CATALOG)
}

/// Restrict `catalog` to `only`, preserving catalog order.
///
/// An empty `only` keeps everything.
///
/// # Errors
///
/// Returns [`CatalogError::UnknownIdentifier`] for a name not in `catalog`.
pub fn select(catalog: Vec<CatalogEntry>, only: &[String]) -> Result<Vec<CatalogEntry>, CatalogError> {
    if only.is_empty() {
        return Ok(catalog);
    }
    if let Some(missing) = only
        .iter()
        .find(|name| !catalog.iter().any(|entry| entry.identifier() == name.as_str()))
    {
        return Err(CatalogError::UnknownIdentifier {
            identifier: missing.clone(),
        });
    }
    Ok(catalog
        .into_iter()
        .filter(|entry| only.iter().any(|name| name == entry.identifier()))
        .collect())
}
