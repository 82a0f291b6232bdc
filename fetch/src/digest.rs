//! Content digests for catalog verification.
//!
//! Catalog digests are hex strings whose length selects the algorithm:
//! 32 characters for MD5 (the nuScenes catalog) and 64 for SHA-256. The
//! [`StreamingDigest`] accumulator is fed chunk by chunk from the transfer
//! loop, so hashing never needs the whole file in memory.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Hex length of an MD5 digest.
const MD5_HEX_LEN: usize = 32;
/// Hex length of a SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;
/// Buffer size used when re-hashing files already on disk.
const READ_BUFFER_LEN: usize = 64 * 1024;

/// MD5 digest of zero bytes of content.
pub const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Hash algorithm backing a [`HexDigest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// 128-bit MD5, as published for the nuScenes archives.
    Md5,
    /// 256-bit SHA-256.
    Sha256,
}

impl DigestAlgorithm {
    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            MD5_HEX_LEN => Some(Self::Md5),
            SHA256_HEX_LEN => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "MD5"),
            Self::Sha256 => write!(f, "SHA-256"),
        }
    }
}

/// A digest string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest \"{value}\": {reason}")]
pub struct DigestError {
    /// The rejected input.
    pub value: String,
    /// Description of the validation failure.
    pub reason: String,
}

/// A validated hex-encoded digest, normalised to lowercase.
///
/// # Examples
///
/// ```
/// use nuscenes_fetch::digest::{DigestAlgorithm, HexDigest};
///
/// let digest = HexDigest::try_from("D41D8CD98F00B204E9800998ECF8427E").unwrap();
/// assert_eq!(digest.algorithm(), DigestAlgorithm::Md5);
/// assert_eq!(digest.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HexDigest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl HexDigest {
    /// Return the algorithm implied by the digest length.
    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Return the digest as a lowercase hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Return true when both digests use the same algorithm and value.
    ///
    /// Plain equality: the digest guards against transmission corruption,
    /// not adversaries, so no constant-time comparison is needed.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

impl TryFrom<&str> for HexDigest {
    type Error = DigestError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let algorithm = validate_hex(value)?;
        Ok(Self {
            algorithm,
            hex: value.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for HexDigest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl AsRef<str> for HexDigest {
    fn as_ref(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for HexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

fn validate_hex(value: &str) -> Result<DigestAlgorithm, DigestError> {
    let invalid = |reason: String| DigestError {
        value: value.to_owned(),
        reason,
    };
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(invalid(format!("non-hex character '{bad}'")));
    }
    DigestAlgorithm::from_hex_len(value.len()).ok_or_else(|| {
        invalid(format!(
            "expected {MD5_HEX_LEN} (MD5) or {SHA256_HEX_LEN} (SHA-256) hex characters, got {}",
            value.len()
        ))
    })
}

enum HasherState {
    Md5(md5::Context),
    Sha256(Sha256),
}

/// Incremental digest accumulator.
///
/// Feeding the same bytes in any chunking yields the same final digest.
///
/// # Examples
///
/// ```
/// use nuscenes_fetch::digest::{DigestAlgorithm, StreamingDigest};
///
/// let mut digest = StreamingDigest::new(DigestAlgorithm::Md5);
/// digest.update(b"hello ");
/// digest.update(b"world");
/// assert_eq!(digest.bytes_seen(), 11);
/// assert_eq!(digest.finalize().as_str(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
/// ```
pub struct StreamingDigest {
    state: HasherState,
    bytes_seen: u64,
}

impl StreamingDigest {
    /// Start an empty accumulator for `algorithm`.
    #[must_use]
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let state = match algorithm {
            DigestAlgorithm::Md5 => HasherState::Md5(md5::Context::new()),
            DigestAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self {
            state,
            bytes_seen: 0,
        }
    }

    /// Feed the next chunk of content.
    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.state {
            HasherState::Md5(context) => context.consume(chunk),
            HasherState::Sha256(hasher) => hasher.update(chunk),
        }
        self.bytes_seen = self.bytes_seen.saturating_add(chunk.len() as u64);
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Consume the accumulator and return the lowercase hex digest.
    #[must_use]
    pub fn finalize(self) -> HexDigest {
        match self.state {
            HasherState::Md5(context) => HexDigest {
                algorithm: DigestAlgorithm::Md5,
                hex: format!("{:x}", context.compute()),
            },
            HasherState::Sha256(hasher) => HexDigest {
                algorithm: DigestAlgorithm::Sha256,
                hex: hex::encode(hasher.finalize()),
            },
        }
    }
}

impl fmt::Debug for StreamingDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self.state {
            HasherState::Md5(_) => DigestAlgorithm::Md5,
            HasherState::Sha256(_) => DigestAlgorithm::Sha256,
        };
        f.debug_struct("StreamingDigest")
            .field("algorithm", &algorithm)
            .field("bytes_seen", &self.bytes_seen)
            .finish()
    }
}

/// Digest everything `reader` yields.
///
/// # Errors
///
/// Returns any I/O error raised while reading.
pub fn digest_reader(reader: &mut dyn Read, algorithm: DigestAlgorithm) -> io::Result<HexDigest> {
    let mut digest = StreamingDigest::new(algorithm);
    let mut buffer = vec![0_u8; READ_BUFFER_LEN];
    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        digest.update(buffer.get(..bytes_read).unwrap_or_default());
    }
    Ok(digest.finalize())
}

/// Digest the file at `path` in fixed-size chunks.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> io::Result<HexDigest> {
    let mut file = File::open(path)?;
    digest_reader(&mut file, algorithm)
}
