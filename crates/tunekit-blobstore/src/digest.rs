//! Content digests used as blob store addressing keys.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::error::{BlobStoreError, Result};

/// Block size used when streaming an artifact through the hasher.
pub const DIGEST_BLOCK_SIZE: usize = 1024 * 1024;

const SHA256_PREFIX: &str = "sha256:";

/// An algorithm-prefixed, lowercase hex content hash (`sha256:<64 hex>`).
///
/// Two artifacts with equal digests are treated as identical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Digest of an in-memory byte slice.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(bytes))
    }

    /// Parse a `sha256:<hex>` string, normalising the hex to lowercase.
    pub fn parse(value: &str) -> Result<Self> {
        let hex_part = value
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| BlobStoreError::InvalidDigest(value.to_string()))?;
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BlobStoreError::InvalidDigest(value.to_string()));
        }
        Ok(Self(format!("{SHA256_PREFIX}{}", hex_part.to_ascii_lowercase())))
    }

    /// Stream a file through SHA-256 in [`DIGEST_BLOCK_SIZE`] blocks.
    ///
    /// Peak memory stays at one block regardless of artifact size. The whole
    /// file is always read. Returns the digest and the number of bytes hashed.
    /// Hashing runs on the blocking pool so multi-gigabyte artifacts do not
    /// stall the async runtime.
    pub async fn of_file(path: &Path) -> Result<(Self, u64)> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::of_file_blocking(&path))
            .await
            .map_err(|e| BlobStoreError::Io(std::io::Error::other(e)))?
    }

    fn of_file_blocking(path: &Path) -> Result<(Self, u64)> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut block = vec![0u8; DIGEST_BLOCK_SIZE];
        let mut total: u64 = 0;

        loop {
            let read = file.read(&mut block)?;
            if read == 0 {
                break;
            }
            hasher.update(&block[..read]);
            total += read as u64;
        }

        let digest = Self::from_hasher(hasher);
        debug!(path = %path.display(), bytes = total, digest = %digest, "Computed artifact digest");
        Ok((digest, total))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{SHA256_PREFIX}{}", hex::encode(hasher.finalize())))
    }

    /// The full `sha256:<hex>` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex portion without the algorithm prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0[SHA256_PREFIX.len()..]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for Digest {
    type Error = BlobStoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}
