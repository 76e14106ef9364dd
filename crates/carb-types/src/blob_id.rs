use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Suffix of every blob file in the store.
pub const BLOB_SUFFIX: &str = ".data";

/// Width of the zero-padded decimal size prefix in a blob file name.
pub const SIZE_PREFIX_WIDTH: usize = 18;

/// Content identity of a stored blob: `(size, SHA-256)`.
///
/// The canonical string form is the blob's file name,
/// `<018-zero-padded-decimal-size>_<64-lower-hex-sha256>.data`. The size
/// prefix doubles as a sort key and a cheap pre-hash collision guard; it is
/// part of the identity, not a convenience.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId {
    pub size: u64,
    pub hash: [u8; 32],
}

impl BlobId {
    pub fn new(size: u64, hash: [u8; 32]) -> Self {
        BlobId { size, hash }
    }

    /// Canonical file name under the blob directory.
    pub fn file_name(&self) -> String {
        format!(
            "{:0width$}_{}{BLOB_SUFFIX}",
            self.size,
            hex::encode(self.hash),
            width = SIZE_PREFIX_WIDTH,
        )
    }

    /// Hex-encode the full hash.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Errors from parsing a canonical blob file name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseBlobIdError {
    #[error("missing '.data' suffix")]
    MissingSuffix,
    #[error("malformed size prefix: {0}")]
    BadSize(String),
    #[error("malformed hash: {0}")]
    BadHash(String),
}

impl FromStr for BlobId {
    type Err = ParseBlobIdError;

    /// Parse a canonical blob file name. Consumers of the store layout rely
    /// on this being the exact inverse of [`BlobId::file_name`].
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let stem = name
            .strip_suffix(BLOB_SUFFIX)
            .ok_or(ParseBlobIdError::MissingSuffix)?;

        let (size_part, hash_part) = stem
            .split_once('_')
            .ok_or_else(|| ParseBlobIdError::BadSize(stem.to_string()))?;

        if size_part.len() != SIZE_PREFIX_WIDTH || !size_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseBlobIdError::BadSize(size_part.to_string()));
        }
        let size: u64 = size_part
            .parse()
            .map_err(|_| ParseBlobIdError::BadSize(size_part.to_string()))?;

        if hash_part.len() != 64 {
            return Err(ParseBlobIdError::BadHash(hash_part.to_string()));
        }
        let bytes =
            hex::decode(hash_part).map_err(|_| ParseBlobIdError::BadHash(hash_part.to_string()))?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);

        Ok(BlobId { size, hash })
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({}, {})", self.size, &self.hash_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlobId {
        BlobId::new(6, [0xAB; 32])
    }

    #[test]
    fn file_name_is_padded_and_suffixed() {
        let name = sample().file_name();
        assert_eq!(name.len(), 18 + 1 + 64 + BLOB_SUFFIX.len());
        assert!(name.starts_with("000000000000000006_abab"));
        assert!(name.ends_with(".data"));
    }

    #[test]
    fn parse_roundtrip() {
        let id = sample();
        let parsed: BlobId = id.file_name().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_missing_suffix() {
        let stem = sample().file_name().replace(".data", "");
        assert_eq!(
            stem.parse::<BlobId>().unwrap_err(),
            ParseBlobIdError::MissingSuffix
        );
    }

    #[test]
    fn parse_rejects_short_size_prefix() {
        let name = format!("6_{}.data", hex::encode([0u8; 32]));
        assert!(matches!(
            name.parse::<BlobId>().unwrap_err(),
            ParseBlobIdError::BadSize(_)
        ));
    }

    #[test]
    fn parse_rejects_bad_hash() {
        let name = format!("{:018}_{}.data", 6, "zz".repeat(32));
        assert!(matches!(
            name.parse::<BlobId>().unwrap_err(),
            ParseBlobIdError::BadHash(_)
        ));
        let name = format!("{:018}_{}.data", 6, "ab".repeat(31));
        assert!(matches!(
            name.parse::<BlobId>().unwrap_err(),
            ParseBlobIdError::BadHash(_)
        ));
    }

    #[test]
    fn ordering_matches_name_sort() {
        // Zero-padded size prefix makes lexicographic and numeric order agree.
        let a = BlobId::new(5, [0xFF; 32]);
        let b = BlobId::new(40, [0x00; 32]);
        assert!(a < b);
        assert!(a.file_name() < b.file_name());
    }

    #[test]
    fn display_is_canonical_name() {
        let id = sample();
        assert_eq!(id.to_string(), id.file_name());
    }

    #[test]
    fn serde_roundtrip() {
        let id = sample();
        let json = serde_json::to_string(&id).unwrap();
        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
