pub mod pipeline;

use std::io::{Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use carb_types::BlobId;

use crate::error::{CarbError, Result};
use crate::store::STAGING_PREFIX;

/// Fixed read buffer for the tee stream.
const READ_BUF_SIZE: usize = 128 * 1024;

/// A fully staged file: its bytes under the tmp directory and the content
/// identity computed from the same single pass.
#[derive(Debug)]
pub struct StagedBlob {
    pub staging: NamedTempFile,
    pub id: BlobId,
}

/// Read `source` exactly once, feeding the same byte stream into a staging
/// file and an incremental SHA-256.
///
/// One pass is a correctness requirement, not an optimization: hashing and
/// copying in separate reads would disagree if the file is mutated
/// concurrently. The identity is taken from the bytes actually read, never
/// from a stat.
///
/// Source read failures are item-scoped `ReadError`s; staging I/O failures
/// are fatal (the tmp directory is unusable). The staging file is unlinked
/// on every error path by its temp-file guard.
pub fn stage_and_hash(source: &Path, tmp_dir: &Path) -> Result<StagedBlob> {
    let mut reader = std::fs::File::open(source).map_err(|e| CarbError::Read {
        path: source.to_path_buf(),
        source: e,
    })?;

    let mut staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(tmp_dir)?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut size: u64 = 0;
    loop {
        let n = reader.read(&mut buf).map_err(|e| CarbError::Read {
            path: source.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        staging.write_all(&buf[..n])?;
        size += n as u64;
    }

    Ok(StagedBlob {
        staging,
        id: BlobId::new(size, hasher.finalize().into()),
    })
}
