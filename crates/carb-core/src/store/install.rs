use std::fs;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use carb_types::BlobId;

use crate::error::{CarbError, Result};

/// Result of installing a staged file into the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// This call created the blob.
    Ingested,
    /// The blob already existed; the staged copy was discarded.
    Deduped,
}

/// Atomically install `staging` as the blob for `id`.
///
/// The protocol is hardlink-first: link-with-existing-target is the only
/// primitive that is both create-if-absent and atomic on a single
/// filesystem, so it resolves concurrent installs of the same content
/// without any read-modify-write on the target. The rename/copy fallbacks
/// only run when the link failed for a non-existence reason (cross-device
/// staging).
///
/// The staging file is removed on every path out of this function: consumed
/// by rename, or unlinked when the `NamedTempFile` guard drops.
pub fn install_blob(
    staging: NamedTempFile,
    id: &BlobId,
    blobs_dir: &Path,
) -> Result<InstallOutcome> {
    let target = blobs_dir.join(id.file_name());

    let link_err = match fs::hard_link(staging.path(), &target) {
        Ok(()) => return Ok(InstallOutcome::Ingested),
        Err(e) => e,
    };

    // The link failed. Observe the target directly: a losing racer sees the
    // winner's blob here.
    if target.exists() {
        return Ok(InstallOutcome::Deduped);
    }

    debug!(
        target = %target.display(),
        error = %link_err,
        "hardlink failed without existing target, trying rename fallback"
    );

    let (staging, rename_err) = match staging.persist_noclobber(&target) {
        Ok(_) => return Ok(InstallOutcome::Ingested),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            return Ok(InstallOutcome::Deduped);
        }
        Err(e) => (e.file, e.error),
    };

    match copy_noclobber(staging.path(), &target) {
        Ok(true) => Ok(InstallOutcome::Ingested),
        Ok(false) => Ok(InstallOutcome::Deduped),
        Err(copy_err) => Err(CarbError::InstallFailed {
            path: target,
            reason: format!(
                "link: {link_err}; rename: {rename_err}; copy: {copy_err}"
            ),
        }),
    }
}

/// Copy `src` to `target` only if `target` does not exist. Returns `false`
/// when the target was already present. A partial copy never survives: the
/// target is unlinked before the error propagates.
fn copy_noclobber(src: &Path, target: &Path) -> io::Result<bool> {
    let mut out = match fs::File::options().write(true).create_new(true).open(target) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    let mut src_file = fs::File::open(src).inspect_err(|_| {
        let _ = fs::remove_file(target);
    })?;
    match io::copy(&mut src_file, &mut out) {
        Ok(_) => Ok(true),
        Err(e) => {
            let _ = fs::remove_file(target);
            Err(e)
        }
    }
}
