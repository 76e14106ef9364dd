use std::path::{Path, PathBuf};

use globset::GlobSet;
use ignore::WalkBuilder;
use tracing::warn;

use crate::error::{CarbError, Result};
use crate::platform::fs::{summarize_metadata, MetadataSummary};

/// Canonicalize a user-supplied start directory.
///
/// Rejects anything that does not resolve to an existing directory. The
/// result is absolute and carries no trailing separator, so `foo/` and `foo`
/// normalize identically.
pub fn normalize_start_dir(path: &Path) -> Result<PathBuf> {
    let canonical = std::fs::canonicalize(path)
        .map_err(|_| CarbError::InvalidStartDir(path.to_path_buf()))?;
    if !canonical.is_dir() {
        return Err(CarbError::InvalidStartDir(path.to_path_buf()));
    }
    Ok(canonical)
}

/// Relative path of `abs` under `start`, with no leading separator.
/// `relative_path(s, s)` is the empty string.
pub fn relative_path(abs: &Path, start: &Path) -> String {
    abs.strip_prefix(start)
        .unwrap_or(abs)
        .to_string_lossy()
        .into_owned()
}

/// A file the enumerator selected for ingest.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub abs_path: PathBuf,
    pub meta: MetadataSummary,
}

/// Lazily enumerate qualifying regular files under `start_dir`.
///
/// A path qualifies when it is a regular file (or a symlink whose target is
/// one; symlinked directories are never recursed into), its basename matches
/// no exclude glob, it lies outside every pruned internal directory, and,
/// in incremental mode, its mtime is strictly newer than the cutoff
/// (nanosecond comparison).
///
/// Files that cannot be stat'ed are warned about and skipped; enumeration
/// itself never fails the run.
pub fn enumerate<'a>(
    start_dir: &'a Path,
    excludes: &'a GlobSet,
    prune_dirs: Vec<PathBuf>,
    cutoff_ns: Option<i64>,
) -> Box<dyn Iterator<Item = Candidate> + Send + 'a> {
    // Canonicalize prune targets so comparison survives symlinked roots.
    // A prune dir that does not exist cannot be walked into anyway.
    let prune_dirs: Vec<PathBuf> = prune_dirs
        .iter()
        .filter_map(|d| std::fs::canonicalize(d).ok())
        .collect();

    let mut builder = WalkBuilder::new(start_dir);
    builder.follow_links(false);
    builder.hidden(false);
    builder.ignore(false);
    builder.git_global(false);
    builder.git_exclude(false);
    builder.git_ignore(false);
    builder.parents(false);
    builder.require_git(false);

    builder.filter_entry(move |entry| {
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        if is_dir {
            for internal in &prune_dirs {
                if entry.path() == internal {
                    return false;
                }
            }
        }
        true
    });

    let iter = builder.build().filter_map(move |entry_result| {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping entry (walk error)");
                return None;
            }
        };
        let path = entry.path();
        if path == start_dir {
            return None;
        }

        let lstat = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping entry (stat error)");
                return None;
            }
        };

        // Regular files directly; symlinks only when the target is one.
        let metadata = if lstat.is_file() {
            lstat
        } else if lstat.file_type().is_symlink() {
            match std::fs::metadata(path) {
                Ok(m) if m.is_file() => m,
                Ok(_) => return None,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping dangling symlink");
                    return None;
                }
            }
        } else {
            return None;
        };

        let meta = summarize_metadata(&metadata);

        if let Some(name) = path.file_name() {
            if excludes.is_match(Path::new(name)) {
                return None;
            }
        }

        if let Some(cutoff) = cutoff_ns {
            if meta.mtime_ns <= cutoff {
                return None;
            }
        }

        Some(Candidate {
            abs_path: path.to_path_buf(),
            meta,
        })
    });

    Box::new(iter)
}
