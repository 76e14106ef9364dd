pub mod install;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use carb_types::BlobId;

use crate::error::{CarbError, Result};
use crate::platform::paths;

/// Name of the append-only blob index inside the blob directory.
pub const INDEX_FILE: &str = "INDEX";

/// Staging files older than this are swept at run start.
const STALE_STAGING_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Prefix of every staging file under the tmp directory.
pub const STAGING_PREFIX: &str = "carb-staging.";

/// On-disk layout of the store: blob directory, parity directory, staging
/// area, and the manifest root. Shared by all runs; a run only ever appends.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
    pub blobs_dir: PathBuf,
    pub parity_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub manifest_dir: PathBuf,
}

impl StoreLayout {
    /// Layout rooted at an explicit directory; every internal directory,
    /// staging included, lives under the root.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        StoreLayout {
            blobs_dir: root.join("blobs"),
            parity_dir: root.join("parity"),
            manifest_dir: root.join("manifest"),
            tmp_dir: root.join("tmp"),
            root,
        }
    }

    /// Layout at the platform user data directory (`$XDG_DATA_HOME/carb`,
    /// `~/Library/Application Support/carb`, `%APPDATA%\carb`), with
    /// `TMPDIR` overriding the staging area.
    pub fn default_root() -> Result<Self> {
        let data = paths::data_dir()
            .ok_or_else(|| CarbError::Config("cannot determine user data directory".into()))?;
        let mut layout = Self::at(data.join("carb"));
        if let Some(tmp) = paths::tmp_dir_override() {
            layout.tmp_dir = tmp.join("carb");
        }
        Ok(layout)
    }

    /// Create all directories and probe that the root is writable. Runs
    /// before enumeration; failure here aborts before any file is touched.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            &self.root,
            &self.blobs_dir,
            &self.parity_dir,
            &self.tmp_dir,
            &self.manifest_dir,
        ] {
            fs::create_dir_all(dir)
                .map_err(|_| CarbError::UnwritableRoot(self.root.clone()))?;
        }

        let probe = self.tmp_dir.join(format!(".write-probe.{}", std::process::id()));
        fs::write(&probe, b"probe").map_err(|_| CarbError::UnwritableRoot(self.root.clone()))?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }

    pub fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.blobs_dir.join(id.file_name())
    }

    pub fn index_path(&self) -> PathBuf {
        self.blobs_dir.join(INDEX_FILE)
    }

    pub fn ingested_folders_path(&self) -> PathBuf {
        self.manifest_dir.join("ingestedFolders")
    }

    /// Directories the enumerator must prune when they lie under the start
    /// dir. Scanning our own storage would feed the ingest back to itself.
    pub fn internal_dirs(&self) -> [&Path; 4] {
        [
            &self.blobs_dir,
            &self.parity_dir,
            &self.tmp_dir,
            &self.manifest_dir,
        ]
    }

    /// Append BlobIds to the global index, one canonical name per line. The
    /// index is advisory and may repeat names across runs.
    pub fn append_index(&self, ids: &[BlobId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path())?;
        let mut buf = String::with_capacity(ids.len() * 90);
        for id in ids {
            buf.push_str(&id.file_name());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Best-effort removal of staging files left behind by killed runs.
    /// Returns the number of entries removed.
    pub fn sweep_stale_staging(&self) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;
        let entries = match fs::read_dir(&self.tmp_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .is_some_and(|age| age > STALE_STAGING_AGE);
            if stale {
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        debug!(path = %entry.path().display(), "swept stale staging file");
                        removed += 1;
                    }
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "failed to sweep staging file");
                    }
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, StoreLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::at(dir.path().join("store"));
        (dir, layout)
    }

    #[test]
    fn ensure_creates_all_dirs() {
        let (_tmp, layout) = layout();
        layout.ensure().unwrap();
        assert!(layout.blobs_dir.is_dir());
        assert!(layout.parity_dir.is_dir());
        assert!(layout.manifest_dir.is_dir());
    }

    #[test]
    fn blob_path_uses_canonical_name() {
        let (_tmp, layout) = layout();
        let id = BlobId::new(5, [0x11; 32]);
        let path = layout.blob_path(&id);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            id.file_name()
        );
        assert!(path.starts_with(&layout.blobs_dir));
    }

    #[test]
    fn append_index_accumulates_lines() {
        let (_tmp, layout) = layout();
        layout.ensure().unwrap();

        let a = BlobId::new(1, [0xAA; 32]);
        let b = BlobId::new(2, [0xBB; 32]);
        layout.append_index(&[a]).unwrap();
        layout.append_index(&[b]).unwrap();

        let index = fs::read_to_string(layout.index_path()).unwrap();
        let lines: Vec<&str> = index.lines().collect();
        assert_eq!(lines, vec![a.file_name(), b.file_name()]);
    }

    #[test]
    fn append_index_empty_is_noop() {
        let (_tmp, layout) = layout();
        layout.ensure().unwrap();
        layout.append_index(&[]).unwrap();
        assert!(!layout.index_path().exists());
    }

    #[test]
    fn sweep_ignores_fresh_staging() {
        let (_tmp, layout) = layout();
        layout.ensure().unwrap();
        fs::write(layout.tmp_dir.join("carb-staging.fresh"), b"x").unwrap();
        assert_eq!(layout.sweep_stale_staging(), 0);
        assert!(layout.tmp_dir.join("carb-staging.fresh").exists());
    }

    #[test]
    fn sweep_skips_foreign_files() {
        let (_tmp, layout) = layout();
        layout.ensure().unwrap();
        fs::write(layout.tmp_dir.join("unrelated"), b"x").unwrap();
        assert_eq!(layout.sweep_stale_staging(), 0);
        assert!(layout.tmp_dir.join("unrelated").exists());
    }
}
