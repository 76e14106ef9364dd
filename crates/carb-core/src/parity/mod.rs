pub mod codec;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use carb_types::BlobId;

use crate::config::ParityConfig;
use crate::error::{CarbError, Result};

use codec::ParityCodec;

pub const TARGET_DATA_SLICES: u64 = 16;
pub const MIN_PARITY_SLICES: u64 = 4;
pub const MIN_BLOCK_SIZE: u64 = 512;
pub const MAX_BLOCK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_REDUNDANCY: u32 = 10;
/// The codec family refuses redundancy above this.
pub const MAX_REDUNDANCY: u32 = 80;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_POLL_ATTEMPTS: u32 = 50;

/// Parameters handed to the FEC codec for one blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParityPlan {
    pub block_size: u64,
    pub redundancy: u32,
}

/// Plan block size and redundancy for a blob of `size` bytes.
///
/// Pure function: explicit settings pass through unchanged; an explicit
/// block size gets an adaptive redundancy floor; full auto derives the block
/// size from a target slice count, clamps it, and rounds up to a power of
/// two.
pub fn plan(size: u64, config: &ParityConfig) -> ParityPlan {
    match (config.block_size, config.redundancy) {
        (Some(block_size), Some(redundancy)) => ParityPlan {
            block_size,
            redundancy,
        },
        (Some(block_size), None) => ParityPlan {
            block_size,
            redundancy: adaptive_redundancy(size, block_size, DEFAULT_REDUNDANCY),
        },
        (None, configured) => {
            let block_size = auto_block_size(size);
            ParityPlan {
                block_size,
                redundancy: adaptive_redundancy(
                    size,
                    block_size,
                    configured.unwrap_or(DEFAULT_REDUNDANCY),
                ),
            }
        }
    }
}

fn auto_block_size(size: u64) -> u64 {
    (size / TARGET_DATA_SLICES)
        .clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
        .next_power_of_two()
}

/// Raise the redundancy so at least `MIN_PARITY_SLICES` parity slices exist,
/// capped at what the codec accepts.
fn adaptive_redundancy(size: u64, block_size: u64, base: u32) -> u32 {
    let data_slices = size.div_ceil(block_size).max(1);
    let floor = (MIN_PARITY_SLICES * 100).div_ceil(data_slices) as u32;
    base.max(floor).min(MAX_REDUNDANCY)
}

/// Base parity artifact for a blob: `<parity_dir>/<BlobId>.par2`.
pub fn parity_base_path(parity_dir: &Path, id: &BlobId) -> PathBuf {
    parity_dir.join(format!("{}.par2", id.file_name()))
}

/// True when any parity file for `id` is present. Presence implies a prior
/// successful creation; absence is always tolerated.
pub fn parity_exists(parity_dir: &Path, id: &BlobId) -> bool {
    if parity_base_path(parity_dir, id).exists() {
        return true;
    }
    let prefix = format!("{}.", id.file_name());
    match fs::read_dir(parity_dir) {
        Ok(entries) => entries.flatten().any(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(".par2")
        }),
        Err(_) => false,
    }
}

/// Removes the lock directory when creation finishes, succeeds or not.
struct LockDirGuard<'a>(&'a Path);

impl Drop for LockDirGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(self.0) {
            warn!(lock = %self.0.display(), error = %e, "failed to release parity lock");
        }
    }
}

/// Create parity for `id` at most once across concurrent workers and across
/// runs. Returns `Ok(true)` only when this call performed the creation.
///
/// The lock artifact is a `lock_<BlobId>` directory: `mkdir` is the
/// test-and-set. A loser polls for the holder to finish (bounded, ~5 s) and
/// then returns without work. A Deduped blob whose parity an earlier run
/// skipped backfills here on the next enabled run.
pub fn ensure_parity(
    codec: &dyn ParityCodec,
    parity_dir: &Path,
    blob_path: &Path,
    id: &BlobId,
    config: &ParityConfig,
) -> Result<bool> {
    if parity_exists(parity_dir, id) {
        return Ok(false);
    }

    let lock_path = parity_dir.join(format!("lock_{}", id.file_name()));
    match fs::create_dir(&lock_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            // Another worker is creating this parity set. Wait for it,
            // bounded, then move on; its outcome is not ours to report.
            for _ in 0..LOCK_POLL_ATTEMPTS {
                std::thread::sleep(LOCK_POLL_INTERVAL);
                if !lock_path.exists() {
                    break;
                }
            }
            return Ok(false);
        }
        Err(e) => {
            return Err(CarbError::ParityFailed {
                blob: id.file_name(),
                reason: format!("cannot acquire parity lock: {e}"),
            });
        }
    }
    let _guard = LockDirGuard(&lock_path);

    // Re-check under the lock: a concurrent run may have finished between
    // the first check and the acquisition.
    if parity_exists(parity_dir, id) {
        return Ok(false);
    }

    let plan = plan(id.size, config);
    debug!(
        blob = %id.file_name(),
        block_size = plan.block_size,
        redundancy = plan.redundancy,
        "creating parity"
    );
    codec.create(&plan, &parity_base_path(parity_dir, id), blob_path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(block_size: Option<u64>, redundancy: Option<u32>) -> ParityConfig {
        ParityConfig {
            enabled: true,
            redundancy,
            block_size,
        }
    }

    // -----------------------------------------------------------------------
    // Planner
    // -----------------------------------------------------------------------

    #[test]
    fn plan_passes_explicit_settings_through() {
        let p = plan(1 << 30, &config(Some(12345), Some(7)));
        assert_eq!(
            p,
            ParityPlan {
                block_size: 12345,
                redundancy: 7
            }
        );
    }

    #[test]
    fn plan_explicit_block_raises_redundancy_floor() {
        // 1000 bytes at block 100 → 10 data slices → floor ceil(400/10) = 40.
        let p = plan(1000, &config(Some(100), None));
        assert_eq!(p.block_size, 100);
        assert_eq!(p.redundancy, 40);
    }

    #[test]
    fn plan_auto_mid_size() {
        // 16 MiB / 16 slices = 1 MiB, already a power of two.
        // 16 data slices → floor ceil(400/16) = 25 > default 10.
        let p = plan(16 * 1024 * 1024, &config(None, None));
        assert_eq!(p.block_size, 1024 * 1024);
        assert_eq!(p.redundancy, 25);
    }

    #[test]
    fn plan_auto_small_file_clamps_to_min_block() {
        // 1000 / 16 = 62 → clamped to 512 → 2 data slices → floor 200 → cap 80.
        let p = plan(1000, &config(None, None));
        assert_eq!(p.block_size, 512);
        assert_eq!(p.redundancy, MAX_REDUNDANCY);
    }

    #[test]
    fn plan_auto_large_file_clamps_to_max_block() {
        // 1 GiB / 16 = 64 MiB → clamped to 4 MiB → 256 slices → floor 2,
        // default 10 wins.
        let p = plan(1 << 30, &config(None, None));
        assert_eq!(p.block_size, MAX_BLOCK_SIZE);
        assert_eq!(p.redundancy, DEFAULT_REDUNDANCY);
    }

    #[test]
    fn plan_auto_rounds_up_to_power_of_two() {
        // 24576 / 16 = 1536 → within clamp → next power of two 2048.
        let p = plan(24_576, &config(None, None));
        assert_eq!(p.block_size, 2048);
    }

    #[test]
    fn plan_zero_size_is_sane() {
        let p = plan(0, &config(None, None));
        assert_eq!(p.block_size, MIN_BLOCK_SIZE);
        assert_eq!(p.redundancy, MAX_REDUNDANCY);
    }

    #[test]
    fn plan_configured_redundancy_survives_when_above_floor() {
        // 64 MiB auto → 4 MiB blocks, 16 slices, floor 25; configured 60 wins.
        let p = plan(64 * 1024 * 1024, &config(None, Some(60)));
        assert_eq!(p.redundancy, 60);
    }

    // -----------------------------------------------------------------------
    // Creator
    // -----------------------------------------------------------------------

    struct CountingCodec {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingCodec {
        fn new(fail: bool) -> Self {
            CountingCodec {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl ParityCodec for CountingCodec {
        fn is_available(&self) -> bool {
            true
        }

        fn create(&self, _plan: &ParityPlan, base: &Path, _input: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CarbError::ParityFailed {
                    blob: base.display().to_string(),
                    reason: "simulated codec failure".into(),
                });
            }
            fs::write(base, b"par2-base").unwrap();
            Ok(())
        }
    }

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf, BlobId) {
        let root = tempfile::tempdir().unwrap();
        let parity_dir = root.path().join("parity");
        let blobs_dir = root.path().join("blobs");
        fs::create_dir_all(&parity_dir).unwrap();
        fs::create_dir_all(&blobs_dir).unwrap();

        let id = BlobId::new(9, [0x5A; 32]);
        let blob_path = blobs_dir.join(id.file_name());
        fs::write(&blob_path, b"blob data").unwrap();
        (root, parity_dir, blob_path, id)
    }

    #[test]
    fn creates_exactly_once() {
        let (_root, parity_dir, blob_path, id) = setup();
        let codec = CountingCodec::new(false);
        let cfg = config(None, None);

        assert!(ensure_parity(&codec, &parity_dir, &blob_path, &id, &cfg).unwrap());
        assert!(!ensure_parity(&codec, &parity_dir, &blob_path, &id, &cfg).unwrap());
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
        assert!(parity_exists(&parity_dir, &id));
        assert!(!parity_dir.join(format!("lock_{}", id.file_name())).exists());
    }

    #[test]
    fn held_lock_defers_to_holder() {
        let (_root, parity_dir, blob_path, id) = setup();
        let codec = CountingCodec::new(false);
        let cfg = config(None, None);

        let lock = parity_dir.join(format!("lock_{}", id.file_name()));
        fs::create_dir(&lock).unwrap();

        // Release the lock shortly after; the blocked caller must return
        // without creating anything itself.
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(250));
                fs::remove_dir(&lock).unwrap();
            });
            let created = ensure_parity(&codec, &parity_dir, &blob_path, &id, &cfg).unwrap();
            assert!(!created);
        });
        assert_eq!(codec.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn codec_failure_releases_lock_for_retry() {
        let (_root, parity_dir, blob_path, id) = setup();
        let cfg = config(None, None);

        let failing = CountingCodec::new(true);
        let err = ensure_parity(&failing, &parity_dir, &blob_path, &id, &cfg).unwrap_err();
        assert!(err.is_item_error());
        assert!(!parity_dir.join(format!("lock_{}", id.file_name())).exists());

        // A later run can backfill.
        let working = CountingCodec::new(false);
        assert!(ensure_parity(&working, &parity_dir, &blob_path, &id, &cfg).unwrap());
    }

    #[test]
    fn concurrent_workers_create_at_most_once() {
        let (_root, parity_dir, blob_path, id) = setup();
        let codec = CountingCodec::new(false);
        let cfg = config(None, None);

        let created: Vec<bool> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let codec = &codec;
                    let parity_dir = &parity_dir;
                    let blob_path = &blob_path;
                    let id = &id;
                    let cfg = &cfg;
                    s.spawn(move || {
                        ensure_parity(codec, parity_dir, blob_path, id, cfg).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(created.iter().filter(|c| **c).count(), 1);
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parity_exists_sees_volume_files_without_base() {
        let (_root, parity_dir, _blob_path, id) = setup();
        fs::write(
            parity_dir.join(format!("{}.vol00+16.par2", id.file_name())),
            b"vol",
        )
        .unwrap();
        assert!(parity_exists(&parity_dir, &id));
    }
}
