use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use chrono::Local;
use tracing::{info, warn};

use crate::config::{CarbConfig, RunMode};
use crate::error::{CarbError, Result};
use crate::ingest::pipeline::{self, PipelineContext};
use crate::journal::{Collation, RunJournal};
use crate::parity::codec::ParityCodec;
use crate::platform::fs::summarize_metadata;
use crate::recover;
use crate::scan;
use crate::store::StoreLayout;

/// Outcome of one ingest run.
#[derive(Debug)]
pub struct IngestStats {
    pub processed: u64,
    pub ingested: u64,
    pub deduped: u64,
    pub item_errors: u64,
    pub parity_created: u64,
    pub new_blobs: usize,
    pub run_dir: PathBuf,
}

/// Build the incremental mode from a reference file: the cutoff is its mtime
/// at nanosecond precision.
pub fn incremental_mode(ref_file: &Path) -> Result<RunMode> {
    let meta = std::fs::symlink_metadata(ref_file).map_err(|e| CarbError::InvalidRefFile {
        path: ref_file.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_file() {
        return Err(CarbError::InvalidRefFile {
            path: ref_file.to_path_buf(),
            reason: "not a regular file".into(),
        });
    }
    Ok(RunMode::Incremental {
        ref_path: ref_file.to_path_buf(),
        ref_mtime_ns: summarize_metadata(&meta).mtime_ns,
    })
}

/// Run one backup ingest: preflight, enumerate, pipeline, collate, emit the
/// restore program.
///
/// Fatal conditions abort before the global index is touched. Item failures
/// are already absorbed inside the pipeline; everything after the pipeline
/// follows the collation policy: log, continue, keep the partial manifest.
pub fn run(
    config: &CarbConfig,
    layout: &StoreLayout,
    codec: &dyn ParityCodec,
    start_dir: &Path,
    mode: RunMode,
    shutdown: Option<&AtomicBool>,
) -> Result<IngestStats> {
    if config.parity.enabled && !codec.is_available() {
        return Err(CarbError::MissingDependency(
            "par2 (parity codec; set CARB_PAR2=0 to run without parity)".into(),
        ));
    }

    layout.ensure()?;
    let swept = layout.sweep_stale_staging();
    if swept > 0 {
        info!(swept, "removed stale staging files");
    }

    let start_dir = scan::normalize_start_dir(start_dir)?;
    let cwd = std::env::current_dir()?;
    let excludes = config.build_exclude_set()?;

    let journal = RunJournal::create(layout, Local::now())?;
    info!(
        run_dir = %journal.run_dir.display(),
        start_dir = %start_dir.display(),
        mode = %mode.descriptor(),
        jobs = config.jobs,
        "starting ingest"
    );

    let prune_dirs: Vec<PathBuf> = layout
        .internal_dirs()
        .iter()
        .map(|d| d.to_path_buf())
        .collect();
    let candidates = scan::enumerate(&start_dir, &excludes, prune_dirs, mode.cutoff_ns());

    let ctx = PipelineContext {
        config,
        layout,
        codec,
        journal: &journal,
        start_dir: &start_dir,
        cwd,
        shutdown,
    };
    let stats = pipeline::run(&ctx, candidates)?;

    let collation = match journal.collate() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "manifest collation failed, keeping partial manifest");
            Collation::default()
        }
    };

    if let Err(e) = layout.append_index(&collation.index_new) {
        warn!(error = %e, "global index append failed");
    }
    if let Err(e) = journal.write_provenance(config, &start_dir) {
        warn!(error = %e, "provenance write failed");
    }
    if let Err(e) = journal.append_ingested_folders(layout, config, &start_dir, &mode) {
        warn!(error = %e, "ingestedFolders append failed");
    }
    if let Err(e) = recover::emit(&journal.run_dir, layout, &start_dir, &collation.recover_lines) {
        warn!(error = %e, "restore program emission failed");
    }

    info!(
        processed = stats.processed,
        ingested = stats.ingested,
        deduped = stats.deduped,
        errors = stats.item_errors,
        parity_created = stats.parity_created,
        new_blobs = collation.index_new.len(),
        "ingest complete"
    );

    Ok(IngestStats {
        processed: stats.processed,
        ingested: stats.ingested,
        deduped: stats.deduped,
        item_errors: stats.item_errors,
        parity_created: stats.parity_created,
        new_blobs: collation.index_new.len(),
        run_dir: journal.run_dir,
    })
}
