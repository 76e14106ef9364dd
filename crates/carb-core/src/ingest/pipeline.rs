use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::config::CarbConfig;
use crate::error::{CarbError, Result};
use crate::journal::record::{recover_line, stat1_line, stat2_line, types_line, IngestRecord};
use crate::journal::{Category, RunJournal, WorkerJournal};
use crate::mime;
use crate::parity::{self, codec::ParityCodec};
use crate::scan::{relative_path, Candidate};
use crate::store::install::{install_blob, InstallOutcome};
use crate::store::StoreLayout;

use super::stage_and_hash;

/// Everything a worker needs, borrowed for the lifetime of the pipeline.
pub struct PipelineContext<'a> {
    pub config: &'a CarbConfig,
    pub layout: &'a StoreLayout,
    pub codec: &'a dyn ParityCodec,
    pub journal: &'a RunJournal,
    pub start_dir: &'a Path,
    pub cwd: PathBuf,
    /// Graceful-shutdown signal: stop intake, finish in-flight items.
    pub shutdown: Option<&'a AtomicBool>,
}

/// Aggregated counters across all workers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub processed: u64,
    pub ingested: u64,
    pub deduped: u64,
    pub item_errors: u64,
    pub parity_created: u64,
}

impl PipelineStats {
    fn merge(&mut self, other: PipelineStats) {
        self.processed += other.processed;
        self.ingested += other.ingested;
        self.deduped += other.deduped;
        self.item_errors += other.item_errors;
        self.parity_created += other.parity_created;
    }
}

/// Run the fixed-size worker pool over the enumerator's output.
///
/// Enumerator thread → bounded channel → N workers. Each worker owns its
/// journal files, so the only cross-worker synchronization on the hot path
/// is the blob hardlink and the parity lock artifact. Item-scoped failures
/// are logged and counted; a fatal error stops intake, lets peers finish
/// their current item, and propagates after the pool drains.
pub fn run(
    ctx: &PipelineContext<'_>,
    candidates: Box<dyn Iterator<Item = Candidate> + Send + '_>,
) -> Result<PipelineStats> {
    let num_workers = ctx.config.jobs.max(1);
    let (work_tx, work_rx) = crossbeam_channel::bounded::<Candidate>(num_workers * 2);

    let fatal: Mutex<Option<CarbError>> = Mutex::new(None);
    let stop = AtomicBool::new(false);

    let record_fatal = |e: CarbError| {
        let mut slot = fatal.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
        stop.store(true, Ordering::Relaxed);
    };

    let mut stats = PipelineStats::default();

    std::thread::scope(|s| {
        // Enumerator thread: feeds the pool lazily to bound memory.
        let stop_ref = &stop;
        let shutdown = ctx.shutdown;
        s.spawn(move || {
            for candidate in candidates {
                if stop_ref.load(Ordering::Relaxed)
                    || shutdown.is_some_and(|f| f.load(Ordering::Relaxed))
                {
                    break;
                }
                if work_tx.send(candidate).is_err() {
                    // All workers exited; nothing left to feed.
                    break;
                }
            }
            // work_tx drops here; workers drain and exit.
        });

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = work_rx.clone();
            let fatal_ref = &record_fatal;
            let stop_ref = &stop;
            let shutdown = ctx.shutdown;
            let mut journal = match ctx.journal.worker_journal(worker_id) {
                Ok(j) => j,
                Err(e) => {
                    record_fatal(e);
                    break;
                }
            };
            handles.push(s.spawn(move || {
                let mut local = PipelineStats::default();
                for candidate in rx {
                    if stop_ref.load(Ordering::Relaxed)
                        || shutdown.is_some_and(|f| f.load(Ordering::Relaxed))
                    {
                        break;
                    }
                    match process_candidate(ctx, &candidate, &mut journal, &mut local) {
                        Ok(()) => {}
                        Err(e) if e.is_item_error() => {
                            warn!(path = %candidate.abs_path.display(), error = %e, "skipping item");
                            eprintln!("carb: {}: {e}", candidate.abs_path.display());
                            local.item_errors += 1;
                        }
                        Err(e) => {
                            fatal_ref(e);
                            break;
                        }
                    }
                }
                if let Err(e) = journal.flush() {
                    warn!(worker = worker_id, error = %e, "worker journal flush failed");
                }
                local
            }));
        }
        drop(work_rx);

        for handle in handles {
            match handle.join() {
                Ok(local) => stats.merge(local),
                Err(_) => record_fatal(CarbError::Other("worker thread panicked".into())),
            }
        }
    });

    if let Some(e) = fatal.into_inner().unwrap() {
        return Err(e);
    }
    Ok(stats)
}

/// One work item, in strict order: stream-and-hash, install, parity,
/// journal entries.
fn process_candidate(
    ctx: &PipelineContext<'_>,
    candidate: &Candidate,
    journal: &mut WorkerJournal,
    stats: &mut PipelineStats,
) -> Result<()> {
    let staged = stage_and_hash(&candidate.abs_path, &ctx.layout.tmp_dir)?;
    let id = staged.id;

    let outcome = install_blob(staged.staging, &id, &ctx.layout.blobs_dir)?;
    match outcome {
        InstallOutcome::Ingested => {
            debug!(path = %candidate.abs_path.display(), blob = %id.file_name(), "ingested");
            stats.ingested += 1;
        }
        InstallOutcome::Deduped => {
            debug!(path = %candidate.abs_path.display(), blob = %id.file_name(), "deduped");
            stats.deduped += 1;
        }
    }
    stats.processed += 1;

    // Parity is bound to the blob, not the file: an Ingested blob gets its
    // set now, a Deduped one backfills if an earlier run skipped it. A
    // parity failure leaves the blob without a set; the item itself stands.
    if ctx.config.parity.enabled {
        match parity::ensure_parity(
            ctx.codec,
            &ctx.layout.parity_dir,
            &ctx.layout.blob_path(&id),
            &id,
            &ctx.config.parity,
        ) {
            Ok(true) => {
                stats.parity_created += 1;
                append_or_warn(journal, Category::Par2, &id.file_name());
            }
            Ok(false) => {}
            Err(e) => {
                warn!(blob = %id.file_name(), error = %e, "parity creation failed");
                eprintln!("carb: {}: {e}", candidate.abs_path.display());
                stats.item_errors += 1;
            }
        }
    }

    let record = IngestRecord {
        blob_id: id,
        cwd: ctx.cwd.clone(),
        start_dir: ctx.start_dir.to_path_buf(),
        abs_path: candidate.abs_path.clone(),
        outcome,
    };
    let line = record.line();
    append_or_warn(journal, Category::Processed, &line);
    match outcome {
        InstallOutcome::Ingested => append_or_warn(journal, Category::Ingested, &line),
        InstallOutcome::Deduped => append_or_warn(journal, Category::Skipped, &line),
    }
    append_or_warn(
        journal,
        Category::Stat1,
        &stat1_line(&id, &candidate.abs_path, &candidate.meta),
    );
    append_or_warn(
        journal,
        Category::Stat2,
        &stat2_line(&id, &candidate.abs_path, &candidate.meta),
    );
    append_or_warn(
        journal,
        Category::Recover,
        &recover_line(&id, &relative_path(&candidate.abs_path, ctx.start_dir)),
    );

    if ctx.config.mime_enabled && outcome == InstallOutcome::Ingested {
        if let Some(mime) = mime::probe(&ctx.layout.blob_path(&id)) {
            append_or_warn(journal, Category::Types, &types_line(&id, &mime));
        }
    }

    Ok(())
}

/// Journal appends follow the collation policy: log and continue, a partial
/// manifest is still emitted.
fn append_or_warn(journal: &mut WorkerJournal, category: Category, line: &str) {
    if let Err(e) = journal.append(category, line) {
        warn!(error = %e, "journal append failed");
    }
}
