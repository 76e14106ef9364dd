pub mod record;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::warn;

use carb_types::BlobId;

use crate::config::{CarbConfig, RunMode};
use crate::error::{CarbError, Result};
use crate::store::StoreLayout;

use record::IngestRecord;

/// Prefix of every run manifest directory.
pub const RUN_DIR_PREFIX: &str = "v05_";

const RUN_TS_FORMAT: &str = "%Y-%m-%d_%H_%M_%S";

/// Journal line categories. Workers append to their own per-category files;
/// collation concatenates them into the consolidated manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Processed,
    Ingested,
    Skipped,
    Stat1,
    Stat2,
    Types,
    Par2,
    Recover,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Processed,
        Category::Ingested,
        Category::Skipped,
        Category::Stat1,
        Category::Stat2,
        Category::Types,
        Category::Par2,
        Category::Recover,
    ];

    /// Suffix of per-worker log file names.
    fn suffix(self) -> &'static str {
        match self {
            Category::Processed => "processed",
            Category::Ingested => "ingested",
            Category::Skipped => "skipped",
            Category::Stat1 => "stat1",
            Category::Stat2 => "stat2",
            Category::Types => "types",
            Category::Par2 => "par2",
            Category::Recover => "recover",
        }
    }

    /// Name of the consolidated file inside the run directory. `Recover` has
    /// none: its collated lines feed the emitted restore program instead.
    fn manifest_name(self) -> Option<&'static str> {
        match self {
            Category::Processed => Some("file_processed"),
            Category::Ingested => Some("file_ingested"),
            Category::Skipped => Some("file_skipped"),
            Category::Stat1 => Some("file_stat1"),
            Category::Stat2 => Some("file_stat2"),
            Category::Types => Some("file_types"),
            Category::Par2 => Some("par2_created"),
            Category::Recover => None,
        }
    }
}

/// Per-worker append-only journal. Exclusive to one worker thread; this is
/// what keeps the hot path free of cross-worker locks.
pub struct WorkerJournal {
    writers: Vec<(Category, BufWriter<File>)>,
}

impl WorkerJournal {
    fn open(logs_dir: &Path, worker_id: usize) -> Result<Self> {
        let mut writers = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let path = logs_dir.join(format!("w{worker_id:02}_{}", category.suffix()));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            writers.push((category, BufWriter::new(file)));
        }
        Ok(WorkerJournal { writers })
    }

    pub fn append(&mut self, category: Category, line: &str) -> Result<()> {
        let writer = self
            .writers
            .iter_mut()
            .find(|(c, _)| *c == category)
            .map(|(_, w)| w)
            .expect("all categories are opened");
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for (_, writer) in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Result of collating the per-worker logs.
#[derive(Debug, Default)]
pub struct Collation {
    /// New BlobIds this run, sorted and deduplicated.
    pub index_new: Vec<BlobId>,
    /// Collated restore data lines for the recovery emitter.
    pub recover_lines: Vec<String>,
}

/// The per-run metadata directory `manifest/v05_<TS>` and its collation.
pub struct RunJournal {
    pub run_dir: PathBuf,
    logs_dir: PathBuf,
    pub started_at: DateTime<Local>,
}

impl RunJournal {
    pub fn create(layout: &StoreLayout, started_at: DateTime<Local>) -> Result<Self> {
        let stamp = format!("{RUN_DIR_PREFIX}{}", started_at.format(RUN_TS_FORMAT));
        let mut run_dir = layout.manifest_dir.join(&stamp);
        // A second run within the same second gets a distinguishing suffix
        // rather than sharing (and corrupting) the first run's directory.
        let mut seq = 1;
        loop {
            match fs::create_dir(&run_dir) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    seq += 1;
                    run_dir = layout.manifest_dir.join(format!("{stamp}_{seq:02}"));
                }
                Err(e) => return Err(e.into()),
            }
        }
        let logs_dir = run_dir.join("logs");
        fs::create_dir(&logs_dir)?;
        Ok(RunJournal {
            run_dir,
            logs_dir,
            started_at,
        })
    }

    pub fn worker_journal(&self, worker_id: usize) -> Result<WorkerJournal> {
        WorkerJournal::open(&self.logs_dir, worker_id)
    }

    /// Per-worker log files for one category, sorted by name. Any file
    /// ending in `_<category>` aggregates, regardless of its prefix, so
    /// historical producers that prefixed a bare `_` collate too.
    fn category_logs(&self, category: Category) -> Result<Vec<PathBuf>> {
        let wanted = format!("_{}", category.suffix());
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.logs_dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().ends_with(&wanted))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Concatenate each category into its consolidated manifest file, derive
    /// `index_new` from the ingested records, and hand back the restore data
    /// lines. Order across workers is unspecified; within one worker it is
    /// processing order.
    pub fn collate(&self) -> Result<Collation> {
        let mut recover_lines = Vec::new();

        for category in Category::ALL {
            let sources = self.category_logs(category)?;
            match category.manifest_name() {
                Some(name) => {
                    let mut out = BufWriter::new(File::create(self.run_dir.join(name))?);
                    for source in &sources {
                        let data = fs::read(source)?;
                        out.write_all(&data)?;
                    }
                    out.flush()?;
                }
                None => {
                    for source in &sources {
                        let data = fs::read_to_string(source)?;
                        recover_lines.extend(data.lines().map(str::to_string));
                    }
                }
            }
        }

        let index_new = self.derive_index_new()?;
        Ok(Collation {
            index_new,
            recover_lines,
        })
    }

    /// Project BlobIds out of `file_ingested`, deduplicate, sort, and write
    /// the `index_new` manifest file.
    fn derive_index_new(&self) -> Result<Vec<BlobId>> {
        let ingested = fs::read_to_string(self.run_dir.join("file_ingested"))?;
        let mut ids: Vec<BlobId> = ingested
            .lines()
            .filter_map(|line| match IngestRecord::parse_line(line) {
                Some((id, _, _, _)) => Some(id),
                None => {
                    warn!(line, "unparseable ingested record during collation");
                    None
                }
            })
            .collect();
        ids.sort();
        ids.dedup();

        let mut out = BufWriter::new(File::create(self.run_dir.join("index_new"))?);
        for id in &ids {
            writeln!(out, "{}", id.file_name())?;
        }
        out.flush()?;
        Ok(ids)
    }

    /// Write the run's provenance files: `settings` (the configuration as
    /// JSON), `start_time`, and `start_folder`.
    pub fn write_provenance(&self, config: &CarbConfig, start_dir: &Path) -> Result<()> {
        let settings = serde_json::to_string_pretty(config)
            .map_err(|e| CarbError::Collation(format!("settings serialization: {e}")))?;
        fs::write(self.run_dir.join("settings"), settings)?;
        fs::write(
            self.run_dir.join("start_time"),
            format!("{}\n", self.started_at.format(RUN_TS_FORMAT)),
        )?;
        fs::write(
            self.run_dir.join("start_folder"),
            format!("{}\n", start_dir.display()),
        )?;
        Ok(())
    }

    /// Append this run's line to the global `ingestedFolders` log:
    /// `<TS> :<cwd>:<start_dir>: <comment> : <mode_descriptor>`.
    pub fn append_ingested_folders(
        &self,
        layout: &StoreLayout,
        config: &CarbConfig,
        start_dir: &Path,
        mode: &RunMode,
    ) -> Result<()> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("?"));
        let line = format!(
            "{} :{}:{}: {} : {}\n",
            self.started_at.format(RUN_TS_FORMAT),
            cwd.display(),
            start_dir.display(),
            config.comment,
            mode.descriptor(),
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(layout.ingested_folders_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
