mod signal;

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

use carb_core::commands::ingest::{self, IngestStats};
use carb_core::config::{CarbConfig, RunMode};
use carb_core::error::Result;
use carb_core::parity::codec::Par2Cli;
use carb_core::store::StoreLayout;

#[derive(Parser)]
#[command(
    name = "carb",
    version,
    about = "Content-addressable, deduplicating backup ingester with parity",
    after_help = "\
Environment variables:
  CARB_JOBS              Worker count (default: CPU count)
  CARB_PAR2              1 to create parity sets (default), 0 to disable
  CARB_PAR2_REDUNDANCY   Parity redundancy percent, 1-80 (default: adaptive)
  CARB_PAR2_BLOCKSIZE    Parity block size in bytes, or 'auto' (default)
  CARB_ENABLE_MIME       1 to annotate MIME types (default), 0 to disable
  CARB_EXCLUDE_GLOBS     Comma-separated basename globs to skip
  CARB_COMMENT           Free-text annotation for the run log
  TMPDIR                 Staging directory override
  HOME                   Base for the default storage root"
)]
struct Cli {
    /// Directory tree to ingest
    start_dir: PathBuf,

    /// Reference cutoff file: ingest only files strictly newer than its mtime
    ref_file: Option<PathBuf>,

    /// Full mode, explicitly (the default when no reference file is given)
    #[arg(long, conflicts_with = "ref_file")]
    full: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let is_info = matches!(
                e.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            );
            let _ = e.print();
            std::process::exit(if is_info { 0 } else { 64 });
        }
    };

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    signal::install_signal_handlers();

    match run(&cli) {
        Ok(stats) => {
            println!(
                "Ingested {} new, {} deduplicated of {} files ({} errors, {} parity sets)",
                stats.ingested,
                stats.deduped,
                stats.processed,
                stats.item_errors,
                stats.parity_created,
            );
            println!("Run manifest: {}", stats.run_dir.display());
        }
        Err(e) => {
            eprintln!("carb: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: &Cli) -> Result<IngestStats> {
    let config = CarbConfig::from_env()?;
    let layout = StoreLayout::default_root()?;
    let codec = Par2Cli::new();

    let mode = match &cli.ref_file {
        Some(ref_file) => ingest::incremental_mode(ref_file)?,
        None => RunMode::Full,
    };

    ingest::run(
        &config,
        &layout,
        &codec,
        &cli.start_dir,
        mode,
        Some(&signal::SHUTDOWN),
    )
}
