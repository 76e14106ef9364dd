use std::path::Path;
use std::process::Command;

use crate::error::{CarbError, Result};

use super::ParityPlan;

/// The FEC codec is an external collaborator. The engine only ever creates
/// parity; verification and repair belong to the emitted restore program,
/// which invokes the tool on the recovery host. On-disk artifacts are
/// whatever the codec family writes under the given base path.
pub trait ParityCodec: Send + Sync {
    /// Preflight probe, checked before any file is touched.
    fn is_available(&self) -> bool;

    /// Create parity for `input`, writing `base` plus volume files.
    fn create(&self, plan: &ParityPlan, base: &Path, input: &Path) -> Result<()>;
}

const PAR2_PROGRAM: &str = "par2";

/// The `par2` command-line tool.
#[derive(Default)]
pub struct Par2Cli;

impl Par2Cli {
    pub fn new() -> Self {
        Par2Cli
    }

    fn run(&self, args: &[&str], blob: &Path) -> Result<std::process::Output> {
        Command::new(PAR2_PROGRAM)
            .args(args)
            .output()
            .map_err(|e| CarbError::ParityFailed {
                blob: blob.display().to_string(),
                reason: format!("failed to execute {PAR2_PROGRAM}: {e}"),
            })
    }
}

impl ParityCodec for Par2Cli {
    fn is_available(&self) -> bool {
        Command::new(PAR2_PROGRAM)
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn create(&self, plan: &ParityPlan, base: &Path, input: &Path) -> Result<()> {
        let block = format!("-s{}", plan.block_size);
        let redundancy = format!("-r{}", plan.redundancy);
        let output = self.run(
            &[
                "create",
                "-q",
                &block,
                &redundancy,
                &base.to_string_lossy(),
                &input.to_string_lossy(),
            ],
            input,
        )?;
        if !output.status.success() {
            return Err(CarbError::ParityFailed {
                blob: input.display().to_string(),
                reason: format!(
                    "par2 create exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}
