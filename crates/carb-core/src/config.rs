use std::path::PathBuf;

use chrono::{DateTime, Local};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

use crate::error::{CarbError, Result};

/// Immutable run configuration, constructed once at startup from the
/// environment and passed by reference to every component. Serialized
/// verbatim into the run manifest's `settings` file.
#[derive(Debug, Clone, Serialize)]
pub struct CarbConfig {
    /// Worker pool size (`CARB_JOBS`, default: CPU count).
    pub jobs: usize,
    pub parity: ParityConfig,
    /// Probe each ingested blob for a MIME type (`CARB_ENABLE_MIME`, default on).
    pub mime_enabled: bool,
    /// Basename globs excluded from enumeration (`CARB_EXCLUDE_GLOBS`, comma-separated).
    pub exclude_globs: Vec<String>,
    /// Free-text annotation recorded in `ingestedFolders` (`CARB_COMMENT`).
    pub comment: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParityConfig {
    /// `CARB_PAR2`, default on.
    pub enabled: bool,
    /// `CARB_PAR2_REDUNDANCY` percent, clamped to `[1, 80]`. `None` = planner default.
    pub redundancy: Option<u32>,
    /// `CARB_PAR2_BLOCKSIZE` in bytes. `None` (or the literal `auto`) = adaptive.
    pub block_size: Option<u64>,
}

impl Default for ParityConfig {
    fn default() -> Self {
        ParityConfig {
            enabled: true,
            redundancy: None,
            block_size: None,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match env_string(name).as_deref() {
        None => Ok(default),
        Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(CarbError::Config(format!(
            "{name} must be 0 or 1, got '{other}'"
        ))),
    }
}

impl CarbConfig {
    /// Read the recognized `CARB_*` variables. Unset or empty variables fall
    /// back to their defaults; malformed values are configuration errors.
    pub fn from_env() -> Result<Self> {
        let jobs = match env_string("CARB_JOBS") {
            None => default_jobs(),
            Some(v) => v
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    CarbError::Config(format!("CARB_JOBS must be a positive integer, got '{v}'"))
                })?,
        };

        let redundancy = match env_string("CARB_PAR2_REDUNDANCY") {
            None => None,
            Some(v) => {
                let pct = v.parse::<u32>().map_err(|_| {
                    CarbError::Config(format!("CARB_PAR2_REDUNDANCY must be an integer percent, got '{v}'"))
                })?;
                Some(pct.clamp(1, 80))
            }
        };

        let block_size = match env_string("CARB_PAR2_BLOCKSIZE").as_deref() {
            None | Some("auto") => None,
            Some(v) => Some(v.parse::<u64>().map_err(|_| {
                CarbError::Config(format!(
                    "CARB_PAR2_BLOCKSIZE must be a byte count or 'auto', got '{v}'"
                ))
            })?),
        };

        let exclude_globs = env_string("CARB_EXCLUDE_GLOBS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(CarbConfig {
            jobs,
            parity: ParityConfig {
                enabled: env_flag("CARB_PAR2", true)?,
                redundancy,
                block_size,
            },
            mime_enabled: env_flag("CARB_ENABLE_MIME", true)?,
            exclude_globs,
            comment: env_string("CARB_COMMENT").unwrap_or_default(),
        })
    }

    /// Compile the exclude globs into a matcher applied to file basenames.
    pub fn build_exclude_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pat in &self.exclude_globs {
            let glob = Glob::new(pat).map_err(|e| {
                CarbError::Config(format!("invalid exclude pattern '{pat}': {e}"))
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| CarbError::Config(format!("exclude matcher build failed: {e}")))
    }
}

impl Default for CarbConfig {
    fn default() -> Self {
        CarbConfig {
            jobs: default_jobs(),
            parity: ParityConfig::default(),
            mime_enabled: true,
            exclude_globs: Vec::new(),
            comment: String::new(),
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Enumeration mode for a run.
#[derive(Debug, Clone, Serialize)]
pub enum RunMode {
    /// Every qualifying regular file.
    Full,
    /// Only files with `mtime_ns` strictly greater than the reference.
    Incremental {
        ref_path: PathBuf,
        ref_mtime_ns: i64,
    },
}

impl RunMode {
    /// Cutoff predicate input, if any.
    pub fn cutoff_ns(&self) -> Option<i64> {
        match self {
            RunMode::Full => None,
            RunMode::Incremental { ref_mtime_ns, .. } => Some(*ref_mtime_ns),
        }
    }

    /// Human form recorded in `ingestedFolders`: `full` or
    /// `incremental ref=<TS>` with the reference mtime at second precision.
    pub fn descriptor(&self) -> String {
        match self {
            RunMode::Full => "full".to_string(),
            RunMode::Incremental { ref_mtime_ns, .. } => {
                let secs = ref_mtime_ns.div_euclid(1_000_000_000);
                let nsecs = ref_mtime_ns.rem_euclid(1_000_000_000) as u32;
                let ts = DateTime::from_timestamp(secs, nsecs)
                    .map(|t| {
                        t.with_timezone(&Local)
                            .format("%Y-%m-%d %H:%M:%S")
                            .to_string()
                    })
                    .unwrap_or_else(|| ref_mtime_ns.to_string());
                format!("incremental ref={ts}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        let config = CarbConfig::default();
        assert!(config.jobs >= 1);
        assert!(config.parity.enabled);
        assert!(config.parity.redundancy.is_none());
        assert!(config.parity.block_size.is_none());
        assert!(config.mime_enabled);
        assert!(config.exclude_globs.is_empty());
    }

    #[test]
    fn exclude_set_matches_basenames() {
        let config = CarbConfig {
            exclude_globs: vec!["*.swp".to_string(), "#*#".to_string()],
            ..CarbConfig::default()
        };
        let set = config.build_exclude_set().unwrap();
        assert!(set.is_match("x.swp"));
        assert!(set.is_match("#autosave#"));
        assert!(!set.is_match("x.txt"));
    }

    #[test]
    fn invalid_exclude_pattern_is_config_error() {
        let config = CarbConfig {
            exclude_globs: vec!["[".to_string()],
            ..CarbConfig::default()
        };
        assert!(matches!(
            config.build_exclude_set(),
            Err(CarbError::Config(_))
        ));
    }

    #[test]
    fn full_mode_descriptor() {
        assert_eq!(RunMode::Full.descriptor(), "full");
        assert_eq!(RunMode::Full.cutoff_ns(), None);
    }

    #[test]
    fn incremental_descriptor_carries_ref_timestamp() {
        let mode = RunMode::Incremental {
            ref_path: "/ref".into(),
            ref_mtime_ns: 1_700_000_000 * 1_000_000_000,
        };
        let d = mode.descriptor();
        assert!(d.starts_with("incremental ref="), "got: {d}");
        assert_eq!(mode.cutoff_ns(), Some(1_700_000_000 * 1_000_000_000));
    }
}
