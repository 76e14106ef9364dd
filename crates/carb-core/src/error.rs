use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CarbError>;

#[derive(Debug, Error)]
pub enum CarbError {
    #[error("required dependency not found: {0}")]
    MissingDependency(String),

    #[error("storage root is not writable: {0}")]
    UnwritableRoot(PathBuf),

    #[error("start directory does not resolve to a directory: {0}")]
    InvalidStartDir(PathBuf),

    #[error("reference file cannot be used as a cutoff: {path}: {reason}")]
    InvalidRefFile { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("read failed for {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stat failed for {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("install failed for {path}: {reason}")]
    InstallFailed { path: PathBuf, reason: String },

    #[error("parity creation failed for {blob}: {reason}")]
    ParityFailed { blob: String, reason: String },

    #[error("manifest collation error: {0}")]
    Collation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CarbError {
    /// Item-scoped errors are logged at the worker boundary and never abort
    /// the run. Everything else is fatal.
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            CarbError::Read { .. }
                | CarbError::Stat { .. }
                | CarbError::InstallFailed { .. }
                | CarbError::ParityFailed { .. }
        )
    }

    /// Process exit code for a fatal error surfacing from the engine.
    pub fn exit_code(&self) -> i32 {
        match self {
            CarbError::MissingDependency(_) => 69,
            CarbError::InvalidStartDir(_) | CarbError::InvalidRefFile { .. } => 64,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_error_classification() {
        let read = CarbError::Read {
            path: "/x".into(),
            source: std::io::Error::other("boom"),
        };
        assert!(read.is_item_error());

        let parity = CarbError::ParityFailed {
            blob: "b".into(),
            reason: "r".into(),
        };
        assert!(parity.is_item_error());

        assert!(!CarbError::MissingDependency("par2".into()).is_item_error());
        assert!(!CarbError::UnwritableRoot("/r".into()).is_item_error());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CarbError::MissingDependency("par2".into()).exit_code(), 69);
        assert_eq!(CarbError::InvalidStartDir("/nope".into()).exit_code(), 64);
        assert_eq!(CarbError::Other("x".into()).exit_code(), 1);
    }
}
