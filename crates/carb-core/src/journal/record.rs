use std::path::{Path, PathBuf};

use carb_types::BlobId;

use crate::platform::fs::MetadataSummary;
use crate::store::install::InstallOutcome;

/// One observed-file entry in a run manifest.
#[derive(Debug, Clone)]
pub struct IngestRecord {
    pub blob_id: BlobId,
    pub cwd: PathBuf,
    pub start_dir: PathBuf,
    pub abs_path: PathBuf,
    pub outcome: InstallOutcome,
}

impl IngestRecord {
    /// Normative record line: `<BlobId>:<cwd>:<start_dir>:<abs_path>`.
    /// Colon is the field separator; paths are assumed newline-free.
    pub fn line(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.blob_id.file_name(),
            self.cwd.display(),
            self.start_dir.display(),
            self.abs_path.display(),
        )
    }

    /// Inverse of [`line`](Self::line). The trailing field keeps any embedded
    /// colons.
    pub fn parse_line(line: &str) -> Option<(BlobId, PathBuf, PathBuf, PathBuf)> {
        let mut fields = line.splitn(4, ':');
        let blob_id: BlobId = fields.next()?.parse().ok()?;
        let cwd = PathBuf::from(fields.next()?);
        let start_dir = PathBuf::from(fields.next()?);
        let abs_path = PathBuf::from(fields.next()?);
        Some((blob_id, cwd, start_dir, abs_path))
    }
}

/// Portable stat capture: size, mtime in nanoseconds, permission bits.
pub fn stat1_line(id: &BlobId, abs_path: &Path, meta: &MetadataSummary) -> String {
    format!(
        "{}:{}:{}:{}:{:o}",
        id.file_name(),
        abs_path.display(),
        meta.size,
        meta.mtime_ns,
        meta.mode & 0o7777,
    )
}

/// Native stat capture: ownership and filesystem identity.
pub fn stat2_line(id: &BlobId, abs_path: &Path, meta: &MetadataSummary) -> String {
    format!(
        "{}:{}:uid={}:gid={}:dev={}:ino={}:ctime_ns={}",
        id.file_name(),
        abs_path.display(),
        meta.uid,
        meta.gid,
        meta.device,
        meta.inode,
        meta.ctime_ns,
    )
}

/// MIME annotation line.
pub fn types_line(id: &BlobId, mime: &str) -> String {
    format!("{}:{mime}", id.file_name())
}

/// Data line embedded into the emitted restore program: blob name plus the
/// path relative to the start directory.
pub fn recover_line(id: &BlobId, rel_path: &str) -> String {
    format!("{}:{rel_path}", id.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> IngestRecord {
        IngestRecord {
            blob_id: BlobId::new(6, [0xCD; 32]),
            cwd: "/home/user".into(),
            start_dir: "/data/photos".into(),
            abs_path: "/data/photos/2024/a.jpg".into(),
            outcome: InstallOutcome::Ingested,
        }
    }

    #[test]
    fn record_line_roundtrip() {
        let r = record();
        let line = r.line();
        assert_eq!(line.matches(".data:").count(), 1);

        let (blob_id, cwd, start_dir, abs_path) = IngestRecord::parse_line(&line).unwrap();
        assert_eq!(blob_id, r.blob_id);
        assert_eq!(cwd, r.cwd);
        assert_eq!(start_dir, r.start_dir);
        assert_eq!(abs_path, r.abs_path);
    }

    #[test]
    fn parse_keeps_colons_in_final_field() {
        let r = IngestRecord {
            abs_path: "/data/photos/odd:name.jpg".into(),
            ..record()
        };
        let (_, _, _, abs_path) = IngestRecord::parse_line(&r.line()).unwrap();
        assert_eq!(abs_path, PathBuf::from("/data/photos/odd:name.jpg"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(IngestRecord::parse_line("not-a-blob:/a:/b:/c").is_none());
        assert!(IngestRecord::parse_line("").is_none());
    }

    #[test]
    fn stat_lines_carry_identity_prefix() {
        let meta = MetadataSummary {
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            mtime_ns: 1_700_000_000_123_456_789,
            ctime_ns: 42,
            device: 7,
            inode: 99,
            size: 6,
        };
        let id = BlobId::new(6, [0xCD; 32]);
        let abs = Path::new("/data/a");

        let s1 = stat1_line(&id, abs, &meta);
        assert!(s1.starts_with(&id.file_name()));
        assert!(s1.ends_with(":6:1700000000123456789:644"));

        let s2 = stat2_line(&id, abs, &meta);
        assert!(s2.contains(":uid=1000:"));
        assert!(s2.contains(":ino=99:"));
        assert!(s2.ends_with(":ctime_ns=42"));
    }
}
