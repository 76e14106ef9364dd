use std::fs::Metadata;

/// One-stat capture of the fields the journal and the cutoff predicate need.
#[derive(Debug, Clone, Copy)]
pub struct MetadataSummary {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    pub device: u64,
    pub inode: u64,
    pub size: u64,
}

pub fn summarize_metadata(metadata: &Metadata) -> MetadataSummary {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        MetadataSummary {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            mtime_ns: metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
            ctime_ns: metadata.ctime() * 1_000_000_000 + metadata.ctime_nsec(),
            device: metadata.dev(),
            inode: metadata.ino(),
            size: metadata.len(),
        }
    }

    #[cfg(not(unix))]
    {
        use std::time::UNIX_EPOCH;

        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        MetadataSummary {
            mode: if metadata.permissions().readonly() {
                0o444
            } else {
                0o644
            },
            uid: 0,
            gid: 0,
            mtime_ns,
            ctime_ns: 0,
            device: 0,
            inode: 0,
            size: metadata.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_captures_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"12345").unwrap();

        let meta = std::fs::symlink_metadata(&path).unwrap();
        let summary = summarize_metadata(&meta);
        assert_eq!(summary.size, 5);
        assert!(summary.mtime_ns > 0);
    }
}
