use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Probe a file's MIME type via the `file` tool.
///
/// The probe is strictly best-effort: a missing tool, a non-zero exit, or
/// unparseable output all degrade to `None` and the blob simply carries no
/// annotation.
pub fn probe(path: &Path) -> Option<String> {
    let output = Command::new("file")
        .arg("--brief")
        .arg("--mime-type")
        .arg(path)
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let mime = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if mime.is_empty() {
                None
            } else {
                Some(mime)
            }
        }
        Ok(out) => {
            debug!(path = %path.display(), status = %out.status, "mime probe failed");
            None
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "mime probe unavailable");
            None
        }
    }
}
