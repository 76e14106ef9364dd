use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::StoreLayout;

/// File name of the emitted restore program inside the run directory.
pub const RECOVER_FILE: &str = "recover";

/// Emit the standalone restore program for a run.
///
/// The program is plain POSIX shell with the run's restore data embedded, so
/// it needs nothing but the blob and parity directories to run. When the
/// parity tool is absent on the recovery host it degrades to a warning plus
/// raw copies.
pub fn emit(
    run_dir: &Path,
    layout: &StoreLayout,
    start_dir: &Path,
    recover_lines: &[String],
) -> Result<PathBuf> {
    let start_base = start_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "restored".to_string());

    let script = render(
        &layout.blobs_dir,
        &layout.parity_dir,
        &start_base,
        recover_lines,
    );

    let path = run_dir.join(RECOVER_FILE);
    fs::write(&path, script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(path)
}

/// Single-quote a string for safe embedding in shell source.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn render(blobs_dir: &Path, parity_dir: &Path, start_base: &str, lines: &[String]) -> String {
    TEMPLATE
        .replace("@BLOB_DIR@", &sh_quote(&blobs_dir.to_string_lossy()))
        .replace("@PARITY_DIR@", &sh_quote(&parity_dir.to_string_lossy()))
        .replace("@START_BASE@", &sh_quote(start_base))
        .replace("@DATA@", &lines.join("\n"))
}

const TEMPLATE: &str = r##"#!/bin/sh
# carb restore program. Generated per run; reads only its embedded data.
#
# Usage: CARB_RECOVER_TO_DIR=<target-dir> ./recover [--damaged]
#
#   default    verify each blob (when parity exists), repair if needed, then
#              write it to <target>/<start-basename>/<relative-path>
#   --damaged  write only entries whose verification failed and whose
#              repair succeeded; clean and no-parity entries are skipped
set -u

BLOB_DIR=@BLOB_DIR@
PARITY_DIR=@PARITY_DIR@
START_BASE=@START_BASE@

MODE=all
if [ "${1:-}" = "--damaged" ]; then
    MODE=damaged
fi

if [ -z "${CARB_RECOVER_TO_DIR:-}" ]; then
    echo "recover: CARB_RECOVER_TO_DIR must be set" >&2
    exit 64
fi

HAVE_PAR2=1
if ! command -v par2 >/dev/null 2>&1; then
    HAVE_PAR2=0
    echo "recover: warning: par2 not found, blobs will be copied without verification" >&2
fi

verified=0; repaired=0; copied_noparity=0; failed=0
skipped_clean=0; skipped_noparity=0

restore_one() {
    blob=$1
    rel=$2
    src="$BLOB_DIR/$blob"
    par="$PARITY_DIR/$blob.par2"
    dest="$CARB_RECOVER_TO_DIR/$START_BASE/$rel"

    state=noparity
    if [ "$HAVE_PAR2" = 1 ] && [ -e "$par" ]; then
        if par2 verify -q "$par" "$src" >/dev/null 2>&1; then
            state=clean
        elif par2 repair -q "$par" "$src" >/dev/null 2>&1; then
            state=repaired
        else
            state=failed
        fi
    fi

    if [ "$MODE" = damaged ]; then
        case "$state" in
            clean)
                skipped_clean=$((skipped_clean + 1))
                return
                ;;
            noparity)
                skipped_noparity=$((skipped_noparity + 1))
                return
                ;;
            failed)
                echo "recover: $rel: repair failed, not restored" >&2
                failed=$((failed + 1))
                return
                ;;
        esac
    fi

    mkdir -p "$(dirname "$dest")"
    if ! cp -f "$src" "$dest"; then
        echo "recover: $rel: copy failed" >&2
        failed=$((failed + 1))
        return
    fi

    case "$state" in
        clean) verified=$((verified + 1)) ;;
        repaired) repaired=$((repaired + 1)) ;;
        noparity) copied_noparity=$((copied_noparity + 1)) ;;
        failed)
            echo "recover: $rel: repair failed, copied possibly damaged bytes" >&2
            failed=$((failed + 1))
            ;;
    esac
}

while IFS=: read -r blob rel; do
    [ -n "$blob" ] || continue
    restore_one "$blob" "$rel"
done <<'CARB_RECOVER_DATA'
@DATA@
CARB_RECOVER_DATA

echo "recover: verified-clean:    $verified"
echo "recover: repaired:          $repaired"
echo "recover: no-parity-copied:  $copied_noparity"
echo "recover: failed:            $failed"
echo "recover: skipped-clean:     $skipped_clean"
echo "recover: skipped-no-parity: $skipped_noparity"

[ "$failed" -eq 0 ] || exit 1
exit 0
"##;
