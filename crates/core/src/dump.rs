//! Best-effort debug artifact dumps.

use std::path::Path;

/// Write `bytes` to `path`, logging and swallowing any failure. Dumps are
/// diagnostics, never load-bearing; a missing `output/` directory is fine.
pub fn debug_dump(path: impl AsRef<Path>, bytes: &[u8]) {
    let path = path.as_ref();
    if let Err(err) = std::fs::write(path, bytes) {
        tracing::debug!(path = %path.display(), %err, "debug dump skipped");
    }
}
