pub mod ledger;
pub mod otp_channel;
pub mod scheduler;
pub mod session_store;

use std::path::Path;

/// Write `bytes` to `path` via a sibling temp file and a rename, creating the
/// parent directory if needed. Readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
