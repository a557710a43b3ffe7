use std::fs;
use std::path::Path;
use tracing::debug;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Total size in bytes of the file or directory tree at `path`.
///
/// The root is resolved through symlinks; entries below it are not, matching what the
/// mirror copies. Anything that cannot be listed or stat'ed is left out of the total.
pub fn estimate_size(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(m) if m.is_file() => m.len(),
        Ok(m) if m.is_dir() => directory_size(path),
        Ok(_) => 0,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot stat source");
            0
        }
    }
}

fn directory_size(dir: &Path) -> u64 {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Skipping unreadable directory");
            return 0;
        }
    };

    let mut total = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        match path.symlink_metadata() {
            Ok(m) if m.is_dir() => total += directory_size(&path),
            Ok(m) if m.is_file() => total += m.len(),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable entry"),
        }
    }
    total
}

/// Bytes expressed in binary megabytes.
pub fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

pub(crate) fn megabytes_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(BYTES_PER_MB)
}
