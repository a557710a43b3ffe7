use anyhow::{Context, Result, anyhow, bail};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::progress::StepProgress;

/// Files are read and written in chunks of this size.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Copies a source file or tree into a staging directory.
///
/// - Pre-scan for byte-accurate progress
/// - 1 MiB chunked I/O to bound memory use
/// - Permissions and timestamps preserved where the platform allows
/// - A file that cannot be copied is logged and skipped; the mirror carries on
///
/// This is not a snapshot: files modified while the mirror runs may be copied in an
/// inconsistent state.
#[derive(Debug, Default)]
pub struct MirrorEngine {
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
}

/// Outcome of a mirror that ran to the end.
#[derive(Debug, Default, Clone)]
pub struct MirrorSummary {
    pub files_copied: u64,
    pub bytes_total: u64,
    pub failed: Vec<MirrorFailure>,
    pub duration_secs: u64,
}

/// A file that could not be mirrored.
#[derive(Debug, Clone)]
pub struct MirrorFailure {
    pub file: PathBuf,
    pub message: String,
}

impl MirrorEngine {
    /// Mirror `source` into `destination`, which is created if missing.
    ///
    /// A file source lands as `destination/<file name>`. Cancellation is checked
    /// between files.
    pub async fn mirror(
        &self,
        source: &Path,
        destination: &Path,
        tx: mpsc::Sender<StepProgress>,
        cancel: CancellationToken,
    ) -> Result<MirrorSummary> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        let sync_files = self.sync_files;

        tokio::task::spawn_blocking(move || {
            mirror_blocking(&source, &destination, sync_files, &tx, &cancel)
        })
        .await
        .context("Mirror task panicked")?
    }
}

/// Result of scanning the source
struct ScanResult {
    files: Vec<FileInfo>,
    /// Relative directory paths, parents before children
    directories: Vec<PathBuf>,
    total_bytes: u64,
}

#[derive(Clone)]
struct FileInfo {
    path: PathBuf,
    relative: PathBuf,
    size: u64,
}

fn mirror_blocking(
    source: &Path,
    destination: &Path,
    sync_files: bool,
    tx: &mpsc::Sender<StepProgress>,
    cancel: &CancellationToken,
) -> Result<MirrorSummary> {
    let start_time = Instant::now();

    let scan = scan_source(source)?;
    info!(
        source = %source.display(),
        destination = %destination.display(),
        total_files = scan.files.len(),
        total_bytes = scan.total_bytes,
        "Scan complete"
    );

    fs::create_dir_all(destination).with_context(|| {
        format!(
            "Failed to create staging directory {}",
            destination.display()
        )
    })?;

    for dir in &scan.directories {
        let dest_dir = destination.join(dir);
        if let Err(e) = fs::create_dir_all(&dest_dir) {
            warn!(path = %dest_dir.display(), error = %e, "Failed to create directory");
        }
    }

    let mut summary = MirrorSummary {
        bytes_total: scan.total_bytes,
        ..Default::default()
    };
    let mut bytes_done: u64 = 0;

    for file in &scan.files {
        if cancel.is_cancelled() {
            bail!(
                "Mirror cancelled after {} of {} files",
                summary.files_copied,
                scan.files.len()
            );
        }

        let dest_path = destination.join(&file.relative);
        let current_file = file.relative.to_string_lossy().to_string();
        let file_start = bytes_done;

        debug!(file = %current_file, size = file.size, "Copying file");

        let result = copy_single_file(&file.path, &dest_path, sync_files, |chunk| {
            bytes_done += chunk;
            let _ = tx.blocking_send(StepProgress::Mirror {
                bytes_done,
                total_bytes: scan.total_bytes,
                current_file: current_file.clone(),
            });
        });

        match result {
            Ok(_) => summary.files_copied += 1,
            Err(e) => {
                error!(file = %current_file, error = %format!("{e:#}"), "Failed to copy file");

                // Whatever was not copied still counts as done for progress purposes
                bytes_done = file_start + file.size;
                let _ = tx.blocking_send(StepProgress::Mirror {
                    bytes_done,
                    total_bytes: scan.total_bytes,
                    current_file: current_file.clone(),
                });

                summary.failed.push(MirrorFailure {
                    file: file.path.clone(),
                    message: format!("{e:#}"),
                });
            }
        }
    }

    // Directory mtimes change as files land in them, so restore them last
    for dir in scan.directories.iter().rev() {
        if let Err(e) = preserve_timestamps(&source.join(dir), &destination.join(dir)) {
            debug!(path = %dir.display(), error = %e, "Failed to preserve directory timestamps");
        }
    }

    summary.duration_secs = start_time.elapsed().as_secs();
    info!(
        files_copied = summary.files_copied,
        files_failed = summary.failed.len(),
        bytes_total = summary.bytes_total,
        duration_secs = summary.duration_secs,
        "Mirror complete"
    );

    Ok(summary)
}

fn scan_source(source: &Path) -> Result<ScanResult> {
    let metadata = fs::metadata(source)
        .with_context(|| format!("Failed to read source {}", source.display()))?;

    if metadata.is_file() {
        let name = source
            .file_name()
            .ok_or_else(|| anyhow!("Source file has no name: {}", source.display()))?;
        return Ok(ScanResult {
            files: vec![FileInfo {
                path: source.to_path_buf(),
                relative: PathBuf::from(name),
                size: metadata.len(),
            }],
            directories: Vec::new(),
            total_bytes: metadata.len(),
        });
    }

    let mut scan = ScanResult {
        files: Vec::new(),
        directories: Vec::new(),
        total_bytes: 0,
    };
    scan_directory_recursive(source, source, &mut scan)?;
    Ok(scan)
}

fn scan_directory_recursive(base: &Path, current: &Path, scan: &mut ScanResult) -> Result<()> {
    let entries = match fs::read_dir(current) {
        Ok(entries) => entries,
        Err(e) if current == base => {
            return Err(anyhow!("Failed to read directory {}: {}", current.display(), e));
        }
        Err(e) => {
            warn!(path = %current.display(), error = %e, "Skipping unreadable directory");
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();

        // Use symlink_metadata to avoid following symlinks
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let Ok(relative) = path.strip_prefix(base).map(Path::to_path_buf) else {
            continue;
        };

        if metadata.is_dir() {
            scan.directories.push(relative);
            scan_directory_recursive(base, &path, scan)?;
        } else if metadata.is_file() {
            scan.total_bytes += metadata.len();
            scan.files.push(FileInfo {
                path,
                relative,
                size: metadata.len(),
            });
        }
        // Symlinks and special files are not mirrored
    }

    Ok(())
}

/// Copy one file in [`CHUNK_SIZE`] chunks, calling `on_chunk` with each chunk's length.
fn copy_single_file(
    source: &Path,
    dest: &Path,
    sync_file: bool,
    mut on_chunk: impl FnMut(u64),
) -> Result<u64> {
    let source_metadata = fs::metadata(source).context("Failed to read source metadata")?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).context("Failed to create destination directory")?;
    }

    let mut reader = File::open(source).context("Failed to open source file")?;
    let dest_file = File::create(dest).context("Failed to create destination file")?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, dest_file);

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .context("Failed to read from source")?;
        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .context("Failed to write to destination")?;

        bytes_written += bytes_read as u64;
        on_chunk(bytes_read as u64);
    }

    writer.flush().context("Failed to flush destination file")?;

    if sync_file {
        let inner = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to get inner file handle: {}", e.error()))?;
        inner.sync_all().context("Failed to sync file")?;
    }

    if let Err(e) = fs::set_permissions(dest, source_metadata.permissions()) {
        debug!(dest = %dest.display(), error = %e, "Failed to set file permissions");
    }

    if let Err(e) = preserve_timestamps(source, dest) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
    }

    Ok(bytes_written)
}

/// Preserve access and modification timestamps from source to destination
fn preserve_timestamps(source: &Path, dest: &Path) -> Result<()> {
    let source_metadata = fs::metadata(source)?;

    let atime = filetime::FileTime::from_last_access_time(&source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&source_metadata);

    filetime::set_file_times(dest, atime, mtime)?;
    Ok(())
}
