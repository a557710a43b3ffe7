use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{Orchestrator, RunKind, RunReport};

pub const TEST_DATA_FILE: &str = "random_garbage.dat";
pub const TEST_DATA_DIR: &str = "TEMP_TEST_DATA";
pub const DEFAULT_TEST_GIGABYTES: f64 = 0.5;

const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Number of 5 MiB chunks written for `bytes`; never fewer than one.
pub fn chunk_count(bytes: u64) -> u64 {
    (bytes / CHUNK_SIZE).max(1)
}

pub fn gigabytes_to_bytes(gigabytes: f64) -> u64 {
    if gigabytes.is_finite() && gigabytes > 0.0 {
        (gigabytes * 1024.0 * 1024.0 * 1024.0) as u64
    } else {
        0
    }
}

/// Write `dir/random_garbage.dat` filled with incompressible pseudo-random bytes.
///
/// Blocking; the file size is rounded down to whole chunks.
pub fn generate_test_data(dir: &Path, bytes: u64) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(TEST_DATA_FILE);
    let file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut hasher = blake3::Hasher::new();
    hasher.update(Uuid::now_v7().as_bytes());
    let mut stream = hasher.finalize_xof();

    let chunks = chunk_count(bytes);
    let mut buf = vec![0u8; CHUNK_SIZE as usize];
    for _ in 0..chunks {
        stream.fill(&mut buf);
        writer
            .write_all(&buf)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), bytes = chunks * CHUNK_SIZE, "Test data generated");
    Ok(path)
}

/// Generate `gigabytes` of synthetic data, back it up as a test run, then remove it.
pub async fn run_test_mode(
    orchestrator: Arc<Orchestrator>,
    gigabytes: f64,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let workspace = std::env::temp_dir().join(format!("arkd-{}", Uuid::now_v7()));
    let source = workspace.join(TEST_DATA_DIR);

    let bytes = gigabytes_to_bytes(gigabytes);
    let generate_in = source.clone();
    let generated = tokio::task::spawn_blocking(move || generate_test_data(&generate_in, bytes))
        .await
        .context("Test data task panicked")
        .and_then(|r| r);

    let report = match generated {
        Ok(_) => Ok(orchestrator
            .run_isolated(RunKind::Test { source }, cancel)
            .await),
        Err(e) => Err(e),
    };

    if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
        warn!(path = %workspace.display(), error = %e, "Failed to remove test data");
    }

    report
}
