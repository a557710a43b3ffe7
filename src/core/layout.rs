//! Where a run puts things on disk.
//!
//! ```text
//! <root>/<yy.mm.dd>[_TEST]/
//!     temp_raw_<HHMMSS>/                 staging mirror, removed after archiving
//!     <source>_<HHMMSS>.7z               Single strategy
//!     <source>_Split_<HHMMSS>/<source>.7z.001, .002, ...   Split strategy
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::models::Strategy;

/// Suffix on the day folder of test runs.
///
/// `purge_test_folders` only matches it at the end of a folder name.
pub const TEST_MARKER: &str = "_TEST";

pub const ARCHIVE_EXTENSION: &str = "7z";

const DAY_FORMAT: &str = "%y.%m.%d";
const TIME_FORMAT: &str = "%H%M%S";
const FALLBACK_SOURCE_NAME: &str = "backup";

/// Paths used by a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub day_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub archive_store_dir: PathBuf,
    pub archive_path: PathBuf,
}

impl RunLayout {
    pub fn new(
        repository_root: &Path,
        started_at: &DateTime<Local>,
        is_test: bool,
        source_name: &str,
        strategy: Strategy,
    ) -> Self {
        let mut day = started_at.format(DAY_FORMAT).to_string();
        if is_test {
            day.push_str(TEST_MARKER);
        }
        let time = started_at.format(TIME_FORMAT).to_string();

        let day_dir = repository_root.join(day);
        let staging_dir = day_dir.join(format!("temp_raw_{time}"));

        let (archive_store_dir, archive_path) = match strategy {
            Strategy::Split => {
                let store = day_dir.join(format!("{source_name}_Split_{time}"));
                let archive = store.join(format!("{source_name}.{ARCHIVE_EXTENSION}"));
                (store, archive)
            }
            Strategy::Single => {
                let archive = day_dir.join(format!("{source_name}_{time}.{ARCHIVE_EXTENSION}"));
                (day_dir.clone(), archive)
            }
        };

        Self {
            day_dir,
            staging_dir,
            archive_store_dir,
            archive_path,
        }
    }

    /// The file to hand to the verifier.
    ///
    /// A split archive has no file at the base name, only numbered volumes; in that
    /// case the first volume is tested.
    pub fn verify_target(&self, strategy: Strategy) -> PathBuf {
        if strategy == Strategy::Split && !self.archive_path.exists() {
            let first = first_volume(&self.archive_path);
            if first.exists() {
                return first;
            }
        }
        self.archive_path.clone()
    }

    /// What the replication engine should upload.
    pub fn upload_root(&self, strategy: Strategy) -> &Path {
        match strategy {
            Strategy::Split => &self.archive_store_dir,
            Strategy::Single => &self.archive_path,
        }
    }
}

/// Name used for archives of `source`: its last path component.
pub fn source_name(source: &Path) -> String {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_SOURCE_NAME.to_string())
}

pub fn first_volume(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".001");
    PathBuf::from(name)
}

pub fn is_test_folder(name: &str) -> bool {
    name.ends_with(TEST_MARKER)
}

/// Remove every test-tagged day folder directly under `repository_root`.
///
/// Returns the folders that were removed. Production folders are never touched; a
/// folder that cannot be removed is logged and left behind.
pub fn purge_test_folders(repository_root: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(repository_root).with_context(|| {
        format!(
            "Failed to read backup repository {}",
            repository_root.display()
        )
    })?;

    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let tagged = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_test_folder);

        if !is_dir || !tagged {
            continue;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed test backup folder");
                removed.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove test folder"),
        }
    }

    removed.sort();
    Ok(removed)
}
