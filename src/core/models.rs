use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::archiver::ProcessExit;
use crate::core::layout::RunLayout;
use crate::core::size::megabytes_to_bytes;

/// Whether the archive is one file or split into fixed-size volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Single,
    Split,
}

/// Volume flag that keeps 7-Zip from ever splitting a single-file archive.
const UNBOUNDED_VOLUME_FLAG: &str = "-v999g";

impl Strategy {
    /// `Split` iff the source is at least `threshold_mb` binary megabytes.
    pub fn for_size(source_bytes: u64, threshold_mb: u64) -> Self {
        if source_bytes >= megabytes_to_bytes(threshold_mb) {
            Self::Split
        } else {
            Self::Single
        }
    }

    pub fn volume_flag(self, volume_size: &str) -> String {
        match self {
            Self::Split => format!("-v{volume_size}"),
            Self::Single => UNBOUNDED_VOLUME_FLAG.to_string(),
        }
    }
}

/// What kind of run to perform.
#[derive(Debug, Clone)]
pub enum RunKind {
    /// Back up the configured source; uploads when enabled.
    Production,
    /// Back up synthetic data; never uploads, tagged for bulk deletion.
    Test { source: PathBuf },
}

impl RunKind {
    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test { .. })
    }

    pub fn source<'a>(&'a self, configured: &'a Path) -> &'a Path {
        match self {
            Self::Production => configured,
            Self::Test { source } => source,
        }
    }
}

/// Everything decided about one execution of the pipeline.
#[derive(Debug, Clone)]
pub struct BackupRun {
    pub id: String,
    pub started_at: DateTime<Local>,
    pub is_test: bool,
    pub enable_upload: bool,
    pub source_path: PathBuf,
    pub source_size_bytes: u64,
    pub strategy: Strategy,
    pub layout: RunLayout,
}

/// States of the pipeline, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    SizeEstimated,
    StrategyChosen,
    Mirrored,
    Archived,
    Verified,
    Uploaded,
    Done,
    Failed,
}

/// Why a run ended in [`RunState::Failed`].
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("another backup run is already in progress")]
    AlreadyRunning,
    #[error("archive step failed ({0})")]
    ArchiveFailed(ProcessExit),
    #[error("verification failed for {}", .0.display())]
    VerificationFailed(PathBuf),
    #[error("backup run cancelled")]
    Cancelled,
    #[error("{0}")]
    Unexpected(anyhow::Error),
}

impl RunFailure {
    /// Full description for the log, including the whole error chain.
    pub fn detail(&self) -> String {
        match self {
            Self::Unexpected(e) => format!("{e:#}"),
            other => other.to_string(),
        }
    }
}

/// Result of replicating one archive to one remote account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub account_name: String,
    pub success: bool,
    pub message: String,
}

impl UploadOutcome {
    pub fn success(account_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(account_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            success: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.success { "ok" } else { "FAILED" };
        write!(f, "[{}] {}: {}", mark, self.account_name, self.message)
    }
}

/// Result of the replication step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationReport {
    /// No remote accounts are configured.
    Skipped,
    /// One outcome per configured account, in configuration order.
    Completed(Vec<UploadOutcome>),
}

impl ReplicationReport {
    pub fn outcomes(&self) -> &[UploadOutcome] {
        match self {
            Self::Skipped => &[],
            Self::Completed(outcomes) => outcomes,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes().iter().all(|o| o.success)
    }
}

/// Final account of a run, handed back to whoever triggered it.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub history: Vec<RunState>,
    pub failure: Option<RunFailure>,
    pub run: Option<BackupRun>,
    pub replication: Option<ReplicationReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn visited(&self, state: RunState) -> bool {
        self.history.contains(&state)
    }

    /// Concise, operator-facing one-liner.
    pub fn summary(&self) -> String {
        match &self.failure {
            None => {
                let archive = self
                    .run
                    .as_ref()
                    .map(|r| r.layout.archive_path.display().to_string())
                    .unwrap_or_default();
                format!(
                    "Backup complete in {}s: {}",
                    self.elapsed.as_secs(),
                    archive
                )
            }
            Some(failure) => format!("Backup failed: {failure}"),
        }
    }

    /// The summary followed by one line per account when an upload was attempted.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.summary()];
        match &self.replication {
            Some(ReplicationReport::Skipped) => {
                lines.push("Upload skipped: no remote accounts configured".to_string())
            }
            Some(ReplicationReport::Completed(outcomes)) => {
                lines.extend(outcomes.iter().map(ToString::to_string))
            }
            None => {}
        }
        lines
    }
}
