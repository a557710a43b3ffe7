pub mod seven_zip;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::progress::StepProgress;

pub use seven_zip::SevenZip;

/// Inputs for one archive invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    /// Archive to create (for split archives, the name volumes are numbered from)
    pub archive_path: PathBuf,
    /// Directory whose contents go into the archive
    pub input_dir: PathBuf,
    pub volume_flag: String,
    pub compression_level: u8,
}

/// How an archiver process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    code: Option<i32>,
}

impl ProcessExit {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// The process was terminated without an exit code (signal or cancellation).
    pub fn killed() -> Self {
        Self { code: None }
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated without exit code"),
        }
    }
}

/// External tool that archives the staging directory and tests the result.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Create the archive described by `req`.
    ///
    /// `Err` means the tool could not be run at all; a tool that ran and failed
    /// reports a non-successful [`ProcessExit`].
    async fn archive(
        &self,
        req: &ArchiveRequest,
        tx: mpsc::Sender<StepProgress>,
        cancel: CancellationToken,
    ) -> Result<ProcessExit>;

    /// Integrity-test `target`. Any problem running the test counts as a failure.
    async fn verify(&self, target: &Path, tx: mpsc::Sender<StepProgress>) -> bool;
}
