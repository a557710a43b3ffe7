use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::core::archiver::{ArchiveRequest, Archiver, ProcessExit};
use crate::core::progress::{PercentStep, ProgressLines, StepProgress, forward_percentages};

/// Lines of stderr kept for the log when the archiver fails.
const STDERR_TAIL_LINES: usize = 20;

/// The 7-Zip command-line tool (`7z`, `7za`, `7z.exe`).
#[derive(Debug, Clone)]
pub struct SevenZip {
    program: PathBuf,
}

impl SevenZip {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Platform default location of the tool.
    pub fn default_program() -> PathBuf {
        if cfg!(windows) {
            PathBuf::from(r"C:\Program Files\7-Zip\7z.exe")
        } else {
            PathBuf::from("7z")
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `a <archive> <input>/* <volume> -mx=<level> -mmt=on -y -bsp1`
    pub fn archive_args(req: &ArchiveRequest) -> Vec<OsString> {
        vec![
            "a".into(),
            req.archive_path.clone().into_os_string(),
            req.input_dir.join("*").into_os_string(),
            req.volume_flag.clone().into(),
            format!("-mx={}", req.compression_level).into(),
            "-mmt=on".into(),
            "-y".into(),
            "-bsp1".into(),
        ]
    }

    /// `t <target> -bsp1 -y`
    pub fn verify_args(target: &Path) -> Vec<OsString> {
        vec![
            "t".into(),
            target.as_os_str().to_owned(),
            "-bsp1".into(),
            "-y".into(),
        ]
    }

    async fn run(
        &self,
        args: Vec<OsString>,
        step: PercentStep,
        tx: &mpsc::Sender<StepProgress>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ProcessExit> {
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn archiver {}", self.program.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to get archiver stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Failed to get archiver stderr"))?;
        let stderr_task = tokio::spawn(collect_tail(stderr));

        let waited = tokio::select! {
            res = pump_and_wait(&mut child, stdout, step, tx) => Some(res),
            _ = wait_cancelled(cancel) => None,
        };

        let Some(status) = waited else {
            warn!("Cancellation requested, killing archiver");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill archiver");
            }
            return Ok(ProcessExit::killed());
        };

        let exit = ProcessExit::from(status?);
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !exit.success() {
            warn!(
                %exit,
                stderr = %stderr_tail.into_iter().collect::<Vec<_>>().join("\n"),
                "Archiver exited unsuccessfully"
            );
        }

        Ok(exit)
    }
}

#[async_trait]
impl Archiver for SevenZip {
    async fn archive(
        &self,
        req: &ArchiveRequest,
        tx: mpsc::Sender<StepProgress>,
        cancel: CancellationToken,
    ) -> Result<ProcessExit> {
        let span = info_span!("archive", archive = %req.archive_path.display());

        async {
            info!(volume = %req.volume_flag, level = req.compression_level, "Starting archiver");
            self.run(
                Self::archive_args(req),
                PercentStep::Archive,
                &tx,
                Some(&cancel),
            )
            .await
        }
        .instrument(span)
        .await
    }

    async fn verify(&self, target: &Path, tx: mpsc::Sender<StepProgress>) -> bool {
        let span = info_span!("verify", target = %target.display());

        async {
            info!("Testing archive integrity");
            match self
                .run(Self::verify_args(target), PercentStep::Verify, &tx, None)
                .await
            {
                Ok(exit) => exit.success(),
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Verification could not be run");
                    false
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn pump_and_wait(
    child: &mut Child,
    stdout: ChildStdout,
    step: PercentStep,
    tx: &mpsc::Sender<StepProgress>,
) -> Result<ExitStatus> {
    forward_percentages(stdout, step, tx)
        .await
        .context("Failed to read archiver output")?;
    child.wait().await.context("Failed to wait for archiver")
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn collect_tail(stderr: ChildStderr) -> VecDeque<String> {
    let mut lines = ProgressLines::new(stderr);
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}
