//! Replicates a finished archive to every configured remote account.
//!
//! Accounts are handled one after another, each with its own session. Within an
//! account every file gets a bounded number of attempt slots:
//!
//! - `AlreadyExists` counts as success and ends the retries for that file
//! - `AuthExpired` triggers one fresh login and one retry inside the same slot
//! - anything else waits `retry_delay` and moves on to the next slot
//!
//! A file that runs out of slots fails the account, but the remaining files are still
//! attempted. One account failing never affects the others.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::accounts::RemoteAccount;
use crate::config::AppConfig;
use crate::core::models::{ReplicationReport, UploadOutcome};
use crate::core::progress::StepProgress;
use crate::remote::{RemoteClient, RemoteError, RemoteSession, remote_join};

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

// "x.7z", "x.7z.001", "x.7z.12"
static ARCHIVE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.7z(\.\d+)?$").expect("archive file pattern is valid"));

/// What gets uploaded for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    /// Remote folder the files go into, below the account's root
    pub folder: Option<String>,
    pub files: Vec<PathBuf>,
}

impl UploadPlan {
    /// A file is uploaded as is; a directory contributes its archive files, sorted,
    /// into a remote folder of the same name.
    pub fn resolve(target: &Path) -> Result<Self> {
        let meta = fs::metadata(target)
            .with_context(|| format!("Upload target {} is not accessible", target.display()))?;

        if !meta.is_dir() {
            return Ok(Self {
                folder: None,
                files: vec![target.to_path_buf()],
            });
        }

        let mut files: Vec<PathBuf> = fs::read_dir(target)
            .with_context(|| format!("Failed to list {}", target.display()))?
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| ARCHIVE_FILE_RE.is_match(n))
            })
            .collect();
        files.sort();

        Ok(Self {
            folder: Some(file_name(target)),
            files,
        })
    }

    fn remote_path(&self, root: &str, file: &Path) -> String {
        let name = file_name(file);
        match &self.folder {
            Some(folder) => remote_join(root, &[folder.as_str(), name.as_str()]),
            None => remote_join(root, &[name.as_str()]),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct ReplicationEngine {
    client: Arc<dyn RemoteClient>,
    accounts: Vec<RemoteAccount>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ReplicationEngine {
    pub fn new(client: Arc<dyn RemoteClient>, accounts: Vec<RemoteAccount>) -> Self {
        Self {
            client,
            accounts,
            max_attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn from_config(client: Arc<dyn RemoteClient>, config: &AppConfig) -> Self {
        Self::new(client, config.remote_accounts.list().to_vec())
            .with_attempts(config.upload_attempts)
            .with_retry_delay(Duration::from_secs(config.upload_retry_delay_secs))
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Upload `target` (an archive file or a folder of volumes) to every account.
    pub async fn replicate(
        &self,
        target: &Path,
        tx: &mpsc::Sender<StepProgress>,
    ) -> ReplicationReport {
        if self.accounts.is_empty() {
            info!("No remote accounts configured, skipping upload");
            return ReplicationReport::Skipped;
        }

        let plan = match UploadPlan::resolve(target) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Cannot prepare upload");
                let message = format!("{e:#}");
                return ReplicationReport::Completed(
                    self.accounts
                        .iter()
                        .map(|a| UploadOutcome::failure(&a.display_name, &message))
                        .collect(),
                );
            }
        };

        info!(
            files = plan.files.len(),
            accounts = self.accounts.len(),
            "Starting replication"
        );

        let mut outcomes = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            let span = info_span!("replicate", account = %account.display_name);
            let outcome = self
                .replicate_account(account, &plan, tx)
                .instrument(span)
                .await;

            if outcome.success {
                info!(account = %outcome.account_name, "{}", outcome.message);
            } else {
                error!(account = %outcome.account_name, "{}", outcome.message);
            }
            outcomes.push(outcome);
        }

        ReplicationReport::Completed(outcomes)
    }

    async fn replicate_account(
        &self,
        account: &RemoteAccount,
        plan: &UploadPlan,
        tx: &mpsc::Sender<StepProgress>,
    ) -> UploadOutcome {
        let mut session = match self.client.connect(account).await {
            Ok(session) => session,
            Err(e) => {
                return UploadOutcome::failure(
                    &account.display_name,
                    format!("connection failed: {e}"),
                );
            }
        };

        if let Some(folder) = &plan.folder {
            let remote = remote_join(&account.remote_root, &[folder.as_str()]);
            if let Err(e) = session.create_folder(&remote).await {
                debug!(folder = %remote, error = %e, "Create folder ignored");
            }
        }

        let mut first_failure: Option<String> = None;
        let mut synchronized = 0usize;

        for file in &plan.files {
            let remote = plan.remote_path(&account.remote_root, file);
            match self
                .upload_with_retry(&mut session, account, file, &remote, tx)
                .await
            {
                Ok(()) => synchronized += 1,
                Err(e) => {
                    if first_failure.is_none() {
                        first_failure =
                            Some(format!("upload failed for {}: {e}", file_name(file)));
                    }
                }
            }
        }

        match first_failure {
            None => UploadOutcome::success(
                &account.display_name,
                format!("{synchronized} file(s) synchronized"),
            ),
            Some(message) => UploadOutcome::failure(&account.display_name, message),
        }
    }

    async fn upload_with_retry(
        &self,
        session: &mut Box<dyn RemoteSession>,
        account: &RemoteAccount,
        local: &Path,
        remote: &str,
        tx: &mpsc::Sender<StepProgress>,
    ) -> Result<(), RemoteError> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let _ = tx
                .send(StepProgress::Upload {
                    account: account.display_name.clone(),
                    file: file_name(local),
                    attempt,
                })
                .await;

            let mut result = session.upload(local, remote).await;

            if let Err(RemoteError::AuthExpired(reason)) = &result {
                warn!(file = %remote, %reason, "Session expired, logging in again");
                match self.client.connect(account).await {
                    Ok(fresh) => *session = fresh,
                    Err(e) => warn!(error = %e, "Re-login failed"),
                }
                result = session.upload(local, remote).await;
            }

            match result {
                Ok(()) => {
                    debug!(file = %remote, attempt, "Uploaded");
                    return Ok(());
                }
                Err(RemoteError::AlreadyExists(_)) => {
                    info!(file = %remote, "Already present remotely, skipping");
                    return Ok(());
                }
                Err(e) => {
                    warn!(file = %remote, attempt, max = self.max_attempts, error = %e, "Upload attempt failed");
                    last_error = Some(e);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RemoteError::Other("no upload attempt made".to_string())))
    }
}
