#![allow(dead_code)]

use anyhow::Result;
use arkd::accounts::{Credential, RemoteAccount};
use arkd::config::AppConfig;
use arkd::core::{ArchiveRequest, Archiver, ProcessExit, StepProgress};
use arkd::remote::{RemoteClient, RemoteError, RemoteSession};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

pub const MB: usize = 1024 * 1024;

pub fn write_file(path: &Path, bytes: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let data: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
    std::fs::write(path, data).unwrap();
}

pub fn config_for(source: &Path, repository: &Path) -> AppConfig {
    AppConfig {
        source_path: source.to_path_buf(),
        repository_root: repository.to_path_buf(),
        upload_retry_delay_secs: 0,
        ..AppConfig::default()
    }
}

pub fn account(name: &str) -> RemoteAccount {
    RemoteAccount {
        display_name: name.to_string(),
        endpoint_url: format!("https://{name}.example.com/dav/"),
        credential: Credential {
            user: "user".to_string(),
            secret: "secret".to_string(),
        },
        remote_root: "/backups".to_string(),
    }
}

/// Directories directly below `dir`, by name.
pub fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Write the archive (or two volumes for split requests) and exit 0
    Succeed,
    /// Exit with this code without writing anything
    Exit(i32),
    /// Block until cancelled, then report a killed process
    WaitForCancel,
    /// Block the first call like `WaitForCancel`, succeed on later ones
    WaitForCancelOnce,
}

/// Stands in for 7-Zip.
pub struct FakeArchiver {
    mode: ArchiveMode,
    verify_ok: bool,
    pub archive_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub requests: Mutex<Vec<ArchiveRequest>>,
    pub verified: Mutex<Vec<PathBuf>>,
    /// Staging contents seen when archiving started
    pub staged: Mutex<Vec<String>>,
    pub started: Notify,
}

impl FakeArchiver {
    pub fn new(mode: ArchiveMode, verify_ok: bool) -> Self {
        Self {
            mode,
            verify_ok,
            archive_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            verified: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
            started: Notify::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(ArchiveMode::Succeed, true)
    }

    pub fn last_request(&self) -> ArchiveRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

fn list_files(dir: &Path, prefix: &str, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = format!("{prefix}{}", entry.file_name().to_string_lossy());
        if entry.path().is_dir() {
            list_files(&entry.path(), &format!("{name}/"), out);
        } else {
            out.push(name);
        }
    }
}

#[async_trait]
impl Archiver for FakeArchiver {
    async fn archive(
        &self,
        req: &ArchiveRequest,
        tx: mpsc::Sender<StepProgress>,
        cancel: CancellationToken,
    ) -> Result<ProcessExit> {
        let call = self.archive_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());
        {
            let mut staged = Vec::new();
            list_files(&req.input_dir, "", &mut staged);
            staged.sort();
            *self.staged.lock().unwrap() = staged;
        }
        self.started.notify_one();

        match self.mode {
            ArchiveMode::Exit(code) => Ok(ProcessExit::from_code(code)),
            ArchiveMode::WaitForCancel | ArchiveMode::WaitForCancelOnce
                if self.mode == ArchiveMode::WaitForCancel || call == 0 =>
            {
                cancel.cancelled().await;
                Ok(ProcessExit::killed())
            }
            ArchiveMode::Succeed | ArchiveMode::WaitForCancel | ArchiveMode::WaitForCancelOnce => {
                if let Some(parent) = req.archive_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if req.volume_flag == "-v999g" {
                    std::fs::write(&req.archive_path, b"7z archive")?;
                } else {
                    for volume in ["001", "002"] {
                        let mut name = req.archive_path.as_os_str().to_owned();
                        name.push(format!(".{volume}"));
                        std::fs::write(PathBuf::from(name), b"7z volume")?;
                    }
                }
                let _ = tx.send(StepProgress::Archive { percent: 100 }).await;
                Ok(ProcessExit::from_code(0))
            }
        }
    }

    async fn verify(&self, target: &Path, tx: mpsc::Sender<StepProgress>) -> bool {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verified.lock().unwrap().push(target.to_path_buf());
        let _ = tx.send(StepProgress::Verify { percent: 100 }).await;
        self.verify_ok && target.exists()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Behaves like a real server: stores files, reports duplicates as AlreadyExists
    Ok,
    /// Every upload reports AlreadyExists
    AlreadyExists,
    /// Every upload fails with a generic error
    Generic,
    /// The first upload reports an expired session, later ones succeed
    AuthExpiredOnce,
    /// Every upload reports an expired session
    AuthExpiredAlways,
    /// Login fails
    ConnectFails,
    /// Uploads of files with this name fail, others succeed
    FailFile(&'static str),
}

#[derive(Default)]
pub struct RemoteState {
    pub connects: HashMap<String, u32>,
    pub upload_calls: HashMap<String, u32>,
    pub stored: HashMap<String, Vec<String>>,
    pub folders: HashMap<String, Vec<String>>,
    auth_expired_fired: HashSet<String>,
}

/// In-memory remote storage with per-account behaviour.
#[derive(Clone, Default)]
pub struct FakeRemote {
    behaviors: HashMap<String, Behavior>,
    pub state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, account: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(account.to_string(), behavior);
        self
    }

    pub fn connects(&self, account: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .connects
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    pub fn upload_calls(&self, account: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .upload_calls
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    pub fn stored(&self, account: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .stored
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    pub fn folders(&self, account: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .folders
            .get(account)
            .cloned()
            .unwrap_or_default()
    }
}

struct FakeSession {
    account: String,
    behavior: Behavior,
    state: Arc<Mutex<RemoteState>>,
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn connect(
        &self,
        account: &RemoteAccount,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let behavior = self
            .behaviors
            .get(&account.display_name)
            .copied()
            .unwrap_or(Behavior::Ok);

        *self
            .state
            .lock()
            .unwrap()
            .connects
            .entry(account.display_name.clone())
            .or_default() += 1;

        if behavior == Behavior::ConnectFails {
            return Err(RemoteError::Other("login rejected".to_string()));
        }

        Ok(Box::new(FakeSession {
            account: account.display_name.clone(),
            behavior,
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn create_folder(&mut self, remote_path: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        let folders = state.folders.entry(self.account.clone()).or_default();
        if folders.iter().any(|f| f == remote_path) {
            return Err(RemoteError::AlreadyExists(remote_path.to_string()));
        }
        folders.push(remote_path.to_string());
        Ok(())
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        assert!(local_path.exists(), "uploading missing file {local_path:?}");

        let mut state = self.state.lock().unwrap();
        *state.upload_calls.entry(self.account.clone()).or_default() += 1;

        match self.behavior {
            Behavior::AlreadyExists => {
                return Err(RemoteError::AlreadyExists(remote_path.to_string()));
            }
            Behavior::Generic => return Err(RemoteError::Other("503 unavailable".to_string())),
            Behavior::AuthExpiredAlways => {
                return Err(RemoteError::AuthExpired("401".to_string()));
            }
            Behavior::AuthExpiredOnce => {
                if state.auth_expired_fired.insert(self.account.clone()) {
                    return Err(RemoteError::AuthExpired("401".to_string()));
                }
            }
            Behavior::FailFile(name) if remote_path.ends_with(name) => {
                return Err(RemoteError::Other("quota exceeded".to_string()));
            }
            _ => {}
        }

        let stored = state.stored.entry(self.account.clone()).or_default();
        if stored.iter().any(|s| s == remote_path) {
            return Err(RemoteError::AlreadyExists(remote_path.to_string()));
        }
        stored.push(remote_path.to_string());
        Ok(())
    }
}
