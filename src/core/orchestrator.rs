use anyhow::{Context, anyhow};
use chrono::Local;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::archiver::{ArchiveRequest, Archiver};
use crate::core::layout::{RunLayout, source_name};
use crate::core::mirror::MirrorEngine;
use crate::core::models::{
    BackupRun, ReplicationReport, RunFailure, RunKind, RunReport, RunState, Strategy,
};
use crate::core::progress::{StepProgress, spawn_progress_logger};
use crate::core::replication::ReplicationEngine;
use crate::core::size::{estimate_size, megabytes};
use crate::remote::RemoteClient;

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Runs the backup pipeline, one run at a time.
pub struct Orchestrator {
    config: RwLock<Arc<AppConfig>>,
    archiver: RwLock<Arc<dyn Archiver>>,
    remote: Arc<dyn RemoteClient>,
    mirror: MirrorEngine,
    running: Mutex<()>,
}

/// What a run has been through so far.
struct RunTrace {
    run_id: String,
    history: Vec<RunState>,
    run: Option<BackupRun>,
    replication: Option<ReplicationReport>,
}

impl RunTrace {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            history: Vec::new(),
            run: None,
            replication: None,
        }
    }

    fn advance(&mut self, state: RunState) {
        debug!(?state, "Run state changed");
        self.history.push(state);
    }
}

fn rejected(run_id: String, failure: RunFailure, started: Instant) -> RunReport {
    RunReport {
        run_id,
        state: RunState::Failed,
        history: vec![RunState::Start, RunState::Failed],
        failure: Some(failure),
        run: None,
        replication: None,
        elapsed: started.elapsed(),
    }
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        archiver: Arc<dyn Archiver>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            archiver: RwLock::new(archiver),
            remote,
            mirror: MirrorEngine::default(),
            running: Mutex::new(()),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new configuration. Runs already in progress keep their snapshot.
    pub fn replace_config(&self, config: AppConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    fn archiver(&self) -> Arc<dyn Archiver> {
        self.archiver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Use `archiver` from the next run on.
    pub fn replace_archiver(&self, archiver: Arc<dyn Archiver>) {
        *self.archiver.write().unwrap_or_else(PoisonError::into_inner) = archiver;
    }

    /// Whether a run currently holds the run slot.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run the pipeline on a spawned task so that a panic inside it comes back as a
    /// failed report instead of unwinding into the caller.
    pub async fn run_isolated(self: Arc<Self>, kind: RunKind, cancel: CancellationToken) -> RunReport {
        isolate(async move { self.run(kind, cancel).await }).await
    }

    /// Production run for the scheduler: waits for the slot instead of being rejected.
    pub async fn run_scheduled(self: Arc<Self>, cancel: CancellationToken) -> RunReport {
        isolate(async move { self.run_queued(RunKind::Production, cancel).await }).await
    }

    /// Execute one backup run to completion, rejecting it if another run holds the slot.
    ///
    /// Never returns an error: every failure ends in a [`RunState::Failed`] report.
    pub async fn run(&self, kind: RunKind, cancel: CancellationToken) -> RunReport {
        let started = Instant::now();
        let run_id = Uuid::now_v7().to_string();

        let Ok(_slot) = self.running.try_lock() else {
            warn!(%run_id, "A backup is already running, request rejected");
            return rejected(run_id, RunFailure::AlreadyRunning, started);
        };

        self.run_in_slot(kind, cancel, run_id, started).await
    }

    /// Like [`Orchestrator::run`], but queues behind a run in progress.
    pub async fn run_queued(&self, kind: RunKind, cancel: CancellationToken) -> RunReport {
        let started = Instant::now();
        let run_id = Uuid::now_v7().to_string();

        let _slot = match self.running.try_lock() {
            Ok(slot) => slot,
            Err(_) => {
                info!(%run_id, "A backup is already running, waiting for it to finish");
                tokio::select! {
                    slot = self.running.lock() => slot,
                    _ = cancel.cancelled() => {
                        warn!(%run_id, "Cancelled while waiting for the running backup");
                        return rejected(run_id, RunFailure::Cancelled, started);
                    }
                }
            }
        };

        self.run_in_slot(kind, cancel, run_id, started).await
    }

    async fn run_in_slot(
        &self,
        kind: RunKind,
        cancel: CancellationToken,
        run_id: String,
        started: Instant,
    ) -> RunReport {
        let config = self.config();
        let archiver = self.archiver();
        let span = info_span!("backup_run", %run_id, test = kind.is_test());

        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let logger = spawn_progress_logger(rx);

        let mut trace = RunTrace::new(&run_id);
        let result = self
            .execute(&config, archiver.as_ref(), &kind, &mut trace, tx, &cancel)
            .instrument(span.clone())
            .await;

        // All senders are gone once `execute` returns
        let _ = logger.await;

        let elapsed = started.elapsed();
        let (state, failure) = span.in_scope(|| match result {
            Ok(()) => {
                info!(elapsed_secs = elapsed.as_secs(), "Backup run finished");
                (RunState::Done, None)
            }
            Err(failure) => {
                error!(error = %failure.detail(), "Backup run failed");
                (RunState::Failed, Some(failure))
            }
        });
        trace.advance(state);

        RunReport {
            run_id,
            state,
            history: trace.history,
            failure,
            run: trace.run,
            replication: trace.replication,
            elapsed,
        }
    }

    async fn execute(
        &self,
        config: &AppConfig,
        archiver: &dyn Archiver,
        kind: &RunKind,
        trace: &mut RunTrace,
        tx: mpsc::Sender<StepProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), RunFailure> {
        trace.advance(RunState::Start);
        let started_at = Local::now();
        let source = kind.source(&config.source_path).to_path_buf();
        info!(source = %source.display(), "Backup run started");

        if !source.exists() {
            return Err(RunFailure::Unexpected(anyhow!(
                "Source {} does not exist",
                source.display()
            )));
        }

        let size_source = source.clone();
        let source_size_bytes = tokio::task::spawn_blocking(move || estimate_size(&size_source))
            .await
            .context("Size estimation task panicked")
            .map_err(RunFailure::Unexpected)?;
        info!(
            bytes = source_size_bytes,
            megabytes = megabytes(source_size_bytes),
            "Source size estimated"
        );
        trace.advance(RunState::SizeEstimated);

        let strategy = Strategy::for_size(source_size_bytes, config.split_threshold_mb);
        let layout = RunLayout::new(
            &config.repository_root,
            &started_at,
            kind.is_test(),
            &source_name(&source),
            strategy,
        );
        info!(?strategy, archive = %layout.archive_path.display(), "Strategy chosen");
        trace.advance(RunState::StrategyChosen);

        trace.run = Some(BackupRun {
            id: trace.run_id.clone(),
            started_at,
            is_test: kind.is_test(),
            enable_upload: config.enable_upload,
            source_path: source.clone(),
            source_size_bytes,
            strategy,
            layout: layout.clone(),
        });

        create_dir(&layout.archive_store_dir).await?;
        create_dir(&layout.staging_dir).await?;

        if cancel.is_cancelled() {
            remove_staging(&layout.staging_dir).await;
            return Err(RunFailure::Cancelled);
        }

        match self
            .mirror
            .mirror(&source, &layout.staging_dir, tx.clone(), cancel.clone())
            .await
        {
            Ok(summary) => {
                info!(
                    files = summary.files_copied,
                    bytes = summary.bytes_total,
                    failed = summary.failed.len(),
                    duration_secs = summary.duration_secs,
                    "Mirror complete"
                );
            }
            Err(e) => {
                remove_staging(&layout.staging_dir).await;
                if cancel.is_cancelled() {
                    return Err(RunFailure::Cancelled);
                }
                return Err(RunFailure::Unexpected(e.context("Mirror failed")));
            }
        }
        trace.advance(RunState::Mirrored);

        let request = ArchiveRequest {
            archive_path: layout.archive_path.clone(),
            input_dir: layout.staging_dir.clone(),
            volume_flag: strategy.volume_flag(&config.volume_size),
            compression_level: config.compression_level,
        };

        // From here on a failed archive step leaves the staging copy for inspection
        let exit = archiver
            .archive(&request, tx.clone(), cancel.clone())
            .await
            .map_err(RunFailure::Unexpected)?;

        if !exit.success() {
            if cancel.is_cancelled() {
                return Err(RunFailure::Cancelled);
            }
            return Err(RunFailure::ArchiveFailed(exit));
        }
        info!("Archive created, removing staging copy");
        remove_staging(&layout.staging_dir).await;
        trace.advance(RunState::Archived);

        if cancel.is_cancelled() {
            return Err(RunFailure::Cancelled);
        }

        let verify_target = layout.verify_target(strategy);
        if !archiver.verify(&verify_target, tx.clone()).await {
            return Err(RunFailure::VerificationFailed(verify_target));
        }
        info!(target = %verify_target.display(), "Archive verified");
        trace.advance(RunState::Verified);

        if kind.is_test() {
            info!("Test run, upload skipped");
            return Ok(());
        }
        if !config.enable_upload {
            info!("Upload disabled, skipping replication");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(RunFailure::Cancelled);
        }

        let engine = ReplicationEngine::from_config(self.remote.clone(), config);
        let report = engine.replicate(layout.upload_root(strategy), &tx).await;
        trace.replication = Some(report);
        trace.advance(RunState::Uploaded);

        Ok(())
    }
}

async fn isolate<F>(run: F) -> RunReport
where
    F: Future<Output = RunReport> + Send + 'static,
{
    let started = Instant::now();
    match tokio::spawn(run).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Backup task aborted");
            rejected(
                String::new(),
                RunFailure::Unexpected(anyhow!("backup task aborted: {e}")),
                started,
            )
        }
    }
}

async fn create_dir(path: &Path) -> Result<(), RunFailure> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))
        .map_err(RunFailure::Unexpected)
}

async fn remove_staging(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove staging directory");
    }
}
