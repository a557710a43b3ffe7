mod common;

use arkd::core::{ReplicationEngine, ReplicationReport, StepProgress};
use common::{Behavior, FakeRemote, account, write_file};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;

fn engine(remote: &FakeRemote, names: &[&str]) -> ReplicationEngine {
    ReplicationEngine::new(
        Arc::new(remote.clone()),
        names.iter().map(|n| account(n)).collect(),
    )
    .with_retry_delay(Duration::ZERO)
}

fn channel() -> (mpsc::Sender<StepProgress>, mpsc::Receiver<StepProgress>) {
    mpsc::channel(256)
}

#[tokio::test]
async fn no_accounts_is_skipped() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new();
    let (tx, _rx) = channel();
    let report = engine(&remote, &[]).replicate(&archive, &tx).await;

    assert_eq!(report, ReplicationReport::Skipped);
}

#[tokio::test]
async fn single_file_lands_under_remote_root() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("photos_010203.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new();
    let (tx, _rx) = channel();
    let report = engine(&remote, &["home"]).replicate(&archive, &tx).await;

    let outcomes = report.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].message, "1 file(s) synchronized");
    assert_eq!(remote.stored("home"), vec!["/backups/photos_010203.7z"]);
    assert!(remote.folders("home").is_empty());
}

#[tokio::test]
async fn replicating_twice_is_idempotent() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new();
    let engine = engine(&remote, &["home"]);
    let (tx, _rx) = channel();

    let first = engine.replicate(&archive, &tx).await;
    let second = engine.replicate(&archive, &tx).await;

    assert!(first.all_succeeded());
    assert!(second.all_succeeded());
    assert_eq!(remote.stored("home").len(), 1);
    // The duplicate is recognised on the first attempt, no retries
    assert_eq!(remote.upload_calls("home"), 2);
}

#[tokio::test]
async fn already_exists_counts_as_success_without_retry() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new().with("home", Behavior::AlreadyExists);
    let (tx, _rx) = channel();
    let report = engine(&remote, &["home"]).replicate(&archive, &tx).await;

    assert!(report.all_succeeded());
    assert_eq!(remote.upload_calls("home"), 1);
}

#[tokio::test]
async fn generic_failures_use_exactly_the_attempt_limit() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new().with("home", Behavior::Generic);
    let (tx, mut rx) = channel();
    let report = engine(&remote, &["home"])
        .with_attempts(3)
        .replicate(&archive, &tx)
        .await;
    drop(tx);

    let outcome = &report.outcomes()[0];
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("upload failed for a.7z"));
    assert_eq!(remote.upload_calls("home"), 3);
    assert_eq!(remote.connects("home"), 1);

    let mut attempts = Vec::new();
    while let Some(event) = rx.recv().await {
        if let StepProgress::Upload { attempt, .. } = event {
            attempts.push(attempt);
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn expired_session_reconnects_once_and_succeeds() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new().with("home", Behavior::AuthExpiredOnce);
    let (tx, _rx) = channel();
    let report = engine(&remote, &["home"]).replicate(&archive, &tx).await;

    assert!(report.all_succeeded());
    // Initial login plus exactly one renewal
    assert_eq!(remote.connects("home"), 2);
    assert_eq!(remote.upload_calls("home"), 2);
    assert_eq!(remote.stored("home"), vec!["/backups/a.7z"]);
}

#[tokio::test]
async fn repeated_expiry_in_a_slot_is_treated_as_generic() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new().with("home", Behavior::AuthExpiredAlways);
    let (tx, _rx) = channel();
    let report = engine(&remote, &["home"])
        .with_attempts(2)
        .replicate(&archive, &tx)
        .await;

    assert!(!report.all_succeeded());
    // One renewal per slot, two uploads per slot
    assert_eq!(remote.connects("home"), 1 + 2);
    assert_eq!(remote.upload_calls("home"), 4);
}

#[tokio::test]
async fn failing_account_does_not_affect_others() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new()
        .with("broken", Behavior::ConnectFails)
        .with("flaky", Behavior::Generic);
    let (tx, _rx) = channel();
    let report = engine(&remote, &["broken", "home", "flaky", "office"])
        .replicate(&archive, &tx)
        .await;

    let summary: Vec<(&str, bool)> = report
        .outcomes()
        .iter()
        .map(|o| (o.account_name.as_str(), o.success))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("broken", false),
            ("home", true),
            ("flaky", false),
            ("office", true)
        ]
    );
    assert!(report.outcomes()[0].message.starts_with("connection failed"));
    assert_eq!(remote.upload_calls("broken"), 0);
    assert_eq!(remote.stored("office"), vec!["/backups/a.7z"]);
}

#[tokio::test]
async fn duplicate_account_names_are_independent_targets() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("a.7z");
    write_file(&archive, 10);

    let remote = FakeRemote::new();
    let (tx, _rx) = channel();
    let report = engine(&remote, &["home", "home"])
        .replicate(&archive, &tx)
        .await;

    assert_eq!(report.outcomes().len(), 2);
    assert!(report.all_succeeded());
    assert_eq!(remote.connects("home"), 2);
}

#[tokio::test]
async fn folder_uploads_only_archive_volumes_in_order() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("photos_Split_010203");
    for name in ["photos.7z.002", "photos.7z.001", "photos.7z.003", "readme.txt"] {
        write_file(&store.join(name), 10);
    }

    let remote = FakeRemote::new();
    let (tx, _rx) = channel();
    let report = engine(&remote, &["home"]).replicate(&store, &tx).await;

    assert!(report.all_succeeded());
    assert_eq!(report.outcomes()[0].message, "3 file(s) synchronized");
    assert_eq!(remote.folders("home"), vec!["/backups/photos_Split_010203"]);
    assert_eq!(
        remote.stored("home"),
        vec![
            "/backups/photos_Split_010203/photos.7z.001",
            "/backups/photos_Split_010203/photos.7z.002",
            "/backups/photos_Split_010203/photos.7z.003",
        ]
    );
}

#[tokio::test]
async fn failed_volume_names_first_failure_and_continues() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("photos_Split_010203");
    for name in ["photos.7z.001", "photos.7z.002", "photos.7z.003"] {
        write_file(&store.join(name), 10);
    }

    let remote = FakeRemote::new().with("home", Behavior::FailFile("photos.7z.002"));
    let (tx, _rx) = channel();
    let report = engine(&remote, &["home"]).replicate(&store, &tx).await;

    let outcome = &report.outcomes()[0];
    assert!(!outcome.success);
    assert!(outcome.message.contains("photos.7z.002"));
    assert_eq!(remote.stored("home").len(), 2);
    assert!(remote.stored("home")[1].ends_with("photos.7z.003"));
}

#[tokio::test]
async fn folder_creation_error_is_ignored() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("photos_Split_010203");
    write_file(&store.join("photos.7z.001"), 10);

    let remote = FakeRemote::new();
    let (tx, _rx) = channel();
    let engine = engine(&remote, &["home"]);

    engine.replicate(&store, &tx).await;
    // Second run hits an existing folder and existing files
    let report = engine.replicate(&store, &tx).await;

    assert!(report.all_succeeded());
    assert_eq!(remote.folders("home").len(), 1);
}
