use anyhow::Result;
use chrono::NaiveTime;
use std::path::PathBuf;
use tracing::warn;

use crate::accounts::{Credential, RemoteAccount};
use crate::cli::Prompter;
use crate::config::AppConfig;

/// Walk the operator through the essential settings, starting from `base`.
///
/// Accounts and logging settings are carried over from `base` unchanged.
pub async fn run_setup(prompter: &mut Prompter, base: AppConfig) -> Result<AppConfig> {
    println!();
    println!("arkd setup");
    println!("==========");

    let source_path = PathBuf::from(
        prompter
            .ask("Source directory to back up", &base.source_path.to_string_lossy())
            .await?,
    );
    let repository_root = PathBuf::from(
        prompter
            .ask("Backup repository directory", &base.repository_root.to_string_lossy())
            .await?,
    );
    if let Err(e) = std::fs::create_dir_all(&repository_root) {
        warn!(path = %repository_root.display(), error = %e, "Failed to create repository directory");
    }

    let mut archiver_path = PathBuf::from(
        prompter
            .ask("Path to the 7-Zip executable", &base.archiver_path.to_string_lossy())
            .await?,
    );
    if archiver_path.is_absolute() && !archiver_path.exists() {
        println!("  {} does not exist", archiver_path.display());
        archiver_path = PathBuf::from(
            prompter
                .ask("Path to the 7-Zip executable", &archiver_path.to_string_lossy())
                .await?,
        );
    }

    let volume_size = prompter
        .ask_parsed("Split volume size (7-Zip syntax)", &base.volume_size, |s| {
            parse_volume_size(s)
        })
        .await?;

    let compression_level = prompter
        .ask_parsed(
            "Compression level (0-9)",
            &base.compression_level.to_string(),
            |s| match s.parse::<u8>() {
                Ok(level) if level <= 9 => Ok(level),
                _ => Err("Enter a number from 0 to 9".to_string()),
            },
        )
        .await?;

    let daily_trigger_time = prompter
        .ask_parsed("Daily backup time (HH:MM)", &base.daily_trigger_time, |s| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map(|t| t.format("%H:%M").to_string())
                .map_err(|_| "Use 24-hour HH:MM, e.g. 03:00".to_string())
        })
        .await?;

    let enable_upload = prompter
        .confirm("Upload archives to remote accounts", base.enable_upload)
        .await?;

    let config = AppConfig {
        source_path,
        repository_root,
        archiver_path,
        volume_size,
        compression_level,
        daily_trigger_time,
        enable_upload,
        ..base
    };
    config.validate()?;

    Ok(config)
}

/// Interactive form for a new remote account.
pub async fn prompt_account(prompter: &mut Prompter) -> Result<RemoteAccount> {
    let display_name = prompter.ask("Account name", "").await?;
    let endpoint_url = prompter.ask("WebDAV endpoint URL", "").await?;
    let user = prompter.ask("User", "").await?;
    let secret = prompter.ask("Password or app token", "").await?;
    let remote_root = prompter.ask("Remote folder", "/").await?;

    Ok(RemoteAccount {
        display_name,
        endpoint_url,
        credential: Credential { user, secret },
        remote_root,
    })
}

/// `1g`, `500m`, `700k`, `4096b` or a plain byte count.
fn parse_volume_size(s: &str) -> Result<String, String> {
    let s = s.trim().to_ascii_lowercase();
    let digits = s.trim_end_matches(['b', 'k', 'm', 'g']);
    let suffix_len = s.len() - digits.len();

    if digits.is_empty() || suffix_len > 1 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("Use a size like 1g, 500m or 700k".to_string());
    }
    if digits.chars().all(|c| c == '0') {
        return Err("Volume size must be greater than zero".to_string());
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setup_collects_answers_and_keeps_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let repo_str = repo.to_string_lossy().into_owned();

        let base = AppConfig {
            upload_attempts: 5,
            ..AppConfig::default()
        };
        let mut prompter = Prompter::scripted([
            "\"/srv/photos\"",
            repo_str.as_str(),
            "7za",
            "2gb",
            "500m",
            "12",
            "9",
            "25:00",
            "22:30",
            "n",
        ]);

        let config = run_setup(&mut prompter, base).await.unwrap();

        assert_eq!(config.source_path, PathBuf::from("/srv/photos"));
        assert_eq!(config.repository_root, repo);
        assert!(repo.is_dir());
        assert_eq!(config.archiver_path, PathBuf::from("7za"));
        assert_eq!(config.volume_size, "500m");
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.daily_trigger_time, "22:30");
        assert!(!config.enable_upload);
        assert_eq!(config.upload_attempts, 5);
    }

    #[tokio::test]
    async fn setup_accepts_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let base = AppConfig {
            repository_root: dir.path().join("repo"),
            archiver_path: PathBuf::from("7z"),
            ..AppConfig::default()
        };
        let mut prompter = Prompter::scripted(["", "", "", "", "", "", ""]);

        let config = run_setup(&mut prompter, base.clone()).await.unwrap();
        assert_eq!(config, base);
    }

    #[tokio::test]
    async fn account_form() {
        let mut prompter = Prompter::scripted([
            "home",
            "https://dav.example.com/",
            "me",
            "s3cret",
            "",
        ]);

        let account = prompt_account(&mut prompter).await.unwrap();
        assert_eq!(account.display_name, "home");
        assert_eq!(account.credential.secret, "s3cret");
        assert_eq!(account.remote_root, "/");
    }

    #[test]
    fn volume_sizes() {
        assert_eq!(parse_volume_size("1G"), Ok("1g".to_string()));
        assert_eq!(parse_volume_size("4096"), Ok("4096".to_string()));
        assert!(parse_volume_size("").is_err());
        assert!(parse_volume_size("0m").is_err());
        assert!(parse_volume_size("2gb").is_err());
        assert!(parse_volume_size("1.5g").is_err());
    }
}
