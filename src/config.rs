use anyhow::{Context, Result};
use chrono::NaiveTime;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::accounts::AccountStore;
use crate::core::archiver::SevenZip;

pub const DEFAULT_CONFIG_FILE: &str = "arkd.toml";
const ENV_PREFIX: &str = "ARKD_";
const TRIGGER_TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("compression level must be between 0 and 9, got {0}")]
    CompressionLevel(u8),
    #[error("daily trigger time must be HH:MM, got {0:?}")]
    TriggerTime(String),
    #[error("volume size must not be empty")]
    EmptyVolumeSize,
    #[error("upload attempts must be at least 1")]
    UploadAttempts,
    #[error("account display name must not be empty")]
    EmptyAccountName,
    #[error("invalid endpoint {url}: {reason}")]
    Endpoint { url: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory (or single file) that gets backed up
    pub source_path: PathBuf,
    /// Where day folders and archives are written
    pub repository_root: PathBuf,
    pub archiver_path: PathBuf,
    /// 7-Zip size literal for split volumes, e.g. `1g` or `500m`
    pub volume_size: String,
    pub compression_level: u8,
    /// Local time of the scheduled run, `HH:MM`
    pub daily_trigger_time: String,
    pub enable_upload: bool,
    pub upload_attempts: u32,
    pub upload_retry_delay_secs: u64,
    pub split_threshold_mb: u64,
    pub log_file: PathBuf,
    pub verbose: bool,
    pub json_logs: bool,
    pub remote_accounts: AccountStore,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("data"),
            repository_root: PathBuf::from("backups"),
            archiver_path: SevenZip::default_program(),
            volume_size: "1g".to_string(),
            compression_level: 3,
            daily_trigger_time: "03:00".to_string(),
            enable_upload: true,
            upload_attempts: 3,
            upload_retry_delay_secs: 2,
            split_threshold_mb: 1000,
            log_file: PathBuf::from("arkd.log"),
            verbose: false,
            json_logs: false,
            remote_accounts: AccountStore::new(),
        }
    }
}

/// Where the configuration comes from: the TOML file, then `ARKD_*` environment
/// variables, then overrides given on the command line.
///
/// Only the file layer is ever written back. The environment and the overrides apply to
/// this process alone.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    overrides: Figment,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overrides: Figment::new(),
        }
    }

    /// Layer `values` over the overrides added so far. Unset fields should be skipped
    /// when serializing so they don't mask the file.
    pub fn with_overrides<T: Serialize>(mut self, values: &T) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(values));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn file_layers(&self) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::file(&self.path))
    }

    /// Defaults and the file alone. This is what reconfiguration edits and saves.
    pub fn load_file(&self) -> Result<AppConfig> {
        self.extract(self.file_layers())
    }

    /// The effective configuration, with every layer applied.
    pub fn load(&self) -> Result<AppConfig> {
        self.extract(
            self.file_layers()
                .merge(Env::prefixed(ENV_PREFIX))
                .merge(self.overrides.clone()),
        )
    }

    /// Write `file_config` as the new file and return the effective configuration.
    pub fn save(&self, file_config: &AppConfig) -> Result<AppConfig> {
        file_config.validate()?;
        file_config.save(&self.path)?;
        self.load()
    }

    fn extract(&self, figment: Figment) -> Result<AppConfig> {
        let config: AppConfig = figment.extract().with_context(|| {
            format!("Failed to load configuration from {}", self.path.display())
        })?;
        config.validate()?;

        Ok(config)
    }
}

impl AppConfig {
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_level > 9 {
            return Err(ConfigError::CompressionLevel(self.compression_level));
        }
        self.trigger_time()?;
        if self.volume_size.trim().is_empty() {
            return Err(ConfigError::EmptyVolumeSize);
        }
        if self.upload_attempts == 0 {
            return Err(ConfigError::UploadAttempts);
        }
        for account in self.remote_accounts.iter() {
            account.validate()?;
        }
        Ok(())
    }

    pub fn trigger_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.daily_trigger_time.trim(), TRIGGER_TIME_FORMAT)
            .map_err(|_| ConfigError::TriggerTime(self.daily_trigger_time.clone()))
    }
}
