use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::accounts::RemoteAccount;
use crate::config::{AppConfig, ConfigSource};
use crate::core::{Orchestrator, SevenZip};
use crate::remote::{RemoteClient, WebDavClient};

/// Everything the console and CLI commands need, shared behind `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    source: ConfigSource,
    pub orchestrator: Arc<Orchestrator>,
    pub remote: Arc<dyn RemoteClient>,
}

impl AppContext {
    /// Load the effective configuration from `source` and wire up the 7-Zip archiver
    /// and the WebDAV client.
    pub fn new(source: ConfigSource) -> Result<Self> {
        let config = source.load()?;
        let archiver = Arc::new(SevenZip::new(config.archiver_path.clone()));
        let remote: Arc<dyn RemoteClient> = Arc::new(WebDavClient::new());
        let orchestrator = Arc::new(Orchestrator::new(config, archiver, remote.clone()));

        Ok(Self::from_parts(source, orchestrator, remote))
    }

    pub fn from_parts(
        source: ConfigSource,
        orchestrator: Arc<Orchestrator>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        Self {
            source,
            orchestrator,
            remote,
        }
    }

    pub fn config_path(&self) -> &Path {
        self.source.path()
    }

    /// Effective configuration used by the next run.
    pub fn config(&self) -> Arc<AppConfig> {
        self.orchestrator.config()
    }

    /// The configuration file as written, without environment or command-line overrides.
    pub fn file_config(&self) -> Result<AppConfig> {
        self.source.load_file()
    }

    /// Write `file_config` to disk and make the resulting configuration current for
    /// the next run.
    pub fn persist(&self, file_config: AppConfig) -> Result<()> {
        let effective = self.source.save(&file_config)?;

        if effective.archiver_path != self.config().archiver_path {
            info!(path = %effective.archiver_path.display(), "Archiver changed");
            self.orchestrator
                .replace_archiver(Arc::new(SevenZip::new(effective.archiver_path.clone())));
        }
        self.orchestrator.replace_config(effective);
        Ok(())
    }

    pub async fn add_account(&self, account: RemoteAccount) -> Result<()> {
        let mut config = self.file_config()?;
        config
            .remote_accounts
            .add(account, self.remote.as_ref())
            .await?;
        self.persist(config)
    }

    pub fn remove_account(&self, display_name: &str) -> Result<usize> {
        let mut config = self.file_config()?;
        let removed = config.remote_accounts.remove(display_name);
        if removed > 0 {
            self.persist(config)?;
        }
        Ok(removed)
    }

    pub fn clear_accounts(&self) -> Result<()> {
        let mut config = self.file_config()?;
        config.remote_accounts.clear();
        self.persist(config)
    }
}
