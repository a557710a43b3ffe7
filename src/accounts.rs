//! Remote accounts an archive is replicated to.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::config::ConfigError;
use crate::remote::RemoteClient;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub secret: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One replication target. Identified by its display name, which need not be unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteAccount {
    pub display_name: String,
    pub endpoint_url: String,
    pub credential: Credential,
    /// Folder on the remote side that archives are uploaded into
    #[serde(default)]
    pub remote_root: String,
}

impl RemoteAccount {
    /// Static checks; no network access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display_name.trim().is_empty() {
            return Err(ConfigError::EmptyAccountName);
        }

        let url = Url::parse(&self.endpoint_url).map_err(|e| ConfigError::Endpoint {
            url: self.endpoint_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Endpoint {
                url: self.endpoint_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        Ok(())
    }
}

/// Ordered list of remote accounts, persisted inside the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AccountStore {
    accounts: Vec<RemoteAccount>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `account`, check once that it is reachable, then append it.
    pub async fn add(&mut self, account: RemoteAccount, probe: &dyn RemoteClient) -> Result<()> {
        account.validate()?;

        probe.connect(&account).await.with_context(|| {
            format!(
                "Account {} is not reachable at {}",
                account.display_name, account.endpoint_url
            )
        })?;

        info!(account = %account.display_name, "Remote account added");
        self.accounts.push(account);
        Ok(())
    }

    /// Remove every account called `display_name`; returns how many were removed.
    pub fn remove(&mut self, display_name: &str) -> usize {
        let before = self.accounts.len();
        self.accounts.retain(|a| a.display_name != display_name);
        before - self.accounts.len()
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
    }

    pub fn list(&self) -> &[RemoteAccount] {
        &self.accounts
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteAccount> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl From<Vec<RemoteAccount>> for AccountStore {
    fn from(accounts: Vec<RemoteAccount>) -> Self {
        Self { accounts }
    }
}
