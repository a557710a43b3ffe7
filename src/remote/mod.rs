//! Boundary to remote storage accounts.
//!
//! Provider-specific failures are translated into [`RemoteError`] here, so the
//! replication engine only ever sees the three kinds it knows how to handle.

pub mod webdav;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::accounts::RemoteAccount;

pub use webdav::WebDavClient;

/// Classified failure of a remote operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The object is already present remotely.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The session is no longer authenticated; a fresh login may succeed.
    #[error("authentication expired: {0}")]
    AuthExpired(String),
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Opens authenticated sessions against remote accounts.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn connect(&self, account: &RemoteAccount) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// An authenticated handle to one account.
///
/// Remote paths are absolute, `/`-separated and relative to the account's endpoint.
#[async_trait]
pub trait RemoteSession: Send {
    async fn create_folder(&mut self, remote_path: &str) -> Result<(), RemoteError>;

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError>;
}

/// Join path segments under `root` into an absolute remote path.
pub fn remote_join(root: &str, parts: &[&str]) -> String {
    let segments: Vec<&str> = root
        .split('/')
        .chain(parts.iter().flat_map(|p| p.split('/')))
        .filter(|s| !s.is_empty())
        .collect();

    format!("/{}", segments.join("/"))
}
