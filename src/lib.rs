//! # arkd
//!
//! Scheduled or on-demand backups: mirror a source tree into a staging directory,
//! archive it with 7-Zip, verify the archive, then replicate it to every configured
//! WebDAV account.
//!
//! The pipeline lives in [`core::Orchestrator`]; replication to remote accounts in
//! [`core::ReplicationEngine`].

pub mod accounts;
pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod logging;
pub mod remote;
pub mod scheduler;
