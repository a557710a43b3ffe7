pub mod archiver;
pub mod layout;
pub mod mirror;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod replication;
pub mod size;

pub use archiver::{ArchiveRequest, Archiver, ProcessExit, SevenZip};
pub use layout::{RunLayout, purge_test_folders};
pub use mirror::{MirrorEngine, MirrorSummary};
pub use models::{
    BackupRun, ReplicationReport, RunFailure, RunKind, RunReport, RunState, Strategy,
    UploadOutcome,
};
pub use orchestrator::Orchestrator;
pub use progress::StepProgress;
pub use replication::{ReplicationEngine, UploadPlan};
pub use size::estimate_size;
