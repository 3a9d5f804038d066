//! ReportFlow Server Library
//!
//! Job scheduling and automated email reporting for the ReportFlow task
//! workspace. Modules are exposed for the binary and for integration tests.

pub mod background_jobs;
pub mod config;
pub mod job_store;
pub mod mailer;
pub mod server;
pub mod sqlite_persistence;
pub mod templates;
pub mod workspace_store;

// Re-export commonly used types for convenience
pub use background_jobs::{create_scheduler, JobScheduler, SchedulerHandle};
pub use job_store::{JobStore, SqliteJobStore};
pub use server::{run_server, RequestsLoggingLevel};
pub use workspace_store::{SqliteWorkspaceStore, WorkspaceStore};
