//! Background job scheduling and execution system.
//!
//! Jobs are registered from a static table, persisted as rows in the job
//! store, armed as triggers by the scheduler and executed by the task runner
//! on blocking worker threads.

mod context;
pub mod discovery;
mod handle;
mod job;
pub mod jobs;
mod registry;
mod runner;
mod schedule;
mod scheduler;
#[cfg(test)]
mod test_support;

pub use context::{JobContext, JobServices};
pub use discovery::{
    discover_jobs, is_valid_identifier, sync_to_store, DiscoveredJob, DiscoveryReport, JobEntry,
    SkippedEntry,
};
pub use handle::{
    CreateJobRequest, ExecuteAck, ExecuteStatus, JobInfo, JobOperationError, JobRunInfo,
    SchedulerHandle, UpdateJobRequest,
};
pub use job::{BackgroundJob, JobError, ShutdownBehavior};
pub use registry::{JobRegistry, RegistryError};
pub use runner::{CompletedRun, OverlapPolicy, RunOutcome, TaskRunner};
pub use schedule::{DayOfWeek, ScheduleConfig, ScheduleError};
pub use scheduler::{
    block_on_with_shutdown, create_scheduler, JobScheduler, RescheduleOutcome, SchedulerSettings,
    StartupReport, UnschedulableJob, UnschedulableReason, DEFAULT_SHUTDOWN_TIMEOUT,
    DEFAULT_UTC_OFFSET_MINUTES, RUNTIME_SHUTDOWN_GRACE,
};
