//! Persistence for job definitions and their execution history.

mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOB_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait JobStore: Send + Sync {
    // Job definitions
    /// Fails with [`DuplicateJobName`] if the name is taken.
    fn create_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<Job>;
    /// Returns `None` if no job has this id.
    fn update_job(&self, job_id: i64, update: &JobUpdate, now: DateTime<Utc>)
        -> Result<Option<Job>>;
    fn get_job(&self, job_id: i64) -> Result<Option<Job>>;
    fn get_job_by_name(&self, name: &str) -> Result<Option<Job>>;
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;
    fn set_next_run(&self, job_id: i64, next_run_at: Option<DateTime<Utc>>) -> Result<()>;

    // Run history
    fn record_run_start(
        &self,
        job_id: i64,
        trigger_source: TriggerSource,
        started_at: DateTime<Utc>,
    ) -> Result<i64>;
    /// Finalizes a run and folds its outcome into the job's last-run time,
    /// counters and last error, in one transaction. Runs that are no longer
    /// `running` are left untouched and `false` is returned.
    fn finish_run(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Most recent first.
    fn get_job_history(&self, job_id: i64, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: i64) -> Result<Option<JobRun>>;
    fn count_runs(&self, job_id: i64) -> Result<usize>;
    /// Marks every run still `running` as `interrupted`. Returns how many
    /// were changed.
    fn mark_stale_runs_interrupted(&self, now: DateTime<Utc>) -> Result<usize>;
}
