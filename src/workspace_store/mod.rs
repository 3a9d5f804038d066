//! Tasks and email templates: the workspace data read by the report and
//! lifecycle jobs.

mod models;
mod schema;
mod sqlite_workspace_store;

pub use models::*;
pub use schema::WORKSPACE_VERSIONED_SCHEMAS;
pub use sqlite_workspace_store::SqliteWorkspaceStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait WorkspaceStore: Send + Sync {
    // Tasks
    fn create_task(&self, task: &NewTask) -> Result<Task>;
    fn get_task(&self, task_id: i64) -> Result<Option<Task>>;
    /// Moving into `completed` stamps `completed_at`; moving out clears it.
    fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>>;
    /// Tasks with `start <= created_at < end`, oldest first.
    fn tasks_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Task>>;
    /// Archives completed tasks completed before `cutoff`. Returns the count.
    fn archive_completed_before(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>)
        -> Result<usize>;
    /// Deletes tasks archived before `cutoff`. Returns the count.
    fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // Email templates
    fn create_template(&self, template: &NewEmailTemplate, now: DateTime<Utc>)
        -> Result<EmailTemplate>;
    fn get_template(&self, template_id: i64) -> Result<Option<EmailTemplate>>;
    fn get_template_by_name(&self, name: &str) -> Result<Option<EmailTemplate>>;
}
