//! Task lifecycle maintenance.
//!
//! Archives tasks that have been completed for a while, then deletes tasks
//! that have been archived for a while.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError},
};
use anyhow::Context;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_ARCHIVE_AFTER_DAYS: u32 = 30;
pub const DEFAULT_PURGE_AFTER_DAYS: u32 = 30;

#[derive(Debug, Deserialize)]
struct LifecycleParams {
    #[serde(default = "default_archive_after_days")]
    archive_after_days: u32,
    #[serde(default = "default_purge_after_days")]
    purge_after_days: u32,
}

fn default_archive_after_days() -> u32 {
    DEFAULT_ARCHIVE_AFTER_DAYS
}

fn default_purge_after_days() -> u32 {
    DEFAULT_PURGE_AFTER_DAYS
}

pub struct TaskLifecycleJob;

impl BackgroundJob for TaskLifecycleJob {
    fn module_path(&self) -> &'static str {
        module_path!()
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let params: LifecycleParams = serde_json::from_value(ctx.params.clone())
            .map_err(|e| JobError::InvalidParams(e.to_string()))?;
        let store = &ctx.services.workspace_store;
        let now = Utc::now();

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let archive_cutoff = now - Duration::days(i64::from(params.archive_after_days));
        let archived = store
            .archive_completed_before(archive_cutoff, now)
            .context("Failed to archive completed tasks")?;

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let purge_cutoff = now - Duration::days(i64::from(params.purge_after_days));
        let purged = store
            .purge_archived_before(purge_cutoff)
            .context("Failed to purge archived tasks")?;

        if archived > 0 || purged > 0 {
            info!("Archived {} task(s), purged {} archived task(s)", archived, purged);
        } else {
            info!("No tasks to archive or purge");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::test_support::{job_context, test_services};
    use crate::workspace_store::{NewTask, TaskStatus, WorkspaceStore};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_archives_then_purges() {
        let temp_dir = TempDir::new().unwrap();
        let env = test_services(&temp_dir);
        let store = env.workspace_store.as_ref();
        let now = Utc::now();

        let stale = store
            .create_task(&NewTask::new(
                "Old release",
                TaskStatus::Completed,
                now - Duration::days(40),
            ))
            .unwrap();
        let recent = store
            .create_task(&NewTask::new(
                "Recent fix",
                TaskStatus::Completed,
                now - Duration::days(2),
            ))
            .unwrap();
        let open = store
            .create_task(&NewTask::new(
                "Open item",
                TaskStatus::Todo,
                now - Duration::days(90),
            ))
            .unwrap();

        let ctx = job_context(&env.services, json!({}), now);
        TaskLifecycleJob.execute(&ctx).unwrap();

        assert!(store.get_task(stale.id).unwrap().unwrap().archived_at.is_some());
        assert!(store.get_task(recent.id).unwrap().unwrap().archived_at.is_none());
        assert!(store.get_task(open.id).unwrap().unwrap().archived_at.is_none());

        // Archived just now, so a zero-day purge window removes it.
        let ctx = job_context(&env.services, json!({"purge_after_days": 0}), now);
        std::thread::sleep(std::time::Duration::from_millis(5));
        TaskLifecycleJob.execute(&ctx).unwrap();

        assert!(store.get_task(stale.id).unwrap().is_none());
        assert!(store.get_task(recent.id).unwrap().is_some());
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let env = test_services(&temp_dir);
        let ctx = job_context(&env.services, json!({}), Utc::now());
        ctx.cancellation_token.cancel();

        assert!(matches!(
            TaskLifecycleJob.execute(&ctx),
            Err(JobError::Cancelled)
        ));
    }

    #[test]
    fn test_rejects_bad_params() {
        let temp_dir = TempDir::new().unwrap();
        let env = test_services(&temp_dir);
        let ctx = job_context(&env.services, json!({"archive_after_days": -3}), Utc::now());

        assert!(matches!(
            TaskLifecycleJob.execute(&ctx),
            Err(JobError::InvalidParams(_))
        ));
    }
}
