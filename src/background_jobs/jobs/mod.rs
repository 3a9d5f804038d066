//! Built-in background job implementations and their registration table.

pub mod report_sender;
pub mod task_lifecycle;

pub use report_sender::{ReportPeriod, ReportSenderJob};
pub use task_lifecycle::TaskLifecycleJob;

use super::discovery::{discover_jobs, DiscoveryReport, JobEntry};
use super::job::BackgroundJob;
use super::registry::JobRegistry;
use super::schedule::{DayOfWeek, ScheduleConfig};
use anyhow::Result;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Jobs shipped with the server.
///
/// Report jobs start inactive: they need a template and recipients before
/// they can send anything.
pub const BUILTIN_JOBS: &[JobEntry] = &[
    JobEntry {
        name: "weekly_report",
        description: "Email a summary of the tasks created during the past 7 days",
        active_by_default: false,
        default_schedule: weekly_report_schedule,
        default_params: weekly_report_params,
        factory: weekly_report,
    },
    JobEntry {
        name: "monthly_report",
        description: "Email a summary of the tasks created during the past 30 days",
        active_by_default: false,
        default_schedule: monthly_report_schedule,
        default_params: monthly_report_params,
        factory: monthly_report,
    },
    JobEntry {
        name: "task_lifecycle",
        description: "Archive old completed tasks and purge old archived tasks",
        active_by_default: true,
        default_schedule: task_lifecycle_schedule,
        default_params: task_lifecycle_params,
        factory: task_lifecycle,
    },
];

/// Registers [`BUILTIN_JOBS`] into `registry`.
pub fn discover_builtin_jobs(registry: &mut JobRegistry) -> DiscoveryReport {
    discover_jobs(BUILTIN_JOBS, registry)
}

fn weekly_report_schedule() -> ScheduleConfig {
    ScheduleConfig::Weekly {
        day_of_week: DayOfWeek::Monday,
        hour: 9,
        minute: 0,
    }
}

fn weekly_report_params() -> JsonValue {
    json!({"period": "weekly"})
}

fn weekly_report() -> Result<Arc<dyn BackgroundJob>> {
    Ok(Arc::new(ReportSenderJob::new(ReportPeriod::Weekly)))
}

fn monthly_report_schedule() -> ScheduleConfig {
    ScheduleConfig::Monthly {
        day_of_month: 1,
        hour: 9,
        minute: 0,
    }
}

fn monthly_report_params() -> JsonValue {
    json!({"period": "monthly"})
}

fn monthly_report() -> Result<Arc<dyn BackgroundJob>> {
    Ok(Arc::new(ReportSenderJob::new(ReportPeriod::Monthly)))
}

fn task_lifecycle_schedule() -> ScheduleConfig {
    ScheduleConfig::Daily { hour: 2, minute: 0 }
}

fn task_lifecycle_params() -> JsonValue {
    json!({
        "archive_after_days": task_lifecycle::DEFAULT_ARCHIVE_AFTER_DAYS,
        "purge_after_days": task_lifecycle::DEFAULT_PURGE_AFTER_DAYS,
    })
}

fn task_lifecycle() -> Result<Arc<dyn BackgroundJob>> {
    Ok(Arc::new(TaskLifecycleJob))
}
