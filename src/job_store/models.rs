use crate::background_jobs::{ScheduleConfig, ScheduleError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// =============================================================================
// Job Runs
// =============================================================================

/// Status of a single job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Success,
    Failure,
    /// The process stopped while the run was in flight.
    Interrupted,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Success => "success",
            JobRunStatus::Failure => "failure",
            JobRunStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "success" => Some(JobRunStatus::Success),
            "failure" => Some(JobRunStatus::Failure),
            "interrupted" => Some(JobRunStatus::Interrupted),
            _ => None,
        }
    }
}

/// What caused a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(TriggerSource::Scheduled),
            "manual" => Some(TriggerSource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub id: i64,
    pub job_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub trigger_source: TriggerSource,
}

// =============================================================================
// Jobs
// =============================================================================

/// A persisted job definition.
///
/// `function_name` is the registry key used to resolve the job's
/// implementation; `module_path` records where that implementation lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub module_path: String,
    pub function_name: String,
    pub schedule_type: String,
    pub schedule_config: JsonValue,
    pub is_active: bool,
    pub is_custom: bool,
    pub params: JsonValue,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn schedule(&self) -> Result<ScheduleConfig, ScheduleError> {
        ScheduleConfig::from_parts(&self.schedule_type, &self.schedule_config)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub description: Option<String>,
    pub module_path: String,
    pub function_name: String,
    pub schedule: ScheduleConfig,
    pub is_active: bool,
    pub is_custom: bool,
    pub params: JsonValue,
}

/// Partial update of a job. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<ScheduleConfig>,
    pub is_active: Option<bool>,
    pub params: Option<JsonValue>,
}

/// Listing filter. All set fields must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub active: Option<bool>,
    pub custom: Option<bool>,
    pub schedule_type: Option<String>,
    pub name_contains: Option<String>,
}

/// Returned by [`super::JobStore::create_job`] when the name is taken.
#[derive(Debug, thiserror::Error)]
#[error("A job named '{0}' already exists")]
pub struct DuplicateJobName(pub String);
