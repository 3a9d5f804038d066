use super::registry::JobRegistry;
use super::runner::RunOutcome;
use super::schedule::ScheduleConfig;
use super::scheduler::RescheduleOutcome;
use crate::job_store::{
    DuplicateJobName, Job, JobFilter, JobRun, JobStore, JobUpdate, NewJob,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::warn;

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Information about a job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
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
    pub is_running: bool,
    /// Why an active job has no trigger, if it has none.
    pub unschedulable_reason: Option<String>,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub last_error: Option<String>,
    pub last_run: Option<JobRunInfo>,
    pub created_at: String,
    pub updated_at: String,
}

/// Serializable job run information.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub id: i64,
    pub job_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub trigger_source: String,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        JobRunInfo {
            id: run.id,
            job_id: run.job_id,
            started_at: format_datetime(&run.started_at),
            finished_at: run.finished_at.as_ref().map(format_datetime),
            duration_ms: run
                .finished_at
                .map(|finished| (finished - run.started_at).num_milliseconds()),
            status: run.status.as_str().to_string(),
            error_message: run.error_message,
            trigger_source: run.trigger_source.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Registry key of the implementation.
    pub function_name: String,
    pub schedule_type: String,
    #[serde(default = "empty_object")]
    pub schedule_config: JsonValue,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "empty_object")]
    pub params: JsonValue,
}

fn empty_object() -> JsonValue {
    json!({})
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateJobRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule_type: Option<String>,
    pub schedule_config: Option<JsonValue>,
    pub is_active: Option<bool>,
    pub params: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteStatus {
    Queued,
    Skipped,
}

/// Immediate acknowledgment of a manual run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteAck {
    pub status: ExecuteStatus,
    /// Present when the run was dispatched right away.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobOperationError {
    #[error("Job {0} not found")]
    NotFound(i64),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for JobOperationError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DuplicateJobName>() {
            Ok(duplicate) => JobOperationError::Conflict(duplicate.to_string()),
            Err(err) => JobOperationError::Internal(format!("{:#}", err)),
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    ExecuteJob {
        job_id: i64,
        response: oneshot::Sender<RunOutcome>,
    },
    Reschedule {
        job_id: i64,
        response: oneshot::Sender<anyhow::Result<RescheduleOutcome>>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    /// Job ids with a run in flight.
    pub running_jobs: HashSet<i64>,
    /// Active jobs that could not be armed, with the reason.
    pub unschedulable: HashMap<i64, String>,
}

/// Handle to interact with the job scheduler from HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// Channel to send commands to the scheduler
    command_tx: mpsc::Sender<SchedulerCommand>,
    /// Shared state for reading run and trigger info
    shared_state: Arc<RwLock<SharedJobState>>,
    job_store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
        job_store: Arc<dyn JobStore>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            job_store,
            registry,
        }
    }

    /// Creates a custom job and arms it if active.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<JobInfo, JobOperationError> {
        let name = validate_name(&request.name)?;
        let job_impl = self.registry.resolve(&request.function_name).map_err(|_| {
            JobOperationError::Invalid(format!(
                "Unknown job function '{}'",
                request.function_name
            ))
        })?;
        let schedule = ScheduleConfig::from_parts(&request.schedule_type, &request.schedule_config)
            .map_err(|e| JobOperationError::Invalid(e.to_string()))?;
        validate_params(&request.params)?;

        let job = self.job_store.create_job(
            &NewJob {
                name,
                description: request.description,
                module_path: job_impl.module_path().to_string(),
                function_name: request.function_name,
                schedule,
                is_active: request.is_active,
                is_custom: true,
                params: request.params,
            },
            Utc::now(),
        )?;

        self.request_reschedule(job.id).await;
        self.reloaded_job_info(job).await
    }

    /// Applies a partial update and replaces the job's trigger.
    pub async fn update_job(
        &self,
        job_id: i64,
        request: UpdateJobRequest,
    ) -> Result<JobInfo, JobOperationError> {
        let existing = self
            .job_store
            .get_job(job_id)?
            .ok_or(JobOperationError::NotFound(job_id))?;

        let name = request.name.as_deref().map(validate_name).transpose()?;

        let schedule = if request.schedule_type.is_some() || request.schedule_config.is_some() {
            let schedule_type = request
                .schedule_type
                .as_deref()
                .unwrap_or(&existing.schedule_type);
            let config = match (&request.schedule_config, &request.schedule_type) {
                (Some(config), _) => config.clone(),
                (None, Some(new_type)) if *new_type != existing.schedule_type => json!({}),
                (None, _) => existing.schedule_config.clone(),
            };
            Some(
                ScheduleConfig::from_parts(schedule_type, &config)
                    .map_err(|e| JobOperationError::Invalid(e.to_string()))?,
            )
        } else {
            None
        };

        if let Some(params) = &request.params {
            validate_params(params)?;
        }

        let is_active = request.is_active.unwrap_or(existing.is_active);
        if is_active && !self.registry.contains(&existing.function_name) {
            return Err(JobOperationError::Invalid(format!(
                "Cannot activate job: function '{}' is not registered",
                existing.function_name
            )));
        }

        let update = JobUpdate {
            name,
            description: request.description,
            schedule,
            is_active: request.is_active,
            params: request.params,
        };
        let job = self
            .job_store
            .update_job(job_id, &update, Utc::now())?
            .ok_or(JobOperationError::NotFound(job_id))?;

        self.request_reschedule(job.id).await;
        self.reloaded_job_info(job).await
    }

    /// Requests a manual run. Returns once the scheduler has dispatched,
    /// queued or skipped it, never waiting for the job itself.
    pub async fn execute_job(&self, job_id: i64) -> Result<ExecuteAck, JobOperationError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::ExecuteJob {
                job_id,
                response: response_tx,
            })
            .await
            .map_err(|_| JobOperationError::Unavailable("Scheduler not available".to_string()))?;

        let outcome = response_rx
            .await
            .map_err(|_| JobOperationError::Unavailable("Scheduler did not respond".to_string()))?;

        match outcome {
            RunOutcome::Started { run_id } => Ok(ExecuteAck {
                status: ExecuteStatus::Queued,
                run_id: Some(run_id),
            }),
            RunOutcome::Pending => Ok(ExecuteAck {
                status: ExecuteStatus::Queued,
                run_id: None,
            }),
            RunOutcome::Skipped => Ok(ExecuteAck {
                status: ExecuteStatus::Skipped,
                run_id: None,
            }),
            RunOutcome::NotFound => Err(JobOperationError::NotFound(job_id)),
            RunOutcome::Unresolvable(reason) => Err(JobOperationError::Invalid(reason)),
            RunOutcome::Failed(reason) => Err(JobOperationError::Internal(reason)),
        }
    }

    /// Lists jobs matching `filter`, sorted by name.
    pub async fn get_jobs(&self, filter: &JobFilter) -> Result<Vec<JobInfo>, JobOperationError> {
        let jobs = self.job_store.list_jobs(filter)?;
        let mut infos = Vec::with_capacity(jobs.len());
        for job in jobs {
            infos.push(self.job_info(job).await?);
        }
        Ok(infos)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobInfo>, JobOperationError> {
        match self.job_store.get_job(job_id)? {
            Some(job) => Ok(Some(self.job_info(job).await?)),
            None => Ok(None),
        }
    }

    /// Get job execution history, newest first.
    pub fn get_job_history(
        &self,
        job_id: i64,
        limit: usize,
    ) -> Result<Vec<JobRunInfo>, JobOperationError> {
        if self.job_store.get_job(job_id)?.is_none() {
            return Err(JobOperationError::NotFound(job_id));
        }
        let history = self.job_store.get_job_history(job_id, limit)?;
        Ok(history.into_iter().map(JobRunInfo::from).collect())
    }

    /// Check if a job is currently running.
    pub async fn is_job_running(&self, job_id: i64) -> bool {
        let state = self.shared_state.read().await;
        state.running_jobs.contains(&job_id)
    }

    async fn request_reschedule(&self, job_id: i64) {
        let (response_tx, response_rx) = oneshot::channel();
        let sent = self
            .command_tx
            .send(SchedulerCommand::Reschedule {
                job_id,
                response: response_tx,
            })
            .await;
        if sent.is_err() {
            warn!("Scheduler not available, job {} not rescheduled", job_id);
            return;
        }
        match response_rx.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to reschedule job {}: {:#}", job_id, e),
            Err(_) => warn!("Scheduler did not respond to reschedule of job {}", job_id),
        }
    }

    /// Job info from the row as it is after rescheduling updated `next_run_at`.
    async fn reloaded_job_info(&self, job: Job) -> Result<JobInfo, JobOperationError> {
        let job = self.job_store.get_job(job.id)?.unwrap_or(job);
        self.job_info(job).await
    }

    async fn job_info(&self, job: Job) -> Result<JobInfo, JobOperationError> {
        let last_run = self.job_store.get_last_run(job.id)?.map(JobRunInfo::from);
        let is_running = self.is_job_running(job.id).await;
        let unschedulable_reason = {
            let state = self.shared_state.read().await;
            state.unschedulable.get(&job.id).cloned()
        };

        Ok(JobInfo {
            id: job.id,
            name: job.name,
            description: job.description,
            module_path: job.module_path,
            function_name: job.function_name,
            schedule_type: job.schedule_type,
            schedule_config: job.schedule_config,
            is_active: job.is_active,
            is_custom: job.is_custom,
            params: job.params,
            is_running,
            unschedulable_reason,
            last_run_at: job.last_run_at.as_ref().map(format_datetime),
            next_run_at: job.next_run_at.as_ref().map(format_datetime),
            total_runs: job.total_runs,
            successful_runs: job.successful_runs,
            failed_runs: job.failed_runs,
            last_error: job.last_error,
            last_run,
            created_at: format_datetime(&job.created_at),
            updated_at: format_datetime(&job.updated_at),
        })
    }
}

fn validate_name(name: &str) -> Result<String, JobOperationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(JobOperationError::Invalid(
            "Job name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_params(params: &JsonValue) -> Result<(), JobOperationError> {
    if !params.is_object() {
        return Err(JobOperationError::Invalid(
            "Job params must be a JSON object".to_string(),
        ));
    }
    Ok(())
}
