use super::context::{JobContext, JobServices};
use super::handle::SharedJobState;
use super::job::{BackgroundJob, JobError, ShutdownBehavior};
use super::registry::JobRegistry;
use crate::job_store::{Job, JobRunStatus, JobStore, TriggerSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happens when a job is triggered while a run of it is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop the new request.
    #[default]
    Skip,
    /// Remember one pending request and start it when the current run ends.
    Queue,
}

impl OverlapPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapPolicy::Skip => "skip",
            OverlapPolicy::Queue => "queue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "skip" => Some(OverlapPolicy::Skip),
            "queue" => Some(OverlapPolicy::Queue),
            _ => None,
        }
    }
}

/// Result of asking the runner to execute a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Execution dispatched; `run_id` is the new JobRun row.
    Started { run_id: i64 },
    /// Job in flight; the request will run after it (queue policy).
    Pending,
    /// Job in flight; the request was dropped (skip policy).
    Skipped,
    NotFound,
    /// The job's function is not in the registry.
    Unresolvable(String),
    /// The run could not be recorded, so it was not executed.
    Failed(String),
}

struct InFlightRun {
    run_id: i64,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
    shutdown_behavior: ShutdownBehavior,
}

/// Sent by a run's task as its last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedRun {
    pub job_id: i64,
    pub run_id: i64,
}

struct PendingRun {
    trigger_source: TriggerSource,
    triggered_at: DateTime<Utc>,
}

/// Executes jobs and records their runs.
///
/// Owned by the scheduler loop; every method is called from that single task.
pub struct TaskRunner {
    job_store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
    services: JobServices,
    overlap_policy: OverlapPolicy,
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Parent of per-run cancellation tokens. Not tied to the process
    /// shutdown token.
    cancel_root: CancellationToken,

    in_flight: HashMap<i64, InFlightRun>,
    pending: HashMap<i64, PendingRun>,

    /// Notified when a run finishes.
    completion_tx: mpsc::UnboundedSender<CompletedRun>,
}

impl TaskRunner {
    pub(super) fn new(
        job_store: Arc<dyn JobStore>,
        registry: Arc<JobRegistry>,
        services: JobServices,
        overlap_policy: OverlapPolicy,
        shared_state: Arc<RwLock<SharedJobState>>,
        completion_tx: mpsc::UnboundedSender<CompletedRun>,
    ) -> Self {
        Self {
            job_store,
            registry,
            services,
            overlap_policy,
            shared_state,
            cancel_root: CancellationToken::new(),
            in_flight: HashMap::new(),
            pending: HashMap::new(),
            completion_tx,
        }
    }

    #[cfg(test)]
    pub(super) fn has_pending(&self, job_id: i64) -> bool {
        self.pending.contains_key(&job_id)
    }

    /// Runs a job unless a run of it is already in flight.
    pub async fn run(
        &mut self,
        job_id: i64,
        trigger_source: TriggerSource,
        triggered_at: DateTime<Utc>,
    ) -> RunOutcome {
        self.reap_finished().await;

        if let Some(current) = self.in_flight.get(&job_id) {
            return match self.overlap_policy {
                OverlapPolicy::Skip => {
                    warn!(
                        "Job {} {} trigger skipped, already running (run_id: {})",
                        job_id,
                        trigger_source.as_str(),
                        current.run_id
                    );
                    RunOutcome::Skipped
                }
                OverlapPolicy::Queue => {
                    info!(
                        "Job {} already running (run_id: {}), queueing {} run",
                        job_id,
                        current.run_id,
                        trigger_source.as_str()
                    );
                    self.pending.insert(
                        job_id,
                        PendingRun {
                            trigger_source,
                            triggered_at,
                        },
                    );
                    RunOutcome::Pending
                }
            };
        }

        self.start_run(job_id, trigger_source, triggered_at).await
    }

    /// Drops finished runs and dispatches the pending run of each one.
    pub async fn reap_finished(&mut self) {
        let finished: Vec<i64> = self
            .in_flight
            .iter()
            .filter(|(_, run)| run.handle.is_finished())
            .map(|(job_id, _)| *job_id)
            .collect();

        for job_id in finished {
            self.finish(job_id).await;
        }
    }

    /// Handles a completion notification from a run's task.
    ///
    /// Ignored when the run is no longer the job's in-flight run.
    pub async fn complete(&mut self, completed: CompletedRun) {
        let current = self
            .in_flight
            .get(&completed.job_id)
            .is_some_and(|run| run.run_id == completed.run_id);
        if current {
            self.finish(completed.job_id).await;
        }
    }

    async fn finish(&mut self, job_id: i64) {
        if let Some(run) = self.in_flight.remove(&job_id) {
            if let Err(e) = run.handle.await {
                error!("Run {} of job {} task failed: {}", run.run_id, job_id, e);
            }
        }
        if let Some(pending) = self.pending.remove(&job_id) {
            debug!("Dispatching queued run of job {}", job_id);
            let outcome = self
                .start_run(job_id, pending.trigger_source, pending.triggered_at)
                .await;
            debug!("Queued run of job {}: {:?}", job_id, outcome);
        }
    }

    async fn start_run(
        &mut self,
        job_id: i64,
        trigger_source: TriggerSource,
        triggered_at: DateTime<Utc>,
    ) -> RunOutcome {
        let job = match self.job_store.get_job(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Attempted to run unknown job {}", job_id);
                return RunOutcome::NotFound;
            }
            Err(e) => {
                error!("Failed to load job {}: {:#}", job_id, e);
                return RunOutcome::Failed(format!("{:#}", e));
            }
        };

        let job_impl = match self.registry.resolve(&job.function_name) {
            Ok(job_impl) => job_impl,
            Err(e) => {
                warn!("Cannot run job '{}': {}", job.name, e);
                return RunOutcome::Unresolvable(e.to_string());
            }
        };

        let started_at = Utc::now();
        let run_id = match self
            .job_store
            .record_run_start(job.id, trigger_source, started_at)
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    "Failed to record run start for job '{}', not executing: {:#}",
                    job.name, e
                );
                return RunOutcome::Failed(format!("{:#}", e));
            }
        };

        info!(
            "Starting job '{}' (id: {}, run_id: {}, trigger: {})",
            job.name,
            job.id,
            run_id,
            trigger_source.as_str()
        );

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job.id);
        }

        let cancel_token = self.cancel_root.child_token();
        let shutdown_behavior = job_impl.shutdown_behavior();
        let ctx = JobContext {
            cancellation_token: cancel_token.clone(),
            job_id: job.id,
            job_name: job.name.clone(),
            params: job.params.clone(),
            triggered_at,
            trigger_source,
            services: self.services.clone(),
        };

        let handle = tokio::spawn(execute_run(
            job,
            job_impl,
            ctx,
            run_id,
            Arc::clone(&self.job_store),
            Arc::clone(&self.shared_state),
            self.completion_tx.clone(),
        ));

        self.in_flight.insert(
            job_id,
            InFlightRun {
                run_id,
                handle,
                cancel_token,
                shutdown_behavior,
            },
        );

        RunOutcome::Started { run_id }
    }

    /// Cancels cancellable runs and waits for in-flight runs up to `timeout`.
    ///
    /// Returns how many runs were still executing when the wait ended. Their
    /// JobRun rows stay `running`.
    pub async fn shutdown(&mut self, timeout: Duration) -> usize {
        self.pending.clear();

        for (job_id, run) in &self.in_flight {
            match run.shutdown_behavior {
                ShutdownBehavior::Cancellable => {
                    debug!("Cancelling job {} (run_id: {})", job_id, run.run_id);
                    run.cancel_token.cancel();
                }
                ShutdownBehavior::WaitForCompletion => {
                    info!("Waiting for job {} to complete...", job_id);
                }
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut unfinished = 0;
        for (job_id, run) in self.in_flight.drain() {
            if tokio::time::timeout_at(deadline, run.handle).await.is_err() {
                warn!(
                    "Job {} (run_id: {}) did not finish before shutdown timeout",
                    job_id, run.run_id
                );
                unfinished += 1;
            }
        }
        unfinished
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn execute_run(
    job: Job,
    job_impl: Arc<dyn BackgroundJob>,
    ctx: JobContext,
    run_id: i64,
    job_store: Arc<dyn JobStore>,
    shared_state: Arc<RwLock<SharedJobState>>,
    completion_tx: mpsc::UnboundedSender<CompletedRun>,
) {
    let start_time = Instant::now();
    let result = tokio::task::spawn_blocking(move || job_impl.execute(&ctx)).await;
    let elapsed = start_time.elapsed();

    let (status, error_message) = match result {
        Ok(Ok(())) => {
            info!("Job '{}' completed successfully in {:?}", job.name, elapsed);
            (JobRunStatus::Success, None)
        }
        Ok(Err(JobError::Cancelled)) => {
            info!("Job '{}' was cancelled after {:?}", job.name, elapsed);
            (JobRunStatus::Failure, Some(JobError::Cancelled.to_string()))
        }
        Ok(Err(e)) => {
            error!("Job '{}' failed after {:?}: {}", job.name, elapsed, e);
            (JobRunStatus::Failure, Some(e.to_string()))
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!("Job '{}' panicked after {:?}: {}", job.name, elapsed, message);
            (JobRunStatus::Failure, Some(format!("Job panicked: {}", message)))
        }
        Err(e) => {
            error!("Job '{}' task was aborted after {:?}: {}", job.name, elapsed, e);
            (JobRunStatus::Failure, Some(format!("Job task aborted: {}", e)))
        }
    };

    // Leaves next_run_at alone: the armed trigger owns it.
    if let Err(e) = job_store.finish_run(run_id, status, error_message.as_deref(), Utc::now()) {
        error!(
            "Failed to record run finish for job '{}' (run_id: {}): {:#}",
            job.name, run_id, e
        );
    }

    {
        let mut state = shared_state.write().await;
        state.running_jobs.remove(&job.id);
    }
    let _ = completion_tx.send(CompletedRun {
        job_id: job.id,
        run_id,
    });
}
