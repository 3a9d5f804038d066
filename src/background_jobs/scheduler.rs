use super::context::JobServices;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::registry::JobRegistry;
use super::runner::{CompletedRun, OverlapPolicy, RunOutcome, TaskRunner};
use super::schedule::ScheduleConfig;
use crate::job_store::{Job, JobFilter, JobStore, TriggerSource};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the loop sleeps before re-checking triggers.
const MAX_SLEEP: Duration = Duration::from_secs(60);

pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Offset in which schedule wall-clock fields are interpreted.
    pub utc_offset: FixedOffset,
    pub shutdown_timeout: Duration,
    pub overlap_policy: OverlapPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60)
                .unwrap_or(Utc.fix()),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            overlap_policy: OverlapPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnschedulableReason {
    /// The function name is not in the registry.
    Unresolvable(String),
    /// The stored schedule does not produce a trigger.
    Misconfigured(String),
}

impl fmt::Display for UnschedulableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnschedulableReason::Unresolvable(detail) => write!(f, "unresolvable: {}", detail),
            UnschedulableReason::Misconfigured(detail) => write!(f, "misconfigured: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnschedulableJob {
    pub job_id: i64,
    pub name: String,
    pub reason: UnschedulableReason,
}

/// Outcome of [`JobScheduler::start`].
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    /// Runs left `running` by a previous process, now `interrupted`.
    pub reconciled_runs: usize,
    pub armed: Vec<String>,
    pub unschedulable: Vec<UnschedulableJob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleOutcome {
    Armed { next_fire_at: DateTime<Utc> },
    /// The job is gone or inactive; it has no trigger now.
    Disarmed,
    Unschedulable(UnschedulableReason),
}

struct Trigger {
    job_name: String,
    schedule: ScheduleConfig,
    next_fire_at: DateTime<Utc>,
}

/// Owns the job triggers and the task runner.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Exactly one trigger per armed job id.
    triggers: HashMap<i64, Trigger>,

    runner: TaskRunner,

    job_store: Arc<dyn JobStore>,

    registry: Arc<JobRegistry>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Runs that just finished.
    completion_receiver: mpsc::UnboundedReceiver<CompletedRun>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    settings: SchedulerSettings,
}

impl JobScheduler {
    /// Reconciles stale runs, then arms a trigger for every active job that
    /// resolves and has a valid schedule.
    ///
    /// Fails only if the job store cannot be read.
    pub async fn start(&mut self) -> Result<StartupReport> {
        let now = Utc::now();
        let reconciled_runs = self
            .job_store
            .mark_stale_runs_interrupted(now)
            .context("Failed to reconcile stale job runs")?;
        if reconciled_runs > 0 {
            info!(
                "Marked {} stale run(s) from a previous process as interrupted",
                reconciled_runs
            );
        }

        let jobs = self
            .job_store
            .list_jobs(&JobFilter {
                active: Some(true),
                ..Default::default()
            })
            .context("Failed to load active jobs")?;

        self.triggers.clear();
        {
            let mut state = self.shared_state.write().await;
            state.unschedulable.clear();
        }

        let mut report = StartupReport {
            reconciled_runs,
            ..Default::default()
        };
        for job in jobs {
            match self.build_trigger(&job, now) {
                Ok(trigger) => {
                    report.armed.push(job.name.clone());
                    self.arm(job.id, trigger).await;
                }
                Err(reason) => {
                    warn!("Job '{}' (id: {}) is not scheduled: {}", job.name, job.id, reason);
                    self.mark_unschedulable(job.id, &reason).await;
                    report.unschedulable.push(UnschedulableJob {
                        job_id: job.id,
                        name: job.name,
                        reason,
                    });
                }
            }
        }

        info!(
            "Job scheduler started: {} trigger(s) armed, {} job(s) unschedulable",
            report.armed.len(),
            report.unschedulable.len()
        );
        Ok(report)
    }

    /// Replaces the trigger of `job_id` from its current row.
    pub async fn reschedule(&mut self, job_id: i64) -> Result<RescheduleOutcome> {
        let job = self
            .job_store
            .get_job(job_id)
            .with_context(|| format!("Failed to load job {}", job_id))?;

        self.disarm(job_id).await;

        let Some(job) = job.filter(|job| job.is_active) else {
            if let Err(e) = self.job_store.set_next_run(job_id, None) {
                warn!("Failed to clear next run of job {}: {:#}", job_id, e);
            }
            debug!("Job {} has no trigger now", job_id);
            return Ok(RescheduleOutcome::Disarmed);
        };

        match self.build_trigger(&job, Utc::now()) {
            Ok(trigger) => {
                let next_fire_at = trigger.next_fire_at;
                info!("Job '{}' rescheduled, next run at {}", job.name, next_fire_at);
                self.arm(job.id, trigger).await;
                Ok(RescheduleOutcome::Armed { next_fire_at })
            }
            Err(reason) => {
                warn!("Job '{}' (id: {}) is not scheduled: {}", job.name, job.id, reason);
                self.mark_unschedulable(job.id, &reason).await;
                if let Err(e) = self.job_store.set_next_run(job.id, None) {
                    warn!("Failed to clear next run of job {}: {:#}", job.id, e);
                }
                Ok(RescheduleOutcome::Unschedulable(reason))
            }
        }
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Next fire time of the job's trigger, if armed.
    pub fn trigger_for(&self, job_id: i64) -> Option<DateTime<Utc>> {
        self.triggers.get(&job_id).map(|t| t.next_fire_at)
    }

    /// Runs every trigger due at `now`, then advances each past `now`.
    ///
    /// Returns the outcome per fired job.
    pub async fn fire_due(&mut self, now: DateTime<Utc>) -> Vec<(i64, RunOutcome)> {
        let mut due: Vec<(i64, DateTime<Utc>)> = self
            .triggers
            .iter()
            .filter(|(_, trigger)| trigger.next_fire_at <= now)
            .map(|(job_id, trigger)| (*job_id, trigger.next_fire_at))
            .collect();
        due.sort_by_key(|(_, fire_at)| *fire_at);

        let mut outcomes = Vec::with_capacity(due.len());
        for (job_id, fire_at) in due {
            let outcome = self
                .runner
                .run(job_id, TriggerSource::Scheduled, fire_at)
                .await;
            debug!("Scheduled run of job {}: {:?}", job_id, outcome);
            self.advance(job_id, now).await;
            outcomes.push((job_id, outcome));
        }
        outcomes
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        info!(
            "Running job scheduler loop with {} trigger(s)",
            self.triggers.len()
        );

        loop {
            self.runner.reap_finished().await;

            let sleep_duration = self.time_until_next_fire();
            debug!("Scheduler sleeping for {:?}", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.fire_due(Utc::now()).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                Some(completed) = self.completion_receiver.recv() => {
                    debug!("Run {} of job {} finished", completed.run_id, completed.job_id);
                    self.runner.complete(completed).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.stop().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Disarms all triggers and waits for in-flight runs up to the shutdown
    /// timeout. Runs still executing keep their `running` row.
    pub async fn stop(&mut self) -> usize {
        info!("Shutting down scheduler...");
        self.triggers.clear();

        let unfinished = self.runner.shutdown(self.settings.shutdown_timeout).await;
        if unfinished > 0 {
            warn!(
                "{} job run(s) still executing at shutdown, they will be marked interrupted on next start",
                unfinished
            );
        }
        info!("Scheduler shutdown complete");
        unfinished
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::ExecuteJob { job_id, response } => {
                let outcome = self
                    .runner
                    .run(job_id, TriggerSource::Manual, Utc::now())
                    .await;
                let _ = response.send(outcome);
            }
            SchedulerCommand::Reschedule { job_id, response } => {
                let result = self.reschedule(job_id).await;
                if let Err(e) = &result {
                    error!("Failed to reschedule job {}: {:#}", job_id, e);
                }
                let _ = response.send(result);
            }
        }
    }

    fn time_until_next_fire(&self) -> Duration {
        let now = Utc::now();
        self.triggers
            .values()
            .map(|trigger| {
                (trigger.next_fire_at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            })
            .min()
            .map_or(MAX_SLEEP, |d| d.min(MAX_SLEEP))
    }

    fn build_trigger(&self, job: &Job, now: DateTime<Utc>) -> Result<Trigger, UnschedulableReason> {
        if !self.registry.contains(&job.function_name) {
            return Err(UnschedulableReason::Unresolvable(format!(
                "function '{}' is not registered",
                job.function_name
            )));
        }

        let schedule = job
            .schedule()
            .map_err(|e| UnschedulableReason::Misconfigured(e.to_string()))?;
        let next_fire_at = schedule
            .next_fire_after(now, self.settings.utc_offset)
            .ok_or_else(|| {
                UnschedulableReason::Misconfigured("schedule has no future fire time".to_string())
            })?;

        Ok(Trigger {
            job_name: job.name.clone(),
            schedule,
            next_fire_at,
        })
    }

    async fn arm(&mut self, job_id: i64, trigger: Trigger) {
        let next_fire_at = trigger.next_fire_at;
        debug!(
            "Armed trigger for job '{}' ({}), next run at {}",
            trigger.job_name,
            trigger.schedule.schedule_type(),
            next_fire_at
        );
        self.triggers.insert(job_id, trigger);
        {
            let mut state = self.shared_state.write().await;
            state.unschedulable.remove(&job_id);
        }
        if let Err(e) = self.job_store.set_next_run(job_id, Some(next_fire_at)) {
            warn!("Failed to store next run of job {}: {:#}", job_id, e);
        }
    }

    async fn disarm(&mut self, job_id: i64) {
        self.triggers.remove(&job_id);
        let mut state = self.shared_state.write().await;
        state.unschedulable.remove(&job_id);
    }

    async fn mark_unschedulable(&mut self, job_id: i64, reason: &UnschedulableReason) {
        let mut state = self.shared_state.write().await;
        state.unschedulable.insert(job_id, reason.to_string());
    }

    async fn advance(&mut self, job_id: i64, now: DateTime<Utc>) {
        let offset = self.settings.utc_offset;
        let Some(trigger) = self.triggers.get_mut(&job_id) else {
            return;
        };

        match trigger.schedule.next_fire_after(now, offset) {
            Some(next_fire_at) => {
                trigger.next_fire_at = next_fire_at;
                if let Err(e) = self.job_store.set_next_run(job_id, Some(next_fire_at)) {
                    warn!("Failed to store next run of job {}: {:#}", job_id, e);
                }
            }
            None => {
                warn!(
                    "Job '{}' has no further fire time, removing trigger",
                    trigger.job_name
                );
                self.disarm(job_id).await;
            }
        }
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    job_store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
    services: JobServices,
    settings: SchedulerSettings,
    shutdown_token: CancellationToken,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));

    let services = JobServices {
        utc_offset: settings.utc_offset,
        ..services
    };
    let runner = TaskRunner::new(
        Arc::clone(&job_store),
        Arc::clone(&registry),
        services,
        settings.overlap_policy,
        Arc::clone(&shared_state),
        completion_tx,
    );

    let scheduler = JobScheduler {
        shared_state: Arc::clone(&shared_state),
        triggers: HashMap::new(),
        runner,
        job_store: Arc::clone(&job_store),
        registry: Arc::clone(&registry),
        command_receiver: command_rx,
        completion_receiver: completion_rx,
        shutdown_token,
        settings,
    };

    let handle = SchedulerHandle::new(command_tx, shared_state, job_store, registry);

    (scheduler, handle)
}

/// How long the runtime waits for blocking job threads after the scheduler
/// has stopped. The scheduler's own shutdown timeout has already elapsed.
pub const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Drives `future` on `runtime`, then shuts the runtime down waiting at most
/// `grace` for job bodies still executing on blocking threads.
///
/// Dropping a runtime waits for every blocking task, so a job that outlives
/// [`JobScheduler::stop`] would otherwise hold the process open. Its run
/// stays `running` and is reconciled on the next start.
pub fn block_on_with_shutdown<F: Future>(
    runtime: Runtime,
    future: F,
    grace: Duration,
) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    output
}
