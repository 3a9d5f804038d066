//! Fakes shared by the scheduler, runner and job tests.

use super::context::{JobContext, JobServices};
use super::job::{BackgroundJob, JobError, ShutdownBehavior};
use crate::job_store::TriggerSource;
use crate::mailer::{Mailer, MailerError};
use crate::templates::StoredTemplateRenderer;
use crate::workspace_store::{SqliteWorkspaceStore, WorkspaceStore};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub html: String,
    pub subject: String,
    pub recipients: Vec<String>,
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentEmail>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, html: &str, subject: &str, recipients: &[String]) -> Result<(), MailerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailerError::Build("relay rejected message".to_string()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            html: html.to_string(),
            subject: subject.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(330 * 60).unwrap()
}

pub struct TestServices {
    pub services: JobServices,
    pub workspace_store: Arc<SqliteWorkspaceStore>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_services(temp_dir: &TempDir) -> TestServices {
    let workspace_store =
        Arc::new(SqliteWorkspaceStore::new(temp_dir.path().join("workspace.db")).unwrap());
    let mailer = Arc::new(RecordingMailer::default());
    let store: Arc<dyn WorkspaceStore> = workspace_store.clone();
    let services = JobServices {
        workspace_store: store.clone(),
        templates: Arc::new(StoredTemplateRenderer::new(store)),
        mailer: mailer.clone(),
        utc_offset: ist(),
    };
    TestServices {
        services,
        workspace_store,
        mailer,
    }
}

pub fn job_context(
    services: &JobServices,
    params: JsonValue,
    triggered_at: DateTime<Utc>,
) -> JobContext {
    JobContext {
        cancellation_token: CancellationToken::new(),
        job_id: 1,
        job_name: "test_job".to_string(),
        params,
        triggered_at,
        trigger_source: TriggerSource::Manual,
        services: services.clone(),
    }
}

/// Counts executions and returns immediately.
#[derive(Default)]
pub struct CountingJob {
    pub executions: AtomicUsize,
}

impl BackgroundJob for CountingJob {
    fn module_path(&self) -> &'static str {
        module_path!()
    }

    fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Runs until released or cancelled.
pub struct BlockingJob {
    pub started: AtomicUsize,
    pub release: AtomicBool,
    pub behavior: ShutdownBehavior,
}

impl BlockingJob {
    pub fn new(behavior: ShutdownBehavior) -> Self {
        Self {
            started: AtomicUsize::new(0),
            release: AtomicBool::new(false),
            behavior,
        }
    }

    pub fn release(&self) {
        self.release.store(true, Ordering::SeqCst);
    }

    pub async fn wait_started(&self, count: usize) {
        for _ in 0..500 {
            if self.started.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not start {} time(s)", count);
    }
}

impl BackgroundJob for BlockingJob {
    fn module_path(&self) -> &'static str {
        module_path!()
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        self.behavior
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        while !self.release.load(Ordering::SeqCst) {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

pub struct FailingJob;

impl BackgroundJob for FailingJob {
    fn module_path(&self) -> &'static str {
        module_path!()
    }

    fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Err(JobError::ExecutionFailed("upstream unavailable".to_string()))
    }
}

pub struct PanickingJob;

impl BackgroundJob for PanickingJob {
    fn module_path(&self) -> &'static str {
        module_path!()
    }

    fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        panic!("index out of bounds");
    }
}
