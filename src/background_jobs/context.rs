use crate::job_store::TriggerSource;
use crate::mailer::Mailer;
use crate::templates::TemplateRenderer;
use crate::workspace_store::WorkspaceStore;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Services shared by every job execution.
#[derive(Clone)]
pub struct JobServices {
    /// Tasks and email templates.
    pub workspace_store: Arc<dyn WorkspaceStore>,

    pub templates: Arc<dyn TemplateRenderer>,

    pub mailer: Arc<dyn Mailer>,

    /// Offset used for wall-clock values shown to users.
    pub utc_offset: FixedOffset,
}

/// Context provided to jobs during execution.
///
/// Carries the identity of the run, the job's parameters and a cancellation
/// token for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    pub job_id: i64,
    pub job_name: String,

    /// Parameters stored on the job row.
    pub params: JsonValue,

    /// The scheduled fire time for scheduled runs, the request time for
    /// manual ones.
    pub triggered_at: DateTime<Utc>,
    pub trigger_source: TriggerSource,

    pub services: JobServices,
}

impl JobContext {
    /// Check if cancellation has been requested.
    ///
    /// Jobs should periodically check this during long-running operations
    /// and return early with `JobError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
