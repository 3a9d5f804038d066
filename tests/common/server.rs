//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own databases and scheduler.

use super::constants::*;
use super::fixtures::seed_workspace;
use reportflow_server::background_jobs::jobs::discover_builtin_jobs;
use reportflow_server::background_jobs::{
    create_scheduler, sync_to_store, JobRegistry, JobServices, SchedulerSettings,
};
use reportflow_server::job_store::SqliteJobStore;
use reportflow_server::mailer::{Mailer, MailerError};
use reportflow_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use reportflow_server::templates::StoredTemplateRenderer;
use reportflow_server::workspace_store::{SqliteWorkspaceStore, WorkspaceStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// One email handed to the mailer
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub html: String,
    pub subject: String,
    pub recipients: Vec<String>,
}

/// Mailer that records every message instead of delivering it
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, html: &str, subject: &str, recipients: &[String]) -> Result<(), MailerError> {
        self.sent.lock().unwrap().push(SentEmail {
            html: html.to_string(),
            subject: subject.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}

/// Test server instance with isolated databases
///
/// When dropped, the server and its scheduler shut down and temp resources
/// are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Job store for direct database access in tests
    pub job_store: Arc<SqliteJobStore>,

    /// Workspace store for direct database access in tests
    pub workspace_store: Arc<SqliteWorkspaceStore>,

    /// Every email the report jobs sent
    pub mailer: Arc<RecordingMailer>,

    /// Id of the seeded report template
    pub template_id: i64,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    shutdown_token: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates temporary job and workspace databases
    /// 2. Seeds the workspace with a template and tasks
    /// 3. Registers the built-in jobs and syncs them to the job store
    /// 4. Starts the scheduler loop
    /// 5. Binds to a random port (127.0.0.1:0) and serves the admin API
    /// 6. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of the steps above fails.
    pub async fn spawn() -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");

        let job_store = Arc::new(
            SqliteJobStore::new(temp_db_dir.path().join("jobs.db"))
                .expect("Failed to open job store"),
        );
        let workspace_store = Arc::new(
            SqliteWorkspaceStore::new(temp_db_dir.path().join("workspace.db"))
                .expect("Failed to open workspace store"),
        );
        let template_id =
            seed_workspace(workspace_store.as_ref()).expect("Failed to seed workspace");

        let mut registry = JobRegistry::new();
        let discovery = discover_builtin_jobs(&mut registry);
        sync_to_store(&discovery, job_store.as_ref(), chrono::Utc::now())
            .expect("Failed to sync discovered jobs");

        let mailer = Arc::new(RecordingMailer::default());
        let store: Arc<dyn WorkspaceStore> = workspace_store.clone();
        let services = JobServices {
            workspace_store: store.clone(),
            templates: Arc::new(StoredTemplateRenderer::new(store)),
            mailer: mailer.clone(),
            utc_offset: SchedulerSettings::default().utc_offset,
        };

        let shutdown_token = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(
            job_store.clone(),
            Arc::new(registry),
            services,
            SchedulerSettings {
                shutdown_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            shutdown_token.clone(),
        );
        scheduler.start().await.expect("Failed to start scheduler");
        tokio::spawn(async move { scheduler.run().await });

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
        };
        let app = make_app(config, handle);

        // Spawn server in background task with graceful shutdown
        let server_token = shutdown_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            job_store,
            workspace_store,
            mailer,
            template_id,
            _temp_db_dir: temp_db_dir,
            shutdown_token,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        // TempDir will be cleaned up automatically
    }
}
