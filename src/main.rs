use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use reportflow_server::background_jobs::jobs::discover_builtin_jobs;
use reportflow_server::background_jobs::{
    block_on_with_shutdown, create_scheduler, sync_to_store, JobRegistry, JobServices,
    RUNTIME_SHUTDOWN_GRACE,
};
use reportflow_server::config::{AppConfig, CliConfig, FileConfig};
use reportflow_server::job_store::{JobStore, SqliteJobStore};
use reportflow_server::mailer::{DisabledMailer, Mailer, SmtpMailer};
use reportflow_server::server::{run_server, RequestsLoggingLevel, ServerConfig};
use reportflow_server::templates::StoredTemplateRenderer;
use reportflow_server::workspace_store::{SqliteWorkspaceStore, WorkspaceStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding jobs.db and workspace.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory for the daily rolling log file. Console only when omitted.
    #[clap(long, value_parser = parse_path)]
    pub log_dir: Option<PathBuf>,

    /// Offset from UTC, in minutes, in which job schedules are evaluated.
    #[clap(long, allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            port: self.port,
            logging_level: self.logging_level.clone(),
            log_dir: self.log_dir.clone(),
            utc_offset_minutes: self.utc_offset_minutes,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy()
}

/// Console logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Result<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("reportflow-server")
                .filename_suffix("log")
                .build(dir)
                .context("Failed to create rolling log file")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Flushes buffered lines on exit
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_filter(env_filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    init_tracing(config.log_dir.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    block_on_with_shutdown(runtime, serve(config), RUNTIME_SHUTDOWN_GRACE)
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("Opening job store at {:?}...", config.jobs_db_path());
    let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(config.jobs_db_path())?);

    info!("Opening workspace store at {:?}...", config.workspace_db_path());
    let workspace_store: Arc<dyn WorkspaceStore> =
        Arc::new(SqliteWorkspaceStore::new(config.workspace_db_path())?);

    let mut registry = JobRegistry::new();
    let discovery = discover_builtin_jobs(&mut registry);
    for skipped in &discovery.skipped {
        warn!("Job '{}' not registered: {}", skipped.name, skipped.reason);
    }
    sync_to_store(&discovery, job_store.as_ref(), Utc::now())
        .context("Failed to sync discovered jobs")?;

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            info!("Email delivery via {}:{}", smtp.host, smtp.port);
            Arc::new(
                SmtpMailer::new(smtp, tokio::runtime::Handle::current())
                    .context("Failed to configure SMTP mailer")?,
            )
        }
        None => {
            warn!("No SMTP host configured, report emails will fail");
            Arc::new(DisabledMailer)
        }
    };

    let services = JobServices {
        workspace_store: workspace_store.clone(),
        templates: Arc::new(StoredTemplateRenderer::new(workspace_store)),
        mailer,
        utc_offset: config.scheduler.utc_offset,
    };

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) = create_scheduler(
        job_store,
        Arc::new(registry),
        services,
        config.scheduler,
        shutdown_token.clone(),
    );

    let report = scheduler
        .start()
        .await
        .context("Failed to start job scheduler")?;
    for job in &report.unschedulable {
        warn!("Job '{}' (id: {}) excluded: {}", job.name, job.job_id, job.reason);
    }
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level,
        port: config.port,
    };
    let server_result = run_server(server_config, scheduler_handle, shutdown_token.clone()).await;
    if let Err(e) = &server_result {
        error!("Server error: {:#}", e);
    }

    shutdown_token.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }

    info!("Shutdown complete");
    server_result
}
