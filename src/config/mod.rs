mod file_config;

pub use file_config::{FileConfig, SchedulerConfig, SmtpConfig};

use crate::background_jobs::{
    OverlapPolicy, SchedulerSettings, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_UTC_OFFSET_MINUTES,
};
use crate::mailer::{SmtpSettings, DEFAULT_SMTP_PORT};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use chrono::FixedOffset;
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub log_dir: Option<PathBuf>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Directory of the rolling log file. Console only when unset.
    pub log_dir: Option<PathBuf>,

    pub scheduler: SchedulerSettings,
    /// `None` disables email delivery.
    pub smtp: Option<SmtpSettings>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let log_dir = file
            .log_dir
            .map(PathBuf::from)
            .or_else(|| cli.log_dir.clone());

        let scheduler_file = file.scheduler.unwrap_or_default();
        let utc_offset_minutes = scheduler_file
            .utc_offset_minutes
            .or(cli.utc_offset_minutes)
            .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES);
        let Some(utc_offset) = FixedOffset::east_opt(utc_offset_minutes * 60) else {
            bail!("utc_offset_minutes out of range: {}", utc_offset_minutes);
        };
        let overlap_policy = match scheduler_file.overlap_policy.as_deref() {
            None => OverlapPolicy::default(),
            Some(s) => match OverlapPolicy::parse(s) {
                Some(policy) => policy,
                None => bail!("Invalid overlap_policy '{}', expected 'skip' or 'queue'", s),
            },
        };
        let scheduler = SchedulerSettings {
            utc_offset,
            shutdown_timeout: scheduler_file
                .shutdown_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            overlap_policy,
        };

        let smtp = match file.smtp.unwrap_or_default() {
            SmtpConfig { host: None, .. } => None,
            SmtpConfig {
                host: Some(host),
                port,
                from_address,
                username,
                password,
            } => {
                let Some(from_address) = from_address else {
                    bail!("smtp.from_address is required when smtp.host is set");
                };
                Some(SmtpSettings {
                    host,
                    port: port.unwrap_or(DEFAULT_SMTP_PORT),
                    from_address,
                    username,
                    password,
                })
            }
        };

        Ok(Self {
            db_dir,
            port,
            logging_level,
            log_dir,
            scheduler,
            smtp,
        })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }

    pub fn workspace_db_path(&self) -> PathBuf {
        self.db_dir.join("workspace.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
