use super::models::{
    DuplicateJobName, Job, JobFilter, JobRun, JobRunStatus, JobUpdate, NewJob, TriggerSource,
};
use super::schema::JOB_VERSIONED_SCHEMAS;
use super::JobStore;
use crate::sqlite_persistence::{initialize_database, open_connection};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const JOB_COLUMNS: &str = "id, name, description, module_path, function_name, schedule_type,
    schedule_config, is_active, is_custom, params, last_run_at, next_run_at, total_runs,
    successful_runs, failed_runs, last_error, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, job_id, started_at, finished_at, status, error_message, trigger_source";

pub struct SqliteJobStore {
    db_path: PathBuf,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        initialize_database(&db_path, JOB_VERSIONED_SCHEMAS, "job")?;
        Ok(Self { db_path })
    }

    fn conn(&self) -> Result<Connection> {
        open_connection(&self.db_path)
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_datetime(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn parse_json(idx: usize, raw: &str) -> rusqlite::Result<JsonValue> {
        serde_json::from_str(raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let schedule_config: String = row.get("schedule_config")?;
        let params: String = row.get("params")?;
        let last_run_at: Option<String> = row.get("last_run_at")?;
        let next_run_at: Option<String> = row.get("next_run_at")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Job {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            module_path: row.get("module_path")?,
            function_name: row.get("function_name")?,
            schedule_type: row.get("schedule_type")?,
            schedule_config: Self::parse_json(6, &schedule_config)?,
            is_active: row.get("is_active")?,
            is_custom: row.get("is_custom")?,
            params: Self::parse_json(9, &params)?,
            last_run_at: last_run_at
                .map(|s| Self::parse_datetime(10, &s))
                .transpose()?,
            next_run_at: next_run_at
                .map(|s| Self::parse_datetime(11, &s))
                .transpose()?,
            total_runs: row.get("total_runs")?,
            successful_runs: row.get("successful_runs")?,
            failed_runs: row.get("failed_runs")?,
            last_error: row.get("last_error")?,
            created_at: Self::parse_datetime(16, &created_at)?,
            updated_at: Self::parse_datetime(17, &updated_at)?,
        })
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status: String = row.get("status")?;
        let trigger_source: String = row.get("trigger_source")?;
        let started_at: String = row.get("started_at")?;
        let finished_at: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: Self::parse_datetime(2, &started_at)?,
            finished_at: finished_at
                .map(|s| Self::parse_datetime(3, &s))
                .transpose()?,
            status: JobRunStatus::parse(&status).unwrap_or(JobRunStatus::Failure),
            error_message: row.get("error_message")?,
            trigger_source: TriggerSource::parse(&trigger_source)
                .unwrap_or(TriggerSource::Scheduled),
        })
    }

    fn query_job(conn: &Connection, job_id: i64) -> Result<Option<Job>> {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn map_name_conflict(err: rusqlite::Error, name: &str) -> anyhow::Error {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                DuplicateJobName(name.to_string()).into()
            }
            _ => err.into(),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<Job> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&now);

        conn.execute(
            "INSERT INTO jobs (name, description, module_path, function_name, schedule_type,
                schedule_config, is_active, is_custom, params, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                job.name,
                job.description,
                job.module_path,
                job.function_name,
                job.schedule.schedule_type(),
                job.schedule.config_value().to_string(),
                job.is_active,
                job.is_custom,
                job.params.to_string(),
                now,
            ],
        )
        .map_err(|e| Self::map_name_conflict(e, &job.name))?;

        let job_id = conn.last_insert_rowid();
        info!("Created job '{}' (id: {})", job.name, job_id);
        Self::query_job(&conn, job_id)?
            .with_context(|| format!("Job {} vanished after insert", job_id))
    }

    fn update_job(
        &self,
        job_id: i64,
        update: &JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let Some(existing) = Self::query_job(&tx, job_id)? else {
            return Ok(None);
        };

        let name = update.name.as_ref().unwrap_or(&existing.name);
        let description = update
            .description
            .as_ref()
            .or(existing.description.as_ref());
        let (schedule_type, schedule_config) = match &update.schedule {
            Some(schedule) => (
                schedule.schedule_type().to_string(),
                schedule.config_value(),
            ),
            None => (existing.schedule_type.clone(), existing.schedule_config.clone()),
        };
        let is_active = update.is_active.unwrap_or(existing.is_active);
        let params = update.params.as_ref().unwrap_or(&existing.params);

        tx.execute(
            "UPDATE jobs SET name = ?1, description = ?2, schedule_type = ?3,
                schedule_config = ?4, is_active = ?5, params = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                name,
                description,
                schedule_type,
                schedule_config.to_string(),
                is_active,
                params.to_string(),
                Self::format_datetime(&now),
                job_id,
            ],
        )
        .map_err(|e| Self::map_name_conflict(e, name))?;

        let updated = Self::query_job(&tx, job_id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let conn = self.conn()?;
        Self::query_job(&conn, job_id)
    }

    fn get_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE name = ?1", JOB_COLUMNS),
                params![name],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let conn = self.conn()?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(active) = filter.active {
            clauses.push("is_active = ?");
            values.push(SqlValue::Integer(active as i64));
        }
        if let Some(custom) = filter.custom {
            clauses.push("is_custom = ?");
            values.push(SqlValue::Integer(custom as i64));
        }
        if let Some(schedule_type) = &filter.schedule_type {
            clauses.push("schedule_type = ?");
            values.push(SqlValue::Text(schedule_type.clone()));
        }
        if let Some(fragment) = &filter.name_contains {
            clauses.push("instr(lower(name), lower(?)) > 0");
            values.push(SqlValue::Text(fragment.clone()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs {} ORDER BY name ASC",
            JOB_COLUMNS, where_clause
        ))?;
        let jobs = stmt
            .query_map(params_from_iter(values), Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn set_next_run(&self, job_id: i64, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET next_run_at = ?1 WHERE id = ?2",
            params![next_run_at.as_ref().map(Self::format_datetime), job_id],
        )?;
        Ok(())
    }

    fn record_run_start(
        &self,
        job_id: i64,
        trigger_source: TriggerSource,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, trigger_source)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                Self::format_datetime(&started_at),
                JobRunStatus::Running.as_str(),
                trigger_source.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                Self::format_datetime(&finished_at),
                status.as_str(),
                error_message,
                run_id,
                JobRunStatus::Running.as_str()
            ],
        )?;
        if updated == 0 {
            warn!(
                "Run {} was no longer running, not recording {} outcome",
                run_id,
                status.as_str()
            );
            return Ok(false);
        }

        let failed = status != JobRunStatus::Success;
        tx.execute(
            "UPDATE jobs SET
                last_run_at = ?1,
                total_runs = total_runs + 1,
                successful_runs = successful_runs + ?2,
                failed_runs = failed_runs + ?3,
                last_error = COALESCE(?4, last_error)
             WHERE id = (SELECT job_id FROM job_runs WHERE id = ?5)",
            params![
                Self::format_datetime(&finished_at),
                (!failed) as i64,
                failed as i64,
                error_message,
                run_id
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn get_job_history(&self, job_id: i64, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_runs WHERE job_id = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn get_last_run(&self, job_id: i64) -> Result<Option<JobRun>> {
        Ok(self.get_job_history(job_id, 1)?.into_iter().next())
    }

    fn count_runs(&self, job_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job_runs WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn mark_stale_runs_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2,
                error_message = 'Process stopped before the run finished'
             WHERE status = ?3",
            params![
                JobRunStatus::Interrupted.as_str(),
                Self::format_datetime(&now),
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(updated)
    }
}
