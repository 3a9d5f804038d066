use super::models::{EmailTemplate, NewEmailTemplate, NewTask, Task, TaskStatus};
use super::schema::WORKSPACE_VERSIONED_SCHEMAS;
use super::WorkspaceStore;
use crate::sqlite_persistence::{initialize_database, open_connection};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const TASK_COLUMNS: &str = "id, title, description, status, category, priority, created_by,
    created_at, updated_at, completed_at, archived_at";

const TEMPLATE_COLUMNS: &str =
    "id, name, subject, html_body, category, is_active, created_by, created_at, updated_at";

pub struct SqliteWorkspaceStore {
    db_path: PathBuf,
}

impl SqliteWorkspaceStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        initialize_database(&db_path, WORKSPACE_VERSIONED_SCHEMAS, "workspace")?;
        Ok(Self { db_path })
    }

    fn conn(&self) -> Result<Connection> {
        open_connection(&self.db_path)
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn get_datetime(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
        let raw: String = row.get(idx)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn get_opt_datetime(
        row: &rusqlite::Row,
        idx: usize,
    ) -> rusqlite::Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = row.get(idx)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
                })
        })
        .transpose()
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let status: String = row.get(3)?;
        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Todo),
            category: row.get(4)?,
            priority: row.get(5)?,
            created_by: row.get(6)?,
            created_at: Self::get_datetime(row, 7)?,
            updated_at: Self::get_datetime(row, 8)?,
            completed_at: Self::get_opt_datetime(row, 9)?,
            archived_at: Self::get_opt_datetime(row, 10)?,
        })
    }

    fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<EmailTemplate> {
        Ok(EmailTemplate {
            id: row.get(0)?,
            name: row.get(1)?,
            subject: row.get(2)?,
            html_body: row.get(3)?,
            category: row.get(4)?,
            is_active: row.get(5)?,
            created_by: row.get(6)?,
            created_at: Self::get_datetime(row, 7)?,
            updated_at: Self::get_datetime(row, 8)?,
        })
    }

    fn query_task(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn query_template(
        conn: &Connection,
        column: &str,
        value: &dyn rusqlite::ToSql,
    ) -> Result<Option<EmailTemplate>> {
        let template = conn
            .query_row(
                &format!(
                    "SELECT {} FROM email_templates WHERE {} = ?1",
                    TEMPLATE_COLUMNS, column
                ),
                &[value],
                Self::row_to_template,
            )
            .optional()?;
        Ok(template)
    }
}

impl WorkspaceStore for SqliteWorkspaceStore {
    fn create_task(&self, task: &NewTask) -> Result<Task> {
        let conn = self.conn()?;
        let created_at = Self::format_datetime(&task.created_at);
        let completed_at = (task.status == TaskStatus::Completed).then(|| created_at.clone());

        conn.execute(
            "INSERT INTO tasks (title, description, status, category, priority, created_by,
                created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
            params![
                task.title,
                task.description,
                task.status.as_str(),
                task.category,
                task.priority,
                task.created_by,
                created_at,
                completed_at,
            ],
        )
        .context("Failed to insert task")?;

        let task_id = conn.last_insert_rowid();
        Self::query_task(&conn, task_id)?
            .with_context(|| format!("Task {} vanished after insert", task_id))
    }

    fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        let conn = self.conn()?;
        Self::query_task(&conn, task_id)
    }

    fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&now);

        let updated = conn.execute(
            "UPDATE tasks SET
                status = ?1,
                updated_at = ?2,
                completed_at = CASE
                    WHEN ?1 = 'completed' THEN COALESCE(completed_at, ?2)
                    ELSE NULL
                END
             WHERE id = ?3",
            params![status.as_str(), now, task_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::query_task(&conn, task_id)
    }

    fn tasks_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE created_at >= ?1 AND created_at < ?2
             ORDER BY created_at ASC, id ASC",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(
                params![Self::format_datetime(&start), Self::format_datetime(&end)],
                Self::row_to_task,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn archive_completed_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let archived = conn.execute(
            "UPDATE tasks SET archived_at = ?1, updated_at = ?1
             WHERE status = 'completed' AND archived_at IS NULL
               AND completed_at IS NOT NULL AND completed_at < ?2",
            params![Self::format_datetime(&now), Self::format_datetime(&cutoff)],
        )?;
        Ok(archived)
    }

    fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let purged = conn.execute(
            "DELETE FROM tasks WHERE archived_at IS NOT NULL AND archived_at < ?1",
            params![Self::format_datetime(&cutoff)],
        )?;
        Ok(purged)
    }

    fn create_template(
        &self,
        template: &NewEmailTemplate,
        now: DateTime<Utc>,
    ) -> Result<EmailTemplate> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO email_templates (name, subject, html_body, category, is_active,
                created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                template.name,
                template.subject,
                template.html_body,
                template.category,
                template.is_active,
                template.created_by,
                Self::format_datetime(&now),
            ],
        )
        .with_context(|| format!("Failed to insert email template '{}'", template.name))?;

        let template_id = conn.last_insert_rowid();
        Self::query_template(&conn, "id", &template_id)?
            .with_context(|| format!("Template {} vanished after insert", template_id))
    }

    fn get_template(&self, template_id: i64) -> Result<Option<EmailTemplate>> {
        let conn = self.conn()?;
        Self::query_template(&conn, "id", &template_id)
    }

    fn get_template_by_name(&self, name: &str) -> Result<Option<EmailTemplate>> {
        let conn = self.conn()?;
        Self::query_template(&conn, "name", &name)
    }
}
