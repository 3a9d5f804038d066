//! Job database schema.
//!
//! Version 1 holds job definitions and their run history. Version 2 adds
//! per-job run counters and the last error message.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("module_path", &SqlType::Text, non_null = true),
        sqlite_column!("function_name", &SqlType::Text, non_null = true),
        sqlite_column!("schedule_type", &SqlType::Text, non_null = true),
        sqlite_column!("schedule_config", &SqlType::Text, non_null = true), // JSON
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!(
            "is_custom",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("params", &SqlType::Text, non_null = true), // JSON object
        sqlite_column!("last_run_at", &SqlType::Text),
        sqlite_column!("next_run_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_jobs_active", "is_active")],
};

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "job_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "jobs",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Restrict,
            })
        ),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("trigger_source", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_runs_job_started", "job_id, started_at DESC"),
        ("idx_job_runs_status", "status"),
    ],
};

// V2: run counters on the job row
const JOBS_TABLE_V2: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("module_path", &SqlType::Text, non_null = true),
        sqlite_column!("function_name", &SqlType::Text, non_null = true),
        sqlite_column!("schedule_type", &SqlType::Text, non_null = true),
        sqlite_column!("schedule_config", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!(
            "is_custom",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("params", &SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", &SqlType::Text),
        sqlite_column!("next_run_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
        sqlite_column!(
            "total_runs",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "successful_runs",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "failed_runs",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_error", &SqlType::Text),
    ],
    indices: &[("idx_jobs_active", "is_active")],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "ALTER TABLE jobs ADD COLUMN total_runs INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE jobs ADD COLUMN successful_runs INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE jobs ADD COLUMN failed_runs INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE jobs ADD COLUMN last_error TEXT;",
    )?;

    // Backfill counters from existing history
    conn.execute(
        "UPDATE jobs SET
            total_runs = (SELECT COUNT(*) FROM job_runs r
                          WHERE r.job_id = jobs.id
                            AND r.status IN ('success', 'failure')),
            successful_runs = (SELECT COUNT(*) FROM job_runs r
                               WHERE r.job_id = jobs.id AND r.status = 'success'),
            failed_runs = (SELECT COUNT(*) FROM job_runs r
                           WHERE r.job_id = jobs.id AND r.status = 'failure')",
        [],
    )?;
    Ok(())
}

pub const JOB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOBS_TABLE_V1, JOB_RUNS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[JOBS_TABLE_V2, JOB_RUNS_TABLE_V1],
        migration: Some(migrate_v1_to_v2),
    },
];
