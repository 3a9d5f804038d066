//! SQLite helpers shared by the stores: declarative versioned schemas and
//! scoped connections.

mod versioned_schema;

pub use versioned_schema::{
    initialize_database, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Offset added to schema versions stored in `PRAGMA user_version`.
pub const BASE_DB_VERSION: usize = 99999;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a short-lived connection for one logical operation.
///
/// Stores never hold a connection between calls, so job bodies and HTTP
/// handlers never share one.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}
