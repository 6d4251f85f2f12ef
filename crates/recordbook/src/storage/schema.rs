//! `SQLite` schema for recordbook.
//!
//! Bootstrap is additive only: every statement is `IF NOT EXISTS`, so running
//! it against an initialized database changes nothing.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// SQL statement to create the records table.
pub const CREATE_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    content TEXT,
    created_at TEXT NOT NULL
)
";

/// SQL statement to create an index on `created_at` for listing.
pub const CREATE_CREATED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at DESC)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_RECORDS_TABLE, CREATE_CREATED_AT_INDEX];

/// Ensure the records table and its index exist.
///
/// Also switches the database to WAL journaling, which persists in the file.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    debug!("Journal mode is {}", mode);

    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    debug!("Schema ready");
    Ok(())
}
