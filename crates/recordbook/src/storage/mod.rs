//! Storage layer for recordbook.
//!
//! This module provides `SQLite`-based persistence for records. A
//! [`RecordStore`] wraps exactly one connection; the HTTP layer obtains a
//! fresh one per request from a [`StoreFactory`] and drops it when the request
//! is done.

pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::record::Record;

const SELECT_RECORD: &str = "SELECT id, title, content, created_at FROM records";

/// Layout of `SQLite`'s `CURRENT_TIMESTAMP`, with optional fractional seconds.
const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse a stored `created_at`.
///
/// Rows written by this crate are RFC 3339. Databases created with a
/// `DEFAULT CURRENT_TIMESTAMP` column hold `SQLite`'s own UTC layout instead.
fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, SQLITE_TIMESTAMP_FORMAT).map(|dt| dt.and_utc())
        })
}

/// Opens one [`RecordStore`] per unit of work.
///
/// Cheap to clone; holds only the database location and connection settings.
#[derive(Debug, Clone)]
pub struct StoreFactory {
    path: PathBuf,
    busy_timeout: Duration,
}

impl StoreFactory {
    /// Create a factory for the database at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    /// Create a factory from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.database_path(), config.busy_timeout())
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(&self) -> Result<RecordStore> {
        RecordStore::open(&self.path, self.busy_timeout)
    }

    /// Check whether the database file exists and holds the `records` table.
    ///
    /// Never creates the file.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing database cannot be opened or queried.
    pub fn is_initialized(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        self.open()?.has_schema()
    }

    /// Open a connection and make sure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema cannot be created.
    pub fn bootstrap(&self) -> Result<()> {
        let store = self.open()?;
        store.initialize()?;
        info!("Database ready at {}", self.path.display());
        Ok(())
    }
}

/// Data access for the `records` table over a single connection.
///
/// The connection closes when the store is dropped.
#[derive(Debug)]
pub struct RecordStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl RecordStore {
    /// Open or create a database at the given path.
    ///
    /// Creates the parent directories if they don't exist. The schema is not
    /// touched; call [`RecordStore::initialize`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.busy_timeout(busy_timeout)?;

        Ok(Self { path, conn })
    }

    /// Create an in-memory store with the schema in place, for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        let store = Self {
            path: PathBuf::from(":memory:"),
            conn,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create the `records` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub fn initialize(&self) -> Result<()> {
        schema::initialize_schema(&self.conn)
    }

    /// Check whether the `records` table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn has_schema(&self) -> Result<bool> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'records'",
            [],
            |row| row.get(0),
        )?;
        Ok(tables > 0)
    }

    /// All records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list(&self) -> Result<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_RECORD} ORDER BY created_at DESC, id DESC"))?;

        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Get a record by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: i64) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_RECORD} WHERE id = ?1"),
                [id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert a record, stamping it with the current time.
    ///
    /// Returns the assigned ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert(&self, title: &str, content: &str) -> Result<i64> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        self.conn.execute(
            "INSERT INTO records (title, content, created_at) VALUES (?1, ?2, ?3)",
            params![title, content, created_at],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Inserted record with id {}", id);
        Ok(id)
    }

    /// Replace the title and content of a record.
    ///
    /// Returns `true` if the record exists, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn update(&self, id: i64, title: &str, content: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE records SET title = ?1, content = ?2 WHERE id = ?3",
            params![title, content, id],
        )?;
        debug!("Updated record {} ({} rows)", id, affected);
        Ok(affected > 0)
    }

    /// Delete a record by ID.
    ///
    /// Returns `true` if a record was deleted, `false` if there was nothing to
    /// delete. Neither case is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM records WHERE id = ?1", [id])?;
        debug!("Deleted record {} ({} rows)", id, affected);
        Ok(affected > 0)
    }

    /// Count stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_records = self.count()?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let parse = |s: String| parse_timestamp(&s).ok();

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map_or(0, |m| m.len())
        };

        Ok(StorageStats {
            total_records,
            oldest_record: oldest.and_then(parse),
            newest_record: newest.and_then(parse),
            db_size_bytes,
        })
    }

    /// Convert a database row to a Record.
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let id: i64 = row.get(0)?;
        let title: String = row.get(1)?;
        let content: Option<String> = row.get(2)?;
        let created_at_str: String = row.get(3)?;

        let created_at = parse_timestamp(&created_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

        Ok(Record {
            id,
            title,
            content: content.unwrap_or_default(),
            created_at,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of records stored.
    pub total_records: i64,
    /// Creation time of the oldest record.
    pub oldest_record: Option<DateTime<Utc>>,
    /// Creation time of the newest record.
    pub newest_record: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
