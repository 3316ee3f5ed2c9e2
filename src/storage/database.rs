//! Database connection and schema layout using rusqlite.
//!
//! The aggregate store is the connection's main schema. The raw results
//! store is attached as `raw` and the race details store as `details`, unless
//! they are the same file as the one already open.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode, InterruptHandle, Result as SqliteResult};
use thiserror::Error;

use crate::storage::config::DatabaseSettings;
use crate::storage::schema::{
    for_schema, AGGREGATE_SCHEMA, CURRENT_VERSION, DETAILS_SCHEMA, RESULTS_SCHEMA,
    SCHEMA_VERSION_TABLE,
};

/// Locations of the three stores.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabasePaths {
    pub raw: PathBuf,
    pub details: Option<PathBuf>,
    pub aggregate: PathBuf,
}

impl From<&DatabaseSettings> for DatabasePaths {
    fn from(settings: &DatabaseSettings) -> Self {
        Self {
            raw: settings.raw_path.clone(),
            details: settings.details_path.clone(),
            aggregate: settings.aggregate_path.clone(),
        }
    }
}

impl DatabasePaths {
    /// Everything in one file.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            raw: path.clone(),
            details: None,
            aggregate: path,
        }
    }
}

/// Schema names holding the raw tables on this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLayout {
    pub results: String,
    pub details: String,
}

impl SchemaLayout {
    pub fn results_table(&self) -> String {
        format!("{}.fis_results", self.results)
    }

    pub fn details_table(&self) -> String {
        format!("{}.race_details", self.details)
    }
}

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
    layout: SchemaLayout,
}

impl Database {
    /// Open the aggregate store and attach the raw stores.
    pub fn open(paths: &DatabasePaths) -> Result<Self, DatabaseError> {
        ensure_parent(&paths.aggregate)?;

        let conn = Connection::open(&paths.aggregate)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let results = if same_file(&paths.raw, &paths.aggregate) {
            "main".to_string()
        } else {
            attach(&conn, &paths.raw, "raw")?;
            "raw".to_string()
        };
        let details = match &paths.details {
            Some(d) if same_file(d, &paths.aggregate) => "main".to_string(),
            Some(d) if same_file(d, &paths.raw) => results.clone(),
            Some(d) => {
                attach(&conn, d, "details")?;
                "details".to_string()
            }
            None => results.clone(),
        };

        let db = Self {
            conn,
            layout: SchemaLayout { results, details },
        };
        db.initialize()?;

        tracing::debug!(
            "Opened {} (results in {}, details in {})",
            paths.aggregate.display(),
            db.layout.results,
            db.layout.details
        );
        Ok(db)
    }

    /// Open an in-memory database holding every table (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self {
            conn,
            layout: SchemaLayout {
                results: "main".to_string(),
                details: "main".to_string(),
            },
        };
        db.initialize()?;
        db.init_raw_schema()?;

        Ok(db)
    }

    /// Initialize the aggregate schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        // Create schema version table
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        // Check current version
        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(AGGREGATE_SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Aggregate database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    /// Create the raw results and details tables if they do not exist.
    pub fn init_raw_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(&for_schema(RESULTS_SCHEMA, &self.layout.results))
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        self.conn
            .execute_batch(&for_schema(DETAILS_SCHEMA, &self.layout.details))
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn layout(&self) -> &SchemaLayout {
        &self.layout
    }

    /// Handle that aborts whatever statement this connection is running.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    /// Execute a query and return the number of rows affected.
    pub fn execute(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<usize, DatabaseError> {
        self.conn.execute(sql, params).map_err(query_error)
    }

    /// Begin a transaction.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>, DatabaseError> {
        self.conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }

    /// Whether a table exists in the main (aggregate) schema.
    pub fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        Ok(count > 0)
    }
}

/// Map a rusqlite error, keeping interrupts distinguishable.
pub(crate) fn query_error(e: rusqlite::Error) -> DatabaseError {
    if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
        DatabaseError::Interrupted(e.to_string())
    } else {
        DatabaseError::QueryFailed(e.to_string())
    }
}

fn attach(conn: &Connection, path: &Path, schema: &str) -> Result<(), DatabaseError> {
    ensure_parent(path)?;
    let path = path
        .to_str()
        .ok_or_else(|| DatabaseError::ConnectionFailed(format!("non UTF-8 path {}", path.display())))?;
    conn.execute(&format!("ATTACH DATABASE ?1 AS {}", schema), [path])
        .map_err(|e| DatabaseError::ConnectionFailed(format!("attach {}: {}", schema, e)))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), DatabaseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),
}
