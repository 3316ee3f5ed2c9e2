//! Derived table storage operations.
//!
//! Provides persistence for:
//! - Feature tables, replaced whole or race by race
//! - Race z-scores, course features and top performances read back by later stages
//! - The pipeline run log

use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use crate::metrics::analytics::{CourseFeatures, TopPerformance, ZScoreTable};
use crate::storage::database::{query_error, DatabaseError};
use crate::storage::race_source::parse_race_date;
use crate::storage::tables::{self, TableRow, TableSpec};

/// Column stamped on every derived row.
pub const LAST_UPDATED: &str = "last_updated";

/// How a write treats the rows already in the table.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteMode {
    /// Drop and recreate the table
    Replace,
    /// Delete rows of these races, then insert; other races are untouched
    ReplaceRaces(Vec<i64>),
}

/// Decides whether a write may go on and whether it may commit.
///
/// A plain `Fn() -> bool` works as a guard that aborts when it returns true.
pub trait WriteGuard {
    fn aborted(&self) -> bool;

    /// Claim the commit. Returning false rolls the write back; once this
    /// has returned true the write can no longer be aborted.
    fn begin_commit(&self) -> bool {
        !self.aborted()
    }
}

impl<F: Fn() -> bool> WriteGuard for F {
    fn aborted(&self) -> bool {
        self()
    }
}

/// One line of the run log.
#[derive(Debug, Clone)]
pub struct RunRecord<'r> {
    pub run_id: Uuid,
    pub stage: &'r str,
    pub mode: &'r str,
    pub from_date: Option<NaiveDate>,
    pub status: &'r str,
    pub rows_written: Option<usize>,
    pub duration_ms: u64,
    pub error: Option<&'r str>,
    pub finished_at: &'r str,
}

/// Analytics store for persisting derived tables.
pub struct AnalyticsStore<'a> {
    conn: &'a Connection,
}

impl<'a> AnalyticsStore<'a> {
    /// Create a new analytics store with the given connection.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ========== Table writes ==========

    /// Write `rows` into the table described by `spec` in one transaction.
    ///
    /// `guard` is polled while inserting and asked for the commit at the
    /// end; when it refuses, the transaction is rolled back and the table
    /// keeps its previous contents.
    pub fn write_table<R: TableRow>(
        &self,
        spec: &TableSpec,
        rows: &[R],
        mode: &WriteMode,
        last_updated: &str,
        guard: &dyn WriteGuard,
    ) -> Result<usize, DatabaseError> {
        let positions = match rows.first() {
            Some(first) => column_positions(spec, first)?,
            None => Vec::new(),
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        match mode {
            WriteMode::Replace => {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(spec.name)))
                    .map_err(query_error)?;
                tx.execute_batch(&create_sql(spec, false)).map_err(query_error)?;
            }
            WriteMode::ReplaceRaces(race_ids) => {
                if !spec.race_keyed {
                    return Err(DatabaseError::QueryFailed(format!(
                        "{} cannot be replaced by race",
                        spec.name
                    )));
                }
                tx.execute_batch(&create_sql(spec, true)).map_err(query_error)?;
                let ids = serde_json::to_string(race_ids)
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
                let deleted = tx
                    .execute(
                        &format!(
                            "DELETE FROM {} WHERE race_id IN (SELECT value FROM json_each(?1))",
                            quote(spec.name)
                        ),
                        params![ids],
                    )
                    .map_err(query_error)?;
                tracing::debug!("Deleted {} stale rows from {}", deleted, spec.name);
            }
        }

        {
            let mut stmt = tx.prepare(&insert_sql(spec)).map_err(query_error)?;
            let stamp = Value::Text(last_updated.to_string());
            for row in rows {
                if guard.aborted() {
                    return Err(DatabaseError::Interrupted(format!("write to {}", spec.name)));
                }
                let mut fields = row.fields();
                let values: Vec<Value> = positions
                    .iter()
                    .map(|&i| std::mem::replace(&mut fields[i].1, Value::Null))
                    .collect();
                stmt.execute(params_from_iter(values.iter().chain(std::iter::once(&stamp))))
                    .map_err(query_error)?;
            }
        }

        if !guard.begin_commit() {
            return Err(DatabaseError::Interrupted(format!("commit of {}", spec.name)));
        }
        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tracing::debug!("Wrote {} rows to {}", rows.len(), spec.name);
        Ok(rows.len())
    }

    /// Number of rows in a derived table.
    pub fn count_rows(&self, table: &str) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| {
                row.get(0)
            })
            .map_err(query_error)?;
        Ok(count as usize)
    }

    fn require_table(&self, table: &str) -> Result<(), DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        if count == 0 {
            return Err(DatabaseError::NotFound(format!(
                "table {} (run its stage first)",
                table
            )));
        }
        Ok(())
    }

    // ========== Stage inputs ==========

    /// Load every stored race z-score.
    pub fn load_z_scores(&self) -> Result<ZScoreTable, DatabaseError> {
        let spec = tables::race_z_score();
        self.require_table(spec.name)?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT race_id, fis_code, race_z_score FROM {} WHERE race_z_score IS NOT NULL",
                quote(spec.name)
            ))
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(query_error)?;

        let mut scores = Vec::new();
        for row in rows {
            scores.push(row.map_err(query_error)?);
        }
        tracing::debug!("Loaded {} race z-scores", scores.len());
        Ok(ZScoreTable::from_scores(scores))
    }

    /// Load course means from the course profile table.
    pub fn load_course_features(&self) -> Result<Vec<CourseFeatures>, DatabaseError> {
        let spec = tables::course_profile();
        self.require_table(spec.name)?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT location, discipline, homologation_number, mean_gate_count,
                        mean_start_altitude, mean_vertical_drop, mean_winning_time, mean_dnf_rate
                 FROM {}
                 WHERE location IS NOT NULL AND discipline IS NOT NULL
                   AND homologation_number IS NOT NULL",
                quote(spec.name)
            ))
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CourseFeatures {
                    location: row.get(0)?,
                    discipline: row.get(1)?,
                    homologation_number: row.get(2)?,
                    mean_gate_count: row.get(3)?,
                    mean_start_altitude: row.get(4)?,
                    mean_vertical_drop: row.get(5)?,
                    mean_winning_time: row.get(6)?,
                    mean_dnf_rate: row.get(7)?,
                })
            })
            .map_err(query_error)?;

        let mut features = Vec::new();
        for row in rows {
            features.push(row.map_err(query_error)?);
        }
        Ok(features)
    }

    /// Load the career top performances.
    pub fn load_top_performances(&self) -> Result<Vec<TopPerformance>, DatabaseError> {
        let spec = tables::top_performances_career();
        self.require_table(spec.name)?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT race_id, fis_code, name, fis_points, rank, date, location,
                        homologation_number, discipline, race_z_score
                 FROM {}
                 WHERE fis_points IS NOT NULL AND race_z_score IS NOT NULL",
                quote(spec.name)
            ))
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(5)?,
                    TopPerformance {
                        race_id: row.get(0)?,
                        fis_code: row.get(1)?,
                        name: row.get(2)?,
                        fis_points: row.get(3)?,
                        rank: row.get(4)?,
                        date: NaiveDate::default(),
                        location: row.get(6)?,
                        homologation_number: row.get(7)?,
                        discipline: row.get(8)?,
                        race_z_score: row.get(9)?,
                        year: None,
                    },
                ))
            })
            .map_err(query_error)?;

        let mut performances = Vec::new();
        for row in rows {
            let (date, mut performance) = row.map_err(query_error)?;
            let Some(date) = parse_race_date(&date) else {
                tracing::warn!("Skipping top performance with unreadable date {:?}", date);
                continue;
            };
            performance.date = date;
            performances.push(performance);
        }
        Ok(performances)
    }

    // ========== Run log ==========

    /// Append one stage outcome to the run log.
    pub fn record_run(&self, record: &RunRecord<'_>) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO pipeline_runs
                    (run_id, stage, mode, from_date, status, rows_written, duration_ms, error, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.run_id.to_string(),
                    record.stage,
                    record.mode,
                    record.from_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    record.status,
                    record.rows_written.map(|n| n as i64),
                    record.duration_ms as i64,
                    record.error,
                    record.finished_at,
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }
}

/// Index of each table column in the row's fields, checked once per write.
fn column_positions<R: TableRow>(spec: &TableSpec, row: &R) -> Result<Vec<usize>, DatabaseError> {
    let fields = row.fields();
    spec.column_names()
        .map(|column| {
            fields
                .iter()
                .position(|(name, _)| name == column)
                .ok_or_else(|| {
                    DatabaseError::QueryFailed(format!("no value for {}.{}", spec.name, column))
                })
        })
        .collect()
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn create_sql(spec: &TableSpec, if_not_exists: bool) -> String {
    let columns: Vec<String> = spec
        .columns
        .iter()
        .map(|c| format!("{} {}", quote(&c.name), c.sql_type.as_sql()))
        .chain(std::iter::once(format!("{} TEXT NOT NULL", quote(LAST_UPDATED))))
        .collect();
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote(spec.name),
        columns.join(", ")
    )
}

fn insert_sql(spec: &TableSpec) -> String {
    let names: Vec<String> = spec
        .column_names()
        .chain(std::iter::once(LAST_UPDATED))
        .map(quote)
        .collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(spec.name),
        names.join(", "),
        placeholders.join(", ")
    )
}
