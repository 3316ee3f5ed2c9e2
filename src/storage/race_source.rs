//! Read-only access to raw race results and race details.
//!
//! Raw columns are loosely typed (points and bibs arrive as text, sometimes
//! non-numeric). Values are coerced here: anything that does not read as a
//! number becomes `None`, and results whose race date cannot be read are
//! dropped with a warning.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;
use rusqlite::params;

use crate::metrics::analytics::{RaceDetail, RaceResult};
use crate::storage::database::{query_error, Database, DatabaseError};

/// Dates that compare correctly as text.
const ISO_DATE_GLOB: &str = "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*";

/// Which results to load.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultFilter {
    All,
    /// Only these races
    Races(Vec<i64>),
}

/// Coerce a loosely typed column to a finite number.
pub fn coerce_f64(value: ValueRef<'_>) -> Option<f64> {
    let v = match value {
        ValueRef::Integer(i) => i as f64,
        ValueRef::Real(r) => r,
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse::<f64>().ok()?,
        ValueRef::Null | ValueRef::Blob(_) => return None,
    };
    v.is_finite().then_some(v)
}

/// Coerce a loosely typed column to text.
pub fn coerce_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(r) => Some(r.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

/// Read a race date stored as `YYYY-MM-DD` or a datetime string.
pub fn parse_race_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
                .map(|dt| dt.date())
                .ok()
        })
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

impl Database {
    /// Results joined to their race details.
    pub fn load_results(&self, filter: &ResultFilter) -> Result<Vec<RaceResult>, DatabaseError> {
        let layout = self.layout();
        let mut sql = format!(
            "SELECT fr.race_id, fr.fis_code, fr.name, fr.rank, fr.bib, fr.fis_points, fr.final_time,
                    rd.date, rd.discipline, rd.location, rd.country, rd.homologation_number, rd.race_type
             FROM {} fr
             JOIN {} rd ON fr.race_id = rd.race_id",
            layout.results_table(),
            layout.details_table()
        );

        let race_ids = match filter {
            ResultFilter::All => None,
            ResultFilter::Races(ids) => {
                sql.push_str(" WHERE fr.race_id IN (SELECT value FROM json_each(?1))");
                Some(serde_json::to_string(ids).map_err(|e| DatabaseError::QueryFailed(e.to_string()))?)
            }
        };
        sql.push_str(" ORDER BY fr.race_id");

        let mut stmt = self.connection().prepare(&sql).map_err(query_error)?;
        let mut rows = match &race_ids {
            Some(ids) => stmt.query(params![ids]),
            None => stmt.query([]),
        }
        .map_err(query_error)?;

        let mut results = Vec::new();
        let mut undated = 0usize;
        let mut anonymous = 0usize;
        while let Some(row) = rows.next().map_err(query_error)? {
            let Some(race_id) = coerce_f64(row.get_ref(0).map_err(query_error)?).map(|v| v as i64)
            else {
                continue;
            };
            let get = |idx: usize| row.get_ref(idx).map_err(query_error);

            let (Some(fis_code), Some(discipline)) = (coerce_string(get(1)?), coerce_string(get(8)?))
            else {
                anonymous += 1;
                continue;
            };
            let Some(date) = coerce_string(get(7)?).as_deref().and_then(parse_race_date) else {
                undated += 1;
                continue;
            };

            results.push(RaceResult {
                race_id,
                fis_code,
                name: coerce_string(get(2)?).unwrap_or_default(),
                rank: coerce_string(get(3)?),
                bib: coerce_f64(get(4)?),
                fis_points: coerce_f64(get(5)?),
                final_time: coerce_string(get(6)?),
                date,
                discipline,
                location: coerce_string(get(9)?),
                country: coerce_string(get(10)?),
                homologation_number: coerce_string(get(11)?),
                race_type: coerce_string(get(12)?),
            });
        }

        if undated > 0 {
            tracing::warn!("Dropped {} results with an unreadable race date", undated);
        }
        if anonymous > 0 {
            tracing::warn!("Dropped {} results without athlete code or discipline", anonymous);
        }
        tracing::debug!("Loaded {} results", results.len());
        Ok(results)
    }

    /// Course facts of every race.
    pub fn load_race_details(&self) -> Result<Vec<RaceDetail>, DatabaseError> {
        let sql = format!(
            "SELECT race_id, location, country, discipline, homologation_number,
                    vertical_drop, start_altitude, first_run_number_of_gates
             FROM {} ORDER BY race_id",
            self.layout().details_table()
        );
        let mut stmt = self.connection().prepare(&sql).map_err(query_error)?;
        let mut rows = stmt.query([]).map_err(query_error)?;

        let mut details = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let get = |idx: usize| row.get_ref(idx).map_err(query_error);
            let Some(race_id) = coerce_f64(get(0)?).map(|v| v as i64) else {
                continue;
            };
            details.push(RaceDetail {
                race_id,
                location: coerce_string(get(1)?),
                country: coerce_string(get(2)?),
                discipline: coerce_string(get(3)?),
                homologation_number: coerce_string(get(4)?),
                vertical_drop: coerce_f64(get(5)?),
                start_altitude: coerce_f64(get(6)?),
                gate_count: coerce_f64(get(7)?),
            });
        }
        Ok(details)
    }

    /// Latest race date in the details store.
    pub fn latest_race_date(&self) -> Result<Option<NaiveDate>, DatabaseError> {
        let sql = format!(
            "SELECT MAX(date) FROM {} WHERE date GLOB '{}'",
            self.layout().details_table(),
            ISO_DATE_GLOB
        );
        let latest: Option<String> = self
            .connection()
            .query_row(&sql, [], |row| row.get(0))
            .map_err(query_error)?;
        Ok(latest.as_deref().and_then(parse_race_date))
    }

    /// Races dated on or after `from`.
    pub fn race_ids_since(&self, from: NaiveDate) -> Result<Vec<i64>, DatabaseError> {
        let sql = format!(
            "SELECT race_id FROM {} WHERE date GLOB '{}' AND date >= ?1 ORDER BY race_id",
            self.layout().details_table(),
            ISO_DATE_GLOB
        );
        let mut stmt = self.connection().prepare(&sql).map_err(query_error)?;
        let ids = stmt
            .query_map(params![from.format("%Y-%m-%d").to_string()], |row| row.get::<_, i64>(0))
            .map_err(query_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;
        Ok(ids)
    }
}
