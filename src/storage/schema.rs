//! Schema definitions for the raw and aggregate stores.

/// Current aggregate schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Version bookkeeping for the aggregate store.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Aggregate bookkeeping tables. Derived feature tables are created by the
/// stages that own them.
pub const AGGREGATE_SCHEMA: &str = r#"
-- One row per stage per pipeline run
CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    mode TEXT NOT NULL,
    from_date TEXT,
    status TEXT NOT NULL,
    rows_written INTEGER,
    duration_ms INTEGER NOT NULL,
    error TEXT,
    finished_at TEXT NOT NULL,
    PRIMARY KEY (run_id, stage)
);

CREATE INDEX IF NOT EXISTS idx_pipeline_runs_finished_at ON pipeline_runs(finished_at);
"#;

/// Raw results table. Loaded by an external scraper; created here for fresh
/// installs and tests.
pub const RESULTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS {schema}.fis_results (
    race_id INTEGER NOT NULL,
    rank TEXT,
    bib TEXT,
    fis_code TEXT,
    name TEXT,
    country TEXT,
    final_time TEXT,
    fis_points TEXT
);

CREATE INDEX IF NOT EXISTS {schema}.idx_fis_results_race_id ON fis_results(race_id);
"#;

/// Raw race details table.
pub const DETAILS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS {schema}.race_details (
    race_id INTEGER PRIMARY KEY,
    location TEXT,
    country TEXT,
    discipline TEXT,
    race_type TEXT,
    sex TEXT,
    date TEXT,
    homologation_number TEXT,
    start_altitude REAL,
    finish_altitude REAL,
    vertical_drop REAL,
    first_run_number_of_gates REAL
);

CREATE INDEX IF NOT EXISTS {schema}.idx_race_details_date ON race_details(date);
"#;

/// Render a raw table script for one attached schema.
pub fn for_schema(script: &str, schema: &str) -> String {
    script.replace("{schema}", schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_schema_qualifies_tables() {
        let sql = for_schema(RESULTS_SCHEMA, "raw");
        assert!(sql.contains("raw.fis_results"));
        assert!(sql.contains("raw.idx_fis_results_race_id ON fis_results"));
        assert!(!sql.contains("{schema}"));
    }
}
