//! Shared fixtures: raw stores on disk in a temporary directory.

use alpine_analytics::storage::{AnalyticsConfig, Database, DatabasePaths};
use tempfile::TempDir;

/// Raw results, race details and aggregates in three separate files.
pub fn separate_stores() -> (TempDir, DatabasePaths) {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = DatabasePaths {
        raw: dir.path().join("fis_results.db"),
        details: Some(dir.path().join("fis_race_details.db")),
        aggregate: dir.path().join("alpine_aggregate.db"),
    };
    let db = Database::open(&paths).expect("open stores");
    db.init_raw_schema().expect("raw schema");
    (dir, paths)
}

pub fn config_for(paths: &DatabasePaths) -> AnalyticsConfig {
    let mut config = AnalyticsConfig::default();
    config.database.raw_path = paths.raw.clone();
    config.database.details_path = paths.details.clone();
    config.database.aggregate_path = paths.aggregate.clone();
    config
}

/// One race: (race_id, date, location, homologation number).
pub struct Race {
    pub race_id: i64,
    pub date: &'static str,
    pub location: &'static str,
    pub homologation: &'static str,
}

/// One start: (fis_code, rank, bib, points, time).
pub type Start = (&'static str, &'static str, &'static str, Option<&'static str>, Option<&'static str>);

pub fn insert_race(paths: &DatabasePaths, race: &Race, starts: &[Start]) {
    let db = Database::open(paths).expect("open stores");
    let layout = db.layout().clone();
    let conn = db.connection();
    conn.execute(
        &format!(
            "INSERT INTO {} (race_id, location, country, discipline, race_type, date,
                             homologation_number, start_altitude, vertical_drop,
                             first_run_number_of_gates)
             VALUES (?1, ?2, 'SUI', 'GS', 'World Cup', ?3, ?4, 2000, 400, 50)",
            layout.details_table()
        ),
        rusqlite::params![race.race_id, race.location, race.date, race.homologation],
    )
    .expect("insert race");

    for (fis_code, rank, bib, points, time) in starts {
        conn.execute(
            &format!(
                "INSERT INTO {} (race_id, rank, bib, fis_code, name, final_time, fis_points)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                layout.results_table()
            ),
            rusqlite::params![
                race.race_id,
                rank,
                bib,
                fis_code,
                format!("Athlete {}", fis_code),
                time,
                points
            ],
        )
        .expect("insert start");
    }
}

/// Four GS races. Athlete A races three times with points 10, 5 and 8.
pub fn seed_season(paths: &DatabasePaths) {
    insert_race(
        paths,
        &Race {
            race_id: 1,
            date: "2024-01-10",
            location: "Soelden",
            homologation: "H1",
        },
        &[
            ("A", "2", "2", Some("10"), Some("1:11.00")),
            ("B", "1", "1", Some("5"), Some("1:10.00")),
            ("C", "3", "3", Some("20"), Some("1:12.50")),
        ],
    );
    insert_race(
        paths,
        &Race {
            race_id: 2,
            date: "2024-01-20",
            location: "Soelden",
            homologation: "H1",
        },
        &[
            ("A", "1", "2", Some("5"), Some("1:09.80")),
            ("B", "2", "1", Some("12"), Some("1:10.40")),
            ("C", "3", "3", Some("25"), Some("1:11.90")),
        ],
    );
    insert_race(
        paths,
        &Race {
            race_id: 3,
            date: "2024-02-05",
            location: "Adelboden",
            homologation: "H2",
        },
        &[
            ("A", "1", "1", Some("8"), Some("2:31.20")),
            ("B", "2", "2", Some("9"), Some("2:31.90")),
            ("C", "DNF1", "3", None, None),
        ],
    );
    insert_race(
        paths,
        &Race {
            race_id: 4,
            date: "2024-03-01",
            location: "Soelden",
            homologation: "H1",
        },
        &[
            ("B", "1", "1", Some("5"), Some("1:10.10")),
            ("C", "2", "2", Some("6"), Some("1:10.30")),
            ("D", "3", "3", Some("30"), Some("1:13.00")),
        ],
    );
}

/// Rows of a query as (race_id, fis_code, value).
pub fn scored_rows(paths: &DatabasePaths, sql: &str) -> Vec<(i64, String, f64)> {
    let db = Database::open(paths).expect("open stores");
    let mut stmt = db.connection().prepare(sql).expect("prepare");
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows");
    rows
}
