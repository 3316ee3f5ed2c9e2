//! Incremental updates only touch the races of their window.

use std::sync::Arc;

use alpine_analytics::pipeline::{Orchestrator, RunMode, Selection, WindowRequest};
use alpine_analytics::storage::Database;
use chrono::NaiveDate;

use crate::common::{config_for, insert_race, scored_rows, seed_season, separate_stores, Race};

fn add_late_race(paths: &alpine_analytics::storage::DatabasePaths) {
    insert_race(
        paths,
        &Race {
            race_id: 5,
            date: "2024-03-10",
            location: "Adelboden",
            homologation: "H2",
        },
        &[
            ("A", "1", "1", Some("4"), Some("2:30.00")),
            ("D", "2", "2", Some("16"), Some("2:32.10")),
        ],
    );
}

fn mark_race_one(paths: &alpine_analytics::storage::DatabasePaths) {
    let db = Database::open(paths).unwrap();
    db.connection()
        .execute_batch(
            "UPDATE race_z_score SET race_z_score = 99 WHERE race_id = 1;
             UPDATE strokes_gained SET points_gained = 99 WHERE race_id = 1;",
        )
        .unwrap();
}

#[test]
fn test_update_by_race_ids_keeps_other_races() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);
    let orchestrator = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths));
    orchestrator.run(&Selection::All, &RunMode::Full).unwrap();

    mark_race_one(&paths);
    add_late_race(&paths);

    let summary = orchestrator
        .run(
            &Selection::All,
            &RunMode::Incremental(WindowRequest {
                race_ids: Some(vec![5]),
                ..Default::default()
            }),
        )
        .unwrap();
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.mode, "incremental");
    assert_eq!(summary.window_races, Some(1));

    let z = scored_rows(
        &paths,
        "SELECT race_id, fis_code, race_z_score FROM race_z_score ORDER BY race_id, fis_code",
    );
    // race 1 was outside the window and keeps its marker
    assert!(z.iter().filter(|r| r.0 == 1).all(|r| r.2 == 99.0));
    let late: Vec<(String, f64)> = z
        .iter()
        .filter(|r| r.0 == 5)
        .map(|r| (r.1.clone(), r.2))
        .collect();
    assert_eq!(late, vec![("A".to_string(), 1.0), ("D".to_string(), -1.0)]);

    let gained = scored_rows(
        &paths,
        "SELECT race_id, fis_code, points_gained FROM strokes_gained ORDER BY race_id, fis_code",
    );
    assert!(gained.iter().filter(|r| r.0 == 1).all(|r| r.2 == 99.0));
    // field average 10: A gains 6 points, D loses 6
    let late: Vec<f64> = gained.iter().filter(|r| r.0 == 5).map(|r| r.2).collect();
    assert_eq!(late, vec![6.0, -6.0]);
}

#[test]
fn test_default_window_starts_day_before_latest_race() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);
    let orchestrator = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths));
    orchestrator.run(&Selection::All, &RunMode::Full).unwrap();
    add_late_race(&paths);

    let summary = orchestrator
        .run(&Selection::All, &RunMode::Incremental(WindowRequest::default()))
        .unwrap();
    assert_eq!(summary.from_date, NaiveDate::from_ymd_opt(2024, 3, 9));
    assert_eq!(summary.window_races, Some(1));
    assert_eq!(summary.exit_code(), 0);

    // full-recompute stages see the new race too
    let db = Database::open(&paths).unwrap();
    let a_races: i64 = db
        .connection()
        .query_row(
            "SELECT race_count FROM performance_consistency_career WHERE fis_code = 'A'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(a_races, 4);
}

#[test]
fn test_update_without_race_data_fails_early() {
    let (_dir, paths) = separate_stores();
    let orchestrator = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths));
    let result = orchestrator.run(&Selection::All, &RunMode::Incremental(WindowRequest::default()));
    assert!(matches!(
        result,
        Err(alpine_analytics::pipeline::PipelineError::NoRaceData)
    ));
}
