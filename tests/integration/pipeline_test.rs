//! Full runs of the built-in stages against on-disk stores.

use std::sync::Arc;

use alpine_analytics::pipeline::{Orchestrator, RunMode, Selection};
use alpine_analytics::storage::Database;

use crate::common::{config_for, scored_rows, seed_season, separate_stores};

#[test]
fn test_full_run_succeeds() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);

    let orchestrator = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths));
    let summary = orchestrator.run(&Selection::All, &RunMode::Full).unwrap();

    let failed: Vec<String> = summary
        .failed()
        .map(|s| format!("{}: {:?}", s.stage, s.failure))
        .collect();
    assert!(failed.is_empty(), "failed stages: {:?}", failed);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.phases.len(), 3);
    assert_eq!(summary.mode, "full");
}

#[test]
fn test_consistency_of_three_race_athlete() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);
    let orchestrator = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths));
    orchestrator
        .run(&Selection::Phase(1), &RunMode::Full)
        .unwrap();
    orchestrator
        .run(&Selection::Stage("consistency-career".to_string()), &RunMode::Full)
        .unwrap();

    let db = Database::open(&paths).unwrap();
    let (race_count, dnf_count, mean_fis): (i64, i64, f64) = db
        .connection()
        .query_row(
            "SELECT race_count, dnf_count, mean_fis FROM performance_consistency_career
             WHERE fis_code = 'A' AND discipline = 'GS'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(race_count, 3);
    assert_eq!(dnf_count, 0);
    assert!((mean_fis - 23.0 / 3.0).abs() < 1e-9);

    let c_dnf: i64 = db
        .connection()
        .query_row(
            "SELECT dnf_count FROM performance_consistency_career WHERE fis_code = 'C'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(c_dnf, 1);
}

#[test]
fn test_z_scores_follow_field_order() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);
    Orchestrator::new(Arc::new(paths.clone()), config_for(&paths))
        .run(&Selection::Phase(1), &RunMode::Full)
        .unwrap();

    let points = scored_rows(
        &paths,
        "SELECT fr.race_id, fr.fis_code, CAST(fr.fis_points AS REAL)
         FROM raw.fis_results fr WHERE fr.fis_points IS NOT NULL",
    );
    let scores = scored_rows(
        &paths,
        "SELECT race_id, fis_code, race_z_score FROM race_z_score",
    );
    assert_eq!(points.len(), scores.len());

    for race_id in 1..=4 {
        let mut by_points: Vec<&(i64, String, f64)> =
            points.iter().filter(|p| p.0 == race_id).collect();
        by_points.sort_by(|a, b| a.2.total_cmp(&b.2));
        let mut by_score: Vec<&(i64, String, f64)> =
            scores.iter().filter(|s| s.0 == race_id).collect();
        by_score.sort_by(|a, b| b.2.total_cmp(&a.2));

        let lowest_points: Vec<&str> = by_points.iter().map(|p| p.1.as_str()).collect();
        let highest_scores: Vec<&str> = by_score.iter().map(|s| s.1.as_str()).collect();
        assert_eq!(lowest_points, highest_scores, "race {}", race_id);

        let total: f64 = by_score.iter().map(|s| s.2).sum();
        assert!(total.abs() < 1e-9);
    }
}

#[test]
fn test_z_score_stage_is_idempotent() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);
    let orchestrator = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths));
    let query = "SELECT race_id, fis_code, race_z_score FROM race_z_score ORDER BY race_id, fis_code";

    orchestrator
        .run(&Selection::Stage("race-z-score".to_string()), &RunMode::Full)
        .unwrap();
    let first = scored_rows(&paths, query);
    orchestrator
        .run(&Selection::Stage("race-z-score".to_string()), &RunMode::Full)
        .unwrap();
    let second = scored_rows(&paths, query);

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_location_ranking_from_top_performances() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);
    let orchestrator = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths));
    orchestrator.run(&Selection::All, &RunMode::Full).unwrap();

    let db = Database::open(&paths).unwrap();
    let mut stmt = db
        .connection()
        .prepare(
            "SELECT location, mean_z_score, performance_count, rank
             FROM location_zscore_ranking ORDER BY rank",
        )
        .unwrap();
    let ranking: Vec<(String, f64, i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    // B's weakest race (Adelboden) falls out of the top three
    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking[0].0, "Adelboden");
    assert_eq!(ranking[0].2, 1);
    assert!((ranking[0].1 - 1.0).abs() < 1e-9);
    assert_eq!(ranking[0].3, 1);
    assert_eq!(ranking[1].0, "Soelden");
    assert_eq!(ranking[1].2, 9);
    assert_eq!(ranking[1].3, 2);
}

#[test]
fn test_run_log_records_every_stage() {
    let (_dir, paths) = separate_stores();
    seed_season(&paths);
    let summary = Orchestrator::new(Arc::new(paths.clone()), config_for(&paths))
        .run(&Selection::All, &RunMode::Full)
        .unwrap();

    let db = Database::open(&paths).unwrap();
    let logged: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM pipeline_runs WHERE run_id = ?1 AND mode = 'full'",
            [summary.run_id.to_string()],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(logged, 19);
}
