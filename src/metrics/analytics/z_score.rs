//! Race-level standardized performance.
//!
//! For every race the field's points are standardized with the population
//! standard deviation. Lower points are better, so the score is
//! `(field mean - points) / field std`: positive means a better-than-field
//! result. A field with no spread (including a single starter) scores 0.

use std::collections::BTreeMap;

use super::results::{RaceResult, ZScoreTable};
use crate::metrics::stats;

/// One row of the `race_z_score` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceZScore {
    pub race_id: i64,
    pub fis_code: String,
    pub name: String,
    pub race_z_score: f64,
}

/// Computes race z-scores.
#[derive(Debug, Default)]
pub struct ZScoreEngine;

impl ZScoreEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score every result with points. Races are independent of each other,
    /// so passing a subset of whole races scores exactly those races.
    pub fn compute(&self, results: &[RaceResult]) -> Vec<RaceZScore> {
        let mut races: BTreeMap<i64, Vec<&RaceResult>> = BTreeMap::new();
        for r in results.iter().filter(|r| r.has_points()) {
            races.entry(r.race_id).or_default().push(r);
        }

        let mut rows = Vec::with_capacity(results.len());
        for (race_id, field) in races {
            let points: Vec<f64> = field.iter().filter_map(|r| r.fis_points).collect();
            let mean = stats::mean(&points).unwrap_or(0.0);
            let std = stats::population_std(&points).unwrap_or(0.0);

            for r in field {
                let race_z_score = match r.fis_points {
                    Some(p) if std > 0.0 => (mean - p) / std,
                    _ => 0.0,
                };
                rows.push(RaceZScore {
                    race_id,
                    fis_code: r.fis_code.clone(),
                    name: r.name.clone(),
                    race_z_score,
                });
            }
        }

        tracing::debug!("Scored {} results", rows.len());
        rows
    }

    /// Canonical lookup table built from freshly computed scores.
    pub fn table(rows: &[RaceZScore]) -> ZScoreTable {
        ZScoreTable::from_scores(
            rows.iter()
                .map(|r| (r.race_id, r.fis_code.clone(), r.race_z_score)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::analytics::results::fixtures::result;

    #[test]
    fn test_z_score_basic() {
        let rows = vec![
            result(1, "A", "2024-01-01", Some(10.0)),
            result(1, "B", "2024-01-01", Some(20.0)),
            result(1, "C", "2024-01-01", Some(30.0)),
        ];
        let scores = ZScoreEngine::new().compute(&rows);
        assert_eq!(scores.len(), 3);

        // mean 20, population std sqrt(200/3)
        let std = (200.0_f64 / 3.0).sqrt();
        assert!((scores[0].race_z_score - 10.0 / std).abs() < 1e-12);
        assert_eq!(scores[1].race_z_score, 0.0);
        assert!((scores[2].race_z_score + 10.0 / std).abs() < 1e-12);
    }

    #[test]
    fn test_lowest_points_highest_z() {
        let rows = vec![
            result(7, "A", "2024-01-01", Some(44.1)),
            result(7, "B", "2024-01-01", Some(12.3)),
            result(7, "C", "2024-01-01", Some(80.0)),
            result(7, "D", "2024-01-01", Some(27.5)),
        ];
        let scores = ZScoreEngine::new().compute(&rows);
        let best = scores
            .iter()
            .max_by(|a, b| a.race_z_score.total_cmp(&b.race_z_score))
            .unwrap();
        assert_eq!(best.fis_code, "B");
    }

    #[test]
    fn test_single_competitor_and_flat_field_score_zero() {
        let rows = vec![
            result(1, "A", "2024-01-01", Some(10.0)),
            result(2, "A", "2024-01-02", Some(15.0)),
            result(2, "B", "2024-01-02", Some(15.0)),
        ];
        let scores = ZScoreEngine::new().compute(&rows);
        assert!(scores.iter().all(|s| s.race_z_score == 0.0));
    }

    #[test]
    fn test_results_without_points_are_skipped() {
        let rows = vec![
            result(1, "A", "2024-01-01", Some(10.0)),
            result(1, "B", "2024-01-01", None),
        ];
        let scores = ZScoreEngine::new().compute(&rows);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].fis_code, "A");
    }

    #[test]
    fn test_idempotent() {
        let rows = vec![
            result(1, "A", "2024-01-01", Some(10.0)),
            result(1, "B", "2024-01-01", Some(25.0)),
            result(2, "A", "2024-01-05", Some(31.0)),
            result(2, "C", "2024-01-05", Some(18.0)),
        ];
        let engine = ZScoreEngine::new();
        assert_eq!(engine.compute(&rows), engine.compute(&rows));
    }

    #[test]
    fn test_table_lookup() {
        let rows = vec![
            result(1, "A", "2024-01-01", Some(10.0)),
            result(1, "B", "2024-01-01", Some(20.0)),
        ];
        let scores = ZScoreEngine::new().compute(&rows);
        let table = ZScoreEngine::table(&scores);
        assert_eq!(table.get(1, "A"), Some(1.0));
        assert_eq!(table.get(1, "B"), Some(-1.0));
    }
}
