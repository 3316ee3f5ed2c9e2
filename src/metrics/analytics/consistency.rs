//! Performance consistency: variability, DNF streaks and bounce-backs.
//!
//! Every result counts here, finished or not. A DNF is any rank starting
//! with "DNF". A bounce-back is a finished race directly after a DNF in the
//! same athlete's discipline timeline.

use std::collections::{BTreeMap, HashMap};

use super::results::{athlete_series, sort_timeline, AthleteKey, RaceResult, ZScoreTable};
use crate::metrics::stats::{self, coefficient_of_variation};

/// Grouping of consistency statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyScope {
    /// Whole career per discipline
    Career,
    /// Per calendar year per discipline
    Yearly,
}

/// One row of the consistency tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Consistency {
    pub fis_code: String,
    pub name: String,
    pub discipline: String,
    /// Present only for yearly rows
    pub year: Option<i32>,
    pub race_count: i64,
    pub mean_fis: Option<f64>,
    pub std_fis: Option<f64>,
    pub mean_race_z_score: Option<f64>,
    pub std_race_z_score: Option<f64>,
    pub dnf_count: i64,
    pub dnf_rate: f64,
    pub max_dnf_streak: i64,
    pub cv_fis: Option<f64>,
    pub cv_race_z: Option<f64>,
    /// Mean points in bounce-back races
    pub bounce_back_score: Option<f64>,
    /// Mean z-score in bounce-back races
    pub bounce_back_z_score: Option<f64>,
}

/// Longest run of consecutive `true` values.
pub fn max_streak(flags: impl IntoIterator<Item = bool>) -> i64 {
    let mut best = 0;
    let mut current = 0;
    for dnf in flags {
        if dnf {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

#[derive(Default)]
struct Accumulator {
    rows: i64,
    points: Vec<f64>,
    z: Vec<f64>,
    dnf: i64,
    max_streak: i64,
}

#[derive(Default)]
struct BounceAccumulator {
    points: Vec<f64>,
    z: Vec<f64>,
}

/// Computes consistency tables.
#[derive(Debug, Default)]
pub struct ConsistencyEngine;

impl ConsistencyEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        results: &[RaceResult],
        z_scores: &ZScoreTable,
        scope: ConsistencyScope,
    ) -> Vec<Consistency> {
        let mut rows: Vec<&RaceResult> = results.iter().collect();
        sort_timeline(&mut rows);

        let mut groups: BTreeMap<(AthleteKey, Option<i32>), Accumulator> = BTreeMap::new();
        let mut bounces: HashMap<AthleteKey, BounceAccumulator> = HashMap::new();

        for series in athlete_series(&rows) {
            // streaks run over the whole series, or restart each year
            let streak_spans: Vec<&[&RaceResult]> = match scope {
                ConsistencyScope::Career => vec![series],
                ConsistencyScope::Yearly => series.chunk_by(|a, b| a.year() == b.year()).collect(),
            };

            for span in streak_spans {
                let span_streak = max_streak(span.iter().map(|r| r.is_dnf()));
                for r in span {
                    let year = match scope {
                        ConsistencyScope::Career => None,
                        ConsistencyScope::Yearly => Some(r.year()),
                    };
                    let acc = groups.entry((r.athlete_key(), year)).or_default();
                    acc.rows += 1;
                    acc.points.extend(r.fis_points);
                    acc.z.extend(z_scores.score_for(r));
                    if r.is_dnf() {
                        acc.dnf += 1;
                    }
                    acc.max_streak = acc.max_streak.max(span_streak);
                }
            }

            for pair in series.windows(2) {
                let (prev, cur) = (pair[0], pair[1]);
                if prev.is_dnf() && !cur.is_dnf() {
                    let b = bounces.entry(cur.athlete_key()).or_default();
                    b.points.extend(cur.fis_points);
                    b.z.extend(z_scores.score_for(cur));
                }
            }
        }

        groups
            .into_iter()
            .map(|((key, year), acc)| {
                let mean_fis = stats::mean(&acc.points);
                let std_fis = stats::sample_std(&acc.points);
                let mean_z = stats::mean(&acc.z);
                let std_z = stats::sample_std(&acc.z);
                let bounce = bounces.get(&key);
                let race_count = match scope {
                    ConsistencyScope::Career => acc.rows,
                    ConsistencyScope::Yearly => acc.points.len() as i64,
                };

                Consistency {
                    year,
                    race_count,
                    mean_fis,
                    std_fis,
                    mean_race_z_score: mean_z,
                    std_race_z_score: std_z,
                    dnf_count: acc.dnf,
                    dnf_rate: acc.dnf as f64 / acc.rows as f64,
                    max_dnf_streak: acc.max_streak,
                    cv_fis: coefficient_of_variation(std_fis, mean_fis),
                    cv_race_z: coefficient_of_variation(std_z, mean_z),
                    bounce_back_score: bounce.and_then(|b| stats::mean(&b.points)),
                    bounce_back_z_score: bounce.and_then(|b| stats::mean(&b.z)),
                    fis_code: key.fis_code,
                    name: key.name,
                    discipline: key.discipline,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::analytics::results::fixtures::{result, with_rank};

    #[test]
    fn test_max_streak() {
        // F, DNF, DNF, F, DNF
        assert_eq!(max_streak([false, true, true, false, true]), 2);
        assert_eq!(max_streak([false, false]), 0);
        assert_eq!(max_streak(Vec::new()), 0);
    }

    fn dnf_timeline() -> Vec<RaceResult> {
        vec![
            result(1, "A", "2023-12-01", Some(20.0)),
            with_rank(result(2, "A", "2023-12-10", None), "DNF1"),
            with_rank(result(3, "A", "2024-01-05", None), "DNF2"),
            result(4, "A", "2024-01-12", Some(30.0)),
            with_rank(result(5, "A", "2024-01-20", None), "DNF1"),
        ]
    }

    #[test]
    fn test_career_dnf_streak_and_bounce() {
        let rows = dnf_timeline();
        let out = ConsistencyEngine::new().compute(
            &rows,
            &ZScoreTable::default(),
            ConsistencyScope::Career,
        );
        assert_eq!(out.len(), 1);
        let row = &out[0];
        assert_eq!(row.race_count, 5);
        assert_eq!(row.dnf_count, 3);
        assert!((row.dnf_rate - 0.6).abs() < 1e-12);
        assert_eq!(row.max_dnf_streak, 2);
        assert_eq!(row.bounce_back_score, Some(30.0));
        assert_eq!(row.bounce_back_z_score, None);
        assert_eq!(row.mean_fis, Some(25.0));
    }

    #[test]
    fn test_yearly_streak_restarts_each_year() {
        let rows = dnf_timeline();
        let out = ConsistencyEngine::new().compute(
            &rows,
            &ZScoreTable::default(),
            ConsistencyScope::Yearly,
        );
        assert_eq!(out.len(), 2);
        let y2023 = out.iter().find(|r| r.year == Some(2023)).unwrap();
        let y2024 = out.iter().find(|r| r.year == Some(2024)).unwrap();
        assert_eq!(y2023.max_dnf_streak, 1);
        assert_eq!(y2024.max_dnf_streak, 1);
        // yearly counts races with points
        assert_eq!(y2023.race_count, 1);
        assert_eq!(y2024.race_count, 1);
        // bounce-backs are a career property repeated on each year
        assert_eq!(y2023.bounce_back_score, Some(30.0));
    }

    #[test]
    fn test_cv_and_sample_std() {
        let rows = vec![
            result(1, "A", "2024-01-01", Some(10.0)),
            result(2, "A", "2024-01-02", Some(5.0)),
            result(3, "A", "2024-01-03", Some(8.0)),
        ];
        let out = ConsistencyEngine::new().compute(
            &rows,
            &ZScoreTable::default(),
            ConsistencyScope::Career,
        );
        let row = &out[0];
        assert_eq!(row.race_count, 3);
        assert_eq!(row.dnf_count, 0);
        let std = row.std_fis.unwrap();
        assert!((std - (19.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(row.cv_fis, Some(stats::round_to(std / (23.0 / 3.0), 2)));
    }

    #[test]
    fn test_single_race_has_no_std() {
        let rows = vec![result(1, "A", "2024-01-01", Some(10.0))];
        let out = ConsistencyEngine::new().compute(
            &rows,
            &ZScoreTable::default(),
            ConsistencyScope::Career,
        );
        assert_eq!(out[0].std_fis, None);
        assert_eq!(out[0].cv_fis, None);
    }
}
