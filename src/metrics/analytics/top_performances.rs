//! Best three races per athlete and discipline, by race z-score.

use std::collections::HashMap;

use chrono::NaiveDate;

use super::results::{sort_timeline, with_points, RaceResult, ZScoreTable};

/// Races kept per group.
pub const TOP_N: usize = 3;

/// Grouping of top performances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopScope {
    Career,
    Yearly,
}

/// One row of the top performance tables.
#[derive(Debug, Clone, PartialEq)]
pub struct TopPerformance {
    pub race_id: i64,
    pub fis_code: String,
    pub name: String,
    pub fis_points: f64,
    pub rank: Option<String>,
    pub date: NaiveDate,
    pub location: Option<String>,
    pub homologation_number: Option<String>,
    pub discipline: String,
    pub race_z_score: f64,
    /// Present only for yearly rows
    pub year: Option<i32>,
}

/// Selects top performances.
#[derive(Debug, Default)]
pub struct TopPerformanceEngine;

impl TopPerformanceEngine {
    pub fn new() -> Self {
        Self
    }

    /// Results ordered by descending z-score, at most three per group. Ties
    /// keep timeline order, so the earlier race wins.
    pub fn compute(
        &self,
        results: &[RaceResult],
        z_scores: &ZScoreTable,
        scope: TopScope,
    ) -> Vec<TopPerformance> {
        let mut rows = with_points(results);
        sort_timeline(&mut rows);

        let mut scored: Vec<(&RaceResult, f64, f64)> = rows
            .into_iter()
            .filter_map(|r| Some((r, r.fis_points?, z_scores.score_for(r)?)))
            .collect();
        // stable: equal scores stay in timeline order
        scored.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut taken: HashMap<(&str, &str, Option<i32>), usize> = HashMap::new();
        let mut out = Vec::new();
        for (r, fis_points, z) in scored {
            let year = match scope {
                TopScope::Career => None,
                TopScope::Yearly => Some(r.year()),
            };
            let count = taken
                .entry((r.fis_code.as_str(), r.discipline.as_str(), year))
                .or_insert(0);
            if *count >= TOP_N {
                continue;
            }
            *count += 1;

            out.push(TopPerformance {
                race_id: r.race_id,
                fis_code: r.fis_code.clone(),
                name: r.name.clone(),
                fis_points,
                rank: r.rank.clone(),
                date: r.date,
                location: r.location.clone(),
                homologation_number: r.homologation_number.clone(),
                discipline: r.discipline.clone(),
                race_z_score: z,
                year,
            });
        }
        out
    }
}
