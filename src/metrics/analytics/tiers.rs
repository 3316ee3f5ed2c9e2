//! Yearly performance tiers on a log-points scale.

use std::collections::BTreeMap;

use super::results::{with_points, RaceResult};
use crate::metrics::stats;

/// Tier bands as (upper percentile bound, label), checked in order.
const TIER_BANDS: [(f64, &str); 3] = [
    (0.1, "Tier 1 (Elite)"),
    (0.3, "Tier 2 (Contender)"),
    (0.7, "Tier 3 (Middle Pack)"),
];

const LAST_TIER: &str = "Tier 4 (Developing)";

/// Tier label for a percentile of log average points.
pub fn tier_for(percentile: f64) -> &'static str {
    TIER_BANDS
        .iter()
        .find(|(bound, _)| percentile < *bound)
        .map(|(_, label)| *label)
        .unwrap_or(LAST_TIER)
}

/// One row of the `performance_tiers` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceTier {
    pub fis_code: String,
    pub name: String,
    pub discipline: String,
    pub year: i32,
    pub race_count: i64,
    pub avg_fis_points: f64,
    /// Natural log of the average; empty when that is not finite
    pub log_avg_fis_points: Option<f64>,
    pub tier: Option<&'static str>,
}

/// Computes performance tiers.
#[derive(Debug, Default)]
pub struct TierEngine;

impl TierEngine {
    pub fn new() -> Self {
        Self
    }

    /// Tier every athlete-discipline-year against all others in the table.
    pub fn compute(&self, results: &[RaceResult]) -> Vec<PerformanceTier> {
        let mut groups: BTreeMap<(String, String, String, i32), Vec<f64>> = BTreeMap::new();
        for r in with_points(results) {
            let key = (r.fis_code.clone(), r.name.clone(), r.discipline.clone(), r.year());
            groups.entry(key).or_default().extend(r.fis_points);
        }

        let mut rows: Vec<PerformanceTier> = groups
            .into_iter()
            .filter_map(|((fis_code, name, discipline, year), points)| {
                let avg = stats::mean(&points)?;
                Some(PerformanceTier {
                    fis_code,
                    name,
                    discipline,
                    year,
                    race_count: points.len() as i64,
                    avg_fis_points: avg,
                    log_avg_fis_points: stats::finite(avg.ln()),
                    tier: None,
                })
            })
            .collect();

        let logs: Vec<Option<f64>> = rows.iter().map(|r| r.log_avg_fis_points).collect();
        for (row, pct) in rows.iter_mut().zip(stats::percentile_rank(&logs)) {
            row.tier = pct.map(tier_for);
        }
        rows
    }
}
