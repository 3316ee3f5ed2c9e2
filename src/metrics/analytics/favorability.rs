//! Hill favorability: do athletes beat their own running average here?

use std::collections::BTreeMap;

use super::results::{athlete_series, prior_average_deltas, sort_timeline, with_points, RaceResult};
use crate::metrics::stats;

/// Default minimum observations for a hill to be reported.
pub const DEFAULT_MIN_SKIER_COUNT: usize = 10;

/// Default multiplier for the confidence interval (95% normal).
pub const DEFAULT_CI_MULTIPLIER: f64 = 1.96;

/// One row of the `hill_favorability_analysis` table.
#[derive(Debug, Clone, PartialEq)]
pub struct HillFavorability {
    pub location: Option<String>,
    pub country: Option<String>,
    pub homologation_number: Option<String>,
    pub discipline: String,
    pub avg_performance_delta: f64,
    pub std_performance_delta: Option<f64>,
    /// Number of observations, not distinct athletes
    pub skier_count: i64,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
}

type HillKey = (Option<String>, Option<String>, Option<String>, String);

/// Computes hill favorability.
#[derive(Debug)]
pub struct FavorabilityEngine {
    min_skier_count: usize,
    ci_multiplier: f64,
}

impl Default for FavorabilityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SKIER_COUNT, DEFAULT_CI_MULTIPLIER)
    }
}

impl FavorabilityEngine {
    pub fn new(min_skier_count: usize, ci_multiplier: f64) -> Self {
        Self {
            min_skier_count,
            ci_multiplier,
        }
    }

    pub fn compute(&self, results: &[RaceResult]) -> Vec<HillFavorability> {
        let mut rows = with_points(results);
        sort_timeline(&mut rows);

        let mut hills: BTreeMap<HillKey, Vec<f64>> = BTreeMap::new();
        for series in athlete_series(&rows) {
            for (r, delta) in series.iter().zip(prior_average_deltas(series)) {
                let Some(delta) = delta else { continue };
                let key = (
                    r.location.clone(),
                    r.country.clone(),
                    r.homologation_number.clone(),
                    r.discipline.clone(),
                );
                hills.entry(key).or_default().push(delta);
            }
        }

        hills
            .into_iter()
            .filter(|(_, deltas)| deltas.len() >= self.min_skier_count)
            .filter_map(|((location, country, homologation_number, discipline), deltas)| {
                let avg = stats::mean(&deltas)?;
                let std = stats::sample_std(&deltas);
                let margin = std.map(|s| self.ci_multiplier * s / (deltas.len() as f64).sqrt());
                Some(HillFavorability {
                    location,
                    country,
                    homologation_number,
                    discipline,
                    avg_performance_delta: stats::round_to(avg, 3),
                    std_performance_delta: stats::round_opt(std, 3),
                    skier_count: deltas.len() as i64,
                    ci_lower: stats::round_opt(margin.map(|m| avg - m), 3),
                    ci_upper: stats::round_opt(margin.map(|m| avg + m), 3),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::analytics::results::fixtures::result;

    fn two_race_athletes(count: usize, first: f64, second: f64) -> Vec<RaceResult> {
        let mut rows = Vec::new();
        for i in 0..count {
            let code = format!("A{}", i);
            rows.push(result(1, &code, "2024-01-01", Some(first)));
            let mut r = result(2, &code, "2024-02-01", Some(second + i as f64));
            r.location = Some("Adelboden".to_string());
            rows.push(r);
        }
        rows
    }

    #[test]
    fn test_small_hills_dropped() {
        let rows = two_race_athletes(9, 30.0, 20.0);
        assert!(FavorabilityEngine::default().compute(&rows).is_empty());
    }

    #[test]
    fn test_favorability_interval() {
        let rows = two_race_athletes(10, 30.0, 20.0);
        let out = FavorabilityEngine::default().compute(&rows);
        // the first race of every athlete has no prior average
        assert_eq!(out.len(), 1);
        let hill = &out[0];
        assert_eq!(hill.location.as_deref(), Some("Adelboden"));
        assert_eq!(hill.skier_count, 10);
        // deltas 10, 9, ..., 1
        assert_eq!(hill.avg_performance_delta, 5.5);
        let std = stats::sample_std(&(1..=10).map(|v| v as f64).collect::<Vec<_>>()).unwrap();
        let margin = 1.96 * std / 10f64.sqrt();
        assert_eq!(hill.ci_lower, Some(stats::round_to(5.5 - margin, 3)));
        assert_eq!(hill.ci_upper, Some(stats::round_to(5.5 + margin, 3)));
    }
}
