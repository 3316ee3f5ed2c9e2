//! Athlete sensitivity to course traits.
//!
//! Each result is joined to the profile of the course it was raced on. Two
//! views come out of that join: a per-athlete linear regression of race
//! z-score on the course traits, and a bucketed table of how an athlete
//! performs against their own running average in each trait bucket.

use std::collections::{BTreeMap, HashMap};

use super::difficulty::CourseProfile;
use super::error::{AnalyticsError, AnalyticsResult};
use super::results::{
    athlete_series, prior_average_deltas, sort_timeline, with_points, AthleteKey, RaceResult,
    ZScoreTable,
};
use crate::metrics::binning::QuantileBins;
use crate::metrics::regression::fit_ols;
use crate::metrics::stats;

/// Minimum complete races before an athlete gets a regression.
pub const DEFAULT_MIN_RACES: usize = 8;

/// Buckets per trait.
pub const DEFAULT_BIN_COUNT: usize = 5;

/// Course means used as regression features.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseFeatures {
    pub location: String,
    pub discipline: String,
    pub homologation_number: String,
    pub mean_gate_count: Option<f64>,
    pub mean_start_altitude: Option<f64>,
    pub mean_vertical_drop: Option<f64>,
    pub mean_winning_time: Option<f64>,
    pub mean_dnf_rate: Option<f64>,
}

impl From<&CourseProfile> for CourseFeatures {
    fn from(p: &CourseProfile) -> Self {
        Self {
            location: p.key.location.clone(),
            discipline: p.key.discipline.clone(),
            homologation_number: p.key.homologation_number.clone(),
            mean_gate_count: p.gate_count.mean,
            mean_start_altitude: p.start_altitude.mean,
            mean_vertical_drop: p.vertical_drop.mean,
            mean_winning_time: p.winning_time.mean,
            mean_dnf_rate: p.dnf_rate.mean,
        }
    }
}

/// A course trait an athlete may be sensitive to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CourseTrait {
    GateCount,
    StartAltitude,
    VerticalDrop,
    WinningTime,
    DnfRate,
    Bib,
}

impl CourseTrait {
    pub const ALL: [CourseTrait; 6] = [
        CourseTrait::GateCount,
        CourseTrait::StartAltitude,
        CourseTrait::VerticalDrop,
        CourseTrait::WinningTime,
        CourseTrait::DnfRate,
        CourseTrait::Bib,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CourseTrait::GateCount => "gate_count",
            CourseTrait::StartAltitude => "start_altitude",
            CourseTrait::VerticalDrop => "vertical_drop",
            CourseTrait::WinningTime => "winning_time",
            CourseTrait::DnfRate => "dnf_rate",
            CourseTrait::Bib => "bib",
        }
    }

    /// Trait value of one result raced on `course`. The bib is the
    /// athlete's own; every other trait is a course mean.
    pub fn value(&self, result: &RaceResult, course: Option<&CourseFeatures>) -> Option<f64> {
        match self {
            CourseTrait::Bib => result.bib,
            CourseTrait::GateCount => course?.mean_gate_count,
            CourseTrait::StartAltitude => course?.mean_start_altitude,
            CourseTrait::VerticalDrop => course?.mean_vertical_drop,
            CourseTrait::WinningTime => course?.mean_winning_time,
            CourseTrait::DnfRate => course?.mean_dnf_rate,
        }
        .filter(|v| v.is_finite())
    }
}

/// Course features keyed for the result join.
#[derive(Debug, Default)]
pub struct CourseIndex {
    courses: HashMap<(String, String, String), Vec<CourseFeatures>>,
}

impl CourseIndex {
    pub fn new(features: impl IntoIterator<Item = CourseFeatures>) -> Self {
        let mut courses: HashMap<(String, String, String), Vec<CourseFeatures>> = HashMap::new();
        for f in features {
            let key = (f.location.clone(), f.discipline.clone(), f.homologation_number.clone());
            courses.entry(key).or_default().push(f);
        }
        Self { courses }
    }

    /// Left join: every matching profile, or a single `None` when there is
    /// no match. A course profiled under several countries matches more
    /// than once.
    pub fn matches(&self, result: &RaceResult) -> Vec<Option<&CourseFeatures>> {
        let key = match (&result.location, &result.homologation_number) {
            (Some(l), Some(h)) => (l.clone(), result.discipline.clone(), h.clone()),
            _ => return vec![None],
        };
        match self.courses.get(&key) {
            Some(list) if !list.is_empty() => list.iter().map(Some).collect(),
            _ => vec![None],
        }
    }

    pub fn len(&self) -> usize {
        self.courses.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

/// One row of the `course_regression` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitCoefficient {
    pub fis_code: String,
    pub name: String,
    pub discipline: String,
    pub course_trait: CourseTrait,
    pub coefficient: f64,
    pub r_squared: f64,
    pub race_count: i64,
}

/// One row of the `course_trait` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitBin {
    pub fis_code: String,
    pub name: String,
    pub discipline: String,
    pub course_trait: CourseTrait,
    /// Bucket interval, e.g. `(40.0, 45.5]`
    pub trait_bin: String,
    pub avg_performance_delta: Option<f64>,
    pub avg_z_score: Option<f64>,
    pub race_count: i64,
}

/// Computes course regressions and trait buckets.
#[derive(Debug)]
pub struct CourseTraitEngine {
    min_races: usize,
    bin_count: usize,
}

impl Default for CourseTraitEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RACES, DEFAULT_BIN_COUNT)
    }
}

impl CourseTraitEngine {
    pub fn new(min_races: usize, bin_count: usize) -> Self {
        Self {
            min_races,
            bin_count,
        }
    }

    /// Regress race z-score on all traits for every athlete with enough
    /// complete observations, checking `cancelled` before every fit.
    pub fn regress(
        &self,
        results: &[RaceResult],
        z_scores: &ZScoreTable,
        courses: &CourseIndex,
        cancelled: &dyn Fn() -> bool,
    ) -> AnalyticsResult<Vec<TraitCoefficient>> {
        let mut rows = with_points(results);
        sort_timeline(&mut rows);

        let mut groups: BTreeMap<AthleteKey, (Vec<Vec<f64>>, Vec<f64>)> = BTreeMap::new();
        for r in rows {
            let Some(z) = z_scores.score_for(r) else {
                continue;
            };
            for course in courses.matches(r) {
                let features: Option<Vec<f64>> =
                    CourseTrait::ALL.iter().map(|t| t.value(r, course)).collect();
                let Some(features) = features else { continue };
                let (x, y) = groups.entry(r.athlete_key()).or_default();
                x.push(features);
                y.push(z);
            }
        }

        let mut out = Vec::new();
        for (key, (x, y)) in groups {
            if x.len() < self.min_races.max(2) {
                continue;
            }
            if cancelled() {
                return Err(AnalyticsError::Cancelled);
            }
            let fit = fit_ols(&x, &y)?;
            for (course_trait, coef) in CourseTrait::ALL.iter().zip(&fit.coefficients) {
                out.push(TraitCoefficient {
                    fis_code: key.fis_code.clone(),
                    name: key.name.clone(),
                    discipline: key.discipline.clone(),
                    course_trait: *course_trait,
                    coefficient: stats::round_to(*coef, 4),
                    r_squared: stats::round_to(fit.r_squared, 4),
                    race_count: x.len() as i64,
                });
            }
        }

        tracing::debug!("Fitted {} trait coefficients", out.len());
        Ok(out)
    }

    /// Bucket every trait over the whole population and average each
    /// athlete's running-average delta and z-score per bucket.
    pub fn bin_traits(
        &self,
        results: &[RaceResult],
        z_scores: &ZScoreTable,
        courses: &CourseIndex,
    ) -> Vec<TraitBin> {
        let mut rows = with_points(results);
        sort_timeline(&mut rows);

        // (result, delta) for every result past the athlete's first race
        let mut observed: Vec<(&RaceResult, f64)> = Vec::new();
        for series in athlete_series(&rows) {
            for (r, delta) in series.iter().zip(prior_average_deltas(series)) {
                if let Some(d) = delta {
                    observed.push((r, d));
                }
            }
        }

        let mut out = Vec::new();
        for course_trait in CourseTrait::ALL {
            let mut valued: Vec<(&RaceResult, f64, f64)> = Vec::new();
            for &(r, delta) in &observed {
                for course in courses.matches(r) {
                    if let Some(v) = course_trait.value(r, course) {
                        valued.push((r, delta, v));
                    }
                }
            }

            let values: Vec<f64> = valued.iter().map(|(_, _, v)| *v).collect();
            let Some(bins) = QuantileBins::fit(&values, self.bin_count) else {
                tracing::debug!("Not enough spread to bucket {}", course_trait.name());
                continue;
            };

            let mut groups: BTreeMap<(AthleteKey, usize), (Vec<f64>, Vec<f64>)> = BTreeMap::new();
            for (r, delta, v) in valued {
                let Some(bin) = bins.assign(v) else { continue };
                let (deltas, zs) = groups.entry((r.athlete_key(), bin)).or_default();
                deltas.push(delta);
                zs.extend(z_scores.score_for(r));
            }

            for ((key, bin), (deltas, zs)) in groups {
                out.push(TraitBin {
                    fis_code: key.fis_code,
                    name: key.name,
                    discipline: key.discipline,
                    course_trait,
                    trait_bin: bins.label(bin).unwrap_or_default().to_string(),
                    avg_performance_delta: stats::round_opt(stats::mean(&deltas), 2),
                    avg_z_score: stats::round_opt(stats::mean(&zs), 2),
                    race_count: deltas.len() as i64,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::analytics::results::fixtures::{result, with_bib};

    fn course(location: &str, gates: f64, altitude: f64, drop: f64, time: f64, dnf: f64) -> CourseFeatures {
        CourseFeatures {
            location: location.to_string(),
            discipline: "GS".to_string(),
            homologation_number: "12345/10/20".to_string(),
            mean_gate_count: Some(gates),
            mean_start_altitude: Some(altitude),
            mean_vertical_drop: Some(drop),
            mean_winning_time: Some(time),
            mean_dnf_rate: Some(dnf),
        }
    }

    fn raced_at(race_id: i64, fis_code: &str, location: &str, points: f64, bib: f64) -> RaceResult {
        let mut r = with_bib(
            result(race_id, fis_code, &format!("2024-01-{:02}", race_id), Some(points)),
            bib,
        );
        r.location = Some(location.to_string());
        r
    }

    #[test]
    fn test_course_index_left_join() {
        let index = CourseIndex::new(vec![
            course("Soelden", 40.0, 2000.0, 400.0, 1.2, 0.1),
            course("Soelden", 41.0, 2000.0, 400.0, 1.2, 0.1),
        ]);
        let here = raced_at(1, "A", "Soelden", 10.0, 1.0);
        let elsewhere = raced_at(2, "A", "Wengen", 10.0, 1.0);
        assert_eq!(index.matches(&here).len(), 2);
        assert_eq!(index.matches(&elsewhere), vec![None]);
        assert_eq!(CourseTrait::Bib.value(&elsewhere, None), Some(1.0));
        assert_eq!(CourseTrait::GateCount.value(&elsewhere, None), None);
    }

    #[test]
    fn test_regression_needs_min_races() {
        let index = CourseIndex::new(vec![course("Soelden", 40.0, 2000.0, 400.0, 1.2, 0.1)]);
        let results: Vec<RaceResult> = (1..=3)
            .map(|i| raced_at(i, "A", "Soelden", 10.0 * i as f64, i as f64))
            .collect();
        let z = ZScoreTable::from_scores(results.iter().map(|r| (r.race_id, r.fis_code.clone(), 0.5)));
        let out = CourseTraitEngine::default().regress(&results, &z, &index, &|| false).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_regression_recovers_bib_slope() {
        let locations = ["Soelden", "Adelboden", "Wengen", "Kitzbuehel"];
        let index = CourseIndex::new(vec![
            course("Soelden", 40.0, 2000.0, 400.0, 1.20, 0.10),
            course("Adelboden", 45.0, 1900.0, 420.0, 1.30, 0.20),
            course("Wengen", 50.0, 2100.0, 380.0, 1.25, 0.15),
            course("Kitzbuehel", 42.0, 1700.0, 450.0, 1.40, 0.30),
        ]);
        let results: Vec<RaceResult> = (1..=10)
            .map(|i| raced_at(i, "A", locations[(i as usize) % 4], 10.0, i as f64))
            .collect();
        // z falls by 0.1 per bib, independent of the course
        let z = ZScoreTable::from_scores(
            results
                .iter()
                .map(|r| (r.race_id, r.fis_code.clone(), 2.0 - 0.1 * r.bib.unwrap())),
        );
        let out = CourseTraitEngine::default().regress(&results, &z, &index, &|| false).unwrap();
        assert_eq!(out.len(), CourseTrait::ALL.len());
        let bib = out.iter().find(|c| c.course_trait == CourseTrait::Bib).unwrap();
        assert_eq!(bib.coefficient, -0.1);
        assert_eq!(bib.r_squared, 1.0);
        assert_eq!(bib.race_count, 10);

        let stopped = CourseTraitEngine::default().regress(&results, &z, &index, &|| true);
        assert!(matches!(stopped, Err(AnalyticsError::Cancelled)));
    }

    #[test]
    fn test_trait_bins_skip_first_race() {
        let index = CourseIndex::default();
        let mut results = Vec::new();
        for (i, code) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            results.push(raced_at(1, code, "Soelden", 20.0, (i + 1) as f64));
            results.push(raced_at(2, code, "Soelden", 10.0, (i + 1) as f64));
        }
        let out = CourseTraitEngine::default().bin_traits(&results, &ZScoreTable::default(), &index);
        // only the bib trait has values without course profiles
        assert!(out.iter().all(|b| b.course_trait == CourseTrait::Bib));
        assert_eq!(out.len(), 5);
        for row in &out {
            assert_eq!(row.race_count, 1);
            assert_eq!(row.avg_performance_delta, Some(10.0));
            assert_eq!(row.avg_z_score, None);
        }
    }

    #[test]
    fn test_trait_without_spread_is_skipped() {
        let index = CourseIndex::default();
        let results = vec![
            raced_at(1, "A", "Soelden", 20.0, 7.0),
            raced_at(2, "A", "Soelden", 10.0, 7.0),
        ];
        let out = CourseTraitEngine::default().bin_traits(&results, &ZScoreTable::default(), &index);
        assert!(out.is_empty());
    }
}
