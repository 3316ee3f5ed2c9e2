//! Field-relative gains ("strokes gained").
//!
//! Two reference groups are used: the whole race field, and the competitors
//! who started near the athlete (bib within a configurable range). Gains are
//! expressed in points (reference mean minus own points, positive is better)
//! and, for the bib window, also in z-score (own minus reference mean).

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::error::{AnalyticsError, AnalyticsResult};
use super::results::{AthleteCourseKey, AthleteKey, RaceResult, ZScoreTable};
use crate::metrics::stats;

/// Default half-width of the bib window.
pub const DEFAULT_BIB_RANGE: f64 = 5.0;

/// One row of the `strokes_gained` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokesGained {
    pub race_id: i64,
    pub fis_code: String,
    pub name: String,
    pub fis_points: f64,
    pub date: NaiveDate,
    pub location: Option<String>,
    pub homologation_number: Option<String>,
    pub discipline: String,
    /// Mean points of the race field
    pub avg_fis_points: f64,
    pub points_gained: f64,
    pub race_z_score: Option<f64>,
}

/// One row of the `strokes_gained_bib_relative` table.
#[derive(Debug, Clone, PartialEq)]
pub struct BibRelative {
    pub race_id: i64,
    pub fis_code: String,
    pub name: String,
    pub fis_points: f64,
    pub bib: Option<f64>,
    pub date: NaiveDate,
    pub location: Option<String>,
    pub homologation_number: Option<String>,
    pub discipline: String,
    pub race_type: Option<String>,
    pub race_z_score: Option<f64>,
    pub local_avg_fis_points: Option<f64>,
    pub bib_strokes_gained: Option<f64>,
    pub local_avg_race_z_score: Option<f64>,
    pub bib_zscore_delta: Option<f64>,
}

/// Aggregated gains for an athlete, optionally on one course.
#[derive(Debug, Clone, PartialEq)]
pub struct GainSummary {
    pub fis_code: String,
    pub name: String,
    pub discipline: String,
    pub homologation_number: Option<String>,
    pub location: Option<String>,
    pub race_count: i64,
    pub mean_points_gained: Option<f64>,
    pub std_points_gained: Option<f64>,
    pub mean_race_z_score: Option<f64>,
    pub std_race_z_score: Option<f64>,
    /// Bib-relative summaries only
    pub mean_bib_zscore_delta: Option<f64>,
    pub std_bib_zscore_delta: Option<f64>,
}

#[derive(Default)]
struct GainAccumulator {
    rows: i64,
    gained: Vec<f64>,
    z: Vec<f64>,
    delta: Vec<f64>,
}

impl GainAccumulator {
    fn summary(self, athlete: AthleteKey, course: Option<(String, String)>) -> GainSummary {
        let (homologation_number, location) = match course {
            Some((h, l)) => (Some(h), Some(l)),
            None => (None, None),
        };
        GainSummary {
            fis_code: athlete.fis_code,
            name: athlete.name,
            discipline: athlete.discipline,
            homologation_number,
            location,
            race_count: self.rows,
            mean_points_gained: stats::mean(&self.gained),
            std_points_gained: stats::sample_std(&self.gained),
            mean_race_z_score: stats::mean(&self.z),
            std_race_z_score: stats::sample_std(&self.z),
            mean_bib_zscore_delta: stats::mean(&self.delta),
            std_bib_zscore_delta: stats::sample_std(&self.delta),
        }
    }
}

/// Computes field-relative and bib-relative gains.
#[derive(Debug)]
pub struct StrokesGainedEngine {
    bib_range: f64,
}

impl Default for StrokesGainedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StrokesGainedEngine {
    pub fn new() -> Self {
        Self {
            bib_range: DEFAULT_BIB_RANGE,
        }
    }

    pub fn with_bib_range(bib_range: f64) -> Self {
        Self { bib_range }
    }

    /// Gain versus the full race field, for every result with points.
    pub fn field_relative(&self, results: &[RaceResult], z: &ZScoreTable) -> Vec<StrokesGained> {
        let mut out = Vec::new();
        for (_, field) in races_with_points(results) {
            let points: Vec<f64> = field.iter().filter_map(|r| r.fis_points).collect();
            let Some(avg) = stats::mean(&points) else {
                continue;
            };
            for r in field {
                let Some(pts) = r.fis_points else { continue };
                out.push(StrokesGained {
                    race_id: r.race_id,
                    fis_code: r.fis_code.clone(),
                    name: r.name.clone(),
                    fis_points: pts,
                    date: r.date,
                    location: r.location.clone(),
                    homologation_number: r.homologation_number.clone(),
                    discipline: r.discipline.clone(),
                    avg_fis_points: avg,
                    points_gained: avg - pts,
                    race_z_score: z.score_for(r),
                });
            }
        }
        out
    }

    /// Career summary per athlete and discipline.
    pub fn career_summary(rows: &[StrokesGained]) -> Vec<GainSummary> {
        let mut groups: BTreeMap<AthleteKey, GainAccumulator> = BTreeMap::new();
        for r in rows {
            let key = AthleteKey {
                fis_code: r.fis_code.clone(),
                name: r.name.clone(),
                discipline: r.discipline.clone(),
            };
            let acc = groups.entry(key).or_default();
            acc.rows += 1;
            acc.gained.push(r.points_gained);
            acc.z.extend(r.race_z_score);
        }
        groups
            .into_iter()
            .map(|(key, acc)| acc.summary(key, None))
            .collect()
    }

    /// Summary per athlete, discipline and course.
    pub fn location_summary(rows: &[StrokesGained]) -> Vec<GainSummary> {
        let mut groups: BTreeMap<AthleteCourseKey, GainAccumulator> = BTreeMap::new();
        for r in rows {
            let (Some(h), Some(l)) = (&r.homologation_number, &r.location) else {
                continue;
            };
            let key = AthleteCourseKey {
                athlete: AthleteKey {
                    fis_code: r.fis_code.clone(),
                    name: r.name.clone(),
                    discipline: r.discipline.clone(),
                },
                homologation_number: h.clone(),
                location: l.clone(),
            };
            let acc = groups.entry(key).or_default();
            acc.rows += 1;
            acc.gained.push(r.points_gained);
            acc.z.extend(r.race_z_score);
        }
        groups
            .into_iter()
            .map(|(key, acc)| {
                acc.summary(key.athlete, Some((key.homologation_number, key.location)))
            })
            .collect()
    }

    /// Gain versus competitors who started within the bib window.
    ///
    /// Each race field is sorted by bib and swept once with two moving window
    /// bounds, so the work per race is bounded by its field size times the
    /// window occupancy. Results without a bib, or whose window holds nobody
    /// else, carry empty local values.
    ///
    /// `cancelled` is checked before every race.
    pub fn bib_relative(
        &self,
        results: &[RaceResult],
        z: &ZScoreTable,
        cancelled: &dyn Fn() -> bool,
    ) -> AnalyticsResult<Vec<BibRelative>> {
        let mut out = Vec::new();
        for (_, field) in races_with_points(results) {
            if cancelled() {
                return Err(AnalyticsError::Cancelled);
            }
            let mut seeded: Vec<&RaceResult> = field.iter().copied().filter(|r| r.bib.is_some()).collect();
            seeded.sort_by(|a, b| bib_of(a).total_cmp(&bib_of(b)));
            let bibs: Vec<f64> = seeded.iter().map(|r| bib_of(r)).collect();
            let scores: Vec<Option<f64>> = seeded.iter().map(|r| z.score_for(r)).collect();

            let mut lo = 0;
            let mut hi = 0;
            for (i, r) in seeded.iter().enumerate() {
                let bib = bibs[i];
                while bibs[lo] < bib - self.bib_range {
                    lo += 1;
                }
                while hi < seeded.len() && bibs[hi] <= bib + self.bib_range {
                    hi += 1;
                }

                let neighbours: Vec<usize> = (lo..hi)
                    .filter(|&j| seeded[j].fis_code != r.fis_code)
                    .collect();
                let (local_fis, local_z) = if neighbours.is_empty() {
                    (None, None)
                } else {
                    let pts: Vec<f64> = neighbours.iter().filter_map(|&j| seeded[j].fis_points).collect();
                    let zs: Vec<f64> = neighbours.iter().filter_map(|&j| scores[j]).collect();
                    (stats::mean(&pts), stats::mean(&zs))
                };

                out.push(bib_row(r, scores[i], local_fis, local_z));
            }

            for r in field.iter().filter(|r| r.bib.is_none()) {
                out.push(bib_row(r, z.score_for(r), None, None));
            }
        }
        Ok(out)
    }

    /// Bib-relative summary per athlete, discipline and course. Only results
    /// with a bib take part.
    pub fn bib_location_summary(rows: &[BibRelative]) -> Vec<GainSummary> {
        let mut groups: BTreeMap<AthleteCourseKey, GainAccumulator> = BTreeMap::new();
        for r in rows.iter().filter(|r| r.bib.is_some()) {
            let (Some(h), Some(l)) = (&r.homologation_number, &r.location) else {
                continue;
            };
            let key = AthleteCourseKey {
                athlete: AthleteKey {
                    fis_code: r.fis_code.clone(),
                    name: r.name.clone(),
                    discipline: r.discipline.clone(),
                },
                homologation_number: h.clone(),
                location: l.clone(),
            };
            let acc = groups.entry(key).or_default();
            acc.rows += 1;
            acc.gained.extend(r.bib_strokes_gained);
            acc.z.extend(r.race_z_score);
            acc.delta.extend(r.bib_zscore_delta);
        }
        groups
            .into_iter()
            .map(|(key, acc)| {
                acc.summary(key.athlete, Some((key.homologation_number, key.location)))
            })
            .collect()
    }
}

fn races_with_points(results: &[RaceResult]) -> BTreeMap<i64, Vec<&RaceResult>> {
    let mut races: BTreeMap<i64, Vec<&RaceResult>> = BTreeMap::new();
    for r in results.iter().filter(|r| r.has_points()) {
        races.entry(r.race_id).or_default().push(r);
    }
    races
}

fn bib_of(r: &RaceResult) -> f64 {
    r.bib.unwrap_or(f64::NAN)
}

fn bib_row(
    r: &RaceResult,
    race_z_score: Option<f64>,
    local_avg_fis_points: Option<f64>,
    local_avg_race_z_score: Option<f64>,
) -> BibRelative {
    let fis_points = r.fis_points.unwrap_or(f64::NAN);
    BibRelative {
        race_id: r.race_id,
        fis_code: r.fis_code.clone(),
        name: r.name.clone(),
        fis_points,
        bib: r.bib,
        date: r.date,
        location: r.location.clone(),
        homologation_number: r.homologation_number.clone(),
        discipline: r.discipline.clone(),
        race_type: r.race_type.clone(),
        race_z_score,
        local_avg_fis_points,
        bib_strokes_gained: local_avg_fis_points.map(|avg| avg - fis_points),
        local_avg_race_z_score,
        bib_zscore_delta: match (race_z_score, local_avg_race_z_score) {
            (Some(own), Some(local)) => Some(own - local),
            _ => None,
        },
    }
}
