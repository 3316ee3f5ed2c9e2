//! Course profiles and the hill difficulty index.
//!
//! Both tables start from per-race course metrics: the setup facts of the
//! race (vertical drop, start altitude, gates) plus what the field made of
//! it (winning time, winner's points, non-finish rate, starters). Only races
//! with a recorded winner count.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::results::{RaceDetail, RaceResult};
use crate::metrics::stats::{self, ColumnSummary};

/// Version tag written with every course profile row.
pub const PROFILE_ETL_VERSION: &str = "v1.1";

/// Convert a race time such as `1:12.34` or `58.21` to seconds.
///
/// Blank or unparseable input has no time.
pub fn parse_race_time(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let seconds = if raw.contains(':') {
        let mut parts = raw.split(':');
        let minutes: f64 = parts.next()?.trim().parse().ok()?;
        let seconds: f64 = parts.next()?.trim().parse().ok()?;
        minutes * 60.0 + seconds
    } else {
        raw.parse().ok()?
    };
    stats::finite(seconds)
}

/// Render decimal minutes as `m:ss.xx`.
pub fn format_minutes(minutes: f64) -> Option<String> {
    if !minutes.is_finite() {
        return None;
    }
    // whole hundredths of a second, so 59.999s carries into the minute
    let hundredths = (minutes * 6000.0).round() as i64;
    let m = hundredths / 6000;
    let s = (hundredths % 6000) as f64 / 100.0;
    Some(format!("{}:{:05.2}", m, s))
}

/// Course metrics of one race.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRaceMetrics {
    pub race_id: i64,
    pub location: Option<String>,
    pub country: Option<String>,
    pub discipline: Option<String>,
    pub homologation_number: Option<String>,
    pub vertical_drop: Option<f64>,
    pub start_altitude: Option<f64>,
    pub gate_count: Option<f64>,
    /// Winner's time in minutes
    pub winning_time_min: Option<f64>,
    pub winning_fis_points: Option<f64>,
    /// Share of the field with a non-finish rank
    pub dnf_rate: f64,
    pub starters_count: f64,
}

/// Join race details with their results into per-race course metrics.
pub fn course_race_metrics(details: &[RaceDetail], results: &[RaceResult]) -> Vec<CourseRaceMetrics> {
    let mut fields: HashMap<i64, Vec<&RaceResult>> = HashMap::new();
    for r in results {
        fields.entry(r.race_id).or_default().push(r);
    }

    details
        .iter()
        .filter_map(|d| {
            let field = fields.get(&d.race_id)?;
            let winner = field.iter().find(|r| r.is_winner())?;
            let non_finish = field.iter().filter(|r| r.is_non_finish()).count();
            Some(CourseRaceMetrics {
                race_id: d.race_id,
                location: d.location.clone(),
                country: d.country.clone(),
                discipline: d.discipline.clone(),
                homologation_number: d.homologation_number.clone(),
                vertical_drop: d.vertical_drop,
                start_altitude: d.start_altitude,
                gate_count: d.gate_count,
                winning_time_min: winner
                    .final_time
                    .as_deref()
                    .and_then(parse_race_time)
                    .map(|s| s / 60.0),
                winning_fis_points: winner.fis_points,
                dnf_rate: non_finish as f64 / field.len() as f64,
                starters_count: field.len() as f64,
            })
        })
        .collect()
}

/// Course identity shared by profile rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CourseKey {
    pub location: String,
    pub homologation_number: String,
    pub discipline: String,
    pub country: String,
}

/// One row of the `basic_hill_info` table.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseProfile {
    pub key: CourseKey,
    pub race_count: i64,
    pub vertical_drop: ColumnSummary,
    pub start_altitude: ColumnSummary,
    pub gate_count: ColumnSummary,
    pub winning_time: ColumnSummary,
    pub fis_points: ColumnSummary,
    pub dnf_rate: ColumnSummary,
    pub starters: ColumnSummary,
}

/// Summarize race metrics per course. Races missing any part of the course
/// identity are left out.
pub fn course_profiles(metrics: &[CourseRaceMetrics]) -> Vec<CourseProfile> {
    let mut groups: BTreeMap<CourseKey, Vec<&CourseRaceMetrics>> = BTreeMap::new();
    for m in metrics {
        let (Some(location), Some(homologation_number), Some(discipline), Some(country)) = (
            m.location.clone(),
            m.homologation_number.clone(),
            m.discipline.clone(),
            m.country.clone(),
        ) else {
            continue;
        };
        groups
            .entry(CourseKey {
                location,
                homologation_number,
                discipline,
                country,
            })
            .or_default()
            .push(m);
    }

    let summarize = |races: &[&CourseRaceMetrics], f: fn(&CourseRaceMetrics) -> Option<f64>| {
        ColumnSummary::of(&stats::present(races.iter().map(|m| f(m)))).rounded(2)
    };

    groups
        .into_iter()
        .map(|(key, races)| CourseProfile {
            race_count: races.len() as i64,
            vertical_drop: summarize(&races, |m| m.vertical_drop),
            start_altitude: summarize(&races, |m| m.start_altitude),
            gate_count: summarize(&races, |m| m.gate_count),
            winning_time: summarize(&races, |m| m.winning_time_min),
            fis_points: summarize(&races, |m| m.winning_fis_points),
            dnf_rate: summarize(&races, |m| Some(m.dnf_rate)),
            starters: summarize(&races, |m| Some(m.starters_count)),
            key,
        })
        .collect()
}

/// Weights and clipping band of the hill difficulty index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyWeights {
    #[serde(rename = "winning_time_weight")]
    pub winning_time: f64,
    #[serde(rename = "gate_count_weight")]
    pub gate_count: f64,
    #[serde(rename = "start_altitude_weight")]
    pub start_altitude: f64,
    #[serde(rename = "vertical_drop_weight")]
    pub vertical_drop: f64,
    #[serde(rename = "dnf_rate_weight")]
    pub dnf_rate: f64,
    /// Lower clipping quantile
    pub lower_quantile: f64,
    /// Upper clipping quantile
    pub upper_quantile: f64,
}

impl Default for DifficultyWeights {
    fn default() -> Self {
        Self {
            winning_time: 0.20,
            gate_count: 0.10,
            start_altitude: 0.10,
            vertical_drop: 0.20,
            dnf_rate: 0.40,
            lower_quantile: 0.05,
            upper_quantile: 0.95,
        }
    }
}

impl DifficultyWeights {
    pub fn total(&self) -> f64 {
        self.winning_time + self.gate_count + self.start_altitude + self.vertical_drop + self.dnf_rate
    }
}

/// Clip to the quantile band and rescale to 0-100.
///
/// A band of zero width puts every present value at 50. Missing values stay
/// missing.
pub fn normalize(values: &[Option<f64>], lower_q: f64, upper_q: f64) -> Vec<Option<f64>> {
    let present = stats::present(values.iter().copied());
    let (Some(lo), Some(hi)) = (stats::quantile(&present, lower_q), stats::quantile(&present, upper_q))
    else {
        return values.iter().map(|v| v.map(|_| 50.0)).collect();
    };
    let width = hi - lo;
    values
        .iter()
        .map(|v| {
            let x = (*v).filter(|x| !x.is_nan())?;
            if width > 0.0 {
                Some(100.0 * (x.clamp(lo, hi) - lo) / width)
            } else {
                Some(50.0)
            }
        })
        .collect()
}

/// One row of the `hdi` table.
#[derive(Debug, Clone, PartialEq)]
pub struct HillDifficulty {
    pub location: Option<String>,
    pub country: Option<String>,
    pub discipline: Option<String>,
    pub homologation_number: Option<String>,
    pub race_count: i64,
    /// `m:ss.xx`
    pub avg_winning_time: Option<String>,
    pub winning_time_norm: Option<f64>,
    pub avg_gate_count: Option<f64>,
    pub gate_count_norm: Option<f64>,
    pub avg_start_altitude: Option<f64>,
    pub start_altitude_norm: Option<f64>,
    pub avg_vertical_drop: Option<f64>,
    pub vertical_drop_norm: Option<f64>,
    pub avg_dnf_rate: Option<f64>,
    pub dnf_rate_norm: Option<f64>,
    pub hill_difficulty_index: Option<f64>,
}

type HdiKey = (Option<String>, Option<String>, Option<String>, Option<String>);

/// Computes the hill difficulty index.
#[derive(Debug, Default)]
pub struct DifficultyEngine {
    weights: DifficultyWeights,
}

impl DifficultyEngine {
    pub fn new(weights: DifficultyWeights) -> Self {
        Self { weights }
    }

    /// Average each metric per course, normalize within discipline, and
    /// combine. Courses are ordered by location, country, discipline and
    /// homologation number.
    pub fn compute(&self, metrics: &[CourseRaceMetrics]) -> Vec<HillDifficulty> {
        let mut groups: BTreeMap<HdiKey, Vec<&CourseRaceMetrics>> = BTreeMap::new();
        for m in metrics {
            let key = (
                m.location.clone(),
                m.country.clone(),
                m.discipline.clone(),
                m.homologation_number.clone(),
            );
            groups.entry(key).or_default().push(m);
        }

        let avg = |races: &[&CourseRaceMetrics], f: fn(&CourseRaceMetrics) -> Option<f64>| {
            stats::mean(&stats::present(races.iter().map(|m| f(m))))
        };

        let mut rows: Vec<HillDifficulty> = groups
            .into_iter()
            .map(|((location, country, discipline, homologation_number), races)| HillDifficulty {
                location,
                country,
                discipline,
                homologation_number,
                race_count: races.len() as i64,
                // raw minutes until formatted below
                avg_winning_time: None,
                winning_time_norm: avg(&races, |m| m.winning_time_min),
                avg_gate_count: avg(&races, |m| m.gate_count),
                gate_count_norm: None,
                avg_start_altitude: avg(&races, |m| m.start_altitude),
                start_altitude_norm: None,
                avg_vertical_drop: avg(&races, |m| m.vertical_drop),
                vertical_drop_norm: None,
                avg_dnf_rate: avg(&races, |m| Some(m.dnf_rate)),
                dnf_rate_norm: None,
                hill_difficulty_index: None,
            })
            .collect();

        // courses without a discipline are not normalized and get no index
        let mut by_discipline: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, row) in rows.iter_mut().enumerate() {
            match &row.discipline {
                Some(discipline) => by_discipline.entry(discipline.clone()).or_default().push(i),
                None => {
                    row.avg_winning_time = row.winning_time_norm.take().and_then(format_minutes);
                }
            }
        }

        let (lo_q, hi_q) = (self.weights.lower_quantile, self.weights.upper_quantile);
        for members in by_discipline.values() {
            let column = |f: fn(&HillDifficulty) -> Option<f64>| -> Vec<Option<f64>> {
                let values: Vec<Option<f64>> = members.iter().map(|&i| f(&rows[i])).collect();
                normalize(&values, lo_q, hi_q)
            };
            let wt = column(|r| r.winning_time_norm);
            let gate = column(|r| r.avg_gate_count);
            let start = column(|r| r.avg_start_altitude);
            let vdrop = column(|r| r.avg_vertical_drop);
            let dnf = column(|r| r.avg_dnf_rate);

            for (j, &i) in members.iter().enumerate() {
                let row = &mut rows[i];
                row.avg_winning_time = row.winning_time_norm.and_then(format_minutes);
                row.winning_time_norm = stats::round_opt(wt[j], 2);
                row.gate_count_norm = stats::round_opt(gate[j], 2);
                row.start_altitude_norm = stats::round_opt(start[j], 2);
                row.vertical_drop_norm = stats::round_opt(vdrop[j], 2);
                row.dnf_rate_norm = stats::round_opt(dnf[j], 2);
                row.hill_difficulty_index = self.index(row);
            }
        }

        for row in &mut rows {
            row.avg_gate_count = stats::round_opt(row.avg_gate_count, 2);
            row.avg_start_altitude = stats::round_opt(row.avg_start_altitude, 2);
            row.avg_vertical_drop = stats::round_opt(row.avg_vertical_drop, 2);
            row.avg_dnf_rate = stats::round_opt(row.avg_dnf_rate, 2);
        }

        tracing::debug!("Computed difficulty for {} courses", rows.len());
        rows
    }

    fn index(&self, row: &HillDifficulty) -> Option<f64> {
        let w = &self.weights;
        let hdi = w.winning_time * row.winning_time_norm?
            + w.gate_count * row.gate_count_norm?
            + w.start_altitude * row.start_altitude_norm?
            + w.vertical_drop * row.vertical_drop_norm?
            + w.dnf_rate * row.dnf_rate_norm?;
        Some(stats::round_to(hdi, 2))
    }
}
