//! Race results as seen by the feature engines.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

/// Rank codes counted as a non-finish when computing course DNF rates.
pub const NON_FINISH_CODES: [&str; 6] = ["DNF1", "DSQ1", "DNF", "DSQ", "DNF2", "DSQ2"];

/// One competitor's result in one race, joined with the race metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceResult {
    pub race_id: i64,
    pub fis_code: String,
    pub name: String,
    /// Finishing place, or a status code such as `DNF1` / `DSQ2`
    pub rank: Option<String>,
    pub bib: Option<f64>,
    /// Lower is better
    pub fis_points: Option<f64>,
    pub final_time: Option<String>,
    pub date: NaiveDate,
    pub discipline: String,
    pub location: Option<String>,
    pub country: Option<String>,
    pub homologation_number: Option<String>,
    pub race_type: Option<String>,
}

impl RaceResult {
    /// Whether the result is a did-not-finish (any rank starting with `DNF`).
    pub fn is_dnf(&self) -> bool {
        self.rank
            .as_deref()
            .map(|r| r.trim().to_uppercase().starts_with("DNF"))
            .unwrap_or(false)
    }

    /// Whether the rank is one of the course non-finish codes (DNF or DSQ).
    pub fn is_non_finish(&self) -> bool {
        self.rank
            .as_deref()
            .map(|r| NON_FINISH_CODES.contains(&r))
            .unwrap_or(false)
    }

    pub fn is_winner(&self) -> bool {
        self.rank.as_deref() == Some("1")
    }

    /// Rank as a number; status codes have none.
    pub fn numeric_rank(&self) -> Option<f64> {
        self.rank
            .as_deref()
            .and_then(|r| r.trim().parse::<f64>().ok())
            .filter(|r| r.is_finite())
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn has_points(&self) -> bool {
        self.fis_points.is_some()
    }

    pub fn athlete_key(&self) -> AthleteKey {
        AthleteKey {
            fis_code: self.fis_code.clone(),
            name: self.name.clone(),
            discipline: self.discipline.clone(),
        }
    }

    /// Athlete on one course, when the course is identified.
    pub fn athlete_course_key(&self) -> Option<AthleteCourseKey> {
        Some(AthleteCourseKey {
            athlete: self.athlete_key(),
            homologation_number: self.homologation_number.clone()?,
            location: self.location.clone()?,
        })
    }
}

/// Course and setup facts for one race.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RaceDetail {
    pub race_id: i64,
    pub location: Option<String>,
    pub country: Option<String>,
    pub discipline: Option<String>,
    pub homologation_number: Option<String>,
    /// Metres
    pub vertical_drop: Option<f64>,
    /// Metres above sea level
    pub start_altitude: Option<f64>,
    /// First-run gates
    pub gate_count: Option<f64>,
}

/// Grouping key for career-level athlete tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AthleteKey {
    pub fis_code: String,
    pub name: String,
    pub discipline: String,
}

/// Grouping key for per-course athlete tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AthleteCourseKey {
    pub athlete: AthleteKey,
    pub homologation_number: String,
    pub location: String,
}

/// Canonical race z-scores keyed by (race_id, fis_code).
///
/// Only the z-score engine and the persisted `race_z_score` table produce
/// one; downstream engines join against it instead of recomputing.
#[derive(Debug, Clone, Default)]
pub struct ZScoreTable {
    scores: HashMap<(i64, String), f64>,
}

impl ZScoreTable {
    pub(crate) fn from_scores(scores: impl IntoIterator<Item = (i64, String, f64)>) -> Self {
        Self {
            scores: scores
                .into_iter()
                .map(|(race_id, fis_code, z)| ((race_id, fis_code), z))
                .collect(),
        }
    }

    pub fn get(&self, race_id: i64, fis_code: &str) -> Option<f64> {
        self.scores.get(&(race_id, fis_code.to_string())).copied()
    }

    /// Left-join lookup for one result.
    pub fn score_for(&self, result: &RaceResult) -> Option<f64> {
        self.get(result.race_id, &result.fis_code)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Results with numeric points.
pub fn with_points(results: &[RaceResult]) -> Vec<&RaceResult> {
    results.iter().filter(|r| r.has_points()).collect()
}

/// Sort into athlete timelines: by athlete, discipline, then date.
///
/// Same-day results keep a deterministic order through the race id.
pub fn sort_timeline(rows: &mut [&RaceResult]) {
    rows.sort_by(|a, b| {
        (&a.fis_code, &a.discipline, a.date, a.race_id).cmp(&(
            &b.fis_code,
            &b.discipline,
            b.date,
            b.race_id,
        ))
    });
}

/// Contiguous per-(athlete, discipline) runs of a timeline-sorted slice.
pub fn athlete_series<'s, 'a>(
    rows: &'s [&'a RaceResult],
) -> impl Iterator<Item = &'s [&'a RaceResult]> {
    rows.chunk_by(|a, b| a.fis_code == b.fis_code && a.discipline == b.discipline)
}

/// Prior expanding average of points minus the current points, per race in
/// one athlete series. The first race (and any race without points) has none.
pub fn prior_average_deltas(series: &[&RaceResult]) -> Vec<Option<f64>> {
    let mut sum = 0.0;
    let mut count = 0usize;
    series
        .iter()
        .map(|r| {
            let prior = (count > 0).then(|| sum / count as f64);
            let delta = match (prior, r.fis_points) {
                (Some(p), Some(pts)) => Some(p - pts),
                _ => None,
            };
            if let Some(pts) = r.fis_points {
                sum += pts;
                count += 1;
            }
            delta
        })
        .collect()
}
