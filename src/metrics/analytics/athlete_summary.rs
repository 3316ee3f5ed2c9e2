//! Career summary per athlete and discipline.

use std::collections::{BTreeMap, HashMap};

use super::results::{AthleteKey, RaceResult, ZScoreTable};
use crate::metrics::stats::{self, ColumnSummary};

/// One row of the `basic_athlete_info_career` table.
#[derive(Debug, Clone, PartialEq)]
pub struct AthleteSummary {
    pub fis_code: String,
    pub name: String,
    pub discipline: String,
    /// Every start, finished or not
    pub race_count: i64,
    /// Points of finished races
    pub fis_points: ColumnSummary,
    /// Start position within the race field (dense rank of bib)
    pub bib: ColumnSummary,
    /// Numeric finishing place
    pub rank: ColumnSummary,
    pub race_z_score: ColumnSummary,
    pub dnf_rate: f64,
    pub dnf_count: i64,
}

#[derive(Default)]
struct Columns {
    starts: i64,
    dnf: i64,
    points: Vec<f64>,
    bib: Vec<f64>,
    rank: Vec<f64>,
    z: Vec<f64>,
}

/// Dense rank of each bib within its race, keyed by (race_id, fis_code).
fn bib_index(results: &[RaceResult]) -> HashMap<(i64, &str), f64> {
    let mut races: HashMap<i64, Vec<(&str, f64)>> = HashMap::new();
    for r in results {
        if let Some(bib) = r.bib.filter(|b| !b.is_nan()) {
            races.entry(r.race_id).or_default().push((r.fis_code.as_str(), bib));
        }
    }

    let mut index = HashMap::new();
    for (race_id, field) in races {
        let bibs: Vec<Option<f64>> = field.iter().map(|(_, b)| Some(*b)).collect();
        for ((fis_code, _), rank) in field.iter().zip(stats::dense_rank(&bibs, false)) {
            if let Some(rank) = rank {
                index.insert((race_id, *fis_code), rank as f64);
            }
        }
    }
    index
}

/// Summarize every start of every athlete. Points of a DNF do not count.
pub fn summarize_athletes(results: &[RaceResult], z_scores: &ZScoreTable) -> Vec<AthleteSummary> {
    let bibs = bib_index(results);

    let mut groups: BTreeMap<AthleteKey, Columns> = BTreeMap::new();
    for r in results {
        let cols = groups.entry(r.athlete_key()).or_default();
        cols.starts += 1;
        if r.is_dnf() {
            cols.dnf += 1;
        } else {
            cols.points.extend(r.fis_points);
        }
        cols.bib.extend(bibs.get(&(r.race_id, r.fis_code.as_str())));
        cols.rank.extend(r.numeric_rank());
        cols.z.extend(z_scores.score_for(r));
    }

    groups
        .into_iter()
        .map(|(key, cols)| AthleteSummary {
            fis_code: key.fis_code,
            name: key.name,
            discipline: key.discipline,
            race_count: cols.starts,
            fis_points: ColumnSummary::of(&cols.points).rounded(2),
            bib: ColumnSummary::of(&cols.bib).rounded(2),
            rank: ColumnSummary::of(&cols.rank).rounded(2),
            race_z_score: ColumnSummary::of(&cols.z).rounded(2),
            dnf_rate: stats::round_to(cols.dnf as f64 / cols.starts as f64, 2),
            dnf_count: cols.dnf,
        })
        .collect()
}
