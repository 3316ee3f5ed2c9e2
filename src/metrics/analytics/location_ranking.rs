//! Course ranking by the z-scores of the best performances raced there.

use std::collections::BTreeMap;

use super::top_performances::TopPerformance;
use crate::metrics::stats;

/// One row of the `location_zscore_ranking` table.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRanking {
    pub location: String,
    pub discipline: String,
    pub homologation_number: String,
    pub mean_z_score: f64,
    pub performance_count: i64,
    /// Dense rank, 1 is the highest mean
    pub rank: u32,
}

/// Rank courses by the mean z-score of the career top performances set on
/// them. Performances without a full course identity are ignored.
pub fn rank_locations(performances: &[TopPerformance]) -> Vec<LocationRanking> {
    let mut groups: BTreeMap<(String, String, String), Vec<f64>> = BTreeMap::new();
    for p in performances {
        let (Some(location), Some(homologation_number)) = (&p.location, &p.homologation_number)
        else {
            continue;
        };
        groups
            .entry((location.clone(), p.discipline.clone(), homologation_number.clone()))
            .or_default()
            .push(p.race_z_score);
    }

    let mut rows: Vec<LocationRanking> = groups
        .into_iter()
        .filter_map(|((location, discipline, homologation_number), scores)| {
            Some(LocationRanking {
                location,
                discipline,
                homologation_number,
                mean_z_score: stats::mean(&scores)?,
                performance_count: scores.len() as i64,
                rank: 0,
            })
        })
        .collect();

    rows.sort_by(|a, b| b.mean_z_score.total_cmp(&a.mean_z_score));
    let means: Vec<Option<f64>> = rows.iter().map(|r| Some(r.mean_z_score)).collect();
    for (row, rank) in rows.iter_mut().zip(stats::dense_rank(&means, true)) {
        row.rank = rank.unwrap_or_default();
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn perf(location: Option<&str>, z: f64) -> TopPerformance {
        TopPerformance {
            race_id: 1,
            fis_code: "A".to_string(),
            name: "Athlete A".to_string(),
            fis_points: 10.0,
            rank: Some("1".to_string()),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            location: location.map(str::to_string),
            homologation_number: Some("1/1".to_string()),
            discipline: "SL".to_string(),
            race_z_score: z,
            year: None,
        }
    }

    #[test]
    fn test_dense_rank_descending() {
        let perfs = vec![
            perf(Some("Levi"), 1.0),
            perf(Some("Levi"), 2.0),
            perf(Some("Flachau"), 2.5),
            perf(Some("Zagreb"), 1.5),
            perf(Some("Schladming"), 0.5),
        ];
        let ranked = rank_locations(&perfs);
        let order: Vec<(&str, u32)> = ranked.iter().map(|r| (r.location.as_str(), r.rank)).collect();
        assert_eq!(
            order,
            vec![("Flachau", 1), ("Levi", 2), ("Zagreb", 2), ("Schladming", 3)]
        );
        let levi = ranked.iter().find(|r| r.location == "Levi").unwrap();
        assert_eq!(levi.performance_count, 2);
        assert_eq!(levi.mean_z_score, 1.5);
    }

    #[test]
    fn test_unknown_location_ignored() {
        let ranked = rank_locations(&[perf(None, 3.0), perf(Some("Levi"), 1.0)]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rank, 1);
    }
}
