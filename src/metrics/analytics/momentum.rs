//! Hot-streak momentum.
//!
//! Each athlete's races in a discipline form a series. The series is smoothed
//! with an exponentially weighted mean and deviation (span 3) both in z-score
//! space and in raw points space; momentum is how far the latest result sits
//! from its own smoothed history, in smoothed deviations.

use chrono::NaiveDate;

use super::results::{athlete_series, sort_timeline, with_points, RaceResult, ZScoreTable};
use crate::metrics::smoothing::{EwmPoint, ExponentialMoving, RollingAverage};

/// Default smoothing span in races.
pub const DEFAULT_SPAN: f64 = 3.0;

/// One row of the `hot_streaks` table.
#[derive(Debug, Clone, PartialEq)]
pub struct HotStreak {
    pub race_id: i64,
    pub fis_code: String,
    pub name: String,
    pub fis_points: Option<f64>,
    pub rank: Option<String>,
    pub date: NaiveDate,
    pub discipline: String,
    pub race_z_score: Option<f64>,
    pub ewma_race_z: Option<f64>,
    pub ewstd_race_z: Option<f64>,
    pub momentum_z: f64,
    pub ewma_fis: Option<f64>,
    pub ewstd_fis: Option<f64>,
    pub momentum_fis: f64,
    /// Three-race simple average of z-score
    pub rolling_race_z: Option<f64>,
    /// Races with points in the athlete's series
    pub race_count: i64,
}

/// Computes momentum over athlete race series.
#[derive(Debug)]
pub struct MomentumEngine {
    span: f64,
}

impl Default for MomentumEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MomentumEngine {
    pub fn new() -> Self {
        Self { span: DEFAULT_SPAN }
    }

    /// Rows where both momenta are defined.
    pub fn compute(&self, results: &[RaceResult], z_scores: &ZScoreTable) -> Vec<HotStreak> {
        let mut rows = with_points(results);
        sort_timeline(&mut rows);

        let mut out = Vec::new();
        for series in athlete_series(&rows) {
            let race_count = series.iter().filter(|r| r.fis_points.is_some()).count() as i64;
            let mut z_ewm = ExponentialMoving::with_span(self.span);
            let mut fis_ewm = ExponentialMoving::with_span(self.span);
            let mut rolling = RollingAverage::three_race();

            for r in series {
                let z = z_scores.score_for(r);
                let z_point = z_ewm.add(z);
                let fis_point = fis_ewm.add(r.fis_points);
                let rolling_race_z = rolling.add(z);

                let (Some(momentum_z), Some(momentum_fis)) =
                    (momentum(z, z_point), momentum(r.fis_points, fis_point))
                else {
                    continue;
                };

                out.push(HotStreak {
                    race_id: r.race_id,
                    fis_code: r.fis_code.clone(),
                    name: r.name.clone(),
                    fis_points: r.fis_points,
                    rank: r.rank.clone(),
                    date: r.date,
                    discipline: r.discipline.clone(),
                    race_z_score: z,
                    ewma_race_z: z_point.mean,
                    ewstd_race_z: z_point.std,
                    momentum_z,
                    ewma_fis: fis_point.mean,
                    ewstd_fis: fis_point.std,
                    momentum_fis,
                    rolling_race_z,
                    race_count,
                });
            }
        }
        out
    }
}

/// Standardized distance from the smoothed value. A zero deviation leaves
/// momentum undefined rather than infinite.
pub fn momentum(value: Option<f64>, point: EwmPoint) -> Option<f64> {
    let (v, mean, std) = (value?, point.mean?, point.std?);
    if std == 0.0 {
        return None;
    }
    let m = (v - mean) / std;
    m.is_finite().then_some(m)
}
