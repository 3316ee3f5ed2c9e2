//! Descriptive statistics over race result columns.
//!
//! Every function here treats a missing value (`None` or NaN) the way a
//! column-oriented aggregation does: it is skipped, and an aggregate over no
//! values is itself missing.

/// Collect the present, non-NaN values of a column.
pub fn present(values: impl IntoIterator<Item = Option<f64>>) -> Vec<f64> {
    values
        .into_iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .collect()
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / values.len() as f64).sqrt())
}

/// Sample standard deviation (divides by `n - 1`). Undefined below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Quantile with linear interpolation between closest ranks.
///
/// Interpolation follows the numerically stable two-sided form so that
/// results agree with the usual array-library implementation bit for bit
/// in the common cases.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

/// Quantile of an already ascending, non-empty slice.
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let t = pos - lo as f64;
    let (a, b) = (sorted[lo], sorted[hi]);
    let diff = b - a;
    if t >= 0.5 {
        b - diff * (1.0 - t)
    } else {
        a + diff * t
    }
}

/// Coefficient of variation `std / mean` rounded to two decimals.
///
/// Missing when either input is missing or the mean is zero.
pub fn coefficient_of_variation(std: Option<f64>, mean: Option<f64>) -> Option<f64> {
    match (std, mean) {
        (Some(s), Some(m)) if m != 0.0 => finite(round_to(s / m, 2)),
        _ => None,
    }
}

/// Round half to even at the given number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

pub fn round_opt(value: Option<f64>, decimals: i32) -> Option<f64> {
    value.map(|v| round_to(v, decimals))
}

/// Drop NaN and infinities.
pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Percentile rank of each value within the column (average rank for ties,
/// divided by the number of present values). Missing values stay missing.
pub fn percentile_rank(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut order: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| !x.is_nan()).map(|x| (i, x)))
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));

    let n = order.len() as f64;
    let mut ranks = vec![None; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && order[end + 1].1 == order[start].1 {
            end += 1;
        }
        // 1-based positions start+1 ..= end+1
        let avg = (start + end + 2) as f64 / 2.0;
        for &(idx, _) in &order[start..=end] {
            ranks[idx] = Some(avg / n);
        }
        start = end + 1;
    }
    ranks
}

/// Dense rank (1, 2, 3 without gaps). Missing values stay missing.
pub fn dense_rank(values: &[Option<f64>], descending: bool) -> Vec<Option<u32>> {
    let mut distinct: Vec<f64> = present(values.iter().copied());
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if descending {
        distinct.reverse();
    }

    values
        .iter()
        .map(|v| {
            let v = (*v).filter(|x| !x.is_nan())?;
            let pos = if descending {
                distinct.partition_point(|d| *d > v)
            } else {
                distinct.partition_point(|d| *d < v)
            };
            Some(pos as u32 + 1)
        })
        .collect()
}

/// Summary statistics of one numeric column.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ColumnSummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std: Option<f64>,
    pub cv: Option<f64>,
}

impl ColumnSummary {
    pub fn of(values: &[f64]) -> Self {
        let mean = mean(values);
        let std = sample_std(values);
        Self {
            min: min(values),
            max: max(values),
            mean,
            median: median(values),
            std,
            cv: coefficient_of_variation(std, mean),
        }
    }

    pub fn rounded(self, decimals: i32) -> Self {
        Self {
            min: round_opt(self.min, decimals),
            max: round_opt(self.max, decimals),
            mean: round_opt(self.mean, decimals),
            median: round_opt(self.median, decimals),
            std: round_opt(self.std, decimals),
            cv: round_opt(self.cv, decimals),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&v), Some(5.0));
        assert!((population_std(&v).unwrap() - 2.0).abs() < 1e-12);
        assert!((sample_std(&v).unwrap() - 2.138_089_935).abs() < 1e-8);
    }

    #[test]
    fn test_sample_std_needs_two_values() {
        assert_eq!(sample_std(&[3.0]), None);
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_present_skips_missing_and_nan() {
        let v = present(vec![Some(1.0), None, Some(f64::NAN), Some(3.0)]);
        assert_eq!(v, vec![1.0, 3.0]);
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let v = [0.0, 0.0, 5.0, 10.0, 10.0, 100.0];
        assert!((quantile(&v, 0.05).unwrap() - 0.0).abs() < 1e-12);
        // position 4.75 between 10 and 100
        assert!((quantile(&v, 0.95).unwrap() - 77.5).abs() < 1e-9);
        assert_eq!(median(&[1.0, 3.0, 2.0, 4.0]), Some(2.5));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(1.23456, 4), 1.2346);
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(Some(1.0), Some(4.0)), Some(0.25));
        assert_eq!(coefficient_of_variation(Some(1.0), Some(0.0)), None);
        assert_eq!(coefficient_of_variation(None, Some(2.0)), None);
    }

    #[test]
    fn test_percentile_rank_average_ties() {
        let ranks = percentile_rank(&[Some(10.0), Some(20.0), Some(20.0), None, Some(5.0)]);
        assert_eq!(ranks[4], Some(0.25));
        assert_eq!(ranks[0], Some(0.5));
        assert_eq!(ranks[1], Some(0.875));
        assert_eq!(ranks[2], Some(0.875));
        assert_eq!(ranks[3], None);
    }

    #[test]
    fn test_dense_rank() {
        let values = [Some(0.5), Some(1.5), Some(0.5), None, Some(-1.0)];
        assert_eq!(
            dense_rank(&values, true),
            vec![Some(2), Some(1), Some(2), None, Some(3)]
        );
        assert_eq!(
            dense_rank(&values, false),
            vec![Some(2), Some(3), Some(2), None, Some(1)]
        );
    }

    #[test]
    fn test_column_summary() {
        let s = ColumnSummary::of(&[1.0, 2.0, 3.0, 4.0]).rounded(2);
        assert_eq!(s.min, Some(1.0));
        assert_eq!(s.max, Some(4.0));
        assert_eq!(s.median, Some(2.5));
        assert_eq!(s.std, Some(1.29));
        assert_eq!(s.cv, Some(0.52));
    }
}
