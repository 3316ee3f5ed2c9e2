//! Quantile bucketing of a numeric column.

use super::stats::quantile_sorted;

/// Digits kept when rendering bucket edges.
const LABEL_PRECISION: i32 = 3;

/// Equal-frequency buckets over a population of values.
///
/// Edges are the `i / q` quantiles; coincident edges are collapsed, so a
/// heavily tied column yields fewer than `q` buckets. The first bucket is
/// closed on both ends, all later ones only on the right.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileBins {
    edges: Vec<f64>,
    labels: Vec<String>,
}

impl QuantileBins {
    /// Build buckets for `values`. Returns `None` when fewer than two
    /// distinct edges remain (nothing to split).
    pub fn fit(values: &[f64], q: usize) -> Option<Self> {
        if q == 0 {
            return None;
        }
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let mut edges: Vec<f64> = (0..=q)
            .map(|i| quantile_sorted(&sorted, i as f64 / q as f64))
            .collect();
        edges.dedup();
        if edges.len() < 2 {
            return None;
        }

        let labels = edges
            .windows(2)
            .enumerate()
            .map(|(i, w)| interval_label(w[0], w[1], i == 0))
            .collect();

        Some(Self { edges, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Index of the bucket holding `value`, if it lies inside the fitted range.
    pub fn assign(&self, value: f64) -> Option<usize> {
        let first = *self.edges.first()?;
        let last = *self.edges.last()?;
        if !value.is_finite() || value < first || value > last {
            return None;
        }
        if value == first {
            return Some(0);
        }
        // right-closed: value in (edges[i], edges[i + 1]]
        let upper = self.edges.partition_point(|e| *e < value);
        Some(upper - 1)
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }
}

/// Render `(lo, hi]`, widening the first bucket's left edge slightly so the
/// minimum visibly belongs to it.
fn interval_label(lo: f64, hi: f64, first: bool) -> String {
    let mut left = round_edge(lo);
    if first {
        left -= 10f64.powi(-LABEL_PRECISION);
    }
    format!("({}, {}]", format_edge(left), format_edge(round_edge(hi)))
}

/// Round to `LABEL_PRECISION` significant fractional digits.
fn round_edge(x: f64) -> f64 {
    if !x.is_finite() || x == 0.0 {
        return x;
    }
    let whole = x.trunc();
    let frac = x - whole;
    let digits = if whole == 0.0 {
        -(frac.abs().log10().floor() as i32) - 1 + LABEL_PRECISION
    } else {
        LABEL_PRECISION
    };
    let scale = 10f64.powi(digits);
    (x * scale).round_ties_even() / scale
}

/// Shortest round-trip text, always showing a fractional part.
fn format_edge(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_buckets_even_population() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let bins = QuantileBins::fit(&values, 5).unwrap();
        assert_eq!(bins.len(), 5);
        assert_eq!(bins.assign(1.0), Some(0));
        assert_eq!(bins.assign(2.0), Some(0));
        assert_eq!(bins.assign(3.0), Some(1));
        assert_eq!(bins.assign(10.0), Some(4));
        assert_eq!(bins.assign(11.0), None);
    }

    #[test]
    fn test_labels() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let bins = QuantileBins::fit(&values, 5).unwrap();
        assert_eq!(bins.label(0), Some("(0.999, 2.8]"));
        assert_eq!(bins.label(4), Some("(8.2, 10.0]"));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let values = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 4.0];
        let bins = QuantileBins::fit(&values, 5).unwrap();
        assert!(bins.len() < 5);
        assert_eq!(bins.assign(1.0), Some(0));
    }

    #[test]
    fn test_constant_column_has_no_buckets() {
        assert_eq!(QuantileBins::fit(&[3.0, 3.0, 3.0], 5), None);
        assert_eq!(QuantileBins::fit(&[], 5), None);
    }

    #[test]
    fn test_round_edge_small_fraction() {
        assert_eq!(round_edge(0.0123456), 0.0123);
        assert_eq!(round_edge(1234.56789), 1234.568);
        assert_eq!(format_edge(2200.0), "2200.0");
    }
}
