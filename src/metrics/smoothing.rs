//! Sequence smoothing over an athlete's race timeline.
//!
//! Both smoothers are fed one race at a time, in date order, and accept
//! missing observations.

use std::collections::VecDeque;

/// Rolling mean over the last `window` races.
///
/// Produces a value only when every slot in the window holds an observation.
#[derive(Debug)]
pub struct RollingAverage {
    /// Buffer of recent values
    buffer: VecDeque<Option<f64>>,
    /// Window size in races
    window_size: usize,
    /// Running sum of present values
    sum: f64,
    /// Present values currently in the buffer
    present: usize,
}

impl RollingAverage {
    pub fn new(window_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(window_size),
            window_size,
            sum: 0.0,
            present: 0,
        }
    }

    /// Three-race rolling average used for z-score form.
    pub fn three_race() -> Self {
        Self::new(3)
    }

    /// Add a new value and return the current average.
    pub fn add(&mut self, value: Option<f64>) -> Option<f64> {
        let value = value.filter(|v| !v.is_nan());
        self.buffer.push_back(value);
        if let Some(v) = value {
            self.sum += v;
            self.present += 1;
        }

        if self.buffer.len() > self.window_size {
            if let Some(Some(old)) = self.buffer.pop_front() {
                self.sum -= old;
                self.present -= 1;
            }
        }

        self.average()
    }

    pub fn average(&self) -> Option<f64> {
        if self.window_size == 0 || self.present < self.window_size {
            None
        } else {
            Some(self.sum / self.present as f64)
        }
    }
}

/// Current exponentially weighted mean and standard deviation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EwmPoint {
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

/// Exponentially weighted moving mean and standard deviation.
///
/// Recursive form (no adjustment for the finite history): each observation
/// gets weight `alpha` and the running state `1 - alpha`. Missing
/// observations still decay the history weight. The variance carries the
/// unbiased correction `W² / (W² - Σw²)`, so the first observation has no
/// defined deviation and the second equals the sample deviation of two
/// points.
#[derive(Debug, Clone)]
pub struct ExponentialMoving {
    alpha: f64,
    started: bool,
    mean: Option<f64>,
    cov: f64,
    sum_wt: f64,
    sum_wt2: f64,
    old_wt: f64,
    observations: usize,
}

impl ExponentialMoving {
    /// Create from the smoothing factor directly.
    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha,
            started: false,
            mean: None,
            cov: 0.0,
            sum_wt: 1.0,
            sum_wt2: 1.0,
            old_wt: 1.0,
            observations: 0,
        }
    }

    /// Create from a span: `alpha = 2 / (span + 1)`.
    pub fn with_span(span: f64) -> Self {
        Self::with_alpha(2.0 / (span + 1.0))
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Feed the next value of the sequence.
    pub fn add(&mut self, value: Option<f64>) -> EwmPoint {
        let value = value.filter(|v| !v.is_nan());
        let new_wt = self.alpha;
        let decay = 1.0 - self.alpha;

        if !self.started {
            self.started = true;
            self.mean = value;
        } else {
            match (self.mean, value) {
                (Some(old_mean), obs) => {
                    self.sum_wt *= decay;
                    self.sum_wt2 *= decay * decay;
                    self.old_wt *= decay;

                    if let Some(cur) = obs {
                        let old_wt = self.old_wt;
                        // constant series stay exact
                        let new_mean = if old_mean != cur {
                            (old_wt * old_mean + new_wt * cur) / (old_wt + new_wt)
                        } else {
                            old_mean
                        };
                        self.cov = (old_wt * (self.cov + (old_mean - new_mean).powi(2))
                            + new_wt * (cur - new_mean).powi(2))
                            / (old_wt + new_wt);

                        self.sum_wt += new_wt;
                        self.sum_wt2 += new_wt * new_wt;
                        self.old_wt += new_wt;

                        self.sum_wt /= self.old_wt;
                        self.sum_wt2 /= self.old_wt * self.old_wt;
                        self.old_wt = 1.0;
                        self.mean = Some(new_mean);
                    }
                }
                (None, Some(cur)) => self.mean = Some(cur),
                (None, None) => {}
            }
        }

        if value.is_some() {
            self.observations += 1;
        }

        self.point()
    }

    /// Current state without feeding a value.
    pub fn point(&self) -> EwmPoint {
        if self.observations == 0 {
            return EwmPoint::default();
        }
        let numerator = self.sum_wt * self.sum_wt;
        let denominator = numerator - self.sum_wt2;
        let std = if denominator > 0.0 {
            let variance = numerator / denominator * self.cov;
            Some(variance.max(0.0).sqrt())
        } else {
            None
        };
        EwmPoint {
            mean: self.mean,
            std,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average_three_race() {
        let mut avg = RollingAverage::three_race();

        assert_eq!(avg.add(Some(1.0)), None);
        assert_eq!(avg.add(Some(2.0)), None);
        assert_eq!(avg.average(), None);
        assert_eq!(avg.add(Some(3.0)), Some(2.0));

        // (2 + 3 + 7) / 3
        assert_eq!(avg.add(Some(7.0)), Some(4.0));
    }

    #[test]
    fn test_rolling_average_missing_value_blocks_window() {
        let mut avg = RollingAverage::three_race();
        avg.add(Some(1.0));
        avg.add(None);
        assert_eq!(avg.add(Some(3.0)), None);
        assert_eq!(avg.add(Some(4.0)), None);
        assert_eq!(avg.add(Some(5.0)), Some(4.0));
    }

    #[test]
    fn test_span_three_alpha() {
        let ewm = ExponentialMoving::with_span(3.0);
        assert!((ewm.alpha() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ewm_first_point_has_no_std() {
        let mut ewm = ExponentialMoving::with_span(3.0);
        let p = ewm.add(Some(10.0));
        assert_eq!(p.mean, Some(10.0));
        assert_eq!(p.std, None);
    }

    #[test]
    fn test_ewm_second_point_is_sample_std() {
        let mut ewm = ExponentialMoving::with_span(3.0);
        ewm.add(Some(10.0));
        let p = ewm.add(Some(6.0));
        assert_eq!(p.mean, Some(8.0));
        // sample std of [10, 6]
        let expected = 8.0_f64.sqrt();
        assert!((p.std.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_ewm_third_point() {
        let mut ewm = ExponentialMoving::with_span(3.0);
        ewm.add(Some(1.0));
        ewm.add(Some(2.0));
        let p = ewm.add(Some(3.0));
        assert!((p.mean.unwrap() - 2.25).abs() < 1e-12);
        // weights 0.25, 0.25, 0.5; bias factor 1 / (1 - 0.375)
        let cov = 0.25 * (1.0 - 2.25_f64).powi(2)
            + 0.25 * (2.0 - 2.25_f64).powi(2)
            + 0.5 * (3.0 - 2.25_f64).powi(2);
        let expected = (cov / 0.625).sqrt();
        assert!((p.std.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_ewm_constant_series_zero_std() {
        let mut ewm = ExponentialMoving::with_span(3.0);
        ewm.add(Some(4.0));
        ewm.add(Some(4.0));
        let p = ewm.add(Some(4.0));
        assert_eq!(p.mean, Some(4.0));
        assert_eq!(p.std, Some(0.0));
    }

    #[test]
    fn test_ewm_leading_missing_values() {
        let mut ewm = ExponentialMoving::with_span(3.0);
        assert_eq!(ewm.add(None), EwmPoint::default());
        let p = ewm.add(Some(5.0));
        assert_eq!(p.mean, Some(5.0));
        assert_eq!(p.std, None);
    }

    #[test]
    fn test_ewm_gap_decays_history() {
        let mut ewm = ExponentialMoving::with_span(3.0);
        ewm.add(Some(0.0));
        let gap = ewm.add(None);
        assert_eq!(gap.mean, Some(0.0));
        let p = ewm.add(Some(3.0));
        // history weight 0.25 against new weight 0.5
        assert!((p.mean.unwrap() - 2.0).abs() < 1e-12);
    }
}
