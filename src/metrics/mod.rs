//! Statistics primitives and the feature engines built on them.

pub mod analytics;
pub mod binning;
pub mod regression;
pub mod smoothing;
pub mod stats;

pub use binning::QuantileBins;
pub use regression::{fit_ols, LinearFit, RegressionError};
pub use smoothing::{EwmPoint, ExponentialMoving, RollingAverage};
pub use stats::ColumnSummary;
