//! Analytics error types.

use thiserror::Error;

use crate::metrics::regression::RegressionError;
use crate::storage::database::DatabaseError;

/// Errors that can occur while computing a feature table.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Calculation failed.
    #[error("Calculation failed: {0}")]
    CalculationFailed(String),

    /// The run was cancelled before results were committed.
    #[error("Cancelled before commit")]
    Cancelled,

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<RegressionError> for AnalyticsError {
    fn from(e: RegressionError) -> Self {
        AnalyticsError::CalculationFailed(e.to_string())
    }
}

/// Result type for analytics operations.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
