//! Ordinary least squares with an intercept.
//!
//! The design is centered, then solved through a one-sided Jacobi SVD so that
//! rank-deficient designs (an athlete who raced only two courses, a feature
//! that never varies) still get the minimum-norm least-squares answer instead
//! of a singular-matrix failure.

use thiserror::Error;

/// Singular values at or below this fraction of the largest are treated as zero.
const SINGULAR_TOLERANCE: f64 = 1e-10;

/// Rotation sweeps before giving up on convergence.
const MAX_SWEEPS: usize = 60;

/// Errors from fitting a regression.
#[derive(Debug, Error, PartialEq)]
pub enum RegressionError {
    #[error("Need at least {needed} observations, got {got}")]
    TooFewObservations { needed: usize, got: usize },

    #[error("Observation {0} has {1} features, expected {2}")]
    RaggedDesign(usize, usize, usize),

    #[error("Non-finite value in design or target")]
    NonFinite,
}

/// Fitted linear model.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    /// One coefficient per feature, in input order
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Coefficient of determination on the training data
    pub r_squared: f64,
}

impl LinearFit {
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Fit `y = intercept + Σ coefᵢ·xᵢ` by least squares.
pub fn fit_ols(rows: &[Vec<f64>], targets: &[f64]) -> Result<LinearFit, RegressionError> {
    let n = rows.len().min(targets.len());
    if n < 2 {
        return Err(RegressionError::TooFewObservations { needed: 2, got: n });
    }
    let p = rows[0].len();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != p {
            return Err(RegressionError::RaggedDesign(i, row.len(), p));
        }
    }
    if rows.iter().flatten().chain(targets).any(|v| !v.is_finite()) {
        return Err(RegressionError::NonFinite);
    }

    let x_mean: Vec<f64> = (0..p)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n as f64)
        .collect();
    let y_mean = targets.iter().sum::<f64>() / n as f64;

    // Column-major centered design
    let mut columns: Vec<Vec<f64>> = (0..p)
        .map(|j| rows.iter().map(|r| r[j] - x_mean[j]).collect())
        .collect();
    let y: Vec<f64> = targets.iter().map(|t| t - y_mean).collect();

    let v = orthogonalize(&mut columns);

    let sigma: Vec<f64> = columns.iter().map(|c| dot(c, c).sqrt()).collect();
    let sigma_max = sigma.iter().copied().fold(0.0, f64::max);
    let cutoff = sigma_max * SINGULAR_TOLERANCE;

    let mut coefficients = vec![0.0; p];
    for (k, col) in columns.iter().enumerate() {
        if sigma[k] <= cutoff || sigma[k] == 0.0 {
            continue;
        }
        let weight = dot(col, &y) / (sigma[k] * sigma[k]);
        for (j, coef) in coefficients.iter_mut().enumerate() {
            *coef += weight * v[j][k];
        }
    }

    let intercept = y_mean - dot(&coefficients, &x_mean);

    let mut fit = LinearFit {
        coefficients,
        intercept,
        r_squared: 0.0,
    };
    fit.r_squared = r_squared(&fit, rows, targets, y_mean);
    Ok(fit)
}

/// One-sided Jacobi: rotate column pairs until mutually orthogonal.
///
/// On return `columns` holds `X·V` and the returned matrix is `V` (row-major,
/// `v[j][k]` is row `j` of column `k`).
fn orthogonalize(columns: &mut [Vec<f64>]) -> Vec<Vec<f64>> {
    let p = columns.len();
    let mut v: Vec<Vec<f64>> = (0..p)
        .map(|i| (0..p).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for _ in 0..MAX_SWEEPS {
        let mut rotated = false;
        for j in 0..p {
            for k in (j + 1)..p {
                let alpha = dot(&columns[j], &columns[j]);
                let beta = dot(&columns[k], &columns[k]);
                let gamma = dot(&columns[j], &columns[k]);
                if alpha == 0.0 || beta == 0.0 {
                    continue;
                }
                if gamma.abs() <= f64::EPSILON * (alpha * beta).sqrt() {
                    continue;
                }
                rotated = true;

                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;

                let (left, right) = columns.split_at_mut(k);
                rotate(&mut left[j], &mut right[0], c, s);
                for row in v.iter_mut() {
                    let (a, b) = (row[j], row[k]);
                    row[j] = c * a - s * b;
                    row[k] = s * a + c * b;
                }
            }
        }
        if !rotated {
            break;
        }
    }
    v
}

fn rotate(a: &mut [f64], b: &mut [f64], c: f64, s: f64) {
    for (x, y) in a.iter_mut().zip(b.iter_mut()) {
        let (xa, yb) = (*x, *y);
        *x = c * xa - s * yb;
        *y = s * xa + c * yb;
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn r_squared(fit: &LinearFit, rows: &[Vec<f64>], targets: &[f64], y_mean: f64) -> f64 {
    let ss_tot: f64 = targets.iter().map(|y| (y - y_mean).powi(2)).sum();
    let ss_res: f64 = rows
        .iter()
        .zip(targets)
        .map(|(x, y)| (y - fit.predict(x)).powi(2))
        .sum();

    if ss_tot == 0.0 {
        // perfect fit of a constant target counts as fully explained
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}
