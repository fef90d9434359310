//! Cross-validated Lasso via pathwise cyclic coordinate descent.
//!
//! The solver standardizes predictors to zero mean and unit variance, centers
//! the response, and minimizes `(1/2n) ||y - X b||^2 + lambda ||b||_1` with
//! soft-threshold coordinate updates. A geometric penalty grid is walked from
//! `lambda_max` (the smallest penalty with an all-zero solution) down to
//! `lambda_min_ratio * lambda_max`, warm-starting each fit from the previous
//! one. Cross-validation scores every grid point by held-out mean squared
//! error; folds are fit in parallel and combined in fold order, so the result
//! does not depend on scheduling.
//!
//! Coefficients are reported on the original scale of the inputs. The
//! selection a fit induces is the set of columns with nonzero coefficient.

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LassoError {
    #[error("dimension mismatch: x has {rows} rows but y has {len} entries")]
    DimensionMismatch { rows: usize, len: usize },

    #[error("cross-validation needs between 2 and n={n} folds, got {folds}")]
    BadFoldCount { n: usize, folds: usize },

    #[error(
        "the penalty grid is undefined: every predictor is uncorrelated with the response \
         or constant"
    )]
    DegenerateGrid,

    #[error(
        "coordinate descent did not converge within {max_sweeps} sweeps at lambda = {lambda:.6e} \
         (last max coefficient change {last_change:.3e})"
    )]
    DidNotConverge {
        lambda: f64,
        max_sweeps: usize,
        last_change: f64,
    },
}

/// Tuning knobs of the solver. The defaults mirror common practice for
/// pathwise solvers on under-determined problems.
#[derive(Debug, Clone)]
pub struct LassoConfig {
    /// Number of penalty values on the geometric grid.
    pub n_lambdas: usize,
    /// Ratio of the smallest to the largest penalty on the grid.
    pub lambda_min_ratio: f64,
    /// Sweep budget per penalty value before giving up.
    pub max_sweeps: usize,
    /// Convergence threshold on the largest standardized-coefficient change
    /// within a sweep.
    pub tolerance: f64,
}

impl Default for LassoConfig {
    fn default() -> Self {
        Self {
            n_lambdas: 100,
            lambda_min_ratio: 0.01,
            max_sweeps: 1000,
            tolerance: 1e-5,
        }
    }
}

/// A Lasso solution at one penalty value, on the original input scale.
#[derive(Debug, Clone)]
pub struct LassoFit {
    pub lambda: f64,
    pub coefficients: Array1<f64>,
    pub intercept: f64,
}

impl LassoFit {
    /// Indices of the nonzero coefficients.
    pub fn selected(&self) -> Vec<usize> {
        self.coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0.0)
            .map(|(j, _)| j)
            .collect()
    }
}

/// The full cross-validation record plus the refit at the winning penalty.
#[derive(Debug, Clone)]
pub struct CvLassoFit {
    /// The penalty grid, descending.
    pub lambdas: Vec<f64>,
    /// Held-out mean squared error per grid point.
    pub mean_losses: Vec<f64>,
    /// Fit on the full dataset at the loss-minimizing penalty.
    pub fit: LassoFit,
}

/// Runs k-fold cross-validation over the penalty grid and refits on the full
/// dataset at the penalty minimizing the cross-validated mean loss.
///
/// `fold_seed` drives the random assignment of samples to folds.
pub fn cv_fit(
    x: &Array2<f64>,
    y: &Array1<f64>,
    n_folds: usize,
    fold_seed: u64,
    config: &LassoConfig,
) -> Result<CvLassoFit, LassoError> {
    let n = x.nrows();
    if y.len() != n {
        return Err(LassoError::DimensionMismatch {
            rows: n,
            len: y.len(),
        });
    }
    if n_folds < 2 || n_folds > n {
        return Err(LassoError::BadFoldCount { n, folds: n_folds });
    }

    let all_rows: Vec<usize> = (0..n).collect();
    let full = Standardized::from_rows(x, y, &all_rows);
    let lambdas = lambda_grid(&full, config)?;
    let full_path = solve_path(&full, &lambdas, config)?;

    let fold_ids = assign_folds(n, n_folds, fold_seed);
    let fold_errors: Vec<Vec<f64>> = (0..n_folds)
        .into_par_iter()
        .map(|fold| held_out_errors(x, y, &fold_ids, fold, &lambdas, config))
        .collect::<Result<Vec<_>, _>>()?;

    let mut mean_losses = vec![0.0f64; lambdas.len()];
    for errors in &fold_errors {
        for (total, e) in mean_losses.iter_mut().zip(errors) {
            *total += e;
        }
    }
    for loss in mean_losses.iter_mut() {
        *loss /= n as f64;
    }

    let best = mean_losses
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    log::debug!(
        "lasso cv: best lambda {:.6e} (index {best} of {}), mean loss {:.6}",
        lambdas[best],
        lambdas.len(),
        mean_losses[best]
    );

    let (coefficients, intercept) = full.to_original_scale(&full_path[best]);
    Ok(CvLassoFit {
        fit: LassoFit {
            lambda: lambdas[best],
            coefficients,
            intercept,
        },
        lambdas,
        mean_losses,
    })
}

/// Sign-preserving shrinkage toward zero: `sign(x) * max(0, |x| - threshold)`.
fn soft_threshold(x: f64, threshold: f64) -> f64 {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        0.0
    }
}

/// Column-major standardized view of a row subset of the problem.
struct Standardized {
    /// Centered, unit-variance columns over the kept rows. A constant column
    /// is stored as all zeros with scale 0 and never enters the model.
    columns: Vec<Vec<f64>>,
    means: Vec<f64>,
    scales: Vec<f64>,
    y_centered: Vec<f64>,
    y_mean: f64,
}

impl Standardized {
    fn from_rows(x: &Array2<f64>, y: &Array1<f64>, rows: &[usize]) -> Self {
        let m = rows.len();
        let p = x.ncols();
        let inv_m = 1.0 / m as f64;

        let y_mean = rows.iter().map(|&i| y[i]).sum::<f64>() * inv_m;
        let y_centered: Vec<f64> = rows.iter().map(|&i| y[i] - y_mean).collect();

        let mut columns = Vec::with_capacity(p);
        let mut means = Vec::with_capacity(p);
        let mut scales = Vec::with_capacity(p);
        for j in 0..p {
            let mut col: Vec<f64> = rows.iter().map(|&i| x[[i, j]]).collect();
            let mean = col.iter().sum::<f64>() * inv_m;
            let variance = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() * inv_m;
            let scale = variance.sqrt();
            if scale > 1e-12 {
                for v in col.iter_mut() {
                    *v = (*v - mean) / scale;
                }
                scales.push(scale);
            } else {
                col.iter_mut().for_each(|v| *v = 0.0);
                scales.push(0.0);
            }
            means.push(mean);
            columns.push(col);
        }

        Self {
            columns,
            means,
            scales,
            y_centered,
            y_mean,
        }
    }

    fn n_rows(&self) -> usize {
        self.y_centered.len()
    }

    /// Maps standardized coefficients back to the original input scale.
    fn to_original_scale(&self, beta_std: &[f64]) -> (Array1<f64>, f64) {
        let mut coefficients = Array1::zeros(beta_std.len());
        let mut intercept = self.y_mean;
        for j in 0..beta_std.len() {
            if self.scales[j] > 0.0 && beta_std[j] != 0.0 {
                let c = beta_std[j] / self.scales[j];
                coefficients[j] = c;
                intercept -= c * self.means[j];
            }
        }
        (coefficients, intercept)
    }
}

/// Geometric grid from `lambda_max` down to `lambda_min_ratio * lambda_max`.
fn lambda_grid(std: &Standardized, config: &LassoConfig) -> Result<Vec<f64>, LassoError> {
    let inv_n = 1.0 / std.n_rows() as f64;
    let mut lambda_max = 0.0f64;
    for col in &std.columns {
        let dot: f64 = col
            .iter()
            .zip(&std.y_centered)
            .map(|(a, b)| a * b)
            .sum::<f64>()
            * inv_n;
        lambda_max = lambda_max.max(dot.abs());
    }
    if !lambda_max.is_finite() || lambda_max <= 0.0 {
        return Err(LassoError::DegenerateGrid);
    }

    let count = config.n_lambdas.max(1);
    if count == 1 {
        return Ok(vec![lambda_max]);
    }
    let log_max = lambda_max.ln();
    let log_min = (lambda_max * config.lambda_min_ratio).ln();
    let step = (log_min - log_max) / (count - 1) as f64;
    Ok((0..count).map(|t| (log_max + step * t as f64).exp()).collect())
}

/// One cyclic sweep over the given coordinates. Returns the largest
/// coefficient change seen.
fn sweep(
    std: &Standardized,
    lambda: f64,
    coords: &[usize],
    beta: &mut [f64],
    residual: &mut [f64],
) -> f64 {
    let n = residual.len();
    let inv_n = 1.0 / n as f64;
    let mut max_change = 0.0f64;
    for &j in coords {
        let col = &std.columns[j];
        let old = beta[j];
        let mut dot = 0.0;
        for i in 0..n {
            dot += col[i] * residual[i];
        }
        // Unit-variance columns make the coordinate curvature exactly one.
        let updated = soft_threshold(dot * inv_n + old, lambda);
        let delta = updated - old;
        if delta != 0.0 {
            for i in 0..n {
                residual[i] -= col[i] * delta;
            }
            beta[j] = updated;
        }
        max_change = max_change.max(delta.abs());
    }
    max_change
}

/// Coordinate descent at one penalty, warm-started from `beta`/`residual`.
///
/// Follows the usual two-level scheme: full sweeps to admit new coordinates,
/// then iteration restricted to the active set until it stabilizes.
fn descend(
    std: &Standardized,
    lambda: f64,
    beta: &mut [f64],
    residual: &mut [f64],
    config: &LassoConfig,
) -> Result<(), LassoError> {
    let p = std.columns.len();
    let every: Vec<usize> = (0..p).collect();
    let mut sweeps = 0usize;
    let mut last_change = f64::INFINITY;

    while sweeps < config.max_sweeps {
        let full_change = sweep(std, lambda, &every, beta, residual);
        sweeps += 1;
        last_change = full_change;
        if full_change < config.tolerance {
            return Ok(());
        }

        let active: Vec<usize> = (0..p).filter(|&j| beta[j] != 0.0).collect();
        while sweeps < config.max_sweeps {
            let active_change = sweep(std, lambda, &active, beta, residual);
            sweeps += 1;
            last_change = active_change;
            if active_change < config.tolerance {
                break;
            }
        }
    }

    if last_change < config.tolerance {
        // The active set converged on the final budgeted sweep; one more full
        // sweep would only confirm it. Treat as converged.
        return Ok(());
    }
    Err(LassoError::DidNotConverge {
        lambda,
        max_sweeps: config.max_sweeps,
        last_change,
    })
}

/// Solves the whole path, returning one standardized coefficient vector per
/// penalty value.
fn solve_path(
    std: &Standardized,
    lambdas: &[f64],
    config: &LassoConfig,
) -> Result<Vec<Vec<f64>>, LassoError> {
    let p = std.columns.len();
    let mut beta = vec![0.0f64; p];
    let mut residual = std.y_centered.clone();
    let mut path = Vec::with_capacity(lambdas.len());
    for &lambda in lambdas {
        descend(std, lambda, &mut beta, &mut residual, config)?;
        path.push(beta.clone());
    }
    Ok(path)
}

/// Random assignment of the `n` samples to `n_folds` near-equal folds.
fn assign_folds(n: usize, n_folds: usize, fold_seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(fold_seed);
    order.shuffle(&mut rng);
    let mut fold_ids = vec![0usize; n];
    for (position, &row) in order.iter().enumerate() {
        fold_ids[row] = position % n_folds;
    }
    fold_ids
}

/// Sum of squared held-out errors per penalty value for one fold.
fn held_out_errors(
    x: &Array2<f64>,
    y: &Array1<f64>,
    fold_ids: &[usize],
    fold: usize,
    lambdas: &[f64],
    config: &LassoConfig,
) -> Result<Vec<f64>, LassoError> {
    let train: Vec<usize> = (0..x.nrows()).filter(|&i| fold_ids[i] != fold).collect();
    let test: Vec<usize> = (0..x.nrows()).filter(|&i| fold_ids[i] == fold).collect();

    let std = Standardized::from_rows(x, y, &train);
    let path = solve_path(&std, lambdas, config)?;

    let mut errors = Vec::with_capacity(lambdas.len());
    for beta_std in &path {
        let (coefficients, intercept) = std.to_original_scale(beta_std);
        let active: Vec<(usize, f64)> = coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0.0)
            .map(|(j, c)| (j, *c))
            .collect();
        let mut sse = 0.0;
        for &i in &test {
            let mut prediction = intercept;
            for &(j, c) in &active {
                prediction += c * x[[i, j]];
            }
            sse += (y[i] - prediction).powi(2);
        }
        errors.push(sse);
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::Rng;
    use rand_distr::StandardNormal;

    #[test]
    fn soft_threshold_shrinks_toward_zero() {
        assert_abs_diff_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_abs_diff_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
        assert_eq!(soft_threshold(-0.5, 1.0), 0.0);
    }

    fn toy_problem(seed: u64) -> (Array2<f64>, Array1<f64>) {
        // 3 strong signals among 10 predictors, light noise.
        let n = 120;
        let p = 10;
        let mut rng = StdRng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((n, p), |_| rng.sample::<f64, _>(StandardNormal));
        let truth = [5.0, -4.0, 3.0];
        let y = Array1::from_shape_fn(n, |i| {
            let signal: f64 = truth
                .iter()
                .enumerate()
                .map(|(j, b)| b * x[[i, j]])
                .sum();
            signal + 0.1 * rng.sample::<f64, _>(StandardNormal)
        });
        (x, y)
    }

    #[test]
    fn penalty_grid_is_geometric_and_descending() {
        let (x, y) = toy_problem(42);
        let result = cv_fit(&x, &y, 5, 7, &LassoConfig::default()).unwrap();
        assert_eq!(result.lambdas.len(), 100);
        assert!(
            result
                .lambdas
                .windows(2)
                .all(|w| w[0] > w[1]),
            "grid must be strictly descending"
        );
        assert_abs_diff_eq!(
            result.lambdas[0] * LassoConfig::default().lambda_min_ratio,
            *result.lambdas.last().unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn recovers_strong_signals() {
        let (x, y) = toy_problem(42);
        let result = cv_fit(&x, &y, 5, 7, &LassoConfig::default()).unwrap();
        let selected = result.fit.selected();
        for j in 0..3 {
            assert!(selected.contains(&j), "signal {j} missing from {selected:?}");
        }
        assert_abs_diff_eq!(result.fit.coefficients[0], 5.0, epsilon = 0.5);
        assert_abs_diff_eq!(result.fit.coefficients[1], -4.0, epsilon = 0.5);
        assert_abs_diff_eq!(result.fit.coefficients[2], 3.0, epsilon = 0.5);
    }

    #[test]
    fn cv_is_deterministic_for_a_fixed_fold_seed() {
        let (x, y) = toy_problem(9);
        let a = cv_fit(&x, &y, 5, 31, &LassoConfig::default()).unwrap();
        let b = cv_fit(&x, &y, 5, 31, &LassoConfig::default()).unwrap();
        assert_eq!(a.fit.lambda, b.fit.lambda);
        assert_eq!(a.fit.coefficients, b.fit.coefficients);
        assert_eq!(a.mean_losses, b.mean_losses);
    }

    #[test]
    fn chosen_lambda_lies_on_the_grid() {
        let (x, y) = toy_problem(5);
        let result = cv_fit(&x, &y, 4, 11, &LassoConfig::default()).unwrap();
        assert!(result.lambdas.contains(&result.fit.lambda));
        assert_eq!(result.mean_losses.len(), result.lambdas.len());
        assert!(result.mean_losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let x = Array2::zeros((10, 3));
        let y = Array1::zeros(9);
        assert!(matches!(
            cv_fit(&x, &y, 3, 0, &LassoConfig::default()),
            Err(LassoError::DimensionMismatch { rows: 10, len: 9 })
        ));
    }

    #[test]
    fn rejects_bad_fold_counts() {
        let (x, y) = toy_problem(1);
        for folds in [0, 1, 121] {
            assert!(matches!(
                cv_fit(&x, &y, folds, 0, &LassoConfig::default()),
                Err(LassoError::BadFoldCount { .. })
            ));
        }
    }

    #[test]
    fn constant_columns_are_never_selected() {
        let (mut x, y) = toy_problem(3);
        x.column_mut(7).fill(2.5);
        let result = cv_fit(&x, &y, 5, 7, &LassoConfig::default()).unwrap();
        assert_eq!(result.fit.coefficients[7], 0.0);
    }

    #[test]
    fn fold_assignment_is_balanced() {
        let fold_ids = assign_folds(103, 10, 99);
        let mut counts = vec![0usize; 10];
        for &f in &fold_ids {
            counts[f] += 1;
        }
        assert!(counts.iter().all(|&c| c == 10 || c == 11));
    }
}
