//! Model-free variable selection with model-X Gaussian knockoffs.
//!
//! The filter builds a synthetic copy of the design whose columns are
//! exchangeable with the originals under the estimated Gaussian model, fits
//! one cross-validated Lasso on the augmented `[X X~]` matrix, and converts
//! the coefficient-difference statistics `W_j = |b_j| - |b_{j+p}|` into
//! selections with the knockoff+ threshold, one per target FDR level.
//!
//! Second-order construction: column means and a Ledoit-Wolf shrunk
//! covariance are estimated from the data (the sample covariance is singular
//! whenever p > n), the `s`-vector is solved on the correlation scale by the
//! method named in the configuration, and the knockoff copy is sampled from
//! the Gaussian conditional distribution
//! `X~ | X ~ N(X - (X - M) Sigma^-1 D, 2D - D Sigma^-1 D)`.

use crate::lasso::{self, LassoConfig, LassoError};
use ndarray::{Array1, Array2, Axis, concatenate};
use ndarray_linalg::{Cholesky, Eigh, UPLO};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use thiserror::Error;

/// Target FDR levels the filter reports selections for, ascending.
pub const DEFAULT_TARGET_FDR: [f64; 5] = [0.01, 0.05, 0.10, 0.25, 0.50];

/// Numerator offset of the knockoff+ threshold; this is the variant with a
/// provable FDR guarantee.
const THRESHOLD_OFFSET: f64 = 1.0;

const JITTER_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum KnockoffError {
    #[error("dimension mismatch: x has {rows} rows but y has {len} entries")]
    DimensionMismatch { rows: usize, len: usize },

    #[error("at least two covariates are required to build knockoffs (p = {0})")]
    TooFewCovariates(usize),

    #[error("no target FDR levels were supplied")]
    NoTargetLevels,

    #[error("target FDR level {0} must lie strictly inside (0, 1)")]
    BadTargetLevel(f64),

    #[error("eigendecomposition of the correlation matrix failed: {0}")]
    Eigendecomposition(ndarray_linalg::error::LinalgError),

    #[error("shrunk covariance is not positive definite; Cholesky factorization failed: {0}")]
    CovarianceFactorization(ndarray_linalg::error::LinalgError),

    #[error(
        "knockoff conditional covariance stayed indefinite after {0} jittered factorization \
         attempts"
    )]
    ConditionalCovarianceIndefinite(usize),

    #[error("rank-one Cholesky update broke down at coordinate {0} while solving the MVR program")]
    SVectorBreakdown(usize),

    #[error(transparent)]
    Lasso(#[from] LassoError),
}

/// How the `s`-vector of the knockoff construction is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SVectorMethod {
    /// Minimum variance-based reconstructability: coordinate descent on
    /// `Tr((2R - diag(s))^-1) + sum_j 1/s_j`.
    Mvr,
    /// Equicorrelated: every `s_j` equals `min(1, 2 lambda_min(R))`.
    Equi,
}

#[derive(Debug, Clone)]
pub struct KnockoffConfig {
    pub method: SVectorMethod,
    /// Ascending target FDR levels; one selection is produced per level.
    pub target_fdr: Vec<f64>,
    /// Sweep budget of the MVR coordinate descent.
    pub mvr_max_sweeps: usize,
    /// Convergence threshold on the largest `s` step within an MVR sweep.
    pub mvr_tolerance: f64,
    /// Folds of the cross-validated Lasso producing the statistics.
    pub cv_folds: usize,
    pub lasso: LassoConfig,
}

impl Default for KnockoffConfig {
    fn default() -> Self {
        Self {
            method: SVectorMethod::Mvr,
            target_fdr: DEFAULT_TARGET_FDR.to_vec(),
            mvr_max_sweeps: 10,
            mvr_tolerance: 1e-4,
            cv_folds: 10,
            lasso: LassoConfig::default(),
        }
    }
}

/// Result of one filter invocation.
#[derive(Debug, Clone)]
pub struct KnockoffFilter {
    /// The target FDR levels, in the order selections are reported.
    pub target_fdr: Vec<f64>,
    /// One selection per target level; higher levels select supersets.
    pub selected: Vec<Vec<usize>>,
    /// Coefficient-difference statistic per original covariate.
    pub statistics: Array1<f64>,
    /// The solved `s`-vector on the correlation scale, for diagnostics.
    pub s_vector: Array1<f64>,
}

/// Runs the filter once on `(y, X)`.
///
/// `rng` drives the knockoff sampling and the fold assignment of the
/// statistic Lasso; repeated calls with independently seeded generators give
/// independent Monte-Carlo trials on the same data.
pub fn fit(
    y: &Array1<f64>,
    x: &Array2<f64>,
    config: &KnockoffConfig,
    rng: &mut StdRng,
) -> Result<KnockoffFilter, KnockoffError> {
    let n = x.nrows();
    let p = x.ncols();
    if y.len() != n {
        return Err(KnockoffError::DimensionMismatch {
            rows: n,
            len: y.len(),
        });
    }
    if p < 2 {
        return Err(KnockoffError::TooFewCovariates(p));
    }
    if config.target_fdr.is_empty() {
        return Err(KnockoffError::NoTargetLevels);
    }
    for &q in &config.target_fdr {
        if !(q > 0.0 && q < 1.0) {
            return Err(KnockoffError::BadTargetLevel(q));
        }
    }

    let (means, sigma) = shrunk_covariance(x);
    let (sd, correlation) = to_correlation(&sigma);

    let (eigenvalues, _) = correlation
        .eigh(UPLO::Lower)
        .map_err(KnockoffError::Eigendecomposition)?;
    let lambda_min = eigenvalues[0].max(1e-10);
    log::debug!("knockoff correlation lambda_min = {lambda_min:.4e}");

    let s_vector = match config.method {
        SVectorMethod::Equi => equicorrelated_s(p, lambda_min),
        SVectorMethod::Mvr => mvr_s(
            &correlation,
            lambda_min,
            config.mvr_max_sweeps,
            config.mvr_tolerance,
        )?,
    };

    // Back to the covariance scale: D = diag(s_j * sd_j^2).
    let d = Array1::from_shape_fn(p, |j| s_vector[j] * sd[j] * sd[j]);

    let sigma_l = sigma
        .cholesky(UPLO::Lower)
        .map_err(KnockoffError::CovarianceFactorization)?;
    let p_mat = spd_solve_scaled_identity(&sigma_l, &d);

    let x_centered = x - &means.view().insert_axis(Axis(0));
    let conditional_mean = x - &x_centered.dot(&p_mat);

    let mut conditional_cov = Array2::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            conditional_cov[[i, j]] = -d[i] * p_mat[[i, j]];
        }
        conditional_cov[[i, i]] += 2.0 * d[i];
    }
    let conditional_cov = symmetrized(conditional_cov);
    let cov_l = factor_with_jitter(&conditional_cov)?;

    let z = Array2::from_shape_fn((n, p), |_| rng.sample::<f64, _>(StandardNormal));
    let x_knockoff = conditional_mean + z.dot(&cov_l.t());

    let augmented = concatenate![Axis(1), x.view(), x_knockoff.view()];
    let cv = lasso::cv_fit(&augmented, y, config.cv_folds, rng.random::<u64>(), &config.lasso)?;
    let coefficients = &cv.fit.coefficients;
    let statistics =
        Array1::from_shape_fn(p, |j| coefficients[j].abs() - coefficients[j + p].abs());

    let selected = config
        .target_fdr
        .iter()
        .map(|&q| {
            let tau = knockoff_threshold(statistics.as_slice().unwrap_or(&[]), q);
            statistics
                .iter()
                .enumerate()
                .filter(|(_, w)| **w >= tau)
                .map(|(j, _)| j)
                .collect()
        })
        .collect();

    Ok(KnockoffFilter {
        target_fdr: config.target_fdr.clone(),
        selected,
        statistics,
        s_vector,
    })
}

/// The knockoff+ data-adaptive threshold for target level `q`.
///
/// The smallest statistic magnitude `t` with
/// `(1 + #{W_j <= -t}) / max(#{W_j >= t}, 1) <= q`, or infinity when no
/// magnitude qualifies (selecting nothing).
fn knockoff_threshold(statistics: &[f64], q: f64) -> f64 {
    let mut candidates: Vec<f64> = statistics
        .iter()
        .map(|w| w.abs())
        .filter(|t| *t > 0.0)
        .collect();
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    for &t in &candidates {
        let negatives = statistics.iter().filter(|&&w| w <= -t).count() as f64;
        let positives = statistics.iter().filter(|&&w| w >= t).count() as f64;
        if (THRESHOLD_OFFSET + negatives) / positives.max(1.0) <= q {
            return t;
        }
    }
    f64::INFINITY
}

/// Ledoit-Wolf linear shrinkage of the sample covariance toward `mu * I`.
///
/// Returns the column means and the shrunk covariance, which is positive
/// definite for any data with a nonzero shrinkage intensity.
fn shrunk_covariance(x: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = x.nrows();
    let p = x.ncols();
    let inv_n = 1.0 / n as f64;

    let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
    let centered = x - &means.view().insert_axis(Axis(0));
    let sample = centered.t().dot(&centered) * inv_n;

    let mu = sample.diag().sum() / p as f64;
    let frobenius_sq: f64 = sample.iter().map(|v| v * v).sum();
    let dispersion = (frobenius_sq - 2.0 * mu * sample.diag().sum() + p as f64 * mu * mu)
        / p as f64;

    let mut noise = 0.0f64;
    for k in 0..n {
        let row = centered.row(k);
        let norm_sq = row.dot(&row);
        let quad = row.dot(&sample.dot(&row));
        noise += norm_sq * norm_sq - 2.0 * quad + frobenius_sq;
    }
    noise /= (n * n) as f64 * p as f64;
    let noise = noise.min(dispersion).max(0.0);

    let intensity = if dispersion > 0.0 {
        (noise / dispersion).clamp(0.0, 1.0)
    } else {
        1.0
    };
    log::debug!("Ledoit-Wolf shrinkage intensity = {intensity:.4}");

    let mut shrunk = sample * (1.0 - intensity);
    for j in 0..p {
        shrunk[[j, j]] += intensity * mu;
    }
    (means, shrunk)
}

/// Splits a covariance into column standard deviations and the correlation
/// matrix.
fn to_correlation(sigma: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let p = sigma.nrows();
    let sd = Array1::from_shape_fn(p, |j| sigma[[j, j]].sqrt());
    let correlation =
        Array2::from_shape_fn((p, p), |(i, j)| sigma[[i, j]] / (sd[i] * sd[j]));
    (sd, correlation)
}

fn symmetrized(a: Array2<f64>) -> Array2<f64> {
    let at = a.t().to_owned();
    (&a + &at) * 0.5
}

fn equicorrelated_s(p: usize, lambda_min: f64) -> Array1<f64> {
    Array1::from_elem(p, (2.0 * lambda_min).min(1.0))
}

/// Coordinate descent for the MVR program on the correlation matrix `r`:
/// minimize `Tr((2R - diag(s))^-1) + sum_j 1/s_j` over `0 < s_j <= 1` with
/// `2R - diag(s)` positive definite.
///
/// Each coordinate has a closed-form optimum via Sherman-Morrison; the
/// Cholesky factor of `2R - diag(s)` is maintained by rank-one updates so a
/// sweep costs `O(p^3)` overall. The starting point is a slightly loosened
/// equicorrelated solution, which keeps every intermediate iterate feasible.
fn mvr_s(
    r: &Array2<f64>,
    lambda_min: f64,
    max_sweeps: usize,
    tolerance: f64,
) -> Result<Array1<f64>, KnockoffError> {
    let p = r.nrows();
    let initial = 0.9 * (2.0 * lambda_min).min(1.0);
    let mut s = vec![initial; p];

    let mut a = r * 2.0;
    for j in 0..p {
        a[[j, j]] -= s[j];
    }
    let mut l = a
        .cholesky(UPLO::Lower)
        .map_err(KnockoffError::CovarianceFactorization)?;

    for sweep in 0..max_sweeps {
        let mut max_step = 0.0f64;
        for j in 0..p {
            let v = unit_forward_solve(&l, j);
            let c: f64 = v[j..].iter().map(|w| w * w).sum();
            let u = back_solve(&l, &v);
            let curvature: f64 = u.iter().map(|w| w * w).sum();
            let root = curvature.sqrt();

            let mut step = (1.0 - root * s[j]) / (root + c);
            if s[j] + step > 1.0 {
                step = 1.0 - s[j];
            }
            if step > 0.0 {
                // Keep the downdated factor comfortably positive definite.
                step = step.min(0.99 / c);
            }
            if step.abs() < 1e-15 {
                continue;
            }

            rank_one_update(&mut l, j, -step)?;
            s[j] += step;
            max_step = max_step.max(step.abs());
        }
        log::debug!("mvr sweep {sweep}: max step {max_step:.3e}");
        if max_step < tolerance {
            break;
        }
    }
    Ok(Array1::from_vec(s))
}

/// In-place Cholesky factor update for `A <- A + delta * e_j e_j^T`.
fn rank_one_update(l: &mut Array2<f64>, j: usize, delta: f64) -> Result<(), KnockoffError> {
    let p = l.nrows();
    let sign = if delta >= 0.0 { 1.0 } else { -1.0 };
    let mut x = vec![0.0f64; p];
    x[j] = delta.abs().sqrt();

    for k in j..p {
        let lkk = l[[k, k]];
        let r_sq = lkk * lkk + sign * x[k] * x[k];
        if r_sq <= 0.0 || !r_sq.is_finite() {
            return Err(KnockoffError::SVectorBreakdown(k));
        }
        let r = r_sq.sqrt();
        let cos = r / lkk;
        let sin = x[k] / lkk;
        l[[k, k]] = r;
        for i in (k + 1)..p {
            let updated = (l[[i, k]] + sign * sin * x[i]) / cos;
            x[i] = cos * x[i] - sin * updated;
            l[[i, k]] = updated;
        }
    }
    Ok(())
}

/// Solves `L v = e_j` for a lower-triangular `L`; entries before `j` are zero.
fn unit_forward_solve(l: &Array2<f64>, j: usize) -> Vec<f64> {
    let p = l.nrows();
    let mut v = vec![0.0f64; p];
    v[j] = 1.0 / l[[j, j]];
    for i in (j + 1)..p {
        let mut sum = 0.0;
        for k in j..i {
            sum += l[[i, k]] * v[k];
        }
        v[i] = -sum / l[[i, i]];
    }
    v
}

/// Solves `L^T u = v` for a lower-triangular `L`.
fn back_solve(l: &Array2<f64>, v: &[f64]) -> Vec<f64> {
    let p = l.nrows();
    let mut u = vec![0.0f64; p];
    for i in (0..p).rev() {
        let mut sum = v[i];
        for k in (i + 1)..p {
            sum -= l[[k, i]] * u[k];
        }
        u[i] = sum / l[[i, i]];
    }
    u
}

/// Columns of `Sigma^-1 diag(d)` given the Cholesky factor of `Sigma`.
fn spd_solve_scaled_identity(l: &Array2<f64>, d: &Array1<f64>) -> Array2<f64> {
    let p = l.nrows();
    let mut out = Array2::zeros((p, p));
    for j in 0..p {
        let v = unit_forward_solve(l, j);
        let u = back_solve(l, &v);
        for i in 0..p {
            out[[i, j]] = u[i] * d[j];
        }
    }
    out
}

/// Cholesky with an escalating diagonal jitter ladder; the conditional
/// covariance is positive semidefinite in exact arithmetic but can lose
/// definiteness to roundoff.
fn factor_with_jitter(v: &Array2<f64>) -> Result<Array2<f64>, KnockoffError> {
    let p = v.nrows();
    let scale = (v.diag().sum() / p as f64).max(1e-12);
    let mut jitter = 0.0f64;
    for attempt in 0..JITTER_ATTEMPTS {
        let mut trial = v.clone();
        if jitter > 0.0 {
            for j in 0..p {
                trial[[j, j]] += jitter;
            }
        }
        match trial.cholesky(UPLO::Lower) {
            Ok(l) => {
                if attempt > 0 {
                    log::debug!("conditional covariance factored with jitter {jitter:.3e}");
                }
                return Ok(l);
            }
            Err(_) => {
                jitter = if jitter == 0.0 {
                    1e-10 * scale
                } else {
                    jitter * 100.0
                };
            }
        }
    }
    Err(KnockoffError::ConditionalCovarianceIndefinite(JITTER_ATTEMPTS))
}
