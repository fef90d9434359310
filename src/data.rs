//! Synthetic regression data with a geometric Toeplitz correlation structure.
//!
//! The design matrix is drawn as `X = Z L^T` where `L L^T` is the Cholesky
//! factorization of the Toeplitz covariance `sigma[i][j] = rho^|i-j|`, so the
//! columns carry exactly the prescribed correlation in expectation. The true
//! coefficient vector has `k` standard-normal entries scattered by a uniform
//! shuffle, and the response is the linear model plus unit Gaussian noise.
//!
//! Covariate generation and coefficient/noise generation consume two separate
//! generators so either side of the simulation can be reproduced or varied
//! independently.

use ndarray::{Array1, Array2};
use ndarray_linalg::{Cholesky, UPLO};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::StandardNormal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("number of signal covariates k={k} exceeds the number of covariates p={p}")]
    TooManySignals { k: usize, p: usize },

    #[error("correlation decay rho={0} must lie strictly inside (-1, 1)")]
    RhoOutOfRange(f64),

    #[error("sample and covariate counts must both be positive (n={n}, p={p})")]
    EmptyDimensions { n: usize, p: usize },

    #[error(
        "Toeplitz covariance is not positive definite; Cholesky factorization failed: {0}"
    )]
    CovarianceNotPositiveDefinite(ndarray_linalg::error::LinalgError),
}

/// Shape of the simulated regression problem.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    pub n_samples: usize,
    pub n_covariates: usize,
    pub rho: f64,
    pub n_signals: usize,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        if self.n_samples == 0 || self.n_covariates == 0 {
            return Err(DataError::EmptyDimensions {
                n: self.n_samples,
                p: self.n_covariates,
            });
        }
        if self.n_signals > self.n_covariates {
            return Err(DataError::TooManySignals {
                k: self.n_signals,
                p: self.n_covariates,
            });
        }
        if !self.rho.is_finite() || self.rho.abs() >= 1.0 {
            return Err(DataError::RhoOutOfRange(self.rho));
        }
        Ok(())
    }
}

/// One immutable simulated dataset with its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    /// Design matrix, `n_samples x n_covariates`.
    pub x: Array2<f64>,
    /// Response vector, `X beta + eps`.
    pub y: Array1<f64>,
    /// True coefficient vector; exactly `n_signals` entries are nonzero.
    pub beta: Array1<f64>,
    /// Sorted indices of the nonzero coefficients.
    pub true_support: Vec<usize>,
}

/// The `p x p` matrix with entry `(i, j) = rho^|i-j|`.
pub fn toeplitz_covariance(p: usize, rho: f64) -> Array2<f64> {
    Array2::from_shape_fn((p, p), |(i, j)| {
        rho.powi((i as i64 - j as i64).unsigned_abs() as i32)
    })
}

/// Generates one dataset.
///
/// `design_rng` drives the design matrix draw; `model_rng` drives the
/// coefficient draw, its shuffle, and the response noise, in that order.
pub fn generate(
    config: &GeneratorConfig,
    design_rng: &mut StdRng,
    model_rng: &mut StdRng,
) -> Result<SyntheticData, DataError> {
    config.validate()?;
    let n = config.n_samples;
    let p = config.n_covariates;

    let sigma = toeplitz_covariance(p, config.rho);
    let chol = sigma
        .cholesky(UPLO::Lower)
        .map_err(DataError::CovarianceNotPositiveDefinite)?;

    let z = Array2::from_shape_fn((n, p), |_| design_rng.sample::<f64, _>(StandardNormal));
    let x = z.dot(&chol.t());

    let mut beta = vec![0.0f64; p];
    for value in beta.iter_mut().take(config.n_signals) {
        *value = model_rng.sample::<f64, _>(StandardNormal);
    }
    beta.shuffle(model_rng);
    let beta = Array1::from_vec(beta);

    let true_support: Vec<usize> = beta
        .iter()
        .enumerate()
        .filter(|(_, b)| **b != 0.0)
        .map(|(i, _)| i)
        .collect();

    let noise = Array1::from_shape_fn(n, |_| model_rng.sample::<f64, _>(StandardNormal));
    let y = x.dot(&beta) + &noise;

    Ok(SyntheticData {
        x,
        y,
        beta,
        true_support,
    })
}
