//! The two trial runners and the Monte-Carlo aggregation.
//!
//! The Lasso runner fits once on the full dataset. The knockoff runner
//! repeats the filter over independently seeded trials; trial `i` derives its
//! generator from `seed_base + i`, so results are reproducible and identical
//! whichever order (or thread) the trials run in. Per-level sums are combined
//! by an explicit fold over the ordered trial results and divided once by the
//! trial count.

use crate::data::SyntheticData;
use crate::knockoffs::{self, KnockoffConfig, KnockoffError};
use crate::lasso::{self, LassoConfig, LassoError};
use crate::metrics::{self, SelectionScore};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("at least one Monte-Carlo trial is required")]
    NoTrials,

    #[error(
        "trial {trial} reported target FDR levels {found:?} but trial 0 reported {expected:?}; \
         aggregating across misaligned levels would corrupt the averages"
    )]
    TargetFdrMismatch {
        trial: usize,
        expected: Vec<f64>,
        found: Vec<f64>,
    },

    #[error(transparent)]
    Lasso(#[from] LassoError),

    #[error(transparent)]
    Knockoff(#[from] KnockoffError),
}

/// Outcome of the single cross-validated Lasso fit.
#[derive(Debug, Clone)]
pub struct LassoTrial {
    /// The cross-validation-optimal penalty.
    pub lambda: f64,
    pub score: SelectionScore,
}

/// Aggregated knockoff metrics at one target FDR level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSummary {
    pub target_fdr: f64,
    pub mean_power: f64,
    pub mean_fdp: f64,
    pub mean_selected: f64,
}

/// Runs the Lasso arm of the comparison exactly once.
pub fn run_lasso_trial(
    data: &SyntheticData,
    cv_folds: usize,
    fold_seed: u64,
    config: &LassoConfig,
) -> Result<LassoTrial, ExperimentError> {
    let cv = lasso::cv_fit(&data.x, &data.y, cv_folds, fold_seed, config)?;
    let selected = cv.fit.selected();
    let score = metrics::score_selection(&selected, &data.true_support, data.true_support.len());
    log::info!(
        "lasso trial: lambda {:.6e}, {} selected, power {:.4}, fdp {:.4}",
        cv.fit.lambda,
        score.n_selected,
        score.power,
        score.fdp
    );
    Ok(LassoTrial {
        lambda: cv.fit.lambda,
        score,
    })
}

struct TrialOutcome {
    target_fdr: Vec<f64>,
    scores: Vec<SelectionScore>,
}

/// Runs `n_trials` independent knockoff filter invocations and averages the
/// per-level metrics.
///
/// Any failing trial aborts the whole run; there is no partial-result
/// recovery. The target-FDR level list is read from the first trial and
/// checked against every other trial before aggregation.
pub fn run_knockoff_trials(
    data: &SyntheticData,
    n_trials: usize,
    seed_base: u64,
    config: &KnockoffConfig,
) -> Result<Vec<LevelSummary>, ExperimentError> {
    if n_trials == 0 {
        return Err(ExperimentError::NoTrials);
    }

    let n_signals = data.true_support.len();
    let outcomes: Vec<TrialOutcome> = (0..n_trials)
        .into_par_iter()
        .map(|trial| {
            let mut rng = StdRng::seed_from_u64(seed_base.wrapping_add(trial as u64));
            let filter = knockoffs::fit(&data.y, &data.x, config, &mut rng)?;
            let scores = filter
                .selected
                .iter()
                .map(|s| metrics::score_selection(s, &data.true_support, n_signals))
                .collect();
            log::info!("knockoff trial {}/{} complete", trial + 1, n_trials);
            Ok(TrialOutcome {
                target_fdr: filter.target_fdr,
                scores,
            })
        })
        .collect::<Result<Vec<_>, ExperimentError>>()?;

    ensure_consistent_levels(&outcomes)?;

    let levels = &outcomes[0].target_fdr;
    let zero = vec![(0.0f64, 0.0f64, 0.0f64); levels.len()];
    let sums = outcomes.iter().fold(zero, |mut acc, outcome| {
        for (slot, score) in acc.iter_mut().zip(&outcome.scores) {
            slot.0 += score.power;
            slot.1 += score.fdp;
            slot.2 += score.n_selected as f64;
        }
        acc
    });

    let divisor = n_trials as f64;
    Ok(levels
        .iter()
        .zip(sums)
        .map(|(&target_fdr, (power, fdp, selected))| LevelSummary {
            target_fdr,
            mean_power: power / divisor,
            mean_fdp: fdp / divisor,
            mean_selected: selected / divisor,
        })
        .collect())
}

fn ensure_consistent_levels(outcomes: &[TrialOutcome]) -> Result<(), ExperimentError> {
    let expected = &outcomes[0].target_fdr;
    for (trial, outcome) in outcomes.iter().enumerate().skip(1) {
        if outcome.target_fdr != *expected {
            return Err(ExperimentError::TargetFdrMismatch {
                trial,
                expected: expected.clone(),
                found: outcome.target_fdr.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{self, GeneratorConfig};
    use approx::assert_abs_diff_eq;

    fn small_data() -> SyntheticData {
        let config = GeneratorConfig {
            n_samples: 90,
            n_covariates: 18,
            rho: 0.3,
            n_signals: 3,
        };
        let mut design_rng = StdRng::seed_from_u64(2022);
        let mut model_rng = StdRng::seed_from_u64(123);
        data::generate(&config, &mut design_rng, &mut model_rng).unwrap()
    }

    fn small_knockoff_config() -> KnockoffConfig {
        KnockoffConfig {
            cv_folds: 5,
            ..KnockoffConfig::default()
        }
    }

    #[test]
    fn zero_trials_is_an_error() {
        let data = small_data();
        assert!(matches!(
            run_knockoff_trials(&data, 0, 1, &small_knockoff_config()),
            Err(ExperimentError::NoTrials)
        ));
    }

    #[test]
    fn a_single_trial_aggregates_to_its_own_raw_metrics() {
        let data = small_data();
        let config = small_knockoff_config();
        let seed_base = 42;

        let summaries = run_knockoff_trials(&data, 1, seed_base, &config).unwrap();

        let mut rng = StdRng::seed_from_u64(seed_base);
        let filter = knockoffs::fit(&data.y, &data.x, &config, &mut rng).unwrap();
        assert_eq!(summaries.len(), filter.target_fdr.len());
        for (summary, selected) in summaries.iter().zip(&filter.selected) {
            let raw =
                metrics::score_selection(selected, &data.true_support, data.true_support.len());
            assert_eq!(summary.mean_power, raw.power);
            assert_eq!(summary.mean_fdp, raw.fdp);
            assert_eq!(summary.mean_selected, raw.n_selected as f64);
        }
    }

    #[test]
    fn aggregation_is_the_mean_over_trials() {
        let data = small_data();
        let config = small_knockoff_config();
        let seed_base = 10;

        let joint = run_knockoff_trials(&data, 2, seed_base, &config).unwrap();
        let first = run_knockoff_trials(&data, 1, seed_base, &config).unwrap();
        let second = run_knockoff_trials(&data, 1, seed_base + 1, &config).unwrap();

        for ((j, a), b) in joint.iter().zip(&first).zip(&second) {
            assert_abs_diff_eq!(
                j.mean_power,
                (a.mean_power + b.mean_power) / 2.0,
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(j.mean_fdp, (a.mean_fdp + b.mean_fdp) / 2.0, epsilon = 1e-12);
            assert_abs_diff_eq!(
                j.mean_selected,
                (a.mean_selected + b.mean_selected) / 2.0,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn trials_are_reproducible_from_the_seed_base() {
        let data = small_data();
        let config = small_knockoff_config();
        let a = run_knockoff_trials(&data, 3, 5, &config).unwrap();
        let b = run_knockoff_trials(&data, 3, 5, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mismatched_level_lists_are_rejected() {
        let score = metrics::score_selection(&[], &[0], 1);
        let outcomes = vec![
            TrialOutcome {
                target_fdr: vec![0.05, 0.10],
                scores: vec![score, score],
            },
            TrialOutcome {
                target_fdr: vec![0.05, 0.25],
                scores: vec![score, score],
            },
        ];
        match ensure_consistent_levels(&outcomes) {
            Err(ExperimentError::TargetFdrMismatch { trial, .. }) => assert_eq!(trial, 1),
            other => panic!("expected a level mismatch, got {other:?}"),
        }
    }

    #[test]
    fn lasso_trial_scores_against_the_true_support() {
        let data = small_data();
        let trial = run_lasso_trial(&data, 5, 991, &LassoConfig::default()).unwrap();
        assert!(trial.lambda > 0.0);
        assert!(trial.score.power >= 0.0 && trial.score.power <= 1.0);
        assert!(trial.score.fdp >= 0.0 && trial.score.fdp <= 1.0);
        assert_eq!(
            trial.score.true_positives + trial.score.false_negatives,
            data.true_support.len()
        );
    }
}
