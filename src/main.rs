// The benchmark is a single linear invocation with fixed embedded parameters:
// generate one synthetic dataset, run the Lasso arm once, run the knockoff
// Monte-Carlo trials, then print the summary and write the comparison figure.
// main owns the configuration and the dataset; all numerical work lives in
// the library modules.

use knockbench::config::RunConfig;
use knockbench::data::{self, GeneratorConfig};
use knockbench::experiment;
use knockbench::knockoffs::KnockoffConfig;
use knockbench::lasso::LassoConfig;
use knockbench::report;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::process;
use std::time::Instant;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let start_time = Instant::now();
    let config = RunConfig::reference();

    // --- Phase 1: Data Generation ---
    let generator = GeneratorConfig {
        n_samples: config.n_samples,
        n_covariates: config.n_covariates,
        rho: config.rho,
        n_signals: config.n_signals,
    };
    let mut design_rng = StdRng::seed_from_u64(config.design_seed);
    let mut model_rng = StdRng::seed_from_u64(config.model_seed);
    let data = match data::generate(&generator, &mut design_rng, &mut model_rng) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Fatal error during data generation: {e}");
            process::exit(1);
        }
    };
    eprintln!(
        "> Generated {} samples over {} covariates ({} true signals).",
        config.n_samples,
        config.n_covariates,
        data.true_support.len()
    );

    // --- Phase 2: The Lasso Arm ---
    let lasso_trial = match experiment::run_lasso_trial(
        &data,
        config.cv_folds,
        config.fold_seed,
        &LassoConfig::default(),
    ) {
        Ok(trial) => trial,
        Err(e) => {
            eprintln!("Fatal error during the Lasso fit: {e}");
            process::exit(1);
        }
    };
    eprintln!(
        "> Lasso selected {} variables at lambda = {:.6}.",
        lasso_trial.score.n_selected, lasso_trial.lambda
    );

    // --- Phase 3: The Knockoff Arm ---
    let knockoff_config = KnockoffConfig {
        cv_folds: config.cv_folds,
        ..KnockoffConfig::default()
    };
    let levels = match experiment::run_knockoff_trials(
        &data,
        config.n_trials,
        config.trial_seed_base,
        &knockoff_config,
    ) {
        Ok(levels) => levels,
        Err(e) => {
            eprintln!("Fatal error during the knockoff trials: {e}");
            process::exit(1);
        }
    };
    eprintln!(
        "> Completed {} knockoff trials over {} target FDR levels.",
        config.n_trials,
        levels.len()
    );

    // --- Phase 4: Reporting ---
    if let Err(e) = report::print_report(&config, &lasso_trial, &levels) {
        eprintln!("Fatal error while summarizing results: {e}");
        process::exit(1);
    }
    if let Err(e) = report::render_comparison(
        &config.plot_path,
        &lasso_trial,
        &levels,
        config.comparison_level,
    ) {
        eprintln!("Fatal error while rendering the comparison figure: {e}");
        process::exit(1);
    }
    eprintln!("> Saved comparison figure to {}.", config.plot_path.display());
    eprintln!("> Finished in {:.2?}.", start_time.elapsed());
}
