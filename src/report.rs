//! Console summaries and the four-panel comparison figure.
//!
//! No business logic lives here: both outputs are pure formatting of the
//! Lasso trial and the aggregated knockoff metrics. The figure layout is
//! fixed: power and FDR curves over the target levels on the top row, and
//! bar comparisons between the two methods at the chosen level on the bottom
//! row.

use crate::config::RunConfig;
use crate::experiment::{LassoTrial, LevelSummary};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("no knockoff summary exists at target FDR level {0}")]
    MissingLevel(f64),

    #[error("rendering the comparison figure failed: {0}")]
    Render(String),
}

fn find_level(levels: &[LevelSummary], target: f64) -> Result<&LevelSummary, ReportError> {
    levels
        .iter()
        .find(|level| (level.target_fdr - target).abs() < 1e-12)
        .ok_or(ReportError::MissingLevel(target))
}

/// Prints the human-readable run summary to stdout.
pub fn print_report(
    config: &RunConfig,
    lasso: &LassoTrial,
    levels: &[LevelSummary],
) -> Result<(), ReportError> {
    let comparison = find_level(levels, config.comparison_level)?;
    let rule = "=".repeat(60);

    println!("{rule}");
    println!("High-dimensional inference: knockoffs vs Lasso");
    println!("{rule}");
    println!();
    println!("Data generation:");
    println!("  samples n = {}", config.n_samples);
    println!("  covariates p = {}", config.n_covariates);
    println!("  correlation decay rho = {}", config.rho);
    println!("  true nonzero coefficients k = {}", config.n_signals);
    println!();
    println!("{rule}");
    println!("Lasso selection");
    println!("{rule}");
    println!("  lambda = {:.6}", lasso.lambda);
    println!("  selected variables: {}", lasso.score.n_selected);
    println!("  true positives (TP): {}", lasso.score.true_positives);
    println!("  false positives (FP): {}", lasso.score.false_positives);
    println!("  false negatives (FN): {}", lasso.score.false_negatives);
    println!("  power: {:.4}", lasso.score.power);
    println!("  false discovery rate: {:.4}", lasso.score.fdp);
    println!();
    println!("{rule}");
    println!(
        "Knockoff selection ({} Monte-Carlo trials)",
        config.n_trials
    );
    println!("{rule}");
    for level in levels {
        println!(
            "  target FDR = {:.2}: empirical FDR = {:.4}, power = {:.4}",
            level.target_fdr, level.mean_fdp, level.mean_power
        );
    }
    println!();
    println!("{rule}");
    println!("Comparison at target FDR = {:.2}", config.comparison_level);
    println!("{rule}");
    println!(
        "  Lasso:     power {:.4}, FDR {:.4}, {} selected",
        lasso.score.power, lasso.score.fdp, lasso.score.n_selected
    );
    println!(
        "  Knockoffs: power {:.4}, FDR {:.4}, {:.1} selected on average",
        comparison.mean_power, comparison.mean_fdp, comparison.mean_selected
    );
    if comparison.mean_power > lasso.score.power {
        if lasso.score.power > 0.0 {
            let improvement =
                (comparison.mean_power - lasso.score.power) / lasso.score.power * 100.0;
            println!("  knockoffs reach higher power (+{improvement:.2}%)");
        } else {
            println!("  knockoffs reach higher power");
        }
    } else {
        println!("  Lasso reaches higher power");
    }
    if comparison.mean_fdp <= config.comparison_level {
        println!(
            "  knockoffs held the empirical FDR at or below the {:.2} target",
            config.comparison_level
        );
    } else {
        println!(
            "  knockoffs exceeded the {:.2} FDR target",
            config.comparison_level
        );
    }
    println!("{rule}");
    Ok(())
}

/// Writes the 1200x900 four-panel comparison figure to `path`.
pub fn render_comparison(
    path: &Path,
    lasso: &LassoTrial,
    levels: &[LevelSummary],
    comparison_level: f64,
) -> Result<(), ReportError> {
    let comparison = *find_level(levels, comparison_level)?;
    draw_figure(path, lasso, levels, &comparison, comparison_level)
        .map_err(|e| ReportError::Render(e.to_string()))
}

fn draw_figure(
    path: &Path,
    lasso: &LassoTrial,
    levels: &[LevelSummary],
    comparison: &LevelSummary,
    comparison_level: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (1200, 900)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 2));

    let x_max = levels
        .iter()
        .map(|l| l.target_fdr)
        .fold(0.0f64, f64::max)
        .max(1e-3)
        * 1.05;

    {
        let mut chart = ChartBuilder::on(&panels[0])
            .caption("Knockoffs: power vs target FDR", ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..x_max, 0.0..1.0)?;
        chart
            .configure_mesh()
            .x_desc("Target FDR")
            .y_desc("Power")
            .draw()?;
        let series: Vec<(f64, f64)> = levels
            .iter()
            .map(|l| (l.target_fdr, l.mean_power))
            .collect();
        chart.draw_series(LineSeries::new(series.iter().copied(), BLUE.stroke_width(2)))?;
        chart.draw_series(
            series
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
        )?;
    }

    {
        let y_max = levels
            .iter()
            .map(|l| l.mean_fdp)
            .fold(0.0f64, f64::max)
            .max(x_max)
            * 1.1;
        let mut chart = ChartBuilder::on(&panels[1])
            .caption("Knockoffs: FDR control", ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..x_max, 0.0..y_max)?;
        chart
            .configure_mesh()
            .x_desc("Target FDR")
            .y_desc("Empirical FDR")
            .draw()?;
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(0.0, 0.0), (x_max, x_max)],
                RED.mix(0.6).stroke_width(2),
            )))?
            .label("ideal (y = x)")
            .legend(|(x, y)| {
                PathElement::new(vec![(x, y), (x + 16, y)], RED.mix(0.6).stroke_width(2))
            });
        let series: Vec<(f64, f64)> = levels
            .iter()
            .map(|l| (l.target_fdr, l.mean_fdp))
            .collect();
        chart.draw_series(LineSeries::new(series.iter().copied(), BLUE.stroke_width(2)))?;
        chart.draw_series(
            series
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
        )?;
        chart
            .configure_series_labels()
            .border_style(BLACK.mix(0.4))
            .draw()?;
    }

    draw_bar_panel(
        &panels[2],
        &format!("Power comparison (target FDR = {comparison_level:.2})"),
        "Power",
        lasso.score.power,
        comparison.mean_power,
        1.0,
    )?;
    let fdr_bar_max = (lasso.score.fdp.max(comparison.mean_fdp) * 1.2).max(0.05);
    draw_bar_panel(
        &panels[3],
        &format!("FDR comparison (target FDR = {comparison_level:.2})"),
        "False discovery rate",
        lasso.score.fdp,
        comparison.mean_fdp,
        fdr_bar_max,
    )?;

    root.present()?;
    Ok(())
}

fn draw_bar_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    caption: &str,
    y_desc: &str,
    lasso_value: f64,
    knockoff_value: f64,
    y_max: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..3.0, 0.0..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(4)
        .x_label_formatter(&|x: &f64| {
            if (x - 1.0).abs() < 0.25 {
                "Lasso".to_string()
            } else if (x - 2.0).abs() < 0.25 {
                "Knockoffs".to_string()
            } else {
                String::new()
            }
        })
        .y_desc(y_desc)
        .draw()?;
    chart.draw_series([
        Rectangle::new([(0.7, 0.0), (1.3, lasso_value)], BLUE.mix(0.6).filled()),
        Rectangle::new([(1.7, 0.0), (2.3, knockoff_value)], RED.mix(0.6).filled()),
    ])?;
    Ok(())
}
