//! Experiment Runner for the Kernel Accuracy Analysis.
//!
//! This executable compares the LDOS reconstructed with the Jackson and the
//! Lorentz kernels against the analytic band DOS of a long chain, for a sweep
//! of broadenings. For every broadening it records the number of moments each
//! kernel needs and the largest relative error over an interior energy grid,
//! where the band DOS is smooth.

use anyhow::{Result, anyhow, ensure};
use clap::Parser;
use kpm_project::{
    Config, EnergyRange, Kernel, kpm,
    utils::lattice::{self, chain_dos},
};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments for the kernel accuracy experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "accuracy-runner",
    about = "Runs an accuracy analysis of the KPM kernels against the analytic chain DOS."
)]
struct AccuracyArgs {
    /// Number of chain sites. Must be large enough that the chain ends are not
    /// reached within the expansion order.
    #[clap(long, default_value_t = 4001)]
    n: usize,

    /// Largest broadening of the sweep.
    #[clap(long, default_value_t = 0.2)]
    broadening_max: f64,

    /// Smallest broadening of the sweep.
    #[clap(long, default_value_t = 0.005)]
    broadening_min: f64,

    /// Number of broadenings, spaced geometrically.
    #[clap(long, default_value_t = 12)]
    steps: usize,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the accuracy analysis CSV.
#[derive(Debug, Serialize)]
struct AccuracyResult {
    broadening: f64,
    moments_jackson: usize,
    max_relative_error_jackson: f64,
    moments_lorentz: usize,
    max_relative_error_lorentz: f64,
}

/// Largest relative deviation of `values` from the analytic chain DOS.
fn max_relative_error(energy: &[f64], values: &[f64]) -> f64 {
    energy
        .iter()
        .zip(values)
        .map(|(&e, &v)| {
            let exact = chain_dos(e, -1.0);
            (v - exact).abs() / exact
        })
        .fold(0.0, f64::max)
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = AccuracyArgs::parse();
    ensure!(args.steps >= 2, "the sweep needs at least two broadenings");
    ensure!(
        args.broadening_min > 0.0 && args.broadening_max > args.broadening_min,
        "the broadenings must satisfy 0 < min < max"
    );
    log::info!("Starting accuracy analysis with parameters: {args:?}");

    let chain = lattice::chain(args.n, -1.0)?;
    let center = args.n / 2;
    let energy: Vec<f64> = (0..41).map(|i| -1.5 + 0.075 * i as f64).collect();

    let kernels = [Kernel::Jackson, Kernel::default()];
    let mut engines = Vec::with_capacity(kernels.len());
    for kernel in kernels {
        let config = Config {
            energy_range: EnergyRange::new(-2.0, 2.0)?,
            kernel,
            ..Default::default()
        };
        engines.push(kpm(chain.hamiltonian.clone(), config)?);
    }

    let mut writer = csv::Writer::from_path(&args.output)?;
    let ratio = (args.broadening_min / args.broadening_max).powf(1.0 / (args.steps - 1) as f64);

    for step in 0..args.steps {
        let broadening = args.broadening_max * ratio.powi(step as i32);

        let mut moments = [0; 2];
        let mut errors = [0.0; 2];
        for (i, engine) in engines.iter_mut().enumerate() {
            let ldos = engine.ldos(center, &energy, broadening)?;
            moments[i] = engine.stats().num_moments;
            errors[i] = max_relative_error(&energy, &ldos);
        }

        log::info!(
            "broadening {broadening:.4}: Jackson {} moments, error {:.2e}; Lorentz {} moments, error {:.2e}",
            moments[0],
            errors[0],
            moments[1],
            errors[1]
        );
        writer.serialize(AccuracyResult {
            broadening,
            moments_jackson: moments[0],
            max_relative_error_jackson: errors[0],
            moments_lorentz: moments[1],
            max_relative_error_lorentz: errors[1],
        })?;
    }
    writer.flush()?;

    log::info!("Results saved to {:?}", args.output);
    Ok(())
}
