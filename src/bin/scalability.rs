//! Experiment Runner for the Scalability Analysis.
//!
//! This executable measures how the KPM throughput scales with the size of the
//! Hamiltonian. The primary process, the "orchestrator," iterates through a
//! range of square-lattice sizes. For each size, it first invokes the `datagen`
//! binary to write the Hamiltonian, then spawns an isolated "worker" child
//! process for each computation variant and collects its single-row CSV output.
//!
//! Running every variant in its own process keeps the peak RSS of one run from
//! being conflated with that of the orchestrator or of other workers.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use kpm_project::{
    Config, EnergyRange, Kernel, kpm,
    utils::{data_loader::load_matrix_market, perf::peak_rss_kb},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

/// Environment variable to differentiate between orchestrator and worker processes.
/// If this is set, the process runs in worker mode for the specified variant.
const VARIANT_ENV_VAR: &str = "KPM_SCALABILITY_VARIANT";

/// Defines the computation run in a worker process.
#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Copy)]
#[serde(rename_all = "kebab-case")]
enum KpmVariant {
    /// LDOS at the central site.
    Ldos,
    /// Stochastic DOS, random vectors one after the other.
    DosSequential,
    /// Stochastic DOS, random vectors on the rayon pool.
    DosParallel,
}

/// Command-line arguments for the main orchestrator process.
#[derive(Parser, Debug)]
#[clap(
    name = "scalability-runner",
    about = "Runs the scalability analysis of the KPM engine."
)]
struct ScalabilityArgs {
    /// The broadening used for all runs (fixes the number of moments).
    #[clap(long, default_value_t = 0.01)]
    broadening: f64,
    /// Random vectors of the DOS variants.
    #[clap(long, default_value_t = 8)]
    num_random: usize,
    /// The starting side length of the square lattice.
    #[clap(long)]
    side_start: usize,
    /// The ending side length of the square lattice.
    #[clap(long)]
    side_end: usize,
    /// The step size for increasing the side length.
    #[clap(long)]
    side_step: usize,
    /// Path to the output CSV file for storing aggregated results.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Command-line arguments for the isolated worker processes.
#[derive(Parser, Debug)]
struct WorkerArgs {
    /// The MatrixMarket file of the Hamiltonian.
    #[clap(long)]
    matrix: PathBuf,
    #[clap(long)]
    broadening: f64,
    #[clap(long)]
    num_random: usize,
}

/// Represents a single row of data in the final output CSV.
/// This struct captures the result from a single worker run.
#[derive(Debug, Serialize, Deserialize)]
struct ScalabilityResult {
    variant: KpmVariant,
    n: usize,
    nnz: usize,
    num_moments: usize,
    time_s: f64,
    eps: f64,
    rss_kb: u64,
}

/// Main entry point.
///
/// The logic dispatches to either the orchestrator or a worker based on the
/// presence of the `KPM_SCALABILITY_VARIANT` environment variable.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    if let Ok(variant_str) = std::env::var(VARIANT_ENV_VAR) {
        let variant = KpmVariant::from_str(&variant_str, true)
            .map_err(|_| anyhow!("Invalid variant string in env var: {}", variant_str))?;
        run_worker(variant)
    } else {
        run_orchestrator()
    }
}

/// Orchestrator logic.
///
/// Results are written to the output CSV file incrementally so that data is
/// kept even if a run fails mid-way through the experiment.
fn run_orchestrator() -> Result<()> {
    let args = ScalabilityArgs::parse();
    log::info!("Scalability sweep over square lattices: {args:?}");

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Cannot open {:?} for writing", &args.output))?;

    let variants_to_run = [
        KpmVariant::Ldos,
        KpmVariant::DosSequential,
        KpmVariant::DosParallel,
    ];

    for side in (args.side_start..=args.side_end).step_by(args.side_step.max(1)) {
        log::info!("Processing problem size: {side}x{side} sites");

        let instance_dir = PathBuf::from(format!("data/scalability/square_{side}"));
        fs::create_dir_all(&instance_dir)
            .with_context(|| format!("Cannot create {instance_dir:?}"))?;
        let matrix = instance_dir.join(format!("square-{side}x{side}.mtx"));

        let datagen_status = Command::new("./target/release/datagen")
            .arg("--geometry")
            .arg("square")
            .arg("--nx")
            .arg(side.to_string())
            .arg("--ny")
            .arg(side.to_string())
            .arg("--output-dir")
            .arg(&instance_dir)
            .status()
            .context("Cannot run ./target/release/datagen (build the release binaries first)")?;

        if !datagen_status.success() {
            log::error!("datagen exited with {datagen_status}; skipping side {side}");
            continue;
        }

        for &variant in &variants_to_run {
            log::info!("Running {variant:?} on {side}x{side}");
            let variant_name = variant
                .to_possible_value()
                .ok_or_else(|| anyhow!("Variant {variant:?} has no clap value"))?;
            let current_exe = std::env::current_exe()?;
            let child = Command::new(current_exe)
                .arg("--matrix")
                .arg(&matrix)
                .arg("--broadening")
                .arg(args.broadening.to_string())
                .arg("--num-random")
                .arg(args.num_random.to_string())
                .env(VARIANT_ENV_VAR, variant_name.get_name())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .with_context(|| format!("Cannot spawn the {variant:?} worker"))?;

            let output = child.wait_with_output()?;
            if !output.status.success() {
                log::error!("{variant:?} worker on {matrix:?} exited with {}", output.status);
                continue;
            }

            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .from_reader(output.stdout.as_slice());

            match rdr.deserialize::<ScalabilityResult>().next() {
                Some(Ok(record)) => {
                    log::info!(
                        "Worker finished. Result: n={}, moments={}, time={:.3}s, eps={:.3e}, rss={}KB",
                        record.n,
                        record.num_moments,
                        record.time_s,
                        record.eps,
                        record.rss_kb
                    );
                    writer.serialize(&record)?;
                    writer.flush()?;
                }
                Some(Err(e)) => {
                    log::error!("Failed to parse worker output as CSV: {}. Skipping record.", e);
                }
                None => {
                    log::warn!("Worker for {:?} produced no output. Skipping record.", variant);
                }
            }
        }
    }

    log::info!("Scalability results written to {:?}", &args.output);
    Ok(())
}

/// Worker logic.
///
/// Runs in an isolated child process: loads one Hamiltonian, runs the given
/// variant and prints a single `ScalabilityResult` to stdout as a CSV row.
fn run_worker(variant: KpmVariant) -> Result<()> {
    let args = WorkerArgs::parse();

    let hamiltonian = load_matrix_market(&args.matrix)
        .with_context(|| format!("Cannot load {:?}", args.matrix))?;
    let n = hamiltonian.dim();

    // The square lattice spectrum lies in [-4, 4]; skip the bounds estimation
    // so that only the expansion is timed.
    let config = Config {
        energy_range: EnergyRange::new(-4.0, 4.0)?,
        kernel: Kernel::default(),
        num_random: args.num_random,
        parallel: variant == KpmVariant::DosParallel,
        ..Default::default()
    };
    let mut engine = kpm(hamiltonian, config)?;
    let energy: Vec<f64> = (0..101).map(|i| -3.5 + 0.07 * i as f64).collect();

    let start_time = Instant::now();
    match variant {
        KpmVariant::Ldos => {
            engine.ldos(n / 2, &energy, args.broadening)?;
        }
        KpmVariant::DosSequential | KpmVariant::DosParallel => {
            engine.calc_dos(&energy, args.broadening)?;
        }
    }
    let time_s = start_time.elapsed().as_secs_f64();
    let rss_kb = peak_rss_kb();
    log::info!("{}", engine.report(true));

    let stats = engine.stats();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(std::io::stdout());
    writer.serialize(ScalabilityResult {
        variant,
        n,
        nnz: stats.nnz,
        num_moments: stats.num_moments,
        time_s,
        eps: stats.eps(),
        rss_kb,
    })?;
    writer.flush()?;

    Ok(())
}
