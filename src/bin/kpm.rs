//! Command-line front end of the KPM engine.
//!
//! Loads a Hamiltonian from a MatrixMarket file, evaluates the DOS, an LDOS or
//! a Green's function element on a linear energy grid and writes one CSV row
//! per energy. The short report of the computation is logged at the end.

use anyhow::{Context, Result, anyhow, ensure};
use clap::{Parser, Subcommand, ValueEnum};
use kpm_project::{
    Config, EnergyRange, Kernel, System, kpm,
    utils::data_loader::{load_matrix_market, load_positions},
};
use serde::Serialize;
use std::{io, path::PathBuf, sync::Arc};

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum KernelKind {
    Jackson,
    Lorentz,
}

#[derive(Parser, Debug)]
#[clap(
    name = "kpm",
    about = "Spectral functions of a sparse Hamiltonian with the Kernel Polynomial Method."
)]
struct Cli {
    /// The Hamiltonian in MatrixMarket coordinate format.
    #[clap(long, value_name = "PATH")]
    matrix: PathBuf,
    #[clap(long, value_enum, default_value_t = KernelKind::Lorentz)]
    kernel: KernelKind,
    /// Parameter of the Lorentz kernel.
    #[clap(long, default_value_t = 4.0)]
    lambda: f64,
    /// Energy resolution of the result.
    #[clap(long, default_value_t = 0.05)]
    broadening: f64,
    /// Lower end of the energy grid.
    #[clap(long, allow_hyphen_values = true)]
    emin: f64,
    /// Upper end of the energy grid.
    #[clap(long, allow_hyphen_values = true)]
    emax: f64,
    /// Number of grid points.
    #[clap(long, default_value_t = 201)]
    points: usize,
    /// Known spectrum bounds `MIN MAX`; estimated when absent.
    #[clap(long, num_args = 2, value_names = ["MIN", "MAX"], allow_hyphen_values = true)]
    spectrum: Option<Vec<f64>>,
    /// Random vectors of the stochastic DOS.
    #[clap(long, default_value_t = 1)]
    num_random: usize,
    #[clap(long, default_value_t = 0)]
    seed: u64,
    /// Run independent recursions in parallel.
    #[clap(long)]
    parallel: bool,
    /// Output CSV file; stdout when absent.
    #[clap(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[clap(subcommand)]
    command: Quantity,
}

#[derive(Subcommand, Debug)]
enum Quantity {
    /// Density of states.
    Dos,
    /// Local density of states at a Hamiltonian index or at a position.
    Ldos {
        #[clap(long, conflicts_with = "position")]
        index: Option<usize>,
        /// Target position `X Y Z`; requires --positions.
        #[clap(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_hyphen_values = true)]
        position: Option<Vec<f64>>,
        /// CSV file of site positions, one row per Hamiltonian index.
        #[clap(long, value_name = "PATH")]
        positions: Option<PathBuf>,
    },
    /// Green's function element G_ij.
    Greens {
        #[clap(long)]
        row: usize,
        #[clap(long)]
        col: usize,
    },
}

#[derive(Debug, Serialize)]
struct DensityRow {
    energy: f64,
    value: f64,
}

#[derive(Debug, Serialize)]
struct GreensRow {
    energy: f64,
    re: f64,
    im: f64,
}

fn energy_grid(emin: f64, emax: f64, points: usize) -> Result<Vec<f64>> {
    ensure!(points >= 2, "at least two grid points are required");
    ensure!(emax > emin, "the energy grid must satisfy emin < emax");
    let step = (emax - emin) / (points - 1) as f64;
    Ok((0..points).map(|i| emin + step * i as f64).collect())
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let cli = Cli::parse();

    let kernel = match cli.kernel {
        KernelKind::Jackson => Kernel::Jackson,
        KernelKind::Lorentz => Kernel::lorentz(cli.lambda)?,
    };
    let energy_range = match cli.spectrum.as_deref() {
        Some([min, max]) => EnergyRange::new(*min, *max)?,
        Some(_) => return Err(anyhow!("--spectrum takes exactly two values")),
        None => EnergyRange::unset(),
    };
    let config = Config {
        energy_range,
        kernel,
        num_random: cli.num_random,
        random_seed: cli.seed,
        parallel: cli.parallel,
        ..Default::default()
    };
    log::info!("Configuration: {config:?}");

    let hamiltonian = load_matrix_market(&cli.matrix)
        .with_context(|| format!("Failed to load Hamiltonian from {:?}", cli.matrix))?;
    log::info!(
        "Loaded {} Hamiltonian of dimension {}",
        if hamiltonian.is_complex() { "complex" } else { "real" },
        hamiltonian.dim()
    );

    let energy = energy_grid(cli.emin, cli.emax, cli.points)?;
    let mut engine = kpm(hamiltonian, config)?;

    let sink: Box<dyn io::Write> = match &cli.output {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("Failed to create {path:?}"))?,
        ),
        None => Box::new(io::stdout()),
    };
    let mut writer = csv::Writer::from_writer(sink);

    match &cli.command {
        Quantity::Dos => {
            let dos = engine.calc_dos(&energy, cli.broadening)?;
            for (&energy, &value) in energy.iter().zip(&dos) {
                writer.serialize(DensityRow { energy, value })?;
            }
        }
        Quantity::Ldos {
            index,
            position,
            positions,
        } => {
            let ldos = match (index, position) {
                (Some(index), _) => engine.ldos(*index, &energy, cli.broadening)?,
                (None, Some(position)) => {
                    let path = positions
                        .as_ref()
                        .ok_or_else(|| anyhow!("--position requires --positions"))?;
                    let sites = load_positions(path)
                        .with_context(|| format!("Failed to load positions from {path:?}"))?;
                    ensure!(
                        sites.len() == engine.dim(),
                        "{} positions given for a Hamiltonian of dimension {}",
                        sites.len(),
                        engine.dim()
                    );
                    let target = [position[0], position[1], position[2]];
                    engine = engine.with_system(Arc::new(System::single_orbital(sites)));
                    engine.calc_ldos(&energy, cli.broadening, target, None)?
                }
                (None, None) => return Err(anyhow!("ldos needs --index or --position")),
            };
            for (&energy, &value) in energy.iter().zip(&ldos) {
                writer.serialize(DensityRow { energy, value })?;
            }
        }
        Quantity::Greens { row, col } => {
            let greens = engine.calc_greens(*row, *col, &energy, cli.broadening)?;
            for (&energy, g) in energy.iter().zip(&greens) {
                writer.serialize(GreensRow {
                    energy,
                    re: g.re,
                    im: g.im,
                })?;
            }
        }
    }
    writer.flush()?;

    log::info!("{}", engine.report(true));
    log::debug!("\n{}", engine.report(false));
    Ok(())
}
