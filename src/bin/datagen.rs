//! A data generation utility for creating tight-binding test instances.
//!
//! This binary builds a chain or square-lattice Hamiltonian with nearest-neighbour
//! hopping and writes it in the MatrixMarket coordinate format, together with a
//! CSV file of site positions. The files are the input of the `kpm` CLI and of
//! the scalability experiment.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use kpm_project::{
    Hamiltonian,
    utils::{data_loader::save_matrix_market, lattice},
};
use std::{fs::File, io::Write, path::PathBuf};

/// The lattice geometry of the generated instance.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Geometry {
    /// Open chain of `nx` sites.
    Chain,
    /// Open `nx × ny` square lattice.
    Square,
}

/// Command-line interface for the data generator.
#[derive(Parser, Debug)]
#[clap(
    name = "datagen",
    about = "Generates tight-binding Hamiltonians in MatrixMarket format."
)]
struct DataGenArgs {
    #[clap(long, value_enum, default_value_t = Geometry::Square)]
    geometry: Geometry,
    /// Number of sites along x.
    #[clap(long)]
    nx: usize,
    /// Number of sites along y (ignored for a chain).
    #[clap(long, default_value_t = 1)]
    ny: usize,
    /// Nearest-neighbour hopping energy.
    #[clap(long, default_value_t = -1.0, allow_hyphen_values = true)]
    hopping: f64,
    /// The directory where the instance files (.mtx, .csv) will be saved.
    #[clap(long)]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = DataGenArgs::parse();
    log::info!("Generating instance with parameters: {:?}", &args);

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", &args.output_dir))?;

    let (lattice, base_name) = match args.geometry {
        Geometry::Chain => (
            lattice::chain(args.nx, args.hopping)?,
            format!("chain-{}", args.nx),
        ),
        Geometry::Square => (
            lattice::square(args.nx, args.ny, args.hopping)?,
            format!("square-{}x{}", args.nx, args.ny),
        ),
    };

    let mtx_path = args.output_dir.join(format!("{base_name}.mtx"));
    let csv_path = args.output_dir.join(format!("{base_name}.csv"));

    let num_sites = lattice.positions.len();
    save_matrix_market(&mtx_path, &Hamiltonian::from(lattice.hamiltonian))
        .with_context(|| format!("Failed to write {mtx_path:?}"))?;

    let mut file =
        File::create(&csv_path).with_context(|| format!("Failed to create {csv_path:?}"))?;
    for [x, y, z] in &lattice.positions {
        writeln!(file, "{x},{y},{z}")?;
    }

    log::info!("Generated {num_sites} sites.");
    log::info!("Generated files:\n  - {:?}\n  - {:?}", mtx_path, csv_path);
    Ok(())
}
