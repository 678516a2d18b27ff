//! Compares the Jackson and Lorentz kernels on a tight-binding chain.
//!
//! The LDOS in the middle of the chain and the stochastic DOS are reconstructed
//! with both kernels and printed next to the analytic band DOS
//! `1/(π·sqrt(4t² - E²))`. Run with
//! `cargo run --release --example chain_dos -- --n 4001 --broadening 0.02`.

mod common;

use anyhow::{Result, anyhow};
use clap::Parser;
use common::{DemoArgs, energy_grid};
use kpm_project::{Config, Kernel, kpm, utils::lattice};

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = DemoArgs::parse();
    let chain = lattice::chain(args.n, -1.0)?;
    let energy = energy_grid(-1.8, 1.8, 19);

    let mut columns = Vec::new();
    for (name, kernel) in [("jackson", Kernel::Jackson), ("lorentz", Kernel::default())] {
        // The range is left unset so that the Lanczos estimate is exercised.
        let config = Config {
            kernel,
            num_random: 16,
            ..Default::default()
        };
        let mut engine = kpm(chain.hamiltonian.clone(), config)?;
        let range = engine.energy_range()?;
        log::info!("{name}: estimated spectrum [{:.4}, {:.4}]", range.min, range.max);

        let ldos = engine.ldos(args.n / 2, &energy, args.broadening)?;
        log::info!("{name} LDOS: {}", engine.report(true));
        let dos = engine.calc_dos(&energy, args.broadening)?;
        log::info!("{name} DOS:  {}", engine.report(true));
        columns.push((ldos, dos));
    }

    println!(
        "{:>8} {:>10} {:>12} {:>12} {:>12} {:>12}",
        "E", "exact", "ldos_jack", "ldos_lor", "dos_jack", "dos_lor"
    );
    for (i, &e) in energy.iter().enumerate() {
        println!(
            "{:>8.3} {:>10.5} {:>12.5} {:>12.5} {:>12.5} {:>12.5}",
            e,
            lattice::chain_dos(e, -1.0),
            columns[0].0[i],
            columns[1].0[i],
            columns[0].1[i],
            columns[1].1[i]
        );
    }
    Ok(())
}
