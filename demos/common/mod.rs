//! Shared helpers of the demo programs.

use clap::Parser;

/// Command-line arguments common to the demos.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Number of chain sites.
    #[clap(long, default_value_t = 2001)]
    pub n: usize,

    /// Energy resolution of the expansion.
    #[clap(long, default_value_t = 0.05)]
    pub broadening: f64,
}

/// A uniform energy grid from `min` to `max` (inclusive).
pub fn energy_grid(min: f64, max: f64, points: usize) -> Vec<f64> {
    let step = (max - min) / (points.max(2) - 1) as f64;
    (0..points).map(|i| min + step * i as f64).collect()
}
