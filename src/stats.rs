//! Per-call statistics of a KPM computation.
//!
//! Every public computation overwrites the [`Stats`] record of its engine with
//! the energy bounds in use, the size of the expansion and the time spent in
//! each phase. The throughput figure `eps` counts the nonzero elements of the
//! rescaled Hamiltonian touched per second of moment recursion.

use serde::Serialize;
use std::time::Duration;

/// Statistics of the last computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub energy_min: f64,
    pub energy_max: f64,
    /// Number of moments of each expansion.
    pub num_moments: usize,
    /// Number of independent recursions (random vectors, sites).
    pub multiplier: usize,
    /// Nonzero elements of the rescaled Hamiltonian.
    pub nnz: usize,
    /// Nonzero elements read by all matrix-vector products of the call.
    pub nnz_touched: u64,
    /// Bytes of the rescaled Hamiltonian.
    pub matrix_memory: usize,
    /// Bytes of the recursion vectors of one worker.
    pub vector_memory: usize,
    pub bounds_time: Duration,
    pub rescale_time: Duration,
    pub moments_time: Duration,
    pub reconstruct_time: Duration,
}

impl Stats {
    /// Records the size of a moment computation.
    ///
    /// A diagonal expansion needs `num_moments/2` products per recursion, an
    /// off-diagonal one needs `num_moments`.
    pub fn record_moments(
        &mut self,
        num_moments: usize,
        multiplier: usize,
        diagonal: bool,
        dim: usize,
        scalar_bytes: usize,
    ) {
        let products = if diagonal {
            num_moments / 2
        } else {
            num_moments
        };
        self.num_moments = num_moments;
        self.multiplier = multiplier;
        self.nnz_touched = (self.nnz as u64) * (products as u64) * (multiplier as u64);
        self.vector_memory = 2 * dim * scalar_bytes;
    }

    pub fn total_time(&self) -> Duration {
        self.bounds_time + self.rescale_time + self.moments_time + self.reconstruct_time
    }

    /// Nonzero elements processed per second during the moment recursion.
    pub fn eps(&self) -> f64 {
        let seconds = self.moments_time.as_secs_f64();
        if seconds > 0.0 {
            self.nnz_touched as f64 / seconds
        } else {
            0.0
        }
    }

    /// Formats the record, on one line if `shortform` is true.
    pub fn report(&self, shortform: bool) -> String {
        if shortform {
            format!(
                "{:.2}, {:.2} [{}] [{}] {} @ {}eps [{}] [{}] | {}",
                self.energy_min,
                self.energy_max,
                pretty_duration(self.bounds_time),
                pretty_duration(self.rescale_time),
                with_suffix(self.num_moments as f64),
                with_suffix(self.eps()),
                pretty_duration(self.moments_time),
                pretty_duration(self.reconstruct_time),
                pretty_duration(self.total_time()),
            )
        } else {
            format!(
                "Spectrum bounds: [{:.4}, {:.4}] in {}\n\
                 Rescaled Hamiltonian: {} nonzeros ({}B) in {}\n\
                 Moments: {} x {} @ {}eps ({}B of vectors) in {}\n\
                 Reconstruction: {}\n\
                 Total time: {}",
                self.energy_min,
                self.energy_max,
                pretty_duration(self.bounds_time),
                with_suffix(self.nnz as f64),
                with_suffix(self.matrix_memory as f64),
                pretty_duration(self.rescale_time),
                self.num_moments,
                self.multiplier,
                with_suffix(self.eps()),
                with_suffix(self.vector_memory as f64),
                pretty_duration(self.moments_time),
                pretty_duration(self.reconstruct_time),
                pretty_duration(self.total_time()),
            )
        }
    }
}

/// Formats a count with a metric suffix: `1234567.0` becomes `"1.23M"`.
pub fn with_suffix(value: f64) -> String {
    const SUFFIXES: [(f64, &str); 3] = [(1e9, "G"), (1e6, "M"), (1e3, "K")];
    for (threshold, suffix) in SUFFIXES {
        if value.abs() >= threshold {
            return format!("{:.2}{suffix}", value / threshold);
        }
    }
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// Formats a duration in the largest fitting unit.
pub fn pretty_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds >= 1.0 {
        format!("{seconds:.2}s")
    } else if seconds >= 1e-3 {
        format!("{:.1}ms", seconds * 1e3)
    } else {
        format!("{:.0}us", seconds * 1e6)
    }
}
