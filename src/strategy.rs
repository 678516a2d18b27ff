//! Orchestration of a KPM computation.
//!
//! A computation runs through fixed phases:
//!
//! 1.  **Bounds**: the energy range is taken from the [`Config`] or estimated
//!     with a Lanczos iteration, then cached until the Hamiltonian changes.
//! 2.  **Rescale**: `H2 = (H - b·I)·(2/a)` is assembled and the number of
//!     moments is derived from the broadening and the kernel.
//! 3.  **Moments**: Chebyshev moments of one or more starter vectors.
//! 4.  **Reconstruct**: damping with the kernel and evaluation of the series
//!     at the requested energies.
//!
//! [`KpmStrategy`] is the object-safe capability set of an engine backend;
//! [`CpuStrategy`] is the reference backend, generic over the scalar field of
//! the Hamiltonian. Independent recursions (random vectors of the DOS, sites
//! of [`KpmStrategy::ldos_many`]) run on `rayon` workers when
//! [`Config::parallel`] is set. Every random vector owns a generator seeded
//! from its index and the moments are summed in index order, so both paths
//! produce identical results.

use crate::{
    algorithms::{
        bounds::{DEFAULT_BOUNDS_SEED, DEFAULT_LANCZOS_PRECISION, lanczos_bounds},
        kernel::Kernel,
        moments::{
            compute_diagonal_moments, compute_offdiagonal_moments, exval_starter, random_starter,
        },
        reconstruct::{reconstruct_greens, reconstruct_real},
        scaling::{DEFAULT_SCALING_TOLERANCE, EnergyRange, Scale, rescale},
    },
    error::{KpmError, KpmErrorKind},
    matrix::{Hamiltonian, KpmScalar, SparseHamiltonian},
    stats::Stats,
    utils::perf::timed,
};
use faer::{
    Mat, c64,
    dyn_stack::{MemBuffer, MemStack},
    sparse::SparseColMat,
};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{marker::PhantomData, sync::Arc};

/// Parameters of a KPM engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spectrum bounds; an unset range (`min == max`) is estimated.
    pub energy_range: EnergyRange,
    pub kernel: Kernel,
    /// Random vectors of the stochastic trace used by the DOS.
    pub num_random: usize,
    /// Relative precision of the Lanczos bounds estimation.
    pub lanczos_precision: f64,
    /// Relative margin added to the spectrum half-width.
    pub scaling_tolerance: f64,
    /// Seed of the random starter vectors.
    pub random_seed: u64,
    /// Run independent recursions on the rayon thread pool.
    pub parallel: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            energy_range: EnergyRange::unset(),
            kernel: Kernel::default(),
            num_random: 1,
            lanczos_precision: DEFAULT_LANCZOS_PRECISION,
            scaling_tolerance: DEFAULT_SCALING_TOLERANCE,
            random_seed: 0,
            parallel: false,
        }
    }
}

impl Config {
    /// Checks every parameter before any computation starts.
    pub fn validate(&self) -> Result<(), KpmError> {
        let range = self.energy_range;
        if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
            return Err(KpmErrorKind::InvalidRange {
                min: range.min,
                max: range.max,
            }
            .into());
        }
        self.kernel.validate()?;
        if self.num_random == 0 {
            return Err(KpmErrorKind::Configuration(
                "At least one random vector is required".to_string(),
            )
            .into());
        }
        if !(self.lanczos_precision > 0.0) || !self.lanczos_precision.is_finite() {
            return Err(KpmErrorKind::Configuration(format!(
                "The Lanczos precision must be a positive number, got {}",
                self.lanczos_precision
            ))
            .into());
        }
        if !(self.scaling_tolerance >= 0.0) || !self.scaling_tolerance.is_finite() {
            return Err(KpmErrorKind::Configuration(format!(
                "The scaling tolerance must be a non-negative number, got {}",
                self.scaling_tolerance
            ))
            .into());
        }
        Ok(())
    }
}

/// The phase reached by the last computation of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Phase {
    #[default]
    Idle,
    BoundsReady,
    Rescaled,
    MomentsComputed,
    Reconstructed,
    Done,
}

/// The capability set of a KPM backend.
pub trait KpmStrategy: Send {
    /// Dimension of the Hamiltonian.
    fn dim(&self) -> usize;

    fn is_complex(&self) -> bool;

    fn config(&self) -> &Config;

    /// The energy range in use, estimated and cached on first access.
    fn energy_range(&mut self) -> Result<EnergyRange, KpmError>;

    /// Replaces the Hamiltonian and resets the cached energy range.
    ///
    /// Returns `false`, leaving the engine untouched, if the backend does not
    /// handle the scalar field of `hamiltonian`.
    fn change_hamiltonian(&mut self, hamiltonian: &Hamiltonian) -> bool;

    /// Local density of states at a Hamiltonian index.
    fn ldos(&mut self, index: usize, energy: &[f64], broadening: f64)
    -> Result<Vec<f64>, KpmError>;

    /// Local density of states at several indices, in input order.
    fn ldos_many(
        &mut self,
        indices: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<f64>>, KpmError>;

    /// Density of states from a stochastic trace.
    fn dos(&mut self, energy: &[f64], broadening: f64) -> Result<Vec<f64>, KpmError>;

    /// Green's function element `G_row,col`.
    fn greens(
        &mut self,
        row: usize,
        col: usize,
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<c64>, KpmError> {
        let mut results = self.greens_vector(row, &[col], energy, broadening)?;
        results
            .pop()
            .ok_or_else(|| KpmErrorKind::InputError("no Green's function computed".into()).into())
    }

    /// Green's function elements `G_row,c` for every `c` in `cols`, from a
    /// single recursion.
    fn greens_vector(
        &mut self,
        row: usize,
        cols: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<c64>>, KpmError>;

    /// Statistics of the last computation.
    fn stats(&self) -> &Stats;

    fn phase(&self) -> Phase;

    fn report(&self, shortform: bool) -> String {
        self.stats().report(shortform)
    }
}

/// The rescaled operator of one computation.
struct Prepared<H> {
    h2: H,
    scale: Scale,
    num_moments: usize,
}

/// One run through the phases, shared by [`CpuStrategy`] and the free
/// functions of [`crate::kpm`].
pub(crate) struct Computation<'a, T: KpmScalar, H: SparseHamiltonian<T>> {
    hamiltonian: &'a H,
    config: &'a Config,
    stats: Stats,
    phase: Phase,
    _field: PhantomData<T>,
}

impl<'a, T: KpmScalar, H: SparseHamiltonian<T>> Computation<'a, T, H> {
    pub(crate) fn new(hamiltonian: &'a H, config: &'a Config) -> Self {
        Self {
            hamiltonian,
            config,
            stats: Stats::default(),
            phase: Phase::Idle,
            _field: PhantomData,
        }
    }

    pub(crate) fn into_parts(self) -> (Stats, Phase) {
        (self.stats, self.phase)
    }

    fn enter(&mut self, phase: Phase) {
        log::debug!("KPM phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn check_index(&self, index: usize) -> Result<(), KpmError> {
        let size = self.hamiltonian.dim();
        if index >= size {
            return Err(KpmErrorKind::IndexOutOfBounds { index, size }.into());
        }
        Ok(())
    }

    fn check_broadening(&self, broadening: f64) -> Result<(), KpmError> {
        if !(broadening > 0.0) || !broadening.is_finite() {
            return Err(KpmErrorKind::Configuration(format!(
                "The broadening must be a positive number, got {broadening}"
            ))
            .into());
        }
        Ok(())
    }

    /// Resolves the energy range, reusing `cache` when filled.
    pub(crate) fn bounds(
        &mut self,
        cache: &mut Option<EnergyRange>,
    ) -> Result<EnergyRange, KpmError> {
        let range = match *cache {
            Some(range) => range,
            None => {
                let (range, elapsed) = timed(|| self.resolve_range());
                self.stats.bounds_time = elapsed;
                let range = range?;
                *cache = Some(range);
                range
            }
        };
        self.stats.energy_min = range.min;
        self.stats.energy_max = range.max;
        self.enter(Phase::BoundsReady);
        Ok(range)
    }

    fn resolve_range(&self) -> Result<EnergyRange, KpmError> {
        let configured = self.config.energy_range;
        if configured.is_set() {
            return EnergyRange::new(configured.min, configured.max);
        }
        let estimate = lanczos_bounds::<T, H>(
            self.hamiltonian,
            self.config.lanczos_precision,
            DEFAULT_BOUNDS_SEED,
        )?;
        log::info!(
            "Estimated energy bounds [{:.6}, {:.6}] in {} Lanczos steps",
            estimate.range.min,
            estimate.range.max,
            estimate.steps
        );
        Ok(estimate.range)
    }

    fn prepare(&mut self, range: EnergyRange, broadening: f64) -> Result<Prepared<H>, KpmError> {
        let tolerance = self.config.scaling_tolerance;
        let scale = Scale::from_range(range, tolerance)?;
        let num_moments = self
            .config
            .kernel
            .required_num_moments(scale.reduced_broadening(broadening))?;

        let (rescaled, elapsed) = timed(|| rescale::<T, H>(self.hamiltonian, range, tolerance));
        self.stats.rescale_time = elapsed;
        let (h2, scale) = rescaled?;

        self.stats.nnz = h2.nnz();
        self.stats.matrix_memory = h2.storage_bytes();
        log::debug!(
            "Rescaled with a = {:.6}, b = {:.6}; {num_moments} moments for broadening {broadening}",
            scale.a,
            scale.b
        );
        self.enter(Phase::Rescaled);
        Ok(Prepared {
            h2,
            scale,
            num_moments,
        })
    }

    /// Runs `count` independent diagonal recursions, in parallel if configured.
    fn diagonal_batch<F>(
        &mut self,
        prepared: &Prepared<H>,
        count: usize,
        starter: F,
    ) -> Result<Vec<Vec<T>>, KpmError>
    where
        F: Fn(usize) -> Result<Mat<T>, KpmError> + Sync,
    {
        let h2 = &prepared.h2;
        let num_moments = prepared.num_moments;
        let run = |j: usize| -> Result<Vec<T>, KpmError> {
            let mut mem = MemBuffer::new(h2.matvec_scratch());
            let stack = MemStack::new(&mut mem);
            compute_diagonal_moments(h2, &starter(j)?, num_moments, stack)
        };

        let (batch, elapsed) = timed(|| {
            if self.config.parallel && count > 1 {
                (0..count).into_par_iter().map(run).collect::<Result<Vec<_>, _>>()
            } else {
                (0..count).map(run).collect::<Result<Vec<_>, _>>()
            }
        });
        self.stats.moments_time = elapsed;
        self.stats.record_moments(
            num_moments,
            count,
            true,
            h2.dim(),
            std::mem::size_of::<T>(),
        );
        let batch = batch?;
        self.enter(Phase::MomentsComputed);
        Ok(batch)
    }

    fn warn_outside(&self, scale: Scale, energy: &[f64]) {
        let outside = scale.count_outside(energy);
        if outside > 0 {
            log::warn!(
                "{outside} of {} energies lie outside the expansion interval ({:.6}, {:.6}); \
                 their values are not finite",
                energy.len(),
                scale.restore(-1.0),
                scale.restore(1.0)
            );
        }
    }

    fn densities(
        &mut self,
        prepared: &Prepared<H>,
        batch: Vec<Vec<T>>,
        energy: &[f64],
    ) -> Vec<Vec<f64>> {
        let kernel = self.config.kernel;
        let scale = prepared.scale;
        let (values, elapsed) = timed(|| {
            batch
                .into_iter()
                .map(|mut moments| {
                    kernel.apply(&mut moments);
                    reconstruct_real(&moments, energy, scale)
                })
                .collect()
        });
        self.stats.reconstruct_time = elapsed;
        self.warn_outside(scale, energy);
        self.enter(Phase::Reconstructed);
        values
    }

    pub(crate) fn ldos_many(
        &mut self,
        cache: &mut Option<EnergyRange>,
        indices: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<f64>>, KpmError> {
        for &index in indices {
            self.check_index(index)?;
        }
        self.check_broadening(broadening)?;

        let range = self.bounds(cache)?;
        let prepared = self.prepare(range, broadening)?;
        let dim = prepared.h2.dim();
        let batch =
            self.diagonal_batch(&prepared, indices.len(), |j| exval_starter(dim, indices[j]))?;
        let values = self.densities(&prepared, batch, energy);
        log::info!(
            "LDOS at {} site(s): {} moments over [{:.4}, {:.4}]",
            indices.len(),
            prepared.num_moments,
            range.min,
            range.max
        );
        self.enter(Phase::Done);
        Ok(values)
    }

    pub(crate) fn ldos(
        &mut self,
        cache: &mut Option<EnergyRange>,
        index: usize,
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<f64>, KpmError> {
        let mut values = self.ldos_many(cache, &[index], energy, broadening)?;
        Ok(values.pop().unwrap_or_default())
    }

    pub(crate) fn dos(
        &mut self,
        cache: &mut Option<EnergyRange>,
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<f64>, KpmError> {
        self.check_broadening(broadening)?;

        let range = self.bounds(cache)?;
        let prepared = self.prepare(range, broadening)?;
        let dim = prepared.h2.dim();
        let num_random = self.config.num_random;
        let seed = self.config.random_seed;
        let batch = self.diagonal_batch(&prepared, num_random, |j| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(j as u64));
            Ok(random_starter::<T, _>(dim, &mut rng))
        })?;

        // Summed in index order: the result does not depend on scheduling.
        let mut total = vec![T::from_re(0.0); prepared.num_moments];
        for moments in &batch {
            for (t, m) in total.iter_mut().zip(moments) {
                *t = *t + *m;
            }
        }
        let inv = T::from_re(1.0 / num_random as f64);
        for t in total.iter_mut() {
            *t = *t * inv;
        }

        let mut values = self.densities(&prepared, vec![total], energy);
        log::info!(
            "DOS from {num_random} random vector(s): {} moments over [{:.4}, {:.4}]",
            prepared.num_moments,
            range.min,
            range.max
        );
        self.enter(Phase::Done);
        Ok(values.pop().unwrap_or_default())
    }

    pub(crate) fn greens_vector(
        &mut self,
        cache: &mut Option<EnergyRange>,
        row: usize,
        cols: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<c64>>, KpmError> {
        if cols.is_empty() {
            return Err(KpmErrorKind::InputError(
                "at least one column index is required".to_string(),
            )
            .into());
        }
        self.check_index(row)?;
        for &col in cols {
            self.check_index(col)?;
        }
        self.check_broadening(broadening)?;

        let range = self.bounds(cache)?;
        let prepared = self.prepare(range, broadening)?;
        let dim = prepared.h2.dim();

        let batch = if cols == [row] {
            self.diagonal_batch(&prepared, 1, |_| exval_starter(dim, row))?
        } else {
            let (batch, elapsed) = timed(|| {
                let mut mem = MemBuffer::new(prepared.h2.matvec_scratch());
                let stack = MemStack::new(&mut mem);
                compute_offdiagonal_moments::<T, H>(
                    &prepared.h2,
                    row,
                    cols,
                    prepared.num_moments,
                    stack,
                )
            });
            self.stats.moments_time = elapsed;
            self.stats.record_moments(
                prepared.num_moments,
                1,
                false,
                dim,
                std::mem::size_of::<T>(),
            );
            let batch = batch?;
            self.enter(Phase::MomentsComputed);
            batch
        };

        let kernel = self.config.kernel;
        let scale = prepared.scale;
        let (values, elapsed) = timed(|| {
            batch
                .into_iter()
                .map(|mut moments| {
                    kernel.apply(&mut moments);
                    reconstruct_greens(&moments, energy, scale)
                })
                .collect()
        });
        self.stats.reconstruct_time = elapsed;
        self.warn_outside(scale, energy);
        self.enter(Phase::Reconstructed);

        log::info!(
            "Green's function row {row}, {} column(s): {} moments",
            cols.len(),
            prepared.num_moments
        );
        self.enter(Phase::Done);
        Ok(values)
    }
}

/// The reference CPU backend.
#[derive(Debug)]
pub struct CpuStrategy<T: KpmScalar> {
    hamiltonian: Arc<SparseColMat<usize, T>>,
    config: Config,
    bounds: Option<EnergyRange>,
    stats: Stats,
    phase: Phase,
}

impl<T: KpmScalar> CpuStrategy<T> {
    /// Creates a backend after validating the configuration and the matrix.
    pub fn new(hamiltonian: Arc<SparseColMat<usize, T>>, config: Config) -> Result<Self, KpmError> {
        config.validate()?;
        T::wrap_hamiltonian(hamiltonian.clone()).validate()?;
        Ok(Self {
            hamiltonian,
            config,
            bounds: None,
            stats: Stats::default(),
            phase: Phase::Idle,
        })
    }

    /// Stores the outcome of a computation, successful or not.
    fn finish(&mut self, parts: (Stats, Phase)) {
        let (stats, phase) = parts;
        self.stats = stats;
        self.phase = phase;
    }
}

impl<T: KpmScalar> KpmStrategy for CpuStrategy<T> {
    fn dim(&self) -> usize {
        self.hamiltonian.nrows()
    }

    fn is_complex(&self) -> bool {
        T::IS_COMPLEX
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn energy_range(&mut self) -> Result<EnergyRange, KpmError> {
        let mut run = Computation::new(&*self.hamiltonian, &self.config);
        let result = run.bounds(&mut self.bounds);
        let parts = run.into_parts();
        self.finish(parts);
        result
    }

    fn change_hamiltonian(&mut self, hamiltonian: &Hamiltonian) -> bool {
        let Some(matrix) = T::unwrap_hamiltonian(hamiltonian) else {
            return false;
        };
        if let Err(e) = hamiltonian.validate() {
            log::warn!("Rejected replacement Hamiltonian: {e}");
            return false;
        }
        self.hamiltonian = matrix;
        self.bounds = None;
        self.phase = Phase::Idle;
        true
    }

    fn ldos(
        &mut self,
        index: usize,
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<f64>, KpmError> {
        let mut run = Computation::new(&*self.hamiltonian, &self.config);
        let result = run.ldos(&mut self.bounds, index, energy, broadening);
        let parts = run.into_parts();
        self.finish(parts);
        result
    }

    fn ldos_many(
        &mut self,
        indices: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<f64>>, KpmError> {
        let mut run = Computation::new(&*self.hamiltonian, &self.config);
        let result = run.ldos_many(&mut self.bounds, indices, energy, broadening);
        let parts = run.into_parts();
        self.finish(parts);
        result
    }

    fn dos(&mut self, energy: &[f64], broadening: f64) -> Result<Vec<f64>, KpmError> {
        let mut run = Computation::new(&*self.hamiltonian, &self.config);
        let result = run.dos(&mut self.bounds, energy, broadening);
        let parts = run.into_parts();
        self.finish(parts);
        result
    }

    fn greens_vector(
        &mut self,
        row: usize,
        cols: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<c64>>, KpmError> {
        let mut run = Computation::new(&*self.hamiltonian, &self.config);
        let result = run.greens_vector(&mut self.bounds, row, cols, energy, broadening);
        let parts = run.into_parts();
        self.finish(parts);
        result
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }

    fn phase(&self) -> Phase {
        self.phase
    }
}
