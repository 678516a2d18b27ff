//! This module provides the high-level API of the Kernel Polynomial Method.
//!
//! [`KernelPolynomialMethod`] owns a backend chosen from the scalar field of the
//! Hamiltonian and an optional [`SiteLocator`] for position-based queries. It
//! keeps the estimated energy range between calls and exposes the statistics
//! of the last computation.
//!
//! The free functions ([`compute_dos`], [`compute_ldos`], [`compute_greens`])
//! run a single computation on a borrowed matrix without building an engine.

use crate::{
    algorithms::{bounds, kernel::Kernel, scaling::EnergyRange},
    error::{KpmError, KpmErrorKind},
    matrix::{Hamiltonian, KpmScalar, SparseHamiltonian},
    stats::Stats,
    strategy::{Computation, Config, CpuStrategy, KpmStrategy, Phase},
    system::SiteLocator,
};
use faer::c64;
use std::sync::Arc;

/// A KPM engine bound to one Hamiltonian.
pub struct KernelPolynomialMethod {
    strategy: Box<dyn KpmStrategy>,
    locator: Option<Arc<dyn SiteLocator>>,
}

/// Builds the backend matching the scalar field of `hamiltonian`.
fn make_strategy(
    hamiltonian: Hamiltonian,
    config: Config,
) -> Result<Box<dyn KpmStrategy>, KpmError> {
    Ok(match hamiltonian {
        Hamiltonian::Real(h) => Box::new(CpuStrategy::<f64>::new(h, config)?),
        Hamiltonian::Complex(h) => Box::new(CpuStrategy::<c64>::new(h, config)?),
    })
}

/// Creates a KPM engine for `hamiltonian`.
///
/// The configuration is validated immediately: an inverted energy range or a
/// bad kernel parameter fails here, before any computation.
pub fn kpm(
    hamiltonian: impl Into<Hamiltonian>,
    config: Config,
) -> Result<KernelPolynomialMethod, KpmError> {
    KernelPolynomialMethod::new(hamiltonian, config)
}

impl KernelPolynomialMethod {
    pub fn new(hamiltonian: impl Into<Hamiltonian>, config: Config) -> Result<Self, KpmError> {
        Ok(Self {
            strategy: make_strategy(hamiltonian.into(), config)?,
            locator: None,
        })
    }

    /// Attaches the site locator used by [`Self::calc_ldos`].
    pub fn with_system(mut self, locator: Arc<dyn SiteLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn config(&self) -> &Config {
        self.strategy.config()
    }

    /// Dimension of the Hamiltonian.
    pub fn dim(&self) -> usize {
        self.strategy.dim()
    }

    /// The energy range in use. An unset configured range is estimated on the
    /// first call and cached.
    pub fn energy_range(&mut self) -> Result<EnergyRange, KpmError> {
        self.strategy.energy_range()
    }

    /// Replaces the Hamiltonian and discards the cached energy range.
    ///
    /// A Hamiltonian of the other scalar field gets a new backend with the
    /// same configuration.
    pub fn change_hamiltonian(
        &mut self,
        hamiltonian: impl Into<Hamiltonian>,
    ) -> Result<(), KpmError> {
        let hamiltonian = hamiltonian.into();
        if self.strategy.change_hamiltonian(&hamiltonian) {
            return Ok(());
        }
        hamiltonian.validate()?;
        log::debug!(
            "Switching the KPM backend to a {} Hamiltonian",
            if hamiltonian.is_complex() { "complex" } else { "real" }
        );
        self.strategy = make_strategy(hamiltonian, self.strategy.config().clone())?;
        Ok(())
    }

    /// Calculates the local density of states at the site nearest to
    /// `position`, optionally restricted to one sublattice.
    pub fn calc_ldos(
        &mut self,
        energy: &[f64],
        broadening: f64,
        position: [f64; 3],
        sublattice: Option<&str>,
    ) -> Result<Vec<f64>, KpmError> {
        let index = match &self.locator {
            Some(locator) => locator.find_nearest(position, sublattice)?,
            None => {
                return Err(KpmErrorKind::InputError(
                    "a system is required to locate sites by position".to_string(),
                )
                .into());
            }
        };
        log::debug!("Nearest site to {position:?} has Hamiltonian index {index}");
        self.strategy.ldos(index, energy, broadening)
    }

    /// Calculates the local density of states at a Hamiltonian index.
    pub fn ldos(
        &mut self,
        index: usize,
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<f64>, KpmError> {
        self.strategy.ldos(index, energy, broadening)
    }

    /// Calculates the local density of states at several Hamiltonian indices.
    pub fn ldos_many(
        &mut self,
        indices: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<f64>>, KpmError> {
        self.strategy.ldos_many(indices, energy, broadening)
    }

    /// Calculates the density of states as a function of energy.
    pub fn calc_dos(&mut self, energy: &[f64], broadening: f64) -> Result<Vec<f64>, KpmError> {
        self.strategy.dos(energy, broadening)
    }

    /// Calculates the Green's function of a single Hamiltonian element.
    pub fn calc_greens(
        &mut self,
        i: usize,
        j: usize,
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<c64>, KpmError> {
        self.strategy.greens(i, j, energy, broadening)
    }

    /// Calculates the Green's function elements of row `i` and every column
    /// in `cols` with a single recursion.
    pub fn calc_greens_vector(
        &mut self,
        i: usize,
        cols: &[usize],
        energy: &[f64],
        broadening: f64,
    ) -> Result<Vec<Vec<c64>>, KpmError> {
        self.strategy.greens_vector(i, cols, energy, broadening)
    }

    /// Report of the last computation, on one line if `shortform` is true.
    pub fn report(&self, shortform: bool) -> String {
        self.strategy.report(shortform)
    }

    pub fn stats(&self) -> &Stats {
        self.strategy.stats()
    }

    pub fn phase(&self) -> Phase {
        self.strategy.phase()
    }
}

/// Estimates the spectral bounds of `hamiltonian`.
pub fn estimate_bounds<T, H>(hamiltonian: &H, precision: f64) -> Result<EnergyRange, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    bounds::estimate_bounds::<T, H>(hamiltonian, precision)
}

fn single_run_config(range: EnergyRange, kernel: Kernel) -> Result<Config, KpmError> {
    let config = Config {
        energy_range: range,
        kernel,
        ..Config::default()
    };
    config.validate()?;
    Ok(config)
}

/// Computes the density of states of `hamiltonian` with one random vector.
///
/// An unset `range` (`min == max`) is estimated first.
pub fn compute_dos<T, H>(
    hamiltonian: &H,
    range: EnergyRange,
    kernel: Kernel,
    energy: &[f64],
    broadening: f64,
) -> Result<Vec<f64>, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    let config = single_run_config(range, kernel)?;
    Computation::<T, H>::new(hamiltonian, &config).dos(&mut None, energy, broadening)
}

/// Computes the local density of states at `start_index`.
pub fn compute_ldos<T, H>(
    hamiltonian: &H,
    range: EnergyRange,
    kernel: Kernel,
    energy: &[f64],
    broadening: f64,
    start_index: usize,
) -> Result<Vec<f64>, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    let config = single_run_config(range, kernel)?;
    Computation::<T, H>::new(hamiltonian, &config).ldos(
        &mut None,
        start_index,
        energy,
        broadening,
    )
}

/// Computes the Green's function element `G_ij`.
#[allow(clippy::too_many_arguments)]
pub fn compute_greens<T, H>(
    hamiltonian: &H,
    range: EnergyRange,
    kernel: Kernel,
    i: usize,
    j: usize,
    energy: &[f64],
    broadening: f64,
) -> Result<Vec<c64>, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    let config = single_run_config(range, kernel)?;
    let mut values = Computation::<T, H>::new(hamiltonian, &config).greens_vector(
        &mut None,
        i,
        &[j],
        energy,
        broadening,
    )?;
    Ok(values.pop().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::System;
    use faer::sparse::{SparseColMat, Triplet};

    fn two_site() -> SparseColMat<usize, f64> {
        let triplets = [
            Triplet {
                row: 0,
                col: 1,
                val: 1.0,
            },
            Triplet {
                row: 1,
                col: 0,
                val: 1.0,
            },
        ];
        SparseColMat::try_new_from_triplets(2, 2, &triplets).unwrap()
    }

    #[test]
    fn test_two_site_dos_with_automatic_range() {
        let config = Config {
            kernel: Kernel::Jackson,
            ..Default::default()
        };
        let mut engine = kpm(two_site(), config).unwrap();
        let range = engine.energy_range().unwrap();
        assert!((range.min + 1.0).abs() < 1e-8 && (range.max - 1.0).abs() < 1e-8);

        let dos = engine.calc_dos(&[0.0], 0.1).unwrap();
        assert!(dos[0].is_finite() && dos[0] >= 0.0, "{}", dos[0]);
        assert_eq!(engine.stats().num_moments, 32);
        assert_eq!(engine.phase(), Phase::Done);
    }

    #[test]
    fn test_inverted_range_fails_at_construction() {
        let config = Config {
            energy_range: EnergyRange { min: 1.0, max: 0.0 },
            ..Default::default()
        };
        let err = kpm(two_site(), config).err().unwrap();
        assert!(err.is_invalid_range());
    }

    #[test]
    fn test_calc_ldos_uses_the_system() {
        let system = Arc::new(System::single_orbital(vec![[0.0; 3], [1.0, 0.0, 0.0]]));
        let mut engine = kpm(two_site(), Config::default())
            .unwrap()
            .with_system(system);
        let by_position = engine
            .calc_ldos(&[-0.5, 0.5], 0.1, [0.9, 0.0, 0.0], None)
            .unwrap();
        let by_index = engine.ldos(1, &[-0.5, 0.5], 0.1).unwrap();
        assert_eq!(by_position, by_index);

        let mut bare = kpm(two_site(), Config::default()).unwrap();
        assert!(bare.calc_ldos(&[0.0], 0.1, [0.0; 3], None).is_err());
    }

    #[test]
    fn test_change_hamiltonian_switches_field() {
        let mut engine = kpm(two_site(), Config::default()).unwrap();
        engine.energy_range().unwrap();

        let complex = SparseColMat::<usize, c64>::try_new_from_triplets(
            2,
            2,
            &[
                Triplet {
                    row: 0,
                    col: 1,
                    val: c64::new(0.0, 2.0),
                },
                Triplet {
                    row: 1,
                    col: 0,
                    val: c64::new(0.0, -2.0),
                },
            ],
        )
        .unwrap();
        engine.change_hamiltonian(complex).unwrap();
        let range = engine.energy_range().unwrap();
        assert!((range.max - 2.0).abs() < 1e-8, "{range:?}");
    }

    #[test]
    fn test_free_functions_match_the_engine() {
        let h = two_site();
        let range = EnergyRange::new(-1.0, 1.0).unwrap();
        let energy = [-0.5, 0.0, 0.5];

        let ldos = compute_ldos::<f64, _>(&h, range, Kernel::Jackson, &energy, 0.1, 0).unwrap();
        let greens = compute_greens::<f64, _>(&h, range, Kernel::Jackson, 0, 0, &energy, 0.1).unwrap();
        for (g, l) in greens.iter().zip(&ldos) {
            assert!((g.im + std::f64::consts::PI * l).abs() < 1e-10);
        }

        let config = Config {
            energy_range: range,
            kernel: Kernel::Jackson,
            ..Default::default()
        };
        let mut engine = kpm(h.clone(), config).unwrap();
        assert_eq!(engine.ldos(0, &energy, 0.1).unwrap(), ldos);
        assert_eq!(
            engine.calc_dos(&energy, 0.1).unwrap(),
            compute_dos::<f64, _>(&h, range, Kernel::Jackson, &energy, 0.1).unwrap()
        );

        let bounds = estimate_bounds::<f64, _>(&h, 1e-3).unwrap();
        assert!((bounds.width() - 2.0).abs() < 1e-8);
    }
}
