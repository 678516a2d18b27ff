//! Mapping of the Hamiltonian spectrum into the Chebyshev interval.
//!
//! Chebyshev polynomials are orthogonal on `[-1, 1]`, so the Hamiltonian is
//! rescaled as `H̃ = (H - b·I)/a` with
//!
//! - `a = 0.5·(E_max - E_min)·(1 + tol)`
//! - `b = 0.5·(E_max + E_min)`
//!
//! The tolerance keeps the extremal eigenvalues away from `±1`, where the
//! reconstruction formula is singular. The matrix actually stored is
//! `H2 = 2·H̃ = (H - b·I)·(2/a)`: the factor 2 of the recurrence
//! `T_{n+1} = 2x·T_n - T_{n-1}` is folded into the operator once instead of
//! being applied at every step.

use crate::{
    error::{KpmError, KpmErrorKind},
    matrix::{KpmScalar, SparseHamiltonian},
};
use serde::{Deserialize, Serialize};

/// Default relative margin added to the half-width of the spectrum.
pub const DEFAULT_SCALING_TOLERANCE: f64 = 0.01;

/// The interval `[min, max]` containing the spectrum of a Hamiltonian.
///
/// `min == max` means the range is unset and must be estimated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyRange {
    pub min: f64,
    pub max: f64,
}

impl EnergyRange {
    /// Creates a range, rejecting `min > max` and non-finite bounds.
    pub fn new(min: f64, max: f64) -> Result<Self, KpmError> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(KpmErrorKind::InvalidRange { min, max }.into());
        }
        Ok(Self { min, max })
    }

    /// A range which requests automatic estimation.
    pub const fn unset() -> Self {
        Self { min: 0.0, max: 0.0 }
    }

    /// Whether the range was explicitly set (`min != max`).
    pub fn is_set(&self) -> bool {
        self.min != self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// The scaling factors `(a, b)` of a computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    /// Half-width of the spectrum including the safety margin. Always positive.
    pub a: f64,
    /// Center of the spectrum.
    pub b: f64,
}

impl Scale {
    /// Computes the scaling factors of `range` with the relative margin `tolerance`.
    ///
    /// Fails with an invalid-range error if `range.max <= range.min`.
    pub fn from_range(range: EnergyRange, tolerance: f64) -> Result<Self, KpmError> {
        if !(range.max > range.min) || !range.min.is_finite() || !range.max.is_finite() {
            return Err(KpmErrorKind::InvalidRange {
                min: range.min,
                max: range.max,
            }
            .into());
        }
        if !(tolerance >= 0.0) || !tolerance.is_finite() {
            return Err(KpmErrorKind::Configuration(format!(
                "The scaling tolerance must be a non-negative number, got {tolerance}"
            ))
            .into());
        }
        Ok(Self {
            a: 0.5 * (range.max - range.min) * (1.0 + tolerance),
            b: 0.5 * (range.max + range.min),
        })
    }

    /// Maps an energy to the reduced coordinate `w = (E - b)/a`.
    #[inline]
    pub fn reduce(&self, energy: f64) -> f64 {
        (energy - self.b) / self.a
    }

    /// Maps a reduced coordinate back to an energy.
    #[inline]
    pub fn restore(&self, reduced: f64) -> f64 {
        reduced * self.a + self.b
    }

    /// Converts a broadening in energy units to the reduced domain.
    #[inline]
    pub fn reduced_broadening(&self, broadening: f64) -> f64 {
        broadening / self.a
    }

    /// Whether `energy` lies strictly inside the expansion interval.
    #[inline]
    pub fn contains(&self, energy: f64) -> bool {
        self.reduce(energy).abs() < 1.0
    }

    /// Number of energies for which the reconstruction is not defined.
    pub fn count_outside(&self, energy: &[f64]) -> usize {
        energy.iter().filter(|&&e| !self.contains(e)).count()
    }
}

/// Rescales `hamiltonian` for the Chebyshev recurrence.
///
/// Returns `H2 = (H - b·I)·(2/a)` together with the scaling factors. The result
/// keeps the sparsity pattern of `H` (plus the diagonal).
pub fn rescale<T, H>(
    hamiltonian: &H,
    range: EnergyRange,
    tolerance: f64,
) -> Result<(H, Scale), KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    let scale = Scale::from_range(range, tolerance)?;
    let h2 = hamiltonian.shifted_scaled(scale.b, 2.0 / scale.a)?;
    Ok((h2, scale))
}
