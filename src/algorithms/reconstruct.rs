//! Evaluation of a damped Chebyshev series at arbitrary energies.
//!
//! With the reduced coordinate `w = (E - b)/a = cos θ`, a spectral density is
//! reconstructed as
//!
//! ```text
//! ρ(E) = 2 / (a·π·sqrt(1 - w²)) · Σ_n m[n]·cos(nθ)
//! ```
//!
//! and the Green's function as
//!
//! ```text
//! G(E) = -2i / (a·sqrt(1 - w²)) · Σ_n m[n]·e^{-inθ}
//! ```
//!
//! whose imaginary part is `-π·ρ(E)` and whose real part is the companion
//! (Hilbert-transform) series `Σ m[n]·sin(nθ)/sin θ`.
//!
//! Both formulas are singular at `w = ±1` and undefined beyond. Such points are
//! not clamped: they yield non-finite values and the remaining points are
//! unaffected.

use crate::{algorithms::scaling::Scale, matrix::KpmScalar};
use faer::c64;
use std::f64::consts::PI;

/// Reconstructs a real function (DOS, LDOS) from damped moments.
///
/// Only the real part of the moments contributes.
pub fn reconstruct_real<T: KpmScalar>(moments: &[T], energy: &[f64], scale: Scale) -> Vec<f64> {
    let prefactor = 2.0 / (scale.a * PI);
    energy
        .iter()
        .map(|&e| {
            let w = scale.reduce(e);
            let theta = w.acos();
            let sum: f64 = moments
                .iter()
                .enumerate()
                .map(|(n, m)| m.re() * (n as f64 * theta).cos())
                .sum();
            prefactor / (1.0 - w * w).sqrt() * sum
        })
        .collect()
}

/// Reconstructs a Green's function matrix element from damped moments.
pub fn reconstruct_greens<T: KpmScalar>(moments: &[T], energy: &[f64], scale: Scale) -> Vec<c64> {
    energy
        .iter()
        .map(|&e| {
            let w = scale.reduce(e);
            let theta = w.acos();
            let mut sum = c64::new(0.0, 0.0);
            for (n, m) in moments.iter().enumerate() {
                let phase = n as f64 * theta;
                sum += c64::new(m.re(), m.im()) * c64::new(phase.cos(), -phase.sin());
            }
            let norm = c64::new(0.0, -2.0 / (scale.a * (1.0 - w * w).sqrt()));
            norm * sum
        })
        .collect()
}
