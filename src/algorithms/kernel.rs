//! Damping kernels of the Kernel Polynomial Method.
//!
//! A truncated Chebyshev series of a function with sharp features rings (Gibbs
//! oscillations). Multiplying moment `n` by a damping coefficient `g_n`
//! replaces the truncation by a convolution with a smooth, well-localized
//! kernel. The kernel also fixes the relation between the number of moments `N`
//! and the resolution of the reconstructed function:
//!
//! | Kernel | Broadening (reduced units) | `g_n` |
//! |--------|----------------------------|-------|
//! | Jackson | `π / N` (Gaussian-like) | `[(N-n+1)·cos(πn/(N+1)) + sin(πn/(N+1))·cot(π/(N+1))] / (N+1)` |
//! | Lorentz(λ) | `λ / N` (Lorentzian) | `sinh(λ(1 - n/N)) / sinh(λ)` |
//!
//! The Lorentz kernel reproduces the pole structure of Green's functions and is
//! the default.

use crate::{
    error::{KpmError, KpmErrorKind},
    matrix::KpmScalar,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Default `λ` of the Lorentz kernel.
pub const DEFAULT_LORENTZ_LAMBDA: f64 = 4.0;

/// Largest moment count a broadening may request. Every moment vector and the
/// damping coefficients are allocated at this length.
pub const MAX_NUM_MOMENTS: usize = 1 << 24;

/// The damping kernel applied to the moments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Kernel {
    /// Good general-purpose kernel; positive reconstruction, Gaussian-like
    /// broadening `σ = π/N`.
    Jackson,
    /// Best for Green's functions; Lorentzian broadening `ε = λ/N`. Usual
    /// values of `λ` are between 3 and 5.
    Lorentz { lambda: f64 },
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Lorentz {
            lambda: DEFAULT_LORENTZ_LAMBDA,
        }
    }
}

impl Kernel {
    pub fn jackson() -> Self {
        Kernel::Jackson
    }

    /// Creates a Lorentz kernel, rejecting non-positive or non-finite `λ`.
    pub fn lorentz(lambda: f64) -> Result<Self, KpmError> {
        let kernel = Kernel::Lorentz { lambda };
        kernel.validate()?;
        Ok(kernel)
    }

    /// Checks the kernel parameters.
    pub fn validate(&self) -> Result<(), KpmError> {
        match *self {
            Kernel::Jackson => Ok(()),
            Kernel::Lorentz { lambda } if lambda > 0.0 && lambda.is_finite() => Ok(()),
            Kernel::Lorentz { lambda } => Err(KpmErrorKind::Configuration(format!(
                "Lorentz kernel lambda must be positive, got {lambda}"
            ))
            .into()),
        }
    }

    /// Number of moments needed to resolve details of width `reduced_broadening`
    /// (the broadening divided by the scaling factor `a`).
    ///
    /// The count is rounded up to the next even number, because the diagonal
    /// recursion produces moments in pairs, and is at least 2. Counts above
    /// [`MAX_NUM_MOMENTS`] are rejected.
    pub fn required_num_moments(&self, reduced_broadening: f64) -> Result<usize, KpmError> {
        self.validate()?;
        if !(reduced_broadening > 0.0) || !reduced_broadening.is_finite() {
            return Err(KpmErrorKind::Configuration(format!(
                "The broadening must be a positive number, got {reduced_broadening} (reduced)"
            ))
            .into());
        }

        let scale = match *self {
            Kernel::Jackson => PI,
            Kernel::Lorentz { lambda } => lambda,
        };
        let num_moments = (scale / reduced_broadening).ceil();
        if num_moments > MAX_NUM_MOMENTS as f64 {
            return Err(KpmErrorKind::Configuration(format!(
                "The broadening {reduced_broadening} (reduced) requires {num_moments} moments, \
                 more than the limit of {MAX_NUM_MOMENTS}"
            ))
            .into());
        }
        Ok(round_up_even(num_moments as usize))
    }

    /// The damping coefficients `g_0 .. g_{N-1}` for `num_moments = N`.
    pub fn damping_coefficients(&self, num_moments: usize) -> Vec<f64> {
        let n_total = num_moments as f64;
        match *self {
            Kernel::Jackson => {
                let phase = PI / (n_total + 1.0);
                let cot = 1.0 / phase.tan();
                (0..num_moments)
                    .map(|n| {
                        let n = n as f64;
                        ((n_total - n + 1.0) * (phase * n).cos() + (phase * n).sin() * cot)
                            / (n_total + 1.0)
                    })
                    .collect()
            }
            Kernel::Lorentz { lambda } => {
                let norm = lambda.sinh();
                (0..num_moments)
                    .map(|n| (lambda * (1.0 - n as f64 / n_total)).sinh() / norm)
                    .collect()
            }
        }
    }

    /// Multiplies `moments` in place by the damping coefficients.
    pub fn apply<T: KpmScalar>(&self, moments: &mut [T]) {
        let coefficients = self.damping_coefficients(moments.len());
        for (moment, g) in moments.iter_mut().zip(coefficients) {
            *moment = *moment * T::from_re(g);
        }
    }
}

/// Rounds `n` up to the next even number, with a minimum of 2.
pub fn round_up_even(n: usize) -> usize {
    let n = n.max(2);
    n + n % 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_even() {
        assert_eq!(round_up_even(0), 2);
        assert_eq!(round_up_even(1), 2);
        assert_eq!(round_up_even(2), 2);
        assert_eq!(round_up_even(31), 32);
        assert_eq!(round_up_even(32), 32);
    }

    #[test]
    fn test_required_num_moments() {
        // ceil(pi / 0.1) = 32
        assert_eq!(Kernel::Jackson.required_num_moments(0.1).unwrap(), 32);
        // ceil(4 / 0.1) = 40
        assert_eq!(Kernel::default().required_num_moments(0.1).unwrap(), 40);
        // ceil(3 / 0.2) = 15 -> 16
        assert_eq!(
            Kernel::lorentz(3.0).unwrap().required_num_moments(0.2).unwrap(),
            16
        );
    }

    #[test]
    fn test_required_num_moments_is_monotone_and_even() {
        for kernel in [Kernel::Jackson, Kernel::default(), Kernel::Lorentz { lambda: 3.3 }] {
            let mut previous = usize::MAX;
            for i in 1..400 {
                let broadening = 1e-3 * i as f64;
                let n = kernel.required_num_moments(broadening).unwrap();
                assert_eq!(n % 2, 0, "{kernel:?} gave odd count {n}");
                assert!(n <= previous, "{kernel:?} not monotone at {broadening}");
                previous = n;
            }
        }
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(Kernel::lorentz(0.0).unwrap_err().is_configuration());
        assert!(Kernel::lorentz(-4.0).unwrap_err().is_configuration());
        assert!(Kernel::lorentz(f64::NAN).unwrap_err().is_configuration());
        assert!(
            Kernel::Jackson
                .required_num_moments(0.0)
                .unwrap_err()
                .is_configuration()
        );
        assert!(
            Kernel::Lorentz { lambda: -1.0 }
                .required_num_moments(0.1)
                .unwrap_err()
                .is_configuration()
        );
    }

    #[test]
    fn test_tiny_broadening_is_rejected_before_allocation() {
        let err = Kernel::Jackson.required_num_moments(1e-10).unwrap_err();
        assert!(err.is_configuration(), "{err}");
        assert!(
            Kernel::default()
                .required_num_moments(f64::MIN_POSITIVE)
                .unwrap_err()
                .is_configuration()
        );

        // The limit itself is still accepted.
        let at_limit = DEFAULT_LORENTZ_LAMBDA / MAX_NUM_MOMENTS as f64;
        assert_eq!(
            Kernel::default().required_num_moments(at_limit).unwrap(),
            MAX_NUM_MOMENTS
        );
    }

    #[test]
    fn test_damping_starts_at_one_and_decreases() {
        for kernel in [Kernel::Jackson, Kernel::default()] {
            let g = kernel.damping_coefficients(64);
            assert_eq!(g.len(), 64);
            assert!((g[0] - 1.0).abs() < 1e-12, "{kernel:?}: g0 = {}", g[0]);
            for pair in g.windows(2) {
                assert!(pair[1] < pair[0], "{kernel:?} is not decreasing");
            }
            assert!(g[63] > 0.0);
        }
    }

    #[test]
    fn test_apply_scales_moments() {
        let mut moments = vec![0.5, 1.0, 1.0, 1.0];
        let kernel = Kernel::default();
        let g = kernel.damping_coefficients(4);
        kernel.apply(&mut moments);
        assert_eq!(moments[0], 0.5 * g[0]);
        assert_eq!(moments[3], g[3]);
    }
}
