//! Estimation of the spectral bounds of a Hamiltonian.
//!
//! KPM must know an interval containing the whole spectrum before the
//! Hamiltonian can be rescaled. The extremal eigenvalues of a Hermitian matrix
//! are the first to converge in a Lanczos iteration, so a few dozen steps of the
//! plain three-term Lanczos recurrence give both bounds at once.
//!
//! Ritz values always lie inside the spectrum. Each extremal Ritz value `θ_j`
//! is therefore pushed outwards by its residual norm
//! `‖H·x_j - θ_j·x_j‖ = β_k·|u_{k,j}|`, where `u_{k,j}` is the last component of
//! the corresponding eigenvector of the tridiagonal matrix `T_k`. The iteration
//! stops once both residuals are small compared to the spectral width.

use crate::{
    error::{KpmError, KpmErrorKind},
    matrix::{KpmScalar, SparseHamiltonian},
};
use super::scaling::EnergyRange;
use faer::{
    Mat, Side,
    dyn_stack::{MemBuffer, MemStack},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Default convergence precision of the extremal Ritz values, relative to the
/// width of the spectrum.
pub const DEFAULT_LANCZOS_PRECISION: f64 = 2e-3;

/// Upper limit of Lanczos steps.
pub const MAX_LANCZOS_STEPS: usize = 100;

/// Seed of the Lanczos start vector used by [`estimate_bounds`].
pub const DEFAULT_BOUNDS_SEED: u64 = 0x6b70_6d5f_6c61_6e63;

/// Relative threshold below which `β_k` is treated as a breakdown.
const BREAKDOWN_TOLERANCE: f64 = 1e-12;

/// The outcome of a bounds estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsEstimate {
    /// The estimated `[E_min, E_max]`.
    pub range: EnergyRange,
    /// Number of Lanczos steps performed.
    pub steps: usize,
    /// `false` if the iteration cap was reached before the precision was met.
    pub converged: bool,
}

/// Estimates `[E_min, E_max]` of `hamiltonian` with a Lanczos iteration.
///
/// # Returns
/// The estimated range, or a numerical error if no usable estimate exists.
pub fn estimate_bounds<T, H>(hamiltonian: &H, precision: f64) -> Result<EnergyRange, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    lanczos_bounds::<T, H>(hamiltonian, precision, DEFAULT_BOUNDS_SEED).map(|estimate| estimate.range)
}

/// The extremal Ritz values of `T_k` and their residual norms.
#[derive(Debug, Clone, Copy)]
struct RitzBounds {
    lo: f64,
    hi: f64,
    lo_residual: f64,
    hi_residual: f64,
}

impl RitzBounds {
    fn max_residual(&self) -> f64 {
        self.lo_residual.max(self.hi_residual)
    }

    /// The Ritz interval pushed outwards by the residuals.
    fn widened(&self) -> Result<EnergyRange, KpmError> {
        EnergyRange::new(self.lo - self.lo_residual, self.hi + self.hi_residual)
    }
}

/// Extremal Ritz values of the symmetric tridiagonal matrix `(alphas, betas)`,
/// with residuals for the next off-diagonal coefficient `beta_next`.
fn extremal_ritz_values(
    alphas: &[f64],
    betas: &[f64],
    beta_next: f64,
) -> Result<RitzBounds, KpmError> {
    let k = alphas.len();
    let mut t_k = Mat::<f64>::zeros(k, k);
    for (i, &alpha) in alphas.iter().enumerate() {
        t_k[(i, i)] = alpha;
    }
    for (i, &beta) in betas.iter().enumerate().take(k.saturating_sub(1)) {
        t_k[(i, i + 1)] = beta;
        t_k[(i + 1, i)] = beta;
    }

    let evd = t_k
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| KpmError::from(KpmErrorKind::EvdError(e)))?;
    let s = evd.S();
    let u = evd.U();

    let mut lo = 0;
    let mut hi = 0;
    for i in 1..k {
        if s[i] < s[lo] {
            lo = i;
        }
        if s[i] > s[hi] {
            hi = i;
        }
    }
    Ok(RitzBounds {
        lo: s[lo],
        hi: s[hi],
        lo_residual: beta_next * u[(k - 1, lo)].abs(),
        hi_residual: beta_next * u[(k - 1, hi)].abs(),
    })
}

/// Lanczos start vector with continuous random components, normalized.
///
/// Continuous components make an exact eigenvector (and thus an immediate
/// breakdown on a single eigenvalue) a zero-probability event.
fn lanczos_start<T: KpmScalar>(dim: usize, seed: u64) -> Mat<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut v = Mat::<T>::zeros(dim, 1);
    let mut norm_sq = 0.0;
    for i in 0..dim {
        let re = rng.random::<f64>() - 0.5;
        let im = if T::IS_COMPLEX { rng.random::<f64>() - 0.5 } else { 0.0 };
        v[(i, 0)] = T::from_parts(re, im);
        norm_sq += re * re + im * im;
    }
    let inv_norm = T::from_re(1.0 / norm_sq.sqrt());
    for i in 0..dim {
        v[(i, 0)] = v[(i, 0)] * inv_norm;
    }
    v
}

/// Runs the Lanczos bounds estimation from a start vector seeded with `seed`.
///
/// The returned range is the extremal Ritz interval widened by the Ritz
/// residuals. The iteration stops when both residuals fall below `precision`
/// times the current spectral width, when the Krylov subspace becomes
/// invariant (breakdown: the Ritz values are then exact for the reachable part
/// of the spectrum), or after [`MAX_LANCZOS_STEPS`] steps. In the last case the
/// looser estimate is returned and a warning is logged.
pub fn lanczos_bounds<T, H>(
    hamiltonian: &H,
    precision: f64,
    seed: u64,
) -> Result<BoundsEstimate, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    let dim = hamiltonian.dim();
    if dim == 0 {
        return Err(KpmErrorKind::NumericalError(
            "the Hamiltonian has zero dimension".to_string(),
        )
        .into());
    }
    if !(precision > 0.0) || !precision.is_finite() {
        return Err(KpmErrorKind::Configuration(format!(
            "The Lanczos precision must be a positive number, got {precision}"
        ))
        .into());
    }

    let max_steps = MAX_LANCZOS_STEPS.min(dim);
    let mut mem = MemBuffer::new(hamiltonian.matvec_scratch());
    let stack = MemStack::new(&mut mem);

    let mut v = lanczos_start::<T>(dim, seed);
    let mut v_prev = Mat::<T>::zeros(dim, 1);
    let mut w = Mat::<T>::zeros(dim, 1);
    let mut beta_prev = 0.0;

    let mut alphas: Vec<f64> = Vec::with_capacity(max_steps);
    let mut betas: Vec<f64> = Vec::with_capacity(max_steps);
    let mut bounds: Option<RitzBounds> = None;

    for step in 1..=max_steps {
        hamiltonian.matvec(w.as_mut(), v.as_ref(), stack);

        // α_k = ⟨v|Hv⟩ is real for a Hermitian operator.
        let mut alpha = 0.0;
        for i in 0..dim {
            alpha += (v[(i, 0)].conjugate() * w[(i, 0)]).re();
        }

        let alpha_t = T::from_re(alpha);
        let beta_prev_t = T::from_re(beta_prev);
        let mut norm_sq = 0.0;
        for i in 0..dim {
            let value = w[(i, 0)] - alpha_t * v[(i, 0)] - beta_prev_t * v_prev[(i, 0)];
            w[(i, 0)] = value;
            norm_sq += value.abs_sq();
        }
        let beta = norm_sq.sqrt();
        alphas.push(alpha);

        if !alpha.is_finite() || !beta.is_finite() {
            return Err(KpmErrorKind::NumericalError(format!(
                "non-finite Lanczos coefficient at step {step}"
            ))
            .into());
        }

        let ritz = extremal_ritz_values(&alphas, &betas, beta)?;
        bounds = Some(ritz);

        let scale = 1.0 + ritz.lo.abs().max(ritz.hi.abs());
        if beta <= BREAKDOWN_TOLERANCE * scale {
            log::debug!("Lanczos breakdown after {step} steps: the Krylov subspace is invariant");
            return Ok(BoundsEstimate {
                range: ritz.widened()?,
                steps: step,
                converged: true,
            });
        }

        let width = ritz.hi - ritz.lo;
        if width > 0.0 && ritz.max_residual() <= precision * width {
            log::debug!(
                "Lanczos bounds converged after {step} steps: Ritz values [{}, {}], residuals {:.3e} / {:.3e}",
                ritz.lo,
                ritz.hi,
                ritz.lo_residual,
                ritz.hi_residual
            );
            return Ok(BoundsEstimate {
                range: ritz.widened()?,
                steps: step,
                converged: true,
            });
        }

        betas.push(beta);
        let inv_beta = T::from_re(1.0 / beta);
        for i in 0..dim {
            v_prev[(i, 0)] = v[(i, 0)];
            v[(i, 0)] = w[(i, 0)] * inv_beta;
        }
        beta_prev = beta;
    }

    match bounds {
        Some(ritz) => {
            let range = ritz.widened()?;
            let converged = max_steps == dim;
            if !converged {
                log::warn!(
                    "Lanczos bounds did not reach precision {precision} in {max_steps} steps; \
                     using [{}, {}] (Ritz residuals {:.3e} / {:.3e})",
                    range.min,
                    range.max,
                    ritz.lo_residual,
                    ritz.hi_residual
                );
            }
            Ok(BoundsEstimate {
                range,
                steps: max_steps,
                converged,
            })
        }
        None => Err(KpmErrorKind::NumericalError(
            "the Lanczos iteration produced no estimate".to_string(),
        )
        .into()),
    }
}
