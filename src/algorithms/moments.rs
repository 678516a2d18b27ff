//! Chebyshev moments of the rescaled Hamiltonian.
//!
//! The moments of a matrix element are `μ_n = ⟨i|T_n(H̃)|j⟩`. With the
//! Chebyshev vectors `|r_n⟩ = T_n(H̃)|r_0⟩` they follow from the three-term
//! recurrence `|r_{n+1}⟩ = 2H̃|r_n⟩ - |r_{n-1}⟩`, which costs one sparse
//! matrix-vector product per step. The operator passed to this module is
//! `H2 = 2H̃` (see [`crate::algorithms::scaling`]), so a step reads
//! `r_{n+1} = H2·r_n - r_{n-1}`.
//!
//! ## Diagonal elements
//!
//! For expectation values (`i == j`, or a random starter for a stochastic trace)
//! the product identities
//!
//! - `μ_{2n}   = 2⟨r_n|r_n⟩ - μ_0`
//! - `μ_{2n+1} = 2⟨r_{n+1}|r_n⟩ - μ_1`
//!
//! yield two moments per matrix-vector product, halving the work.
//!
//! ## Convention
//!
//! All moment vectors store `μ_0 / 2` at index 0, so that every reconstruction
//! formula is a plain sum `Σ_n m[n]·T_n(w)` without a special first term.

use crate::{
    error::{KpmError, KpmErrorKind},
    matrix::{KpmScalar, SparseHamiltonian},
};
use faer::{Mat, dyn_stack::MemStack};
use rand::Rng;

/// Starter vector of an expectation value: the unit basis vector `|index⟩`.
pub fn exval_starter<T: KpmScalar>(dim: usize, index: usize) -> Result<Mat<T>, KpmError> {
    if index >= dim {
        return Err(KpmErrorKind::IndexOutOfBounds { index, size: dim }.into());
    }
    let mut r0 = Mat::<T>::zeros(dim, 1);
    r0[(index, 0)] = T::from_re(1.0);
    Ok(r0)
}

/// Random starter vector for stochastic trace estimation.
///
/// Every component is a random phase (`±1` for real fields, `e^{iφ}` for
/// complex ones) divided by `√dim`, so the vector has unit norm and its
/// diagonal moments average to `Tr T_n(H̃) / dim`.
pub fn random_starter<T: KpmScalar, R: Rng>(dim: usize, rng: &mut R) -> Mat<T> {
    let norm = T::from_re(1.0 / (dim as f64).sqrt());
    let mut r0 = Mat::<T>::zeros(dim, 1);
    for i in 0..dim {
        r0[(i, 0)] = T::random_phase(rng) * norm;
    }
    r0
}

/// Inner product `⟨x|y⟩ = Σ conj(x_i)·y_i` of two column vectors.
#[inline]
fn vdot<T: KpmScalar>(x: &Mat<T>, y: &Mat<T>) -> T {
    let mut sum = T::from_re(0.0);
    for i in 0..x.nrows() {
        sum = sum + x[(i, 0)].conjugate() * y[(i, 0)];
    }
    sum
}

/// Computes `out = factor·(H2·x) - y`.
#[inline]
fn chebyshev_step<T, H>(
    h2: &H,
    out: &mut Mat<T>,
    x: &Mat<T>,
    y: &Mat<T>,
    factor: T,
    stack: &mut MemStack,
) where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    h2.matvec(out.as_mut(), x.as_ref(), stack);
    for i in 0..out.nrows() {
        out[(i, 0)] = factor * out[(i, 0)] - y[(i, 0)];
    }
}

fn check_dimension<T, H>(h2: &H, rows: usize) -> Result<(), KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    if h2.dim() != rows {
        return Err(KpmErrorKind::DimensionMismatch {
            operator_cols: h2.dim(),
            vector_rows: rows,
        }
        .into());
    }
    Ok(())
}

/// Computes the diagonal moments `⟨r0|T_n(H̃)|r0⟩` of the starter `r0`.
///
/// `h2` must be the doubled rescaled Hamiltonian `2H̃`. The diagonal recursion
/// produces moments in pairs, so an odd `num_moments` is rounded up to the next
/// even number (the returned vector reflects the rounded count).
///
/// # Returns
/// The moments with `μ_0/2` stored at index 0.
pub fn compute_diagonal_moments<T, H>(
    h2: &H,
    starter: &Mat<T>,
    num_moments: usize,
    stack: &mut MemStack,
) -> Result<Vec<T>, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    check_dimension(h2, starter.nrows())?;
    let requested = num_moments;
    let num_moments = super::kernel::round_up_even(num_moments);
    if num_moments != requested {
        log::debug!("Diagonal recursion: {requested} moments rounded up to {num_moments}");
    }

    let dim = starter.nrows();
    let half = T::from_re(0.5);
    let two = T::from_re(2.0);
    let zero = Mat::<T>::zeros(dim, 1);

    let mut r0 = starter.clone();
    let mut r1 = Mat::<T>::zeros(dim, 1);
    chebyshev_step(h2, &mut r1, &r0, &zero, half, stack);

    let mut moments = vec![T::from_re(0.0); num_moments];
    moments[0] = vdot(&r0, &r0) * half;
    moments[1] = vdot(&r1, &r0);

    // `next` is reused as the buffer of the vector two steps behind.
    let mut next = zero;
    for n in 1..num_moments / 2 {
        chebyshev_step(h2, &mut next, &r1, &r0, T::from_re(1.0), stack);
        std::mem::swap(&mut r0, &mut r1);
        std::mem::swap(&mut r1, &mut next);

        moments[2 * n] = two * (vdot(&r0, &r0) - moments[0]);
        moments[2 * n + 1] = two * vdot(&r1, &r0) - moments[1];
    }

    Ok(moments)
}

/// Computes the off-diagonal moments `⟨row|T_n(H̃)|col⟩` for several columns
/// with a single recursion.
///
/// The recursion starts from `|row⟩`; by hermiticity of `T_n(H̃)` the moment of
/// column `c` is the conjugate of component `c` of `|r_n⟩`. Every step costs one
/// matrix-vector product and yields one moment per column.
///
/// # Returns
/// One moment vector per entry of `cols`, each with `μ_0/2` at index 0.
pub fn compute_offdiagonal_moments<T, H>(
    h2: &H,
    row: usize,
    cols: &[usize],
    num_moments: usize,
    stack: &mut MemStack,
) -> Result<Vec<Vec<T>>, KpmError>
where
    T: KpmScalar,
    H: SparseHamiltonian<T>,
{
    let dim = h2.dim();
    if let Some(&col) = cols.iter().find(|&&c| c >= dim) {
        return Err(KpmErrorKind::IndexOutOfBounds {
            index: col,
            size: dim,
        }
        .into());
    }
    let num_moments = num_moments.max(2);
    let half = T::from_re(0.5);

    let zero = Mat::<T>::zeros(dim, 1);
    let mut r0 = exval_starter::<T>(dim, row)?;
    let mut r1 = Mat::<T>::zeros(dim, 1);
    chebyshev_step(h2, &mut r1, &r0, &zero, half, stack);

    let mut moments: Vec<Vec<T>> = cols
        .iter()
        .map(|&c| {
            let mut m = Vec::with_capacity(num_moments);
            m.push(r0[(c, 0)].conjugate() * half);
            m.push(r1[(c, 0)].conjugate());
            m
        })
        .collect();

    let mut next = zero;
    for _ in 2..num_moments {
        chebyshev_step(h2, &mut next, &r1, &r0, T::from_re(1.0), stack);
        std::mem::swap(&mut r0, &mut r1);
        std::mem::swap(&mut r1, &mut next);

        for (m, &c) in moments.iter_mut().zip(cols) {
            m.push(r1[(c, 0)].conjugate());
        }
    }

    Ok(moments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::scaling::{EnergyRange, rescale};
    use faer::{
        c64,
        dyn_stack::{MemBuffer, MemStack},
        sparse::{SparseColMat, Triplet},
    };
    use rand::{SeedableRng, rngs::StdRng};

    /// Open chain with on-site energies `onsite` and hopping `t`.
    fn chain(onsite: &[f64], t: f64) -> SparseColMat<usize, f64> {
        let n = onsite.len();
        let mut triplets = Vec::new();
        for (i, &e) in onsite.iter().enumerate() {
            triplets.push(Triplet {
                row: i,
                col: i,
                val: e,
            });
            if i + 1 < n {
                triplets.push(Triplet {
                    row: i,
                    col: i + 1,
                    val: t,
                });
                triplets.push(Triplet {
                    row: i + 1,
                    col: i,
                    val: t,
                });
            }
        }
        SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap()
    }

    #[test]
    fn test_basis_starter_first_moments() {
        let h = chain(&[0.3, -0.2, 0.1, 0.0], -1.0);
        let range = EnergyRange::new(-3.0, 3.0).unwrap();
        let (h2, scale) = rescale(&h, range, 0.01).unwrap();

        let mut mem = MemBuffer::new(h2.matvec_scratch());
        let mut stack = MemStack::new(&mut mem);
        for index in 0..4 {
            let starter = exval_starter::<f64>(4, index).unwrap();
            let moments = compute_diagonal_moments(&h2, &starter, 10, &mut stack).unwrap();
            let onsite = [0.3, -0.2, 0.1, 0.0][index];
            assert_eq!(moments.len(), 10);
            assert_eq!(moments[0], 0.5);
            // μ_1 is the diagonal element of the reduced Hamiltonian H̃.
            assert!((moments[1] - scale.reduce(onsite)).abs() < 1e-14);
        }
    }

    #[test]
    fn test_odd_count_is_rounded_up() {
        let h = chain(&[0.0, 0.0, 0.0], 1.0);
        let (h2, _) = rescale(&h, EnergyRange::new(-2.0, 2.0).unwrap(), 0.01).unwrap();
        let mut mem = MemBuffer::new(h2.matvec_scratch());
        let mut stack = MemStack::new(&mut mem);
        let starter = exval_starter::<f64>(3, 1).unwrap();
        let moments = compute_diagonal_moments(&h2, &starter, 7, &mut stack).unwrap();
        assert_eq!(moments.len(), 8);
    }

    #[test]
    fn test_diagonal_matches_plain_recursion() {
        // Chebyshev moments of a single eigenvalue x are T_n(x) = cos(n acos x).
        let x = 0.37;
        let h = chain(&[x], 0.0);
        let (h2, scale) = rescale(&h, EnergyRange::new(-1.0, 1.0).unwrap(), 0.0).unwrap();
        assert_eq!(scale.a, 1.0);

        let mut mem = MemBuffer::new(h2.matvec_scratch());
        let mut stack = MemStack::new(&mut mem);
        let starter = exval_starter::<f64>(1, 0).unwrap();
        let moments = compute_diagonal_moments(&h2, &starter, 40, &mut stack).unwrap();

        assert_eq!(moments[0], 0.5);
        for (n, m) in moments.iter().enumerate().skip(1) {
            let expected = (n as f64 * x.acos()).cos();
            assert!((m - expected).abs() < 1e-12, "moment {n}: {m} vs {expected}");
        }
    }

    #[test]
    fn test_offdiagonal_on_diagonal_matches_diagonal() {
        let h = chain(&[0.5, -0.1, 0.2, 0.0, -0.4], -1.0);
        let (h2, _) = rescale(&h, EnergyRange::new(-3.0, 3.0).unwrap(), 0.01).unwrap();
        let mut mem = MemBuffer::new(h2.matvec_scratch());
        let mut stack = MemStack::new(&mut mem);

        let starter = exval_starter::<f64>(5, 2).unwrap();
        let diagonal = compute_diagonal_moments(&h2, &starter, 24, &mut stack).unwrap();
        let offdiagonal = compute_offdiagonal_moments(&h2, 2, &[2, 3], 24, &mut stack).unwrap();

        assert_eq!(offdiagonal.len(), 2);
        for (a, b) in diagonal.iter().zip(&offdiagonal[0]) {
            assert!((a - b).abs() < 1e-12);
        }
        // ⟨2|H̃|3⟩ = t/a
        assert!((offdiagonal[1][1] - (-1.0 / 3.03)).abs() < 1e-14);
        assert_eq!(offdiagonal[1][0], 0.0);
    }

    #[test]
    fn test_offdiagonal_moments_are_hermitian() {
        // A complex 3-site ring with a flux: ⟨i|T_n|j⟩ = conj(⟨j|T_n|i⟩).
        let phase = c64::new(0.6_f64.cos(), 0.6_f64.sin());
        let bonds = [(0, 1), (1, 2), (2, 0)];
        let mut triplets = Vec::new();
        for &(i, j) in &bonds {
            triplets.push(Triplet {
                row: i,
                col: j,
                val: phase,
            });
            triplets.push(Triplet {
                row: j,
                col: i,
                val: phase.conj(),
            });
        }
        let h = SparseColMat::try_new_from_triplets(3, 3, &triplets).unwrap();
        let (h2, _) = rescale(&h, EnergyRange::new(-2.0, 2.0).unwrap(), 0.01).unwrap();
        let mut mem = MemBuffer::new(h2.matvec_scratch());
        let mut stack = MemStack::new(&mut mem);

        let m01 = compute_offdiagonal_moments(&h2, 0, &[1], 16, &mut stack).unwrap();
        let m10 = compute_offdiagonal_moments(&h2, 1, &[0], 16, &mut stack).unwrap();
        for (a, b) in m01[0].iter().zip(&m10[0]) {
            assert!((*a - b.conj()).norm() < 1e-12);
        }
        assert!((m01[0][1] - phase / 2.02).norm() < 1e-14);
    }

    #[test]
    fn test_random_starter_is_normalized_and_seeded() {
        let mut rng = StdRng::seed_from_u64(11);
        let r: Mat<c64> = random_starter(50, &mut rng);
        assert!((vdot(&r, &r).re - 1.0).abs() < 1e-12);

        let a: Mat<f64> = random_starter(20, &mut StdRng::seed_from_u64(3));
        let b: Mat<f64> = random_starter(20, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_errors() {
        assert!(exval_starter::<f64>(3, 3).is_err());

        let h = chain(&[0.0, 0.0], 1.0);
        let (h2, _) = rescale(&h, EnergyRange::new(-1.0, 1.0).unwrap(), 0.01).unwrap();
        let mut mem = MemBuffer::new(h2.matvec_scratch());
        let mut stack = MemStack::new(&mut mem);
        let wrong = Mat::<f64>::zeros(3, 1);
        let err = compute_diagonal_moments(&h2, &wrong, 4, &mut stack).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: the Hamiltonian has 2 columns but the starter vector has 3 rows."
        );
        assert!(compute_offdiagonal_moments(&h2, 0, &[5], 4, &mut stack).is_err());
    }
}
