//! This module defines the operator abstraction consumed by the KPM engine.
//!
//! The Kernel Polynomial Method never needs the individual elements of the
//! Hamiltonian. Every Chebyshev moment is obtained from matrix-vector products,
//! so the engine is written against the small [`SparseHamiltonian`] contract:
//!
//! 1.  **Shape and sparsity**: the dimension `N` and the number of stored
//!     nonzeros, used for throughput statistics.
//! 2.  **Action on vectors**: `y = H x`, delegated to `faer`'s matrix-free
//!     [`LinOp`] implementation of sparse matrices.
//! 3.  **Affine rescaling**: `(H - shift·I)·factor`, producing a new sparse
//!     matrix with the same pattern (plus the diagonal), never a dense one.
//!
//! The scalar field is abstracted by [`KpmScalar`], implemented for `f64`
//! (real symmetric Hamiltonians) and [`c64`] (complex Hermitian Hamiltonians).
//! The type-erased [`Hamiltonian`] enum carries either field across the
//! object-safe engine boundary.

use crate::error::{KpmError, KpmErrorKind};
use faer::{
    MatMut, MatRef, Par, c64,
    dyn_stack::{MemStack, StackReq},
    matrix_free::LinOp,
    sparse::{SparseColMat, Triplet},
    traits::ComplexField,
};
use rand::Rng;
use std::{
    f64::consts::PI,
    fmt::Debug,
    ops::{Add, Mul, Sub},
    sync::Arc,
};

/// The scalar field of a Hamiltonian.
///
/// Besides the arithmetic required by the recursion, the trait exposes the few
/// field-specific operations of the KPM: complex conjugation for inner
/// products, the real part for density reconstruction and a random unit phase
/// for stochastic trace estimation.
pub trait KpmScalar:
    ComplexField
    + Copy
    + Debug
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
{
    /// Whether the field is complex.
    const IS_COMPLEX: bool;

    /// Builds a scalar from real and imaginary parts. The imaginary part is
    /// discarded by real fields.
    fn from_parts(re: f64, im: f64) -> Self;

    /// Builds a scalar from a real number.
    #[inline]
    fn from_re(re: f64) -> Self {
        Self::from_parts(re, 0.0)
    }

    /// The real part.
    fn re(self) -> f64;

    /// The imaginary part (zero for real fields).
    fn im(self) -> f64;

    /// The complex conjugate.
    fn conjugate(self) -> Self;

    /// The squared modulus `|z|²`.
    #[inline]
    fn abs_sq(self) -> f64 {
        self.re() * self.re() + self.im() * self.im()
    }

    /// A random number of unit modulus: `±1` for real fields, `e^{iφ}` with
    /// uniform `φ` for complex fields.
    fn random_phase<R: Rng>(rng: &mut R) -> Self;

    /// Extracts the matrix of this field from a type-erased [`Hamiltonian`].
    fn unwrap_hamiltonian(hamiltonian: &Hamiltonian) -> Option<Arc<SparseColMat<usize, Self>>>;

    /// Wraps a matrix of this field into a type-erased [`Hamiltonian`].
    fn wrap_hamiltonian(matrix: Arc<SparseColMat<usize, Self>>) -> Hamiltonian;
}

impl KpmScalar for f64 {
    const IS_COMPLEX: bool = false;

    #[inline]
    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }

    #[inline]
    fn re(self) -> f64 {
        self
    }

    #[inline]
    fn im(self) -> f64 {
        0.0
    }

    #[inline]
    fn conjugate(self) -> Self {
        self
    }

    fn random_phase<R: Rng>(rng: &mut R) -> Self {
        if rng.random_bool(0.5) { 1.0 } else { -1.0 }
    }

    fn unwrap_hamiltonian(hamiltonian: &Hamiltonian) -> Option<Arc<SparseColMat<usize, Self>>> {
        match hamiltonian {
            Hamiltonian::Real(matrix) => Some(Arc::clone(matrix)),
            Hamiltonian::Complex(_) => None,
        }
    }

    fn wrap_hamiltonian(matrix: Arc<SparseColMat<usize, Self>>) -> Hamiltonian {
        Hamiltonian::Real(matrix)
    }
}

impl KpmScalar for c64 {
    const IS_COMPLEX: bool = true;

    #[inline]
    fn from_parts(re: f64, im: f64) -> Self {
        c64::new(re, im)
    }

    #[inline]
    fn re(self) -> f64 {
        self.re
    }

    #[inline]
    fn im(self) -> f64 {
        self.im
    }

    #[inline]
    fn conjugate(self) -> Self {
        c64::new(self.re, -self.im)
    }

    fn random_phase<R: Rng>(rng: &mut R) -> Self {
        let phi = 2.0 * PI * rng.random::<f64>();
        c64::new(phi.cos(), phi.sin())
    }

    fn unwrap_hamiltonian(hamiltonian: &Hamiltonian) -> Option<Arc<SparseColMat<usize, Self>>> {
        match hamiltonian {
            Hamiltonian::Complex(matrix) => Some(Arc::clone(matrix)),
            Hamiltonian::Real(_) => None,
        }
    }

    fn wrap_hamiltonian(matrix: Arc<SparseColMat<usize, Self>>) -> Hamiltonian {
        Hamiltonian::Complex(matrix)
    }
}

/// A square sparse Hamiltonian as seen by the KPM engine.
///
/// Implementations must be Hermitian; the engine does not verify this. The
/// matrix is only read during a computation, which is why the trait requires
/// `Sync`: independent recursions may share it across worker threads.
pub trait SparseHamiltonian<T: KpmScalar>: Sync {
    /// The dimension `N` of the square matrix.
    fn dim(&self) -> usize;

    /// The number of stored nonzero entries.
    fn nnz(&self) -> usize;

    /// Approximate storage footprint of the matrix in bytes.
    fn storage_bytes(&self) -> usize;

    /// Scratch space required by [`SparseHamiltonian::matvec`].
    fn matvec_scratch(&self) -> StackReq;

    /// Computes `out = H · rhs` for a single column `rhs`.
    ///
    /// # Panics
    ///
    /// Panics if `rhs` or `out` do not have `dim()` rows.
    fn matvec(&self, out: MatMut<'_, T>, rhs: MatRef<'_, T>, stack: &mut MemStack);

    /// Returns `(H - shift·I)·factor` as a new sparse matrix.
    fn shifted_scaled(&self, shift: f64, factor: f64) -> Result<Self, KpmError>
    where
        Self: Sized;
}

impl<T: KpmScalar> SparseHamiltonian<T> for SparseColMat<usize, T> {
    #[inline]
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn nnz(&self) -> usize {
        self.triplet_iter().count()
    }

    fn storage_bytes(&self) -> usize {
        let index_bytes = std::mem::size_of::<usize>();
        self.nnz() * (std::mem::size_of::<T>() + index_bytes) + (self.ncols() + 1) * index_bytes
    }

    fn matvec_scratch(&self) -> StackReq {
        LinOp::apply_scratch(&self.as_ref(), 1, Par::Seq)
    }

    #[inline]
    fn matvec(&self, out: MatMut<'_, T>, rhs: MatRef<'_, T>, stack: &mut MemStack) {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        LinOp::apply(&self.as_ref(), out, rhs, Par::Seq, stack);
    }

    fn shifted_scaled(&self, shift: f64, factor: f64) -> Result<Self, KpmError> {
        let n = self.nrows();
        let shift_t = T::from_re(shift);
        let factor_t = T::from_re(factor);

        // The stored pattern is kept as is; only diagonal entries absent from
        // it are appended when the shift is nonzero.
        let mut has_diagonal = vec![false; n];
        let mut triplets: Vec<Triplet<usize, usize, T>> = Vec::with_capacity(self.nnz() + n);
        for triplet in self.triplet_iter() {
            let mut val = *triplet.val;
            if triplet.row == triplet.col && !has_diagonal[triplet.row] {
                has_diagonal[triplet.row] = true;
                val = val - shift_t;
            }
            triplets.push(Triplet {
                row: triplet.row,
                col: triplet.col,
                val: val * factor_t,
            });
        }

        if shift != 0.0 {
            for (i, _) in has_diagonal.iter().enumerate().filter(|(_, present)| !**present) {
                triplets.push(Triplet {
                    row: i,
                    col: i,
                    val: T::from_re(-shift * factor),
                });
            }
        }

        SparseColMat::try_new_from_triplets(n, self.ncols(), &triplets)
            .map_err(|_| KpmError::from(KpmErrorKind::SparseConstruction))
    }
}

/// A type-erased Hamiltonian, either real symmetric or complex Hermitian.
///
/// The engine is generic over the scalar field, but its public entry point is
/// object safe; this enum carries the matrix across that boundary and lets a
/// backend refuse a Hamiltonian of the wrong field.
#[derive(Debug, Clone)]
pub enum Hamiltonian {
    Real(Arc<SparseColMat<usize, f64>>),
    Complex(Arc<SparseColMat<usize, c64>>),
}

impl Hamiltonian {
    /// The dimension of the square matrix.
    pub fn dim(&self) -> usize {
        match self {
            Hamiltonian::Real(h) => h.nrows(),
            Hamiltonian::Complex(h) => h.nrows(),
        }
    }

    /// Whether the matrix has complex entries.
    pub fn is_complex(&self) -> bool {
        matches!(self, Hamiltonian::Complex(_))
    }

    /// Checks that the matrix is square and non-empty.
    pub(crate) fn validate(&self) -> Result<(), KpmError> {
        let (nrows, ncols) = match self {
            Hamiltonian::Real(h) => (h.nrows(), h.ncols()),
            Hamiltonian::Complex(h) => (h.nrows(), h.ncols()),
        };
        if nrows != ncols {
            return Err(KpmErrorKind::InputError(format!(
                "The Hamiltonian must be square, got {nrows}x{ncols}."
            ))
            .into());
        }
        if nrows == 0 {
            return Err(KpmErrorKind::InputError("The Hamiltonian is empty.".to_string()).into());
        }
        Ok(())
    }
}

impl From<SparseColMat<usize, f64>> for Hamiltonian {
    fn from(matrix: SparseColMat<usize, f64>) -> Self {
        Hamiltonian::Real(Arc::new(matrix))
    }
}

impl From<SparseColMat<usize, c64>> for Hamiltonian {
    fn from(matrix: SparseColMat<usize, c64>) -> Self {
        Hamiltonian::Complex(Arc::new(matrix))
    }
}
