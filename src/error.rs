//! This module defines the error types of the KPM engine.
//!
//! Every failure that can stop a computation is collected in a single enum,
//! [`KpmErrorKind`], hidden behind the opaque public wrapper [`KpmError`].
//!
//! Structural problems (an inverted energy range, a non-positive Lorentz
//! parameter, an index outside the Hamiltonian) are reported before any moment
//! is computed. Per-point numerical degeneracies are *not* errors: an energy
//! outside the expansion interval yields a non-finite value in the result array
//! so that a wide energy sweep still returns its valid part.
//!
//! Note that [`faer::linalg::evd::EvdError`] does not implement the standard
//! [`std::error::Error`] trait, so it is wrapped manually.
use thiserror::Error;

/// Represents all possible errors that can occur during a KPM computation.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct KpmError(#[from] KpmErrorKind);

impl KpmError {
    /// Returns `true` if the error was caused by an invalid energy range.
    pub fn is_invalid_range(&self) -> bool {
        matches!(self.0, KpmErrorKind::InvalidRange { .. })
    }

    /// Returns `true` if the error signals a failed numerical procedure
    /// (bounds estimation without any usable estimate).
    pub fn is_numerical(&self) -> bool {
        matches!(
            self.0,
            KpmErrorKind::NumericalError(_) | KpmErrorKind::EvdError(_)
        )
    }

    /// Returns `true` if the error was caused by an unsupported parameter.
    pub fn is_configuration(&self) -> bool {
        matches!(self.0, KpmErrorKind::Configuration(_))
    }
}

/// Private enum containing the distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum KpmErrorKind {
    /// The energy range is empty or inverted (`max <= min`), either as supplied
    /// by the caller or as derived by the bounds estimation.
    #[error("Invalid energy range: [{min}, {max}]. The maximum must be larger than the minimum.")]
    InvalidRange { min: f64, max: f64 },

    /// The Lanczos bounds estimation could not produce any usable estimate.
    #[error("Energy bounds estimation failed: {0}")]
    NumericalError(String),

    /// Wraps an error originating from [`faer`]'s eigendecomposition module.
    #[error("Eigendecomposition of the Lanczos tridiagonal failed: {0:?}")]
    EvdError(faer::linalg::evd::EvdError),

    /// An unsupported kernel parameter or broadening was requested.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The dimensions of the operator and a vector are incompatible.
    #[error(
        "Dimension mismatch: the Hamiltonian has {operator_cols} columns but the starter vector has {vector_rows} rows."
    )]
    DimensionMismatch {
        operator_cols: usize,
        vector_rows: usize,
    },

    /// A Hamiltonian index lies outside the matrix.
    #[error("Index {index} is out of bounds for a Hamiltonian of size {size}.")]
    IndexOutOfBounds { index: usize, size: usize },

    /// Invalid input handed over by a collaborator (model, system, loader).
    #[error("Invalid input: {0}")]
    InputError(String),

    /// `faer` rejected the triplets of a rescaled Hamiltonian.
    #[error("Internal error: Failed to construct the sparse matrix from triplets.")]
    SparseConstruction,
}

// Manually implement PartialEq for the public error type.
impl PartialEq for KpmError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
