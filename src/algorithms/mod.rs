//! Numerical building blocks of the Kernel Polynomial Method.
//!
//! ** NOTE: We recommend using the high-level API in [`crate::kpm`] instead. These
//! modules are intended for use cases where fine-grained control over each phase
//! of the expansion is required.
//!
//! The phases, in the order in which a computation runs them:
//!
//! - [`bounds`]: Lanczos estimate of the extremal eigenvalues.
//! - [`scaling`]: affine map of the spectrum into the Chebyshev interval.
//! - [`kernel`]: number of moments for a target broadening and the damping
//!   sequence that suppresses Gibbs oscillations.
//! - [`moments`]: Chebyshev moments from the three-term recurrence.
//! - [`reconstruct`]: evaluation of the damped series at arbitrary energies.

pub mod bounds;
pub mod kernel;
pub mod moments;
pub mod reconstruct;
pub mod scaling;

pub use bounds::{DEFAULT_LANCZOS_PRECISION, estimate_bounds};
pub use kernel::Kernel;
pub use scaling::{DEFAULT_SCALING_TOLERANCE, EnergyRange, Scale, rescale};
