//! Kernel Polynomial Method (KPM) for large sparse tight-binding Hamiltonians.
//!
//! This crate computes spectral quantities (density of states, local density of
//! states and Green's functions) of a Hermitian Hamiltonian `H` without
//! diagonalizing it. The target function is expanded in Chebyshev polynomials of
//! the rescaled Hamiltonian `H̃ = (H - b)/a`, whose moments follow from a
//! three-term recurrence costing one sparse matrix-vector product per step.
//!
//! Built on the [`faer`] linear algebra framework, the engine only needs the
//! action of `H` on vectors; the matrix is never densified.
//!
//! ## Pipeline
//!
//! 1.  **Bounds** ([`algorithms::bounds`]): Lanczos estimate of the extremal
//!     eigenvalues, unless the energy range is given.
//! 2.  **Rescaling** ([`algorithms::scaling`]): affine map of the spectrum into
//!     `(-1, 1)` with a small safety margin.
//! 3.  **Moments** ([`algorithms::moments`]): Chebyshev moments of a basis vector
//!     (LDOS, Green's functions) or of random vectors (stochastic DOS). The
//!     diagonal recursion yields two moments per product.
//! 4.  **Damping** ([`algorithms::kernel`]): the Jackson or Lorentz kernel
//!     suppresses Gibbs oscillations and sets the resolution; the number of
//!     moments follows from the requested broadening.
//! 5.  **Reconstruction** ([`algorithms::reconstruct`]): evaluation of the damped
//!     series at arbitrary energies.
//!
//! ## Example Usage
//!
//! The local density of states in the middle of a long chain approaches the
//! analytic band result `1/(π·sqrt(4t² - E²))`:
//!
//! ```rust
//! use kpm_project::{Config, EnergyRange, Kernel, kpm, utils::lattice};
//!
//! let chain = lattice::chain(1001, -1.0)?;
//! let config = Config {
//!     energy_range: EnergyRange::new(-2.0, 2.0)?,
//!     kernel: Kernel::Jackson,
//!     ..Default::default()
//! };
//! let mut engine = kpm(chain.hamiltonian, config)?;
//!
//! let energy = [-1.0, 0.0, 1.0];
//! let ldos = engine.ldos(500, &energy, 0.05)?;
//! for (e, value) in energy.iter().zip(&ldos) {
//!     let exact = lattice::chain_dos(*e, -1.0);
//!     assert!((value - exact).abs() < 0.02 * exact);
//! }
//! println!("{}", engine.report(true));
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Parallelism
//!
//! Independent recursions (random vectors of the DOS, sites of
//! [`KernelPolynomialMethod::ldos_many`]) run on the `rayon` thread pool when
//! [`Config::parallel`] is set. Results are identical to the sequential path.

// Declare the modules that form the crate's API structure.
pub mod algorithms;
pub mod error;
pub mod kpm;
pub mod matrix;
pub mod stats;
pub mod strategy;
pub mod system;
pub mod utils;

// Re-export the main API for convenient access.
pub use algorithms::{EnergyRange, Kernel};
pub use error::KpmError;
pub use kpm::{
    KernelPolynomialMethod, compute_dos, compute_greens, compute_ldos, estimate_bounds, kpm,
};
pub use matrix::{Hamiltonian, KpmScalar, SparseHamiltonian};
pub use stats::Stats;
pub use strategy::{Config, CpuStrategy, KpmStrategy, Phase};
pub use system::{SiteLocator, Sublattice, System};
