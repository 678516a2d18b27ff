//! Synthetic tight-binding Hamiltonians for benchmarks, demos and tests.
//!
//! These are the textbook nearest-neighbour models with known band structure:
//! the open chain (`E = 2t·cos k`, band `[-2|t|, 2|t|]`) and the open square
//! lattice (band `[-4|t|, 4|t|]`).

use crate::{
    error::{KpmError, KpmErrorKind},
    system::System,
};
use faer::sparse::{SparseColMat, Triplet};

/// A Hamiltonian together with the positions of its sites.
pub struct Lattice {
    pub hamiltonian: SparseColMat<usize, f64>,
    pub positions: Vec<[f64; 3]>,
}

impl Lattice {
    /// The single-orbital [`System`] of this lattice.
    pub fn system(&self) -> System {
        System::single_orbital(self.positions.clone())
    }
}

fn hopping_pair(triplets: &mut Vec<Triplet<usize, usize, f64>>, i: usize, j: usize, t: f64) {
    triplets.push(Triplet {
        row: i,
        col: j,
        val: t,
    });
    triplets.push(Triplet {
        row: j,
        col: i,
        val: t,
    });
}

/// Open chain of `n` sites with hopping `t` and unit spacing along x.
pub fn chain(n: usize, t: f64) -> Result<Lattice, KpmError> {
    square(n, 1, t)
}

/// Open `nx × ny` square lattice with hopping `t` and unit spacing.
///
/// Site `(x, y)` has index `y·nx + x`.
pub fn square(nx: usize, ny: usize, t: f64) -> Result<Lattice, KpmError> {
    if nx == 0 || ny == 0 {
        return Err(KpmErrorKind::InputError(format!(
            "a {nx}x{ny} lattice has no sites"
        ))
        .into());
    }
    let n = nx * ny;
    let mut triplets = Vec::with_capacity(4 * n);
    let mut positions = Vec::with_capacity(n);
    for y in 0..ny {
        for x in 0..nx {
            let i = y * nx + x;
            positions.push([x as f64, y as f64, 0.0]);
            if x + 1 < nx {
                hopping_pair(&mut triplets, i, i + 1, t);
            }
            if y + 1 < ny {
                hopping_pair(&mut triplets, i, i + nx, t);
            }
        }
    }
    // A 1x1 lattice has no hoppings; keep an explicit zero diagonal.
    if triplets.is_empty() {
        triplets.push(Triplet {
            row: 0,
            col: 0,
            val: 0.0,
        });
    }
    let hamiltonian = SparseColMat::try_new_from_triplets(n, n, &triplets)
        .map_err(|_| KpmError::from(KpmErrorKind::SparseConstruction))?;
    Ok(Lattice {
        hamiltonian,
        positions,
    })
}

/// Analytic DOS per site of the infinite chain with hopping `t`.
pub fn chain_dos(energy: f64, t: f64) -> f64 {
    let half_width = 2.0 * t.abs();
    if energy.abs() >= half_width {
        0.0
    } else {
        1.0 / (std::f64::consts::PI * (half_width * half_width - energy * energy).sqrt())
    }
}
