//! Integration test suite to verify the numerical correctness of the KPM engine.
//!
//! # Test Methodology
//!
//! The expansion is validated against ground truths that can be computed
//! independently of the Chebyshev recursion:
//! 1.  **Analytic spectra:** the local density of states in the middle of a long
//!     tight-binding chain equals the band DOS `1/(π·sqrt(4t² - E²))` as long as
//!     the recursion does not reach the chain ends.
//! 2.  **Exact diagonalization:** for a small random Hamiltonian `H = U·Λ·Uᵀ` the
//!     moments are `μ_n = Σ_k U_ik·U_jk·T_n(λ̃_k)`, computed from the dense
//!     eigendecomposition.
//! 3.  **Sum rules and identities:** the reconstructed LDOS integrates to one,
//!     `Im G_ii = -π·ρ_i`, and `G_ij = G_ji` for a real symmetric `H`.
//!
//! Random data uses a seeded generator so that every run is deterministic.

use anyhow::{Result, anyhow, ensure};
use faer::{
    Side,
    dyn_stack::{MemBuffer, MemStack},
    prelude::*,
    sparse::{SparseColMat, Triplet},
};
use kpm_project::{
    Config, EnergyRange, Kernel, SparseHamiltonian, compute_dos, compute_greens, compute_ldos,
    estimate_bounds, kpm,
    algorithms::{
        DEFAULT_LANCZOS_PRECISION, DEFAULT_SCALING_TOLERANCE, Scale,
        moments::{compute_diagonal_moments, compute_offdiagonal_moments, exval_starter},
        rescale,
    },
    utils::lattice,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Relative tolerance of the reconstructed chain LDOS against the band DOS.
///
/// With a broadening of 0.05 the kernel smearing of the smooth band interior
/// is of order `η²`, well below this bound.
const ANALYTIC_TOLERANCE: f64 = 1e-2;

/// Tolerance for quantities that agree up to rounding.
const EXACT_TOLERANCE: f64 = 1e-10;

/// Creates a random real symmetric Hamiltonian together with its dense copy.
///
/// Besides the diagonal, every site couples to its first and third neighbour,
/// so the matrix is sparse but not tridiagonal.
fn create_random_problem(n: usize, seed: u64) -> Result<(SparseColMat<usize, f64>, Mat<f64>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    let mut dense = Mat::<f64>::zeros(n, n);

    for i in 0..n {
        let onsite = rng.random_range(-1.0..1.0);
        triplets.push(Triplet {
            row: i,
            col: i,
            val: onsite,
        });
        dense[(i, i)] = onsite;
        for offset in [1, 3] {
            let j = i + offset;
            if j >= n {
                continue;
            }
            let hopping = rng.random_range(-1.0..1.0);
            triplets.push(Triplet {
                row: i,
                col: j,
                val: hopping,
            });
            triplets.push(Triplet {
                row: j,
                col: i,
                val: hopping,
            });
            dense[(i, j)] = hopping;
            dense[(j, i)] = hopping;
        }
    }
    let h = SparseColMat::try_new_from_triplets(n, n, &triplets)
        .map_err(|e| anyhow!("Triplet assembly failed: {:?}", e))?;
    Ok((h, dense))
}

/// Exact moments `⟨row|T_n(H̃)|col⟩` from the eigendecomposition of `dense`,
/// with the zeroth moment halved.
fn exact_moments(
    dense: &Mat<f64>,
    scale: Scale,
    row: usize,
    col: usize,
    num_moments: usize,
) -> Result<Vec<f64>> {
    let evd = dense
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| anyhow!("EVD failed: {:?}", e))?;
    let u = evd.U();
    let s = evd.S();

    let mut moments = vec![0.0; num_moments];
    for k in 0..dense.nrows() {
        let weight = u[(row, k)] * u[(col, k)];
        let theta = scale.reduce(s[k]).acos();
        for (n, m) in moments.iter_mut().enumerate() {
            *m += weight * (n as f64 * theta).cos();
        }
    }
    moments[0] *= 0.5;
    Ok(moments)
}

/// The exact spectral range of `dense`.
fn exact_range(dense: &Mat<f64>) -> Result<EnergyRange> {
    let evd = dense
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| anyhow!("EVD failed: {:?}", e))?;
    let s = evd.S();
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for k in 0..dense.nrows() {
        lo = lo.min(s[k]);
        hi = hi.max(s[k]);
    }
    Ok(EnergyRange::new(lo, hi)?)
}

fn two_site() -> Result<SparseColMat<usize, f64>> {
    let triplets = [
        Triplet {
            row: 0,
            col: 1,
            val: 1.0,
        },
        Triplet {
            row: 1,
            col: 0,
            val: 1.0,
        },
    ];
    SparseColMat::try_new_from_triplets(2, 2, &triplets)
        .map_err(|e| anyhow!("Triplet assembly failed: {:?}", e))
}

/// A macro to generate the chain LDOS test for one kernel and energy range.
///
/// The LDOS in the middle of a 4001-site chain is reconstructed on the band
/// interior and compared point by point with the analytic band DOS. An unset
/// range makes the engine estimate the bounds itself.
macro_rules! generate_chain_ldos_test {
    ($test_name:ident, $kernel:expr, $range:expr, $error_msg_prefix:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let n = 4001;
            let chain = lattice::chain(n, -1.0)?;
            let config = Config {
                energy_range: $range,
                kernel: $kernel,
                ..Default::default()
            };
            let mut engine = kpm(chain.hamiltonian, config)?;

            let energy: Vec<f64> = (0..13).map(|i| -1.5 + 0.25 * i as f64).collect();
            let ldos = engine.ldos(n / 2, &energy, 0.05)?;

            for (&e, &value) in energy.iter().zip(&ldos) {
                let exact = lattice::chain_dos(e, -1.0);
                let rel_err = (value - exact).abs() / exact;
                ensure!(
                    rel_err < ANALYTIC_TOLERANCE,
                    "{} error too high at E = {}: {} (got {}, expected {})",
                    $error_msg_prefix,
                    e,
                    rel_err,
                    value,
                    exact
                );
            }
            Ok(())
        }
    };
}

/// A macro to generate a bounds test on a lattice much larger than the Lanczos
/// step cap.
///
/// The scaled expansion interval built from the estimate must contain the
/// analytic band edges `±$exact_max`.
macro_rules! generate_bounds_cover_test {
    ($test_name:ident, $lattice:expr, $exact_max:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let model = $lattice?;
            let exact_max: f64 = $exact_max;

            let estimate = estimate_bounds::<f64, _>(&model.hamiltonian, DEFAULT_LANCZOS_PRECISION)?;
            let scale = Scale::from_range(estimate, DEFAULT_SCALING_TOLERANCE)?;
            ensure!(
                scale.b - scale.a <= -exact_max && scale.b + scale.a >= exact_max,
                "scaled interval [{}, {}] from estimate {:?} misses ±{}",
                scale.b - scale.a,
                scale.b + scale.a,
                estimate,
                exact_max
            );
            ensure!(
                estimate.width() < 2.0 * exact_max * 1.05,
                "estimate {:?} is far wider than ±{}",
                estimate,
                exact_max
            );
            Ok(())
        }
    };
}

/// A macro to generate a moment test against exact diagonalization.
///
/// `$row == $col` exercises the diagonal recursion (two moments per product),
/// anything else the off-diagonal one.
macro_rules! generate_moment_test {
    ($test_name:ident, $seed:expr, $row:expr, $col:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let n = 24;
            let num_moments = 40;
            let (h, dense) = create_random_problem(n, $seed)?;

            let range = exact_range(&dense)?;
            let (h2, scale) = rescale::<f64, _>(&h, range, DEFAULT_SCALING_TOLERANCE)?;

            let mut mem = MemBuffer::new(h2.matvec_scratch());
            let stack = MemStack::new(&mut mem);
            let moments = if $row == $col {
                let starter = exval_starter::<f64>(n, $row)?;
                compute_diagonal_moments::<f64, _>(&h2, &starter, num_moments, stack)?
            } else {
                compute_offdiagonal_moments::<f64, _>(&h2, $row, &[$col], num_moments, stack)?
                    .pop()
                    .ok_or_else(|| anyhow!("no moments returned"))?
            };
            let expected = exact_moments(&dense, scale, $row, $col, num_moments)?;

            ensure!(moments.len() == num_moments, "wrong moment count {}", moments.len());
            for (k, (m, e)) in moments.iter().zip(&expected).enumerate() {
                ensure!(
                    (m - e).abs() < EXACT_TOLERANCE,
                    "moment {} differs: {} vs exact {}",
                    k,
                    m,
                    e
                );
            }
            Ok(())
        }
    };
}

// --- Test Suite ---

// Chain LDOS against the analytic band DOS.
generate_chain_ldos_test!(
    test_chain_ldos_jackson,
    Kernel::Jackson,
    EnergyRange::new(-2.0, 2.0)?,
    "Jackson kernel"
);
generate_chain_ldos_test!(
    test_chain_ldos_lorentz,
    Kernel::default(),
    EnergyRange::new(-2.0, 2.0)?,
    "Lorentz kernel"
);
generate_chain_ldos_test!(
    test_chain_ldos_lorentz_automatic_range,
    Kernel::default(),
    EnergyRange::unset(),
    "Lorentz kernel (estimated range)"
);
generate_chain_ldos_test!(
    test_chain_ldos_jackson_automatic_range,
    Kernel::Jackson,
    EnergyRange::unset(),
    "Jackson kernel (estimated range)"
);

// Estimated bounds on lattices with dense band edges.
generate_bounds_cover_test!(
    test_bounds_cover_long_chain,
    lattice::chain(4001, -1.0),
    2.0 * (std::f64::consts::PI / 4002.0).cos()
);
generate_bounds_cover_test!(
    test_bounds_cover_large_square_lattice,
    lattice::square(100, 100, -1.0),
    4.0 * (std::f64::consts::PI / 101.0).cos()
);

// Moments against exact diagonalization.
generate_moment_test!(test_diagonal_moments_first_site, 7, 0, 0);
generate_moment_test!(test_diagonal_moments_inner_site, 11, 13, 13);
generate_moment_test!(test_offdiagonal_moments_neighbours, 7, 5, 6);
generate_moment_test!(test_offdiagonal_moments_distant, 23, 2, 19);

#[test]
fn test_ldos_integrates_to_one() -> Result<()> {
    let square = lattice::square(8, 8, -1.0)?;
    let range = EnergyRange::new(-4.0, 4.0)?;
    let scale = Scale::from_range(range, DEFAULT_SCALING_TOLERANCE)?;

    // Midpoint rule in θ with E = b + a·cos θ: exact for the trigonometric
    // polynomial of the truncated series.
    let points = 4000;
    let step = std::f64::consts::PI / points as f64;
    let thetas: Vec<f64> = (0..points).map(|k| (k as f64 + 0.5) * step).collect();
    let energy: Vec<f64> = thetas.iter().map(|t| scale.restore(t.cos())).collect();

    for kernel in [Kernel::Jackson, Kernel::default()] {
        let ldos = compute_ldos::<f64, _>(&square.hamiltonian, range, kernel, &energy, 0.1, 27)?;
        let integral: f64 = ldos
            .iter()
            .zip(&thetas)
            .map(|(rho, t)| rho * scale.a * t.sin() * step)
            .sum();
        ensure!(
            (integral - 1.0).abs() < 1e-9,
            "{:?}: LDOS integrates to {}",
            kernel,
            integral
        );
    }
    Ok(())
}

#[test]
fn test_single_level_round_trip() -> Result<()> {
    let v = 0.3;
    let h = SparseColMat::try_new_from_triplets(1, 1, &[Triplet {
        row: 0,
        col: 0,
        val: v,
    }])
    .map_err(|e| anyhow!("Triplet assembly failed: {:?}", e))?;
    let range = EnergyRange::new(v - 1.0, v + 1.0)?;

    let step = 1e-3;
    let energy: Vec<f64> = (0..=1900).map(|i| v - 0.95 + step * i as f64).collect();
    let dos = compute_dos::<f64, _>(&h, range, Kernel::default(), &energy, 0.02)?;

    let integral: f64 = dos.iter().sum::<f64>() * step;
    ensure!((integral - 1.0).abs() < 0.02, "integral is {}", integral);

    let (peak, _) = energy
        .iter()
        .zip(&dos)
        .fold((f64::NAN, f64::NEG_INFINITY), |(pe, pv), (&e, &d)| {
            if d > pv { (e, d) } else { (pe, pv) }
        });
    ensure!((peak - v).abs() < 1.5 * step, "peak at {} instead of {}", peak, v);
    Ok(())
}

#[test]
fn test_two_site_dos() -> Result<()> {
    let config = Config {
        kernel: Kernel::Jackson,
        ..Default::default()
    };
    let mut engine = kpm(two_site()?, config)?;

    let range = engine.energy_range()?;
    ensure!(
        (range.min + 1.0).abs() < 1e-6 && (range.max - 1.0).abs() < 1e-6,
        "estimated range {:?}",
        range
    );

    let dos = engine.calc_dos(&[-0.95, 0.0, 0.95], 0.1)?;
    ensure!(dos.iter().all(|d| d.is_finite()), "non-finite DOS {:?}", dos);
    ensure!(dos[1] > -1e-12, "negative DOS at the band center: {}", dos[1]);
    ensure!(
        dos[0].max(dos[2]) > dos[1],
        "no weight toward the band edges: {:?}",
        dos
    );
    Ok(())
}

#[test]
fn test_boundary_energies_are_not_finite() -> Result<()> {
    let chain = lattice::chain(64, -1.0)?;
    let range = EnergyRange::new(-2.0, 2.0)?;
    let scale = Scale::from_range(range, DEFAULT_SCALING_TOLERANCE)?;

    let energy = [scale.b - scale.a, 0.0, scale.b + scale.a, 3.0];
    let ldos = compute_ldos::<f64, _>(&chain.hamiltonian, range, Kernel::Jackson, &energy, 0.1, 32)?;

    ensure!(ldos[1].is_finite(), "interior point is not finite");
    for i in [0, 2, 3] {
        ensure!(
            !ldos[i].is_finite(),
            "E = {} should not be finite, got {}",
            energy[i],
            ldos[i]
        );
    }
    Ok(())
}

#[test]
fn test_dos_is_idempotent() -> Result<()> {
    let square = lattice::square(12, 12, -1.0)?;
    let config = Config {
        num_random: 3,
        random_seed: 17,
        ..Default::default()
    };
    let mut engine = kpm(square.hamiltonian, config)?;
    let energy: Vec<f64> = (0..41).map(|i| -3.8 + 0.19 * i as f64).collect();

    let first = engine.calc_dos(&energy, 0.1)?;
    let second = engine.calc_dos(&energy, 0.1)?;
    ensure!(first == second, "repeated DOS differs");
    Ok(())
}

#[test]
fn test_parallel_dos_matches_sequential() -> Result<()> {
    let square = lattice::square(16, 16, -1.0)?;
    let energy: Vec<f64> = (0..41).map(|i| -3.8 + 0.19 * i as f64).collect();

    let mut results = Vec::new();
    for parallel in [false, true] {
        let config = Config {
            energy_range: EnergyRange::new(-4.0, 4.0)?,
            num_random: 6,
            random_seed: 5,
            parallel,
            ..Default::default()
        };
        let mut engine = kpm(square.hamiltonian.clone(), config)?;
        results.push(engine.calc_dos(&energy, 0.1)?);
    }
    ensure!(results[0] == results[1], "parallel DOS differs from sequential DOS");
    Ok(())
}

#[test]
fn test_greens_imaginary_part_is_ldos() -> Result<()> {
    let (h, dense) = create_random_problem(30, 3)?;
    let range = exact_range(&dense)?;
    let scale = Scale::from_range(range, DEFAULT_SCALING_TOLERANCE)?;
    let energy: Vec<f64> = (1..20).map(|k| scale.restore(-0.9 + 0.09 * k as f64)).collect();

    for kernel in [Kernel::Jackson, Kernel::default()] {
        let ldos = compute_ldos::<f64, _>(&h, range, kernel, &energy, 0.1, 4)?;
        let greens = compute_greens::<f64, _>(&h, range, kernel, 4, 4, &energy, 0.1)?;
        for (g, rho) in greens.iter().zip(&ldos) {
            let expected = -std::f64::consts::PI * rho;
            ensure!(
                (g.im - expected).abs() < EXACT_TOLERANCE * (1.0 + expected.abs()),
                "Im G = {} but -π·LDOS = {}",
                g.im,
                expected
            );
        }
    }
    Ok(())
}

#[test]
fn test_greens_is_symmetric_for_real_hamiltonian() -> Result<()> {
    let (h, dense) = create_random_problem(30, 9)?;
    let range = exact_range(&dense)?;
    let energy = [-0.5, 0.0, 0.7];

    let g_ij = compute_greens::<f64, _>(&h, range, Kernel::Jackson, 3, 17, &energy, 0.1)?;
    let g_ji = compute_greens::<f64, _>(&h, range, Kernel::Jackson, 17, 3, &energy, 0.1)?;
    for (a, b) in g_ij.iter().zip(&g_ji) {
        ensure!(
            (a.re - b.re).abs() < EXACT_TOLERANCE && (a.im - b.im).abs() < EXACT_TOLERANCE,
            "G_ij = {:?} but G_ji = {:?}",
            a,
            b
        );
    }
    Ok(())
}

#[test]
fn test_lanczos_bounds_bracket_spectrum() -> Result<()> {
    let square = lattice::square(6, 6, -1.0)?;
    let exact_max = 4.0 * (std::f64::consts::PI / 7.0).cos();

    let estimate = estimate_bounds::<f64, _>(&square.hamiltonian, DEFAULT_LANCZOS_PRECISION)?;
    ensure!(
        (estimate.max - exact_max).abs() < 0.05 && (estimate.min + exact_max).abs() < 0.05,
        "estimate {:?} far from ±{}",
        estimate,
        exact_max
    );

    // The residual-widened estimate plus the scaling margin covers the spectrum.
    let scale = Scale::from_range(estimate, DEFAULT_SCALING_TOLERANCE)?;
    ensure!(
        scale.b - scale.a <= -exact_max && scale.b + scale.a >= exact_max,
        "scaled interval [{}, {}] misses the spectrum",
        scale.b - scale.a,
        scale.b + scale.a
    );
    Ok(())
}
