//! Site lookup for position-based queries.
//!
//! The engine itself only knows Hamiltonian indices. Position-based queries
//! such as [`crate::kpm::KernelPolynomialMethod::calc_ldos`] go through a
//! [`SiteLocator`], which maps a Cartesian position (optionally restricted to
//! one sublattice) to the Hamiltonian index of the nearest site.
//!
//! [`System`] is a plain reference implementation: site positions stored in
//! sublattice order, each sublattice occupying a contiguous range of sites and
//! `num_orbitals` consecutive Hamiltonian rows per site.

use crate::error::{KpmError, KpmErrorKind};
use serde::{Deserialize, Serialize};

/// Maps positions to Hamiltonian indices.
pub trait SiteLocator: Send + Sync {
    /// Returns the Hamiltonian index of the site nearest to `position`.
    ///
    /// With `sublattice` set, only sites of that sublattice are considered.
    fn find_nearest(&self, position: [f64; 3], sublattice: Option<&str>)
    -> Result<usize, KpmError>;
}

/// Description of one sublattice block of a [`System`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sublattice {
    pub name: String,
    pub num_sites: usize,
    pub num_orbitals: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct SublatticeRange {
    name: String,
    sys_start: usize,
    sys_end: usize,
    ham_start: usize,
    num_orbitals: usize,
}

/// Site positions grouped into contiguous sublattice ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct System {
    positions: Vec<[f64; 3]>,
    sublattices: Vec<SublatticeRange>,
}

impl System {
    /// Creates a system from positions ordered by sublattice.
    ///
    /// The site counts of `sublattices` must add up to `positions.len()`, names
    /// must be unique and every sublattice needs at least one orbital.
    pub fn new(positions: Vec<[f64; 3]>, sublattices: Vec<Sublattice>) -> Result<Self, KpmError> {
        let mut ranges = Vec::with_capacity(sublattices.len());
        let mut sys_start = 0;
        let mut ham_start = 0;
        for sub in sublattices {
            if sub.num_orbitals == 0 {
                return Err(KpmErrorKind::InputError(format!(
                    "sublattice '{}' has no orbitals",
                    sub.name
                ))
                .into());
            }
            if ranges.iter().any(|r: &SublatticeRange| r.name == sub.name) {
                return Err(KpmErrorKind::InputError(format!(
                    "duplicate sublattice name '{}'",
                    sub.name
                ))
                .into());
            }
            ranges.push(SublatticeRange {
                name: sub.name,
                sys_start,
                sys_end: sys_start + sub.num_sites,
                ham_start,
                num_orbitals: sub.num_orbitals,
            });
            sys_start += sub.num_sites;
            ham_start += sub.num_sites * sub.num_orbitals;
        }

        if sys_start != positions.len() {
            return Err(KpmErrorKind::InputError(format!(
                "sublattices cover {sys_start} sites but {} positions were given",
                positions.len()
            ))
            .into());
        }

        Ok(Self {
            positions,
            sublattices: ranges,
        })
    }

    /// A system of single-orbital sites belonging to one unnamed sublattice.
    pub fn single_orbital(positions: Vec<[f64; 3]>) -> Self {
        let num_sites = positions.len();
        Self {
            positions,
            sublattices: vec![SublatticeRange {
                name: String::new(),
                sys_start: 0,
                sys_end: num_sites,
                ham_start: 0,
                num_orbitals: 1,
            }],
        }
    }

    pub fn num_sites(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    /// Dimension of the Hamiltonian described by this system.
    pub fn hamiltonian_size(&self) -> usize {
        self.sublattices
            .iter()
            .map(|s| (s.sys_end - s.sys_start) * s.num_orbitals)
            .sum()
    }

    /// Hamiltonian index of the first orbital of site `system_index`.
    pub fn to_hamiltonian_index(&self, system_index: usize) -> Result<usize, KpmError> {
        self.sublattices
            .iter()
            .find(|s| s.sys_start <= system_index && system_index < s.sys_end)
            .map(|s| s.ham_start + (system_index - s.sys_start) * s.num_orbitals)
            .ok_or_else(|| {
                KpmErrorKind::IndexOutOfBounds {
                    index: system_index,
                    size: self.num_sites(),
                }
                .into()
            })
    }

    /// System index of the site nearest to `position`.
    ///
    /// Ties go to the lowest index.
    pub fn find_nearest_site(
        &self,
        position: [f64; 3],
        sublattice: Option<&str>,
    ) -> Result<usize, KpmError> {
        let (start, end) = match sublattice.filter(|name| !name.is_empty()) {
            None => (0, self.num_sites()),
            Some(name) => self
                .sublattices
                .iter()
                .find(|s| s.name == name)
                .map(|s| (s.sys_start, s.sys_end))
                .ok_or_else(|| {
                    KpmError::from(KpmErrorKind::InputError(format!(
                        "unknown sublattice '{name}'"
                    )))
                })?,
        };
        if start == end {
            return Err(KpmErrorKind::InputError(
                "cannot search for the nearest site of an empty system".to_string(),
            )
            .into());
        }

        let distance_sq = |p: &[f64; 3]| {
            p.iter()
                .zip(&position)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
        };

        let mut nearest = start;
        let mut min_distance = distance_sq(&self.positions[start]);
        for (i, p) in self.positions[start..end].iter().enumerate().skip(1) {
            let distance = distance_sq(p);
            if distance < min_distance {
                min_distance = distance;
                nearest = start + i;
            }
        }
        Ok(nearest)
    }
}

impl SiteLocator for System {
    fn find_nearest(
        &self,
        position: [f64; 3],
        sublattice: Option<&str>,
    ) -> Result<usize, KpmError> {
        let site = self.find_nearest_site(position, sublattice)?;
        self.to_hamiltonian_index(site)
    }
}
