//! This module provides utilities for loading Hamiltonians and site positions
//! from files.
//!
//! Hamiltonians are read from (and written to) the MatrixMarket coordinate
//! format. `real`, `integer` and `complex` fields are supported, with the
//! `general`, `symmetric` and `hermitian` symmetries; a symmetric or Hermitian
//! file stores one triangle and the other is filled in on load. Site positions
//! are read from a headerless CSV file with two or three coordinates per row.

use crate::matrix::Hamiltonian;
use faer::{
    c64,
    sparse::{SparseColMat, Triplet},
};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};
use thiserror::Error;

/// Represents all possible errors that can occur during data loading and parsing.
#[derive(Error, Debug)]
pub enum DataLoaderError {
    /// Wraps a standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Wraps an error of the CSV reader.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Occurs when a string cannot be parsed into an integer.
    #[error("Parse error: Failed to parse integer from '{0}'")]
    ParseInt(String),
    /// Occurs when a string cannot be parsed into a float.
    #[error("Parse error: Failed to parse float from '{0}'")]
    ParseFloat(String),
    /// Occurs if the `%%MatrixMarket` banner is missing or describes an
    /// unsupported object.
    #[error("Format error: Unsupported or malformed MatrixMarket banner '{0}'.")]
    InvalidBanner(String),
    /// Occurs if the size line is missing or malformed.
    #[error("Format error: The size line was not found or was malformed.")]
    SizeLineMissing,
    /// Occurs when an entry line has too few fields or an index out of range.
    #[error("Format error: Invalid entry on line {line}: '{content}'")]
    InvalidEntry { line: usize, content: String },
    /// Occurs if the number of entries differs from the size line.
    #[error("Dimension mismatch: the size line declares {declared} entries, but {found} were read.")]
    EntryCountMismatch { declared: usize, found: usize },
    /// Occurs when a position row has the wrong number of coordinates.
    #[error("Format error: Position row {row} has {len} coordinates; expected 2 or 3.")]
    InvalidPosition { row: usize, len: usize },
    /// Occurs if the sparse matrix construction fails internally.
    #[error("Internal error: Failed to construct the sparse matrix from triplets.")]
    SparseMatrixConstructionError,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Real,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Symmetry {
    General,
    Symmetric,
    Hermitian,
}

fn parse_banner(line: &str) -> Result<(Field, Symmetry), DataLoaderError> {
    let invalid = || DataLoaderError::InvalidBanner(line.to_string());
    let parts: Vec<String> = line.split_whitespace().map(str::to_lowercase).collect();
    if parts.len() != 5 || parts[0] != "%%matrixmarket" || parts[1] != "matrix" {
        return Err(invalid());
    }
    if parts[2] != "coordinate" {
        return Err(invalid());
    }
    let field = match parts[3].as_str() {
        "real" | "integer" | "double" => Field::Real,
        "complex" => Field::Complex,
        _ => return Err(invalid()),
    };
    let symmetry = match parts[4].as_str() {
        "general" => Symmetry::General,
        "symmetric" => Symmetry::Symmetric,
        "hermitian" => Symmetry::Hermitian,
        _ => return Err(invalid()),
    };
    Ok((field, symmetry))
}

fn parse_usize(s: &str) -> Result<usize, DataLoaderError> {
    s.parse::<usize>()
        .map_err(|_| DataLoaderError::ParseInt(s.to_string()))
}

fn parse_f64(s: &str) -> Result<f64, DataLoaderError> {
    s.parse::<f64>()
        .map_err(|_| DataLoaderError::ParseFloat(s.to_string()))
}

/// Raw coordinate data: 0-based `(row, col, re, im)` entries.
struct Coordinates {
    nrows: usize,
    ncols: usize,
    field: Field,
    entries: Vec<(usize, usize, f64, f64)>,
}

fn read_coordinates(path: &Path) -> Result<Coordinates, DataLoaderError> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines().enumerate();

    let banner = match lines.next() {
        Some((_, line)) => line?,
        None => return Err(DataLoaderError::InvalidBanner(String::new())),
    };
    let (field, symmetry) = parse_banner(&banner)?;

    let mut size: Option<(usize, usize, usize)> = None;
    let mut entries = Vec::new();

    for (number, line) in lines {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();

        let Some((nrows, ncols, _)) = size else {
            if parts.len() != 3 {
                return Err(DataLoaderError::SizeLineMissing);
            }
            let declared = parse_usize(parts[2])?;
            size = Some((parse_usize(parts[0])?, parse_usize(parts[1])?, declared));
            entries.reserve(declared);
            continue;
        };

        let expected = if field == Field::Complex { 4 } else { 3 };
        let invalid = || DataLoaderError::InvalidEntry {
            line: number + 1,
            content: trimmed.to_string(),
        };
        if parts.len() < expected {
            return Err(invalid());
        }
        // Indices are 1-based.
        let row = parse_usize(parts[0])?;
        let col = parse_usize(parts[1])?;
        if row == 0 || col == 0 || row > nrows || col > ncols {
            return Err(invalid());
        }
        let re = parse_f64(parts[2])?;
        let im = if field == Field::Complex {
            parse_f64(parts[3])?
        } else {
            0.0
        };
        entries.push((row - 1, col - 1, re, im));
    }

    let Some((nrows, ncols, declared)) = size else {
        return Err(DataLoaderError::SizeLineMissing);
    };
    if entries.len() != declared {
        return Err(DataLoaderError::EntryCountMismatch {
            declared,
            found: entries.len(),
        });
    }

    // Fill in the implicit triangle.
    if symmetry != Symmetry::General {
        let mirrored: Vec<_> = entries
            .iter()
            .filter(|(row, col, _, _)| row != col)
            .map(|&(row, col, re, im)| match symmetry {
                Symmetry::Hermitian => (col, row, re, -im),
                _ => (col, row, re, im),
            })
            .collect();
        entries.extend(mirrored);
    }

    Ok(Coordinates {
        nrows,
        ncols,
        field,
        entries,
    })
}

/// Loads a Hamiltonian from a MatrixMarket coordinate file.
///
/// Real and integer files give a [`Hamiltonian::Real`], complex files a
/// [`Hamiltonian::Complex`]. Duplicate entries are summed.
pub fn load_matrix_market(path: impl AsRef<Path>) -> Result<Hamiltonian, DataLoaderError> {
    let coords = read_coordinates(path.as_ref())?;
    let (nrows, ncols) = (coords.nrows, coords.ncols);

    let hamiltonian = match coords.field {
        Field::Real => {
            let triplets: Vec<_> = coords
                .entries
                .into_iter()
                .map(|(row, col, re, _)| Triplet { row, col, val: re })
                .collect();
            let matrix = SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
                .map_err(|_| DataLoaderError::SparseMatrixConstructionError)?;
            Hamiltonian::Real(Arc::new(matrix))
        }
        Field::Complex => {
            let triplets: Vec<_> = coords
                .entries
                .into_iter()
                .map(|(row, col, re, im)| Triplet {
                    row,
                    col,
                    val: c64::new(re, im),
                })
                .collect();
            let matrix = SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
                .map_err(|_| DataLoaderError::SparseMatrixConstructionError)?;
            Hamiltonian::Complex(Arc::new(matrix))
        }
    };
    Ok(hamiltonian)
}

/// Writes a Hamiltonian as a `general` MatrixMarket coordinate file.
pub fn save_matrix_market(
    path: impl AsRef<Path>,
    hamiltonian: &Hamiltonian,
) -> Result<(), DataLoaderError> {
    let mut out = BufWriter::new(File::create(path)?);
    match hamiltonian {
        Hamiltonian::Real(h) => {
            let entries: Vec<_> = h.triplet_iter().collect();
            writeln!(out, "%%MatrixMarket matrix coordinate real general")?;
            writeln!(out, "{} {} {}", h.nrows(), h.ncols(), entries.len())?;
            for t in entries {
                writeln!(out, "{} {} {:e}", t.row + 1, t.col + 1, t.val)?;
            }
        }
        Hamiltonian::Complex(h) => {
            let entries: Vec<_> = h.triplet_iter().collect();
            writeln!(out, "%%MatrixMarket matrix coordinate complex general")?;
            writeln!(out, "{} {} {}", h.nrows(), h.ncols(), entries.len())?;
            for t in entries {
                writeln!(out, "{} {} {:e} {:e}", t.row + 1, t.col + 1, t.val.re, t.val.im)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Loads site positions from a headerless CSV file (`x,y` or `x,y,z` rows).
pub fn load_positions(path: impl AsRef<Path>) -> Result<Vec<[f64; 3]>, DataLoaderError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut positions = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != 2 && record.len() != 3 {
            return Err(DataLoaderError::InvalidPosition {
                row: row + 1,
                len: record.len(),
            });
        }
        let mut position = [0.0; 3];
        for (slot, field) in position.iter_mut().zip(record.iter()) {
            *slot = parse_f64(field)?;
        }
        positions.push(position);
    }
    Ok(positions)
}
