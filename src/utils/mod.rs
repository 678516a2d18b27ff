//! Common utilities for data loading, test systems and performance measurement.
//!
//! This module provides helpers used across the binaries, demos and tests:
//!
//! - **`data_loader`**: Reads and writes Hamiltonians in the MatrixMarket
//!   coordinate format and reads site positions from CSV files.
//!
//! - **`lattice`**: Builds the chain and square-lattice Hamiltonians used as
//!   benchmark problems, with the analytic chain DOS as a reference.
//!
//! - **`perf`**: Wall-clock timing of the computation phases and the peak
//!   resident set size (RSS) on Linux systems.

pub mod data_loader;
pub mod lattice;
pub mod perf;
