//! Data loading for hyperspectral scenes
//!
//! This module reads spectral cubes and reference maps stored as NumPy
//! (`.npy`) or MATLAB (`.mat`) arrays into `ndarray` rasters and turns the
//! labeled pixels, or the square neighbourhoods around them, into sample
//! sets.

pub mod cube;
pub mod mat;
pub mod npy;

pub use self::cube::*;
pub use self::mat::{read_mat, read_mat_file};
pub use self::npy::{read_npy, read_npy_file, write_npy, write_npy_file};
