//! MATLAB `.mat` (level 5) reader
//!
//! Hyperspectral benchmarks such as Indian Pines or Pavia University are
//! commonly distributed as `.mat` files holding a single variable. The
//! first variable whose name does not contain `__` is loaded.

use crate::core::{HsiError, Result};
use log::debug;
use matfile::{MatFile, NumericData};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read the first variable of a MAT stream
///
/// MATLAB stores arrays column-major; the result is converted to standard
/// (row-major) layout.
pub fn read_mat<R: Read>(reader: R) -> Result<ArrayD<f64>> {
    let mat = MatFile::parse(reader)
        .map_err(|e| HsiError::ParseError(format!("invalid MAT file: {e:?}")))?;

    let variable = mat
        .arrays()
        .iter()
        .find(|array| !array.name().contains("__"))
        .ok_or_else(|| HsiError::InvalidDataset("MAT file contains no variables".to_string()))?;

    let shape = variable.size().to_vec();
    debug!("Reading MAT variable '{}' with shape {:?}", variable.name(), shape);

    let array = ArrayD::from_shape_vec(IxDyn(&shape).f(), numeric_to_f64(variable.data()))?;
    Ok(array.as_standard_layout().into_owned())
}

/// Load the first variable of a `.mat` file
pub fn read_mat_file<P: AsRef<Path>>(path: P) -> Result<ArrayD<f64>> {
    let file = File::open(path)?;
    read_mat(BufReader::new(file))
}

/// Widen the real part of any numeric class to `f64`
fn numeric_to_f64(data: &NumericData) -> Vec<f64> {
    match data {
        NumericData::Int8 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::UInt8 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::Int16 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::UInt16 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::Int32 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::UInt32 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::Int64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::UInt64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::Single { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::Double { real, .. } => real.clone(),
    }
}
