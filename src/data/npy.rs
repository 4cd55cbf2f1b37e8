//! NumPy `.npy` input and output
//!
//! Reading accepts any simple numeric dtype that `ndarray-npy` decodes
//! (`f4`, `f8`, `i1`..`i8`, `u1`..`u8`, `b1`, either byte order, C or
//! Fortran order) and widens it to `f64`. Writing always produces a
//! little-endian `f8` file.

use crate::core::{HsiError, Result};
use log::trace;
use ndarray::{ArrayBase, ArrayD, Data, Dimension};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement, WriteNpyExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

type Decoder = fn(&[u8]) -> std::result::Result<ArrayD<f64>, ReadNpyError>;

fn decode<T: ReadableElement>(
    bytes: &[u8],
    widen: fn(&T) -> f64,
) -> std::result::Result<ArrayD<f64>, ReadNpyError> {
    Ok(ArrayD::<T>::read_npy(bytes)?.map(widen))
}

/// One decoder per supported element type, tried in order
fn decoders() -> [Decoder; 11] {
    [
        |b| decode::<f64>(b, |&v| v),
        |b| decode::<f32>(b, |&v| v as f64),
        |b| decode::<i8>(b, |&v| v as f64),
        |b| decode::<i16>(b, |&v| v as f64),
        |b| decode::<i32>(b, |&v| v as f64),
        |b| decode::<i64>(b, |&v| v as f64),
        |b| decode::<u8>(b, |&v| v as f64),
        |b| decode::<u16>(b, |&v| v as f64),
        |b| decode::<u32>(b, |&v| v as f64),
        |b| decode::<u64>(b, |&v| v as f64),
        |b| decode::<bool>(b, |&v| if v { 1.0 } else { 0.0 }),
    ]
}

/// Read an array from `.npy` encoded bytes, widening every element to `f64`
pub fn read_npy<R: Read>(mut reader: R) -> Result<ArrayD<f64>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    for decoder in decoders() {
        match decoder(&bytes) {
            Err(ReadNpyError::WrongDescriptor(descr)) => {
                trace!("npy descriptor {descr:?} does not match, trying next dtype");
            }
            other => return Ok(other?),
        }
    }
    Err(HsiError::UnsupportedFormat(
        "npy dtype is not a simple numeric or boolean type".to_string(),
    ))
}

/// Write an array as a little-endian `f8` `.npy` stream
pub fn write_npy<W, S, D>(writer: W, array: &ArrayBase<S, D>) -> Result<()>
where
    W: Write,
    S: Data<Elem = f64>,
    D: Dimension,
{
    array.write_npy(writer)?;
    Ok(())
}

/// Load an array from a `.npy` file
pub fn read_npy_file<P: AsRef<Path>>(path: P) -> Result<ArrayD<f64>> {
    let file = File::open(path)?;
    read_npy(BufReader::new(file))
}

/// Save an array to a `.npy` file
pub fn write_npy_file<P, S, D>(path: P, array: &ArrayBase<S, D>) -> Result<()>
where
    P: AsRef<Path>,
    S: Data<Elem = f64>,
    D: Dimension,
{
    let file = File::create(path)?;
    write_npy(BufWriter::new(file), array)
}
