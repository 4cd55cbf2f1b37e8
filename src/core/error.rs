//! Error types for hyperspectral classification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HsiError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid label {label}: model has {n_classes} classes")]
    InvalidLabel { label: usize, n_classes: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("NumPy read error: {0}")]
    NpyReadError(#[from] ndarray_npy::ReadNpyError),

    #[error("NumPy write error: {0}")]
    NpyWriteError(#[from] ndarray_npy::WriteNpyError),

    #[error("Array shape error: {0}")]
    ArrayShapeError(#[from] ndarray::ShapeError),

    #[error("Model record error: {0}")]
    RecordError(String),
}

pub type Result<T> = std::result::Result<T, HsiError>;
