//! Hyperspectral image classification toolkit
//!
//! Loads labeled hyperspectral scenes, partitions the labeled pixels into
//! class-balanced train/validation/test sets, normalizes and optionally
//! perturbs them with noise, trains small spectral networks on the burn
//! `NdArray` backend and scores the results.

pub mod api;
pub mod core;
pub mod data;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod split;
pub mod training;
pub mod transforms;

// Re-export main types for convenience
pub use crate::api::{HsiClassifier, TrainedModel};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::core::{HsiError, Result};
pub use crate::data::{load_array, load_labeled, HyperspectralCube, ReferenceMap};
pub use crate::metrics::{ConfusionMatrix, EvaluationMetrics};
pub use crate::model::{get_model, ModelKind, ModelParams, Network};
pub use crate::persistence::{DatasetArchive, ModelFile};
pub use crate::split::{split, DataSplits, SplitSize, SplitStrategy};
pub use crate::training::{Trainer, TrainingConfig, TrainingHistory};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
