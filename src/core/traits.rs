//! Core traits for hyperspectral classification

use crate::core::{Prediction, Result, Sample, SampleSet};
use rand::rngs::StdRng;

/// Dataset abstraction for indexed sample access
pub trait Dataset {
    /// Number of samples in the dataset
    fn len(&self) -> usize;

    /// Number of spectral bands per sample
    fn dim(&self) -> usize;

    /// Get a single sample by index
    ///
    /// # Panics
    /// Panics if index >= len()
    fn get_sample(&self, i: usize) -> &Sample;

    /// Get all labels as a vector
    fn get_labels(&self) -> Vec<usize>;

    /// Check if the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-place transformation of a sample set
///
/// Stochastic transforms draw from the supplied generator so a seeded run
/// stays reproducible.
pub trait Transform {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Apply the transformation to every sample of the set
    fn apply(&self, set: &mut SampleSet, rng: &mut StdRng) -> Result<()>;
}

/// Trained multi-class model
pub trait Classifier {
    /// Number of output classes
    fn n_classes(&self) -> usize;

    /// Class membership probabilities for one spectrum
    fn predict_proba(&self, spectrum: &[f64]) -> Vec<f64>;

    /// Predict a single spectrum
    fn predict(&self, spectrum: &[f64]) -> Prediction {
        Prediction::from_probabilities(&self.predict_proba(spectrum))
    }

    /// Predict every sample of a dataset
    fn predict_batch<D: Dataset>(&self, dataset: &D) -> Vec<Prediction>
    where
        Self: Sized,
    {
        (0..dataset.len())
            .map(|i| self.predict(&dataset.get_sample(i).spectrum))
            .collect()
    }
}
