//! Core type definitions for spectral samples

use crate::core::{Dataset, HsiError, Result};
use serde::{Deserialize, Serialize};

/// Prediction result containing class label and its probability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted class label (zero-based)
    pub label: usize,
    /// Softmax probability of the predicted class
    pub confidence: f64,
}

impl Prediction {
    /// Create a new prediction
    pub fn new(label: usize, confidence: f64) -> Self {
        Self { label, confidence }
    }

    /// Pick the most probable class from a probability vector
    ///
    /// Ties resolve to the lowest class index.
    pub fn from_probabilities(probabilities: &[f64]) -> Self {
        let mut best = Self::new(0, f64::NEG_INFINITY);
        for (label, &p) in probabilities.iter().enumerate() {
            if p > best.confidence {
                best = Self::new(label, p);
            }
        }
        best
    }
}

/// A single labeled pixel: its spectral vector and zero-based class
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Reflectance (or radiance) value per band
    pub spectrum: Vec<f64>,
    /// Class label, zero-based
    pub label: usize,
}

impl Sample {
    /// Create a new sample
    pub fn new(spectrum: Vec<f64>, label: usize) -> Self {
        Self { spectrum, label }
    }

    /// Number of bands
    pub fn dim(&self) -> usize {
        self.spectrum.len()
    }
}

/// Ordered collection of samples sharing one dimensionality
///
/// Deserialization goes through [`SampleSet::push`], so a stored set with
/// ragged spectra is rejected instead of producing an inconsistent value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredSampleSet")]
pub struct SampleSet {
    samples: Vec<Sample>,
    dim: usize,
}

/// Unchecked serialized form of [`SampleSet`]
#[derive(Deserialize)]
struct StoredSampleSet {
    samples: Vec<Sample>,
    dim: usize,
}

impl TryFrom<StoredSampleSet> for SampleSet {
    type Error = HsiError;

    fn try_from(stored: StoredSampleSet) -> Result<Self> {
        let mut set = SampleSet::new(stored.dim);
        for sample in stored.samples {
            set.push(sample)?;
        }
        Ok(set)
    }
}

impl SampleSet {
    /// Create an empty set of the given dimensionality
    pub fn new(dim: usize) -> Self {
        Self {
            samples: Vec::new(),
            dim,
        }
    }

    /// Build a set from samples, checking that every spectrum has the same length
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self> {
        let dim = samples.first().map(Sample::dim).unwrap_or(0);
        if let Some(bad) = samples.iter().find(|s| s.dim() != dim) {
            return Err(HsiError::DimensionMismatch {
                expected: dim,
                actual: bad.dim(),
            });
        }
        Ok(Self { samples, dim })
    }

    /// Append a sample
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        if self.samples.is_empty() && self.dim == 0 {
            self.dim = sample.dim();
        }
        if sample.dim() != self.dim {
            return Err(HsiError::DimensionMismatch {
                expected: self.dim,
                actual: sample.dim(),
            });
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Mutable access to the samples; spectra lengths must not change
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Number of classes implied by the largest label
    pub fn n_classes(&self) -> usize {
        self.samples
            .iter()
            .map(|s| s.label + 1)
            .max()
            .unwrap_or(0)
    }

    /// Number of samples per class, indexed by label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Largest over smallest population among the classes present
    pub fn imbalance_ratio(&self) -> Option<f64> {
        let counts = self.class_counts();
        let present = counts.iter().copied().filter(|&c| c > 0);
        let largest = present.clone().max()?;
        let smallest = present.min()?;
        Some(largest as f64 / smallest as f64)
    }
}

impl Dataset for SampleSet {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn get_sample(&self, i: usize) -> &Sample {
        &self.samples[i]
    }

    fn get_labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }
}

/// Activation shape of a single sample as it flows through a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub channels: usize,
    pub length: usize,
}

impl Shape {
    pub fn new(channels: usize, length: usize) -> Self {
        Self { channels, length }
    }

    /// Total number of values
    pub fn size(&self) -> usize {
        self.channels * self.length
    }
}
