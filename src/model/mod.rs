//! Spectral classification networks
//!
//! Networks are burn modules running on the `NdArray` CPU backend and are
//! selected by name through [`get_model`]:
//!
//! - `linear`: softmax regression on the raw spectrum
//! - `dense`: `n_layers` hidden layers of `n_kernels` ReLU units
//! - `conv1d`: `n_layers` blocks of convolution (`n_kernels` filters of
//!   `kernel_size`), ReLU and max pooling, followed by a dense classifier
//!
//! Neighbourhood samples enter as `size * size` input channels of `bands`
//! values each.

pub mod network;

pub use self::network::{LayerInfo, Network, SpectralNet};

use crate::core::{HsiError, Result, Shape};
use burn::backend::{Autodiff, NdArray};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend used for prediction and scoring
pub type InferenceBackend = NdArray<f32>;

/// Backend used for training
pub type TrainBackend = Autodiff<InferenceBackend>;

/// Model architecture identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Linear,
    Dense,
    Conv1d,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Dense => "dense",
            ModelKind::Conv1d => "conv1d",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ModelKind {
    type Err = HsiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "dense" => Ok(Self::Dense),
            "conv1d" | "conv" => Ok(Self::Conv1d),
            other => Err(HsiError::InvalidParameter(format!(
                "unknown model '{other}', expected linear, dense or conv1d"
            ))),
        }
    }
}

fn single_pixel() -> usize {
    1
}

/// Architecture hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Number of spectral bands
    pub input_size: usize,
    pub n_classes: usize,
    /// Convolution kernel length
    pub kernel_size: usize,
    /// Filters per convolution, or units per hidden dense layer
    pub n_kernels: usize,
    pub n_layers: usize,
    /// Side of the square pixel neighbourhood each sample covers
    #[serde(default = "single_pixel")]
    pub neighborhood_size: usize,
}

impl ModelParams {
    pub fn new(input_size: usize, n_classes: usize) -> Self {
        Self {
            input_size,
            n_classes,
            kernel_size: 3,
            n_kernels: 16,
            n_layers: 1,
            neighborhood_size: 1,
        }
    }

    /// Pixels per sample, used as input channels
    pub fn input_channels(&self) -> usize {
        self.neighborhood_size * self.neighborhood_size
    }

    /// Values per sample
    pub fn input_features(&self) -> usize {
        self.input_channels() * self.input_size
    }

    pub fn input_shape(&self) -> Shape {
        Shape::new(self.input_channels(), self.input_size)
    }

    /// Check that a network of `kind` can be built from these parameters
    pub fn validate(&self, kind: ModelKind) -> Result<()> {
        if self.input_size == 0 || self.n_classes < 2 {
            return Err(HsiError::InvalidParameter(format!(
                "network needs at least one band and two classes, got {} bands and {} classes",
                self.input_size, self.n_classes
            )));
        }
        crate::data::validate_neighborhood_size(self.neighborhood_size)?;
        if kind == ModelKind::Linear {
            return Ok(());
        }
        if self.n_kernels == 0 {
            return Err(HsiError::InvalidParameter(
                "number of kernels must be positive".to_string(),
            ));
        }
        if kind == ModelKind::Conv1d {
            if self.kernel_size == 0 {
                return Err(HsiError::InvalidParameter(
                    "kernel size must be positive".to_string(),
                ));
            }
            let mut length = self.input_size;
            for layer in 0..self.n_layers {
                if length < self.kernel_size {
                    return Err(HsiError::InvalidParameter(format!(
                        "convolution {} needs {} bands but only {length} remain; reduce n_layers or kernel_size",
                        layer + 1,
                        self.kernel_size
                    )));
                }
                length = conv_output_length(length, self.kernel_size);
            }
        }
        Ok(())
    }
}

/// Length after a valid convolution and, when at least two values remain,
/// a stride-2 max pool
pub(crate) fn conv_output_length(length: usize, kernel_size: usize) -> usize {
    let convolved = length + 1 - kernel_size;
    if convolved >= 2 {
        convolved / 2
    } else {
        convolved
    }
}

/// Build a freshly initialized network of the given kind
///
/// Weight initialization is seeded, so equal seeds give equal networks.
pub fn get_model(kind: ModelKind, params: &ModelParams, seed: u64) -> Result<Network> {
    Network::new(kind, *params, seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("dense".parse::<ModelKind>().unwrap(), ModelKind::Dense);
        assert_eq!("Conv1D".parse::<ModelKind>().unwrap(), ModelKind::Conv1d);
        assert!("lstm".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::Conv1d.to_string(), "conv1d");
    }

    #[test]
    fn test_linear_model() {
        let network = get_model(ModelKind::Linear, &ModelParams::new(10, 4), 0).unwrap();
        assert_eq!(network.layers().len(), 1);
        assert_eq!(network.parameter_count(), 10 * 4 + 4);
    }

    #[test]
    fn test_dense_model() {
        let params = ModelParams {
            n_layers: 2,
            n_kernels: 8,
            ..ModelParams::new(20, 3)
        };
        let network = get_model(ModelKind::Dense, &params, 0).unwrap();
        assert_eq!(network.layers().len(), 3);
        assert_eq!(network.parameter_count(), (20 * 8 + 8) + (8 * 8 + 8) + (8 * 3 + 3));
    }

    #[test]
    fn test_conv_model_shapes() {
        let params = ModelParams {
            n_layers: 2,
            n_kernels: 4,
            kernel_size: 5,
            ..ModelParams::new(103, 9)
        };
        let network = get_model(ModelKind::Conv1d, &params, 0).unwrap();

        // 103 -> conv 99 -> pool 49 -> conv 45 -> pool 22
        let layers = network.layers();
        assert_eq!(layers[0].output, Shape::new(4, 49));
        assert_eq!(layers[1].output, Shape::new(4, 22));
        assert_eq!(layers[2].output, Shape::new(1, 9));
        assert_eq!(
            network.parameter_count(),
            (4 * 5 + 4) + (4 * 4 * 5 + 4) + (4 * 22 * 9 + 9)
        );
    }

    #[test]
    fn test_neighbourhood_channels() {
        let params = ModelParams {
            neighborhood_size: 3,
            n_kernels: 2,
            ..ModelParams::new(8, 2)
        };
        assert_eq!(params.input_channels(), 9);
        assert_eq!(params.input_features(), 72);

        let network = get_model(ModelKind::Conv1d, &params, 0).unwrap();
        assert_eq!(network.input_features(), 72);
        // 9 input channels feed the first convolution
        assert_eq!(network.layers()[0].params, 2 * 9 * 3 + 2);

        let even = ModelParams {
            neighborhood_size: 2,
            ..params
        };
        assert!(get_model(ModelKind::Dense, &even, 0).is_err());
    }

    #[test]
    fn test_conv_model_too_deep() {
        let params = ModelParams {
            n_layers: 4,
            kernel_size: 5,
            ..ModelParams::new(12, 2)
        };
        assert!(matches!(
            get_model(ModelKind::Conv1d, &params, 0),
            Err(HsiError::InvalidParameter(_))
        ));
    }
}
