//! Burn network modules and the classifier wrapper around them

use crate::core::{Classifier, Dataset, HsiError, Prediction, Result, Shape};
use crate::model::{conv_output_length, InferenceBackend, ModelKind, ModelParams, TrainBackend};
use burn::module::{AutodiffModule, Module};
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::pool::{MaxPool1d, MaxPool1dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use log::debug;
use std::path::Path;
use std::sync::Mutex;

/// Samples scored per forward pass outside training
const SCORING_BATCH: usize = 512;

/// The `NdArray` backend draws initial weights from one process-wide
/// generator; seeding and initialization happen under this lock.
static INIT_LOCK: Mutex<()> = Mutex::new(());

type NetRecord = <SpectralNet<TrainBackend> as Module<TrainBackend>>::Record;

/// Convolution, ReLU and optional stride-2 max pooling
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv1d<B>,
    pool: Option<MaxPool1d>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(device: &B::Device, channels: usize, filters: usize, kernel_size: usize, pool: bool) -> Self {
        ConvBlock {
            conv: Conv1dConfig::new(channels, filters, kernel_size).init(device),
            pool: pool.then(|| MaxPool1dConfig::new(2).with_stride(2).init()),
        }
    }

    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = relu(self.conv.forward(x));
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Convolution blocks, hidden dense layers and a linear output head
///
/// Input is `[batch, channels, bands]`, output is `[batch, n_classes]` logits.
#[derive(Module, Debug)]
pub struct SpectralNet<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
}

impl<B: Backend> SpectralNet<B> {
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let mut x = input;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let [batch, channels, length] = x.dims();
        let mut x = x.reshape([batch, channels * length]);
        for layer in &self.hidden {
            x = relu(layer.forward(x));
        }
        self.output.forward(x)
    }
}

/// Name, output shape and parameter count of one trainable layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: &'static str,
    pub output: Shape,
    pub params: usize,
}

/// Lay out the layers of a network; the module and the summary both follow
/// this plan
fn plan(kind: ModelKind, params: &ModelParams) -> Vec<LayerInfo> {
    let mut layers = Vec::new();
    let mut shape = params.input_shape();

    match kind {
        ModelKind::Linear => {}
        ModelKind::Dense => {
            let mut features = shape.size();
            for _ in 0..params.n_layers {
                layers.push(LayerInfo {
                    name: "dense",
                    output: Shape::new(1, params.n_kernels),
                    params: features * params.n_kernels + params.n_kernels,
                });
                features = params.n_kernels;
            }
            shape = Shape::new(1, features);
        }
        ModelKind::Conv1d => {
            for _ in 0..params.n_layers {
                let output = Shape::new(
                    params.n_kernels,
                    conv_output_length(shape.length, params.kernel_size),
                );
                layers.push(LayerInfo {
                    name: "conv1d",
                    output,
                    params: shape.channels * params.n_kernels * params.kernel_size
                        + params.n_kernels,
                });
                shape = output;
            }
        }
    }

    layers.push(LayerInfo {
        name: "output",
        output: Shape::new(1, params.n_classes),
        params: shape.size() * params.n_classes + params.n_classes,
    });
    layers
}

fn build<B: Backend>(kind: ModelKind, params: &ModelParams, device: &B::Device) -> SpectralNet<B> {
    let mut blocks = Vec::new();
    let mut hidden = Vec::new();
    let mut shape = params.input_shape();

    match kind {
        ModelKind::Linear => {}
        ModelKind::Dense => {
            let mut features = shape.size();
            for _ in 0..params.n_layers {
                hidden.push(LinearConfig::new(features, params.n_kernels).init(device));
                features = params.n_kernels;
            }
            shape = Shape::new(1, features);
        }
        ModelKind::Conv1d => {
            for _ in 0..params.n_layers {
                let convolved = shape.length + 1 - params.kernel_size;
                blocks.push(ConvBlock::new(
                    device,
                    shape.channels,
                    params.n_kernels,
                    params.kernel_size,
                    convolved >= 2,
                ));
                shape = Shape::new(
                    params.n_kernels,
                    conv_output_length(shape.length, params.kernel_size),
                );
            }
        }
    }

    SpectralNet {
        blocks,
        hidden,
        output: LinearConfig::new(shape.size(), params.n_classes).init(device),
    }
}

/// `[rows, channels, bands]` input tensor from flat per-sample values
pub(crate) fn input_tensor<B: Backend>(
    rows: &[&[f64]],
    shape: Shape,
    device: &B::Device,
) -> Tensor<B, 3> {
    let values: Vec<f32> = rows
        .iter()
        .flat_map(|row| row.iter().map(|&v| v as f32))
        .collect();
    Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([
        rows.len(),
        shape.channels,
        shape.length,
    ])
}

/// Class index tensor for a batch of labels
pub(crate) fn target_tensor<B: Backend>(labels: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    Tensor::from_data(TensorData::new(values, [labels.len()]), device)
}

/// Spectral classifier: a [`SpectralNet`] with its architecture description
#[derive(Debug, Clone)]
pub struct Network {
    kind: ModelKind,
    params: ModelParams,
    layers: Vec<LayerInfo>,
    model: SpectralNet<TrainBackend>,
}

impl Network {
    /// Build and initialize a network from a seed
    pub fn new(kind: ModelKind, params: ModelParams, seed: u64) -> Result<Self> {
        params.validate(kind)?;
        let device = Default::default();

        let model = {
            let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            TrainBackend::seed(seed);
            let model = build::<TrainBackend>(kind, &params, &device);
            // parameters are created lazily; touch them all while seeded
            let _ = model.forward(Tensor::zeros(
                [1, params.input_channels(), params.input_size],
                &device,
            ));
            model
        };

        let network = Self {
            kind,
            layers: plan(kind, &params),
            params,
            model,
        };
        debug!("Built {kind} model:\n{}", network.summary());
        Ok(network)
    }

    /// Wrap an already trained module
    pub(crate) fn with_model(&self, model: SpectralNet<TrainBackend>) -> Self {
        Self {
            kind: self.kind,
            params: self.params,
            layers: self.layers.clone(),
            model,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Number of spectral bands per pixel
    pub fn input_size(&self) -> usize {
        self.params.input_size
    }

    /// Number of values per sample
    pub fn input_features(&self) -> usize {
        self.params.input_features()
    }

    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    pub fn model(&self) -> &SpectralNet<TrainBackend> {
        &self.model
    }

    /// Total number of trainable scalars
    pub fn parameter_count(&self) -> usize {
        self.model.num_params()
    }

    fn check_input(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.input_features() {
            return Err(HsiError::DimensionMismatch {
                expected: self.input_features(),
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Softmax probabilities for a batch of checked inputs
    fn probabilities(&self, model: &SpectralNet<InferenceBackend>, rows: &[&[f64]]) -> Vec<Vec<f64>> {
        if rows.is_empty() {
            return Vec::new();
        }
        let device = Default::default();
        let logits = model.forward(input_tensor(rows, self.params.input_shape(), &device));
        let values: Vec<f64> = softmax(logits, 1)
            .into_data()
            .iter::<f32>()
            .map(f64::from)
            .collect();
        values
            .chunks(self.params.n_classes)
            .map(<[f64]>::to_vec)
            .collect()
    }

    /// Class probabilities for every input
    pub fn predict_proba_batch(&self, rows: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        for row in rows {
            self.check_input(row)?;
        }
        let model = self.model.valid();
        Ok(rows
            .chunks(SCORING_BATCH)
            .flat_map(|chunk| self.probabilities(&model, chunk))
            .collect())
    }

    /// Mean cross-entropy and accuracy over a dataset
    pub fn evaluate_loss<D: Dataset>(&self, dataset: &D) -> Result<(f64, f64)> {
        if dataset.is_empty() {
            return Ok((0.0, 0.0));
        }
        let model = self.model.valid();
        let mut total_loss = 0.0;
        let mut correct = 0usize;

        let indices: Vec<usize> = (0..dataset.len()).collect();
        for chunk in indices.chunks(SCORING_BATCH) {
            let mut rows = Vec::with_capacity(chunk.len());
            for &i in chunk {
                let sample = dataset.get_sample(i);
                self.check_input(&sample.spectrum)?;
                if sample.label >= self.params.n_classes {
                    return Err(HsiError::InvalidLabel {
                        label: sample.label,
                        n_classes: self.params.n_classes,
                    });
                }
                rows.push(sample.spectrum.as_slice());
            }
            for (&i, probabilities) in chunk.iter().zip(self.probabilities(&model, &rows)) {
                let label = dataset.get_sample(i).label;
                total_loss -= probabilities[label].max(1e-12).ln();
                if Prediction::from_probabilities(&probabilities).label == label {
                    correct += 1;
                }
            }
        }

        let n = dataset.len() as f64;
        Ok((total_loss / n, correct as f64 / n))
    }

    /// Write the weights as a named MessagePack record (`.mpk`)
    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .record(self.model.clone().into_record(), path.as_ref().to_path_buf())
            .map_err(|e| HsiError::RecordError(format!("{e:?}")))
    }

    /// Rebuild a network of the given architecture and load stored weights
    ///
    /// Every layer is checked against the architecture, so a record written
    /// for a different model is rejected instead of failing at prediction.
    pub fn load_weights<P: AsRef<Path>>(kind: ModelKind, params: ModelParams, path: P) -> Result<Self> {
        let template = Self::new(kind, params, 0)?;
        let device = Default::default();
        let record: NetRecord = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .load(path.as_ref().to_path_buf(), &device)
            .map_err(|e| HsiError::RecordError(format!("{e:?}")))?;
        let network = template.with_model(template.model.clone().load_record(record));
        network.check_weights()?;
        Ok(network)
    }

    /// Compare every loaded weight tensor with the architecture
    fn check_weights(&self) -> Result<()> {
        let mismatch = |layer: usize, expected: Vec<usize>, actual: Vec<usize>| {
            HsiError::RecordError(format!(
                "layer {layer} weights have shape {actual:?}, the {} architecture expects {expected:?}",
                self.kind
            ))
        };

        let mut shape = self.params.input_shape();
        let mut layer = 0;
        for block in &self.model.blocks {
            let expected = vec![self.params.n_kernels, shape.channels, self.params.kernel_size];
            let actual = block.conv.weight.val().dims().to_vec();
            if actual != expected {
                return Err(mismatch(layer, expected, actual));
            }
            shape = self.layers[layer].output;
            layer += 1;
        }
        let mut features = shape.size();
        for linear in self.model.hidden.iter().chain(std::iter::once(&self.model.output)) {
            let out = self.layers[layer].output.size();
            let expected = vec![features, out];
            let actual = linear.weight.val().dims().to_vec();
            let bias = linear.bias.as_ref().map(|b| b.val().dims()[0]);
            if actual != expected || bias != Some(out) {
                return Err(mismatch(layer, expected, actual));
            }
            features = out;
            layer += 1;
        }
        Ok(())
    }

    /// One line per layer with its output shape and parameter count
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{:<12} {:>16} {:>10}",
            "layer", "output (c x l)", "params"
        )];
        for layer in &self.layers {
            lines.push(format!(
                "{:<12} {:>16} {:>10}",
                layer.name,
                format!("{} x {}", layer.output.channels, layer.output.length),
                layer.params
            ));
        }
        lines.push(format!("total parameters: {}", self.parameter_count()));
        lines.join("\n")
    }
}

impl Classifier for Network {
    fn n_classes(&self) -> usize {
        self.params.n_classes
    }

    /// # Panics
    /// Panics if the sample length differs from the network input size
    fn predict_proba(&self, spectrum: &[f64]) -> Vec<f64> {
        assert_eq!(
            spectrum.len(),
            self.input_features(),
            "sample length must match the network input"
        );
        self.probabilities(&self.model.valid(), &[spectrum])
            .pop()
            .unwrap_or_default()
    }

    fn predict_batch<D: Dataset>(&self, dataset: &D) -> Vec<Prediction> {
        let model = self.model.valid();
        let indices: Vec<usize> = (0..dataset.len()).collect();
        indices
            .chunks(SCORING_BATCH)
            .flat_map(|chunk| {
                let rows: Vec<&[f64]> = chunk
                    .iter()
                    .map(|&i| dataset.get_sample(i).spectrum.as_slice())
                    .collect();
                self.probabilities(&model, &rows)
            })
            .map(|p| Prediction::from_probabilities(&p))
            .collect()
    }
}
