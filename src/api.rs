//! High-level API for hyperspectral classification
//!
//! This module ties loading, splitting, normalization, training and scoring
//! together behind a builder.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hsikit::api::{quick, HsiClassifier};
//! use hsikit::model::ModelKind;
//! use hsikit::split::SplitStrategy;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let archive = quick::prepare("scene.npy", "scene_gt.npy", SplitStrategy::default(), 0)?;
//!
//! let model = HsiClassifier::new(ModelKind::Conv1d)
//!     .with_learning_rate(0.005)
//!     .with_epochs(20)
//!     .train(&archive)?;
//!
//! let metrics = model.evaluate(&archive.splits.test)?;
//! println!("Overall accuracy: {:.2}%", metrics.overall_accuracy * 100.0);
//! # Ok(())
//! # }
//! ```

use crate::core::{Classifier, Dataset, HsiError, Prediction, Result, SampleSet, Transform};
use crate::metrics::{self, EvaluationMetrics};
use crate::model::{get_model, ModelKind, ModelParams, Network};
use crate::persistence::{DatasetArchive, ModelFile};
use crate::training::{Trainer, TrainingConfig, TrainingHistory};
use crate::transforms::{apply_transformations, DataRange, MinMaxNormalize, NoiseTarget};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// Network trainer with builder pattern
pub struct HsiClassifier {
    kind: ModelKind,
    kernel_size: usize,
    n_kernels: usize,
    n_layers: usize,
    config: TrainingConfig,
    noise: Vec<Box<dyn Transform>>,
    noise_targets: Vec<NoiseTarget>,
    checkpoint: Option<PathBuf>,
}

impl HsiClassifier {
    /// Create a trainer for the given architecture with default parameters
    pub fn new(kind: ModelKind) -> Self {
        let defaults = ModelParams::new(0, 0);
        Self {
            kind,
            kernel_size: defaults.kernel_size,
            n_kernels: defaults.n_kernels,
            n_layers: defaults.n_layers,
            config: TrainingConfig::default(),
            noise: Vec::new(),
            noise_targets: Vec::new(),
            checkpoint: None,
        }
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_n_kernels(mut self, n_kernels: usize) -> Self {
        self.n_kernels = n_kernels;
        self
    }

    pub fn with_n_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.config.learning_rate = learning_rate;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.config.epochs = epochs;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.config.patience = patience;
        self
    }

    /// Seed for weight initialization, shuffling and noise
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn with_config(mut self, config: TrainingConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject noise into the given partitions after normalization
    ///
    /// Only the train and validation targets apply during training.
    pub fn with_noise(mut self, noise: Vec<Box<dyn Transform>>, targets: &[NoiseTarget]) -> Self {
        self.noise = noise;
        self.noise_targets = targets.to_vec();
        self
    }

    /// Write a model file to `path` whenever validation accuracy improves
    pub fn with_checkpoint<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.checkpoint = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn model_params(&self, archive: &DatasetArchive) -> ModelParams {
        ModelParams {
            input_size: archive.n_bands,
            n_classes: archive.n_classes,
            kernel_size: self.kernel_size,
            n_kernels: self.n_kernels,
            n_layers: self.n_layers,
            neighborhood_size: archive.neighborhood_size,
        }
    }

    fn prepare_set(
        &self,
        set: &SampleSet,
        normalize: MinMaxNormalize,
        target: NoiseTarget,
        rng: &mut StdRng,
    ) -> Result<SampleSet> {
        let mut set = set.clone();
        normalize.apply(&mut set, rng)?;
        if self.noise_targets.contains(&target) {
            apply_transformations(&mut set, &self.noise, rng)?;
        }
        Ok(set)
    }

    /// Train on the train/validation partitions of a prepared archive
    pub fn train(&self, archive: &DatasetArchive) -> Result<TrainedModel> {
        let range = archive.range();
        let normalize = MinMaxNormalize::from_range(range)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let train = self.prepare_set(&archive.splits.train, normalize, NoiseTarget::Train, &mut rng)?;
        let validation = self.prepare_set(
            &archive.splits.validation,
            normalize,
            NoiseTarget::Val,
            &mut rng,
        )?;

        let params = self.model_params(archive);
        let network = get_model(self.kind, &params, self.config.seed)?;
        info!(
            "Built {} model with {} parameters",
            self.kind,
            network.parameter_count()
        );

        let trainer = Trainer::new(self.config)?;
        let config = self.config;
        let outcome = trainer.fit_with_checkpoint(network, &train, &validation, |best, record| {
            if let Some(path) = &self.checkpoint {
                ModelFile::new(best.clone(), range, config)
                    .with_score(record.val_acc, record.epoch + 1)
                    .save_to_file(path)?;
                info!(
                    "Epoch {}: val_acc improved to {:.5}, saved {}",
                    record.epoch + 1,
                    record.val_acc,
                    path.display()
                );
            }
            Ok(())
        })?;

        Ok(TrainedModel {
            network: outcome.best,
            normalization: range,
            normalizer: normalize,
            config: self.config,
            history: outcome.history,
        })
    }
}

/// Trained network with its input normalization
#[derive(Debug, Clone)]
pub struct TrainedModel {
    network: Network,
    normalization: DataRange,
    normalizer: MinMaxNormalize,
    config: TrainingConfig,
    history: TrainingHistory,
}

impl TrainedModel {
    /// Restore a model from a saved file; its history is empty
    pub fn from_model_file(file: ModelFile) -> Result<Self> {
        let normalizer = MinMaxNormalize::from_range(file.normalization)?;
        Ok(Self {
            network: file.network,
            normalization: file.normalization,
            normalizer,
            config: file.metadata.training_params,
            history: TrainingHistory::default(),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_model_file(ModelFile::load_from_file(path)?)
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn normalization(&self) -> DataRange {
        self.normalization
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Normalize inputs with `range` instead of the training range stored
    /// with the model
    pub fn with_normalization(mut self, range: DataRange) -> Result<Self> {
        self.normalizer = MinMaxNormalize::from_range(range)?;
        self.normalization = range;
        Ok(self)
    }

    fn check_dim(&self, set: &SampleSet) -> Result<()> {
        if !set.is_empty() && set.dim() != self.network.input_features() {
            return Err(HsiError::DimensionMismatch {
                expected: self.network.input_features(),
                actual: set.dim(),
            });
        }
        Ok(())
    }

    /// Predict every raw (unnormalized) sample of a set
    pub fn predict_set(&self, set: &SampleSet) -> Result<Vec<Prediction>> {
        self.check_dim(set)?;
        Ok(self.predict_batch(set))
    }

    /// Predict raw (unnormalized) samples, e.g. every pixel of a scene
    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<Prediction>> {
        let normalized: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                self.normalizer.normalize(&mut row);
                row
            })
            .collect();
        let refs: Vec<&[f64]> = normalized.iter().map(Vec::as_slice).collect();
        Ok(self
            .network
            .predict_proba_batch(&refs)?
            .iter()
            .map(|p| Prediction::from_probabilities(p))
            .collect())
    }

    /// Score the model on a raw (unnormalized) labeled set
    pub fn evaluate(&self, set: &SampleSet) -> Result<EvaluationMetrics> {
        self.check_dim(set)?;
        metrics::evaluate(self, set)
    }

    /// Score the model after normalizing `set` and applying `noise` to it
    pub fn evaluate_with_noise(
        &self,
        set: &SampleSet,
        noise: &[Box<dyn Transform>],
        seed: u64,
    ) -> Result<EvaluationMetrics> {
        self.check_dim(set)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut set = set.clone();
        self.normalizer.apply(&mut set, &mut rng)?;
        apply_transformations(&mut set, noise, &mut rng)?;
        metrics::evaluate(&self.network, &set)
    }

    /// Serializable form, scored with the best recorded validation accuracy
    pub fn to_model_file(&self) -> ModelFile {
        let file = ModelFile::new(self.network.clone(), self.normalization, self.config);
        match self.history.best() {
            Some(best) => file.with_score(best.val_acc, best.epoch + 1),
            None => file,
        }
    }
}

impl Classifier for TrainedModel {
    fn n_classes(&self) -> usize {
        self.network.n_classes()
    }

    fn predict_proba(&self, spectrum: &[f64]) -> Vec<f64> {
        let mut spectrum = spectrum.to_vec();
        self.normalizer.normalize(&mut spectrum);
        self.network.predict_proba(&spectrum)
    }

    fn predict_batch<D: Dataset>(&self, dataset: &D) -> Vec<Prediction> {
        let mut normalized = SampleSet::new(dataset.dim());
        for i in 0..dataset.len() {
            let mut sample = dataset.get_sample(i).clone();
            self.normalizer.normalize(&mut sample.spectrum);
            // lengths are unchanged, so the push cannot fail
            let _ = normalized.push(sample);
        }
        self.network.predict_batch(&normalized)
    }
}

/// Convenience functions for quick operations
pub mod quick {
    use super::*;
    use crate::data::load_labeled_patches;
    use crate::split::{split, SplitStrategy};

    /// Load a scene and its reference map and split the labeled pixels
    pub fn prepare<P1: AsRef<Path>, P2: AsRef<Path>>(
        data_path: P1,
        reference_path: P2,
        strategy: SplitStrategy,
        seed: u64,
    ) -> Result<DatasetArchive> {
        prepare_with_neighborhood(data_path, reference_path, 1, strategy, seed)
    }

    /// Like [`prepare`], with every sample covering the
    /// `neighborhood_size x neighborhood_size` window around a labeled pixel
    pub fn prepare_with_neighborhood<P1: AsRef<Path>, P2: AsRef<Path>>(
        data_path: P1,
        reference_path: P2,
        neighborhood_size: usize,
        strategy: SplitStrategy,
        seed: u64,
    ) -> Result<DatasetArchive> {
        let set = load_labeled_patches(data_path, reference_path, neighborhood_size)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let splits = split(&set, &strategy, &mut rng)?;
        DatasetArchive::with_neighborhood(splits, set.n_classes(), neighborhood_size, strategy, seed)
    }

    /// Split an in-memory labeled set into an archive
    pub fn prepare_set(set: &SampleSet, strategy: SplitStrategy, seed: u64) -> Result<DatasetArchive> {
        let mut rng = StdRng::seed_from_u64(seed);
        let splits = split(set, &strategy, &mut rng)?;
        DatasetArchive::new(splits, set.n_classes(), strategy, seed)
    }

    /// Train with default parameters and score on the test partition
    pub fn train_and_evaluate(archive: &DatasetArchive, kind: ModelKind) -> Result<EvaluationMetrics> {
        if archive.splits.test.samples().is_empty() {
            return Err(HsiError::InvalidDataset(
                "archive has no test samples".to_string(),
            ));
        }
        let model = HsiClassifier::new(kind)
            .with_seed(archive.seed)
            .train(archive)?;
        model.evaluate(&archive.splits.test)
    }
}
