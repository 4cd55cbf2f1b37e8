//! Model and dataset serialization
//!
//! A trained network is stored as two files: a JSON model file holding the
//! architecture, the normalization range the network expects its input in
//! and the parameters used to train it, and a burn MessagePack record with
//! the weights next to it (same stem, `.mpk` extension). Prepared splits are
//! stored as JSON dataset archives so that training and evaluation runs read
//! the same partitions.

use crate::core::{Dataset, HsiError, Result};
use crate::data::validate_neighborhood_size;
use crate::model::{ModelKind, ModelParams, Network};
use crate::split::{DataSplits, SplitStrategy};
use crate::training::TrainingConfig;
use crate::transforms::{DataRange, MinMaxNormalize};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Location of the weight record belonging to a model file
pub fn weights_path<P: AsRef<Path>>(model_path: P) -> PathBuf {
    model_path.as_ref().with_extension("mpk")
}

/// Model metadata for tracking and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Library version used to create the model
    pub library_version: String,
    pub model_kind: ModelKind,
    pub model_params: ModelParams,
    pub training_params: TrainingConfig,
    /// Validation accuracy of the stored weights
    pub best_val_acc: Option<f64>,
    /// Epoch (one-based) the weights come from
    pub epoch: Option<usize>,
    /// Creation timestamp
    pub created_at: String,
}

/// JSON part of a saved model
#[derive(Debug, Serialize, Deserialize)]
struct ModelHeader {
    normalization: DataRange,
    metadata: ModelMetadata,
}

/// Trained network with its normalization and training metadata
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub network: Network,
    /// Training-set range used for min-max normalization
    pub normalization: DataRange,
    pub metadata: ModelMetadata,
}

impl ModelFile {
    pub fn new(network: Network, normalization: DataRange, training_params: TrainingConfig) -> Self {
        let model_kind = network.kind();
        let model_params = *network.params();
        Self {
            network,
            normalization,
            metadata: ModelMetadata {
                library_version: env!("CARGO_PKG_VERSION").to_string(),
                model_kind,
                model_params,
                training_params,
                best_val_acc: None,
                epoch: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    /// Record the validation score and epoch of the stored weights
    pub fn with_score(mut self, val_acc: f64, epoch: usize) -> Self {
        self.metadata.best_val_acc = Some(val_acc);
        self.metadata.epoch = Some(epoch);
        self
    }

    /// The normalization expected by the network
    pub fn normalizer(&self) -> Result<MinMaxNormalize> {
        MinMaxNormalize::from_range(self.normalization)
    }

    /// Write the JSON model file to `path` and the weights next to it
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = ModelHeader {
            normalization: self.normalization,
            metadata: self.metadata.clone(),
        };
        write_json(&header, &path)?;
        self.network.save_weights(weights_path(&path))?;
        debug!("Saved {} model to {}", self.metadata.model_kind, path.as_ref().display());
        Ok(())
    }

    /// Load a model file and its weights, validating both
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let header: ModelHeader = read_json(&path)?;
        let invalid = |reason: String| {
            HsiError::ParseError(format!("{}: {reason}", path.as_ref().display()))
        };

        MinMaxNormalize::from_range(header.normalization)
            .map_err(|e| invalid(format!("bad normalization range ({e})")))?;
        let meta = &header.metadata;
        meta.model_params
            .validate(meta.model_kind)
            .map_err(|e| invalid(format!("bad model parameters ({e})")))?;

        let network = Network::load_weights(meta.model_kind, meta.model_params, weights_path(&path))?;
        Ok(Self {
            network,
            normalization: header.normalization,
            metadata: header.metadata,
        })
    }

    /// Print model summary
    pub fn print_summary(&self) {
        let meta = &self.metadata;
        println!("=== HSI Model Summary ===");
        println!("Model Kind: {}", meta.model_kind);
        println!("Input Bands: {}", meta.model_params.input_size);
        println!("Neighborhood Size: {}", meta.model_params.neighborhood_size);
        println!("Classes: {}", meta.model_params.n_classes);
        println!("Parameters: {}", self.network.parameter_count());
        println!(
            "Normalization: [{:.6}, {:.6}]",
            self.normalization.min, self.normalization.max
        );
        if let (Some(acc), Some(epoch)) = (meta.best_val_acc, meta.epoch) {
            println!("Best Validation Accuracy: {acc:.4} (epoch {epoch})");
        }
        println!("Library Version: {}", meta.library_version);
        println!("Created: {}", meta.created_at);
        println!("Architecture:");
        println!("  Kernel Size: {}", meta.model_params.kernel_size);
        println!("  Kernels: {}", meta.model_params.n_kernels);
        println!("  Layers: {}", meta.model_params.n_layers);
        println!("Training Parameters:");
        println!("  Learning Rate: {}", meta.training_params.learning_rate);
        println!("  Batch Size: {}", meta.training_params.batch_size);
        println!("  Epochs: {}", meta.training_params.epochs);
        println!("  Patience: {}", meta.training_params.patience);
        println!("  Seed: {}", meta.training_params.seed);
        println!();
        println!("{}", self.network.summary());
    }
}

fn single_pixel() -> usize {
    1
}

/// Prepared train/validation/test partitions with training statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetArchive {
    pub splits: DataSplits,
    /// Range of the training partition
    pub min: f64,
    pub max: f64,
    pub n_classes: usize,
    /// Spectral bands per pixel
    pub n_bands: usize,
    /// Side of the square pixel neighbourhood each sample covers
    #[serde(default = "single_pixel")]
    pub neighborhood_size: usize,
    pub strategy: SplitStrategy,
    pub seed: u64,
    pub created_at: String,
}

impl DatasetArchive {
    /// Wrap single-pixel splits, taking the statistics from the training
    /// partition
    pub fn new(splits: DataSplits, n_classes: usize, strategy: SplitStrategy, seed: u64) -> Result<Self> {
        Self::with_neighborhood(splits, n_classes, 1, strategy, seed)
    }

    /// Wrap splits whose samples are `neighborhood_size` squared pixels each
    pub fn with_neighborhood(
        splits: DataSplits,
        n_classes: usize,
        neighborhood_size: usize,
        strategy: SplitStrategy,
        seed: u64,
    ) -> Result<Self> {
        validate_neighborhood_size(neighborhood_size)?;
        let range = crate::transforms::data_range(&splits.train)?;
        let pixels = neighborhood_size * neighborhood_size;
        let dim = splits.train.dim();
        if dim % pixels != 0 {
            return Err(HsiError::InvalidDataset(format!(
                "samples of {dim} values cannot hold {neighborhood_size}x{neighborhood_size} pixels"
            )));
        }
        let archive = Self {
            splits,
            min: range.min,
            max: range.max,
            n_classes,
            n_bands: dim / pixels,
            neighborhood_size,
            strategy,
            seed,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        archive.validate()?;
        Ok(archive)
    }

    pub fn range(&self) -> DataRange {
        DataRange {
            min: self.min,
            max: self.max,
        }
    }

    /// Values per sample
    pub fn sample_dim(&self) -> usize {
        self.n_bands * self.neighborhood_size * self.neighborhood_size
    }

    /// Check that the stored partitions agree with the declared shape,
    /// classes and range
    pub fn validate(&self) -> Result<()> {
        validate_neighborhood_size(self.neighborhood_size)?;
        if self.n_bands == 0 || self.n_classes == 0 {
            return Err(HsiError::InvalidDataset(format!(
                "archive declares {} bands and {} classes",
                self.n_bands, self.n_classes
            )));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.min <= self.max) {
            return Err(HsiError::InvalidDataset(format!(
                "archive range [{}, {}] is not a valid interval",
                self.min, self.max
            )));
        }
        self.strategy.validate()?;

        for (name, set) in [
            ("train", &self.splits.train),
            ("validation", &self.splits.validation),
            ("test", &self.splits.test),
        ] {
            if !set.samples().is_empty() && set.dim() != self.sample_dim() {
                return Err(HsiError::InvalidDataset(format!(
                    "{name} partition has {} values per sample, archive declares {}",
                    set.dim(),
                    self.sample_dim()
                )));
            }
            if let Some(sample) = set.iter().find(|s| s.label >= self.n_classes) {
                return Err(HsiError::InvalidLabel {
                    label: sample.label,
                    n_classes: self.n_classes,
                });
            }
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(self, &path)?;
        info!(
            "Saved dataset archive to {} ({} train, {} validation, {} test)",
            path.as_ref().display(),
            self.splits.train.samples().len(),
            self.splits.validation.samples().len(),
            self.splits.test.samples().len()
        );
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let archive: Self = read_json(&path)?;
        archive.validate()?;
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Classifier, Sample, SampleSet};
    use crate::model::get_model;
    use tempfile::TempDir;

    fn splits() -> DataSplits {
        let set = |values: &[(f64, usize)]| {
            SampleSet::from_samples(
                values
                    .iter()
                    .map(|&(v, label)| Sample::new(vec![v, v + 1.0], label))
                    .collect(),
            )
            .unwrap()
        };
        DataSplits {
            train: set(&[(0.0, 0), (5.0, 1)]),
            validation: set(&[(1.0, 1)]),
            test: set(&[(2.0, 0), (3.0, 1)]),
        }
    }

    fn conv_model() -> ModelFile {
        let params = ModelParams {
            n_kernels: 2,
            ..ModelParams::new(6, 3)
        };
        let network = get_model(ModelKind::Conv1d, &params, 0).unwrap();
        ModelFile::new(
            network,
            DataRange { min: 0.0, max: 10.0 },
            TrainingConfig::default(),
        )
        .with_score(0.875, 4)
    }

    #[test]
    fn test_model_file_round_trip() -> Result<()> {
        let model = conv_model();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("conv1d.json");
        model.save_to_file(&path)?;
        assert!(weights_path(&path).exists());

        let loaded = ModelFile::load_from_file(&path)?;
        assert_eq!(loaded.metadata, model.metadata);
        assert_eq!(loaded.metadata.best_val_acc, Some(0.875));
        assert_eq!(loaded.normalizer()?, MinMaxNormalize::new(0.0, 10.0)?);

        let x = [0.1, 0.4, 0.2, 0.9, 0.5, 0.3];
        assert_eq!(loaded.network.predict_proba(&x), model.network.predict_proba(&x));
        Ok(())
    }

    #[test]
    fn test_corrupt_model_files_are_rejected() -> Result<()> {
        let model = conv_model();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conv1d.json");
        model.save_to_file(&path)?;
        let header = fs::read_to_string(&path)?;

        // architecture too deep for the stored input size
        let deep = header.replace("\"n_layers\": 1", "\"n_layers\": 9");
        fs::write(&path, deep)?;
        assert!(matches!(
            ModelFile::load_from_file(&path),
            Err(HsiError::ParseError(_))
        ));

        // weights recorded for another width
        let wide = header.replace("\"n_kernels\": 2", "\"n_kernels\": 5");
        fs::write(&path, wide)?;
        assert!(matches!(
            ModelFile::load_from_file(&path),
            Err(HsiError::RecordError(_))
        ));

        // degenerate normalization
        let flat = header.replace("\"max\": 10.0", "\"max\": 0.0");
        fs::write(&path, flat)?;
        assert!(ModelFile::load_from_file(&path).is_err());

        // truncated JSON
        fs::write(&path, &header[..header.len() / 2])?;
        assert!(matches!(
            ModelFile::load_from_file(&path),
            Err(HsiError::SerializationError(_))
        ));

        // missing weights
        fs::write(&path, &header)?;
        fs::remove_file(weights_path(&path))?;
        assert!(ModelFile::load_from_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_dataset_archive_round_trip() -> Result<()> {
        let archive = DatasetArchive::new(splits(), 2, SplitStrategy::default(), 7)?;
        assert_eq!(archive.min, 0.0);
        assert_eq!(archive.max, 6.0);
        assert_eq!(archive.n_bands, 2);
        assert_eq!(archive.neighborhood_size, 1);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset.json");
        archive.save_to_file(&path)?;
        assert_eq!(DatasetArchive::load_from_file(&path)?, archive);
        Ok(())
    }

    #[test]
    fn test_neighbourhood_archive_dimensions() -> Result<()> {
        let set = SampleSet::from_samples(vec![
            Sample::new(vec![0.5; 18], 0),
            Sample::new(vec![1.5; 18], 1),
        ])?;
        let splits = DataSplits {
            train: set.clone(),
            validation: set.clone(),
            test: set,
        };
        let archive =
            DatasetArchive::with_neighborhood(splits.clone(), 2, 3, SplitStrategy::default(), 0)?;
        assert_eq!(archive.n_bands, 2);
        assert_eq!(archive.sample_dim(), 18);

        assert!(DatasetArchive::with_neighborhood(splits.clone(), 2, 4, SplitStrategy::default(), 0).is_err());
        assert!(DatasetArchive::with_neighborhood(splits, 2, 5, SplitStrategy::default(), 0).is_err());
        Ok(())
    }

    #[test]
    fn test_dataset_archive_rejects_bad_labels() -> Result<()> {
        let mut archive = DatasetArchive::new(splits(), 2, SplitStrategy::default(), 0)?;
        archive.n_classes = 1;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset.json");
        write_json(&archive, &path)?;
        assert!(matches!(
            DatasetArchive::load_from_file(&path),
            Err(HsiError::InvalidLabel { label: 1, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_corrupt_archives_are_rejected() -> Result<()> {
        let archive = DatasetArchive::new(splits(), 2, SplitStrategy::default(), 0)?;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dataset.json");
        archive.save_to_file(&path)?;
        let json = fs::read_to_string(&path)?;

        // a ragged spectrum inside a partition
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["splits"]["test"]["samples"][0]["spectrum"] = serde_json::json!([1.0]);
        fs::write(&path, value.to_string())?;
        assert!(matches!(
            DatasetArchive::load_from_file(&path),
            Err(HsiError::SerializationError(_))
        ));

        // declared bands disagree with the samples
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["n_bands"] = serde_json::json!(3);
        fs::write(&path, value.to_string())?;
        assert!(matches!(
            DatasetArchive::load_from_file(&path),
            Err(HsiError::InvalidDataset(_))
        ));

        // inverted range
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["min"] = serde_json::json!(9.0);
        fs::write(&path, value.to_string())?;
        assert!(DatasetArchive::load_from_file(&path).is_err());

        // even neighbourhood
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["neighborhood_size"] = serde_json::json!(2);
        fs::write(&path, value.to_string())?;
        assert!(DatasetArchive::load_from_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ModelFile::load_from_file("/nonexistent/model.json"),
            Err(HsiError::IoError(_))
        ));
    }
}
