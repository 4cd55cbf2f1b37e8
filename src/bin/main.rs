//! hsikit Command Line Interface
//!
//! Prepares train/validation/test archives from hyperspectral scenes, trains
//! and evaluates spectral classifiers, classifies whole scenes and runs
//! repeated experiments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use hsikit::api::{quick, HsiClassifier, TrainedModel};
use hsikit::core::{Classifier, HsiError, Result};
use hsikit::data::{cube_patches, load_array, write_npy_file, HyperspectralCube};
use hsikit::metrics::{save_metrics, save_min_max, save_to_csv, EvaluationMetrics};
use hsikit::model::ModelKind;
use hsikit::persistence::{DatasetArchive, ModelFile};
use hsikit::split::{SplitSize, SplitStrategy};
use hsikit::training::TrainingConfig;
use hsikit::transforms::{noise_transforms, NoiseTarget};
use log::{error, info, warn};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "hsikit")]
#[command(about = "Hyperspectral image classification toolkit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "hsikit contributors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Split the labeled pixels of a scene into a dataset archive
    Prepare(PrepareArgs),
    /// Train a model on a prepared dataset archive
    Train(TrainArgs),
    /// Evaluate a trained model on the test partition of an archive
    Evaluate(EvaluateArgs),
    /// Classify every pixel of a scene
    Predict(PredictArgs),
    /// Display model information
    Info(InfoArgs),
    /// Repeat prepare, train and evaluate over consecutive seeds
    Experiment(ExperimentArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliSplitStrategy {
    /// Equal per-class counts derived from the smallest class
    #[value(name = "balanced")]
    Balanced,
    /// Per-class training quota, everything else to test
    #[value(name = "stratified")]
    Stratified,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliModelKind {
    /// Softmax regression on the raw spectrum
    #[value(name = "linear")]
    Linear,
    /// Fully connected hidden layers
    #[value(name = "dense")]
    Dense,
    /// 1-D convolution blocks
    #[value(name = "conv1d")]
    Conv1d,
}

impl From<CliModelKind> for ModelKind {
    fn from(cli_kind: CliModelKind) -> Self {
        match cli_kind {
            CliModelKind::Linear => ModelKind::Linear,
            CliModelKind::Dense => ModelKind::Dense,
            CliModelKind::Conv1d => ModelKind::Conv1d,
        }
    }
}

#[derive(Args, Clone)]
struct SplitArgs {
    /// Partitioning strategy
    #[arg(long, default_value = "balanced")]
    strategy: CliSplitStrategy,

    /// Validation fraction (balanced: of the smallest class; stratified: of
    /// the training draw)
    #[arg(long, default_value = "0.1")]
    val_fraction: f64,

    /// Test fraction of the smallest class (balanced only)
    #[arg(long, default_value = "0.1")]
    test_fraction: f64,

    /// Training fraction of each class (stratified only)
    #[arg(long, default_value = "0.8")]
    train_size: f64,

    /// Fixed number of training samples per class (stratified only)
    #[arg(long)]
    per_class: Option<usize>,

    /// Side of the odd square pixel window taken around each labeled pixel
    #[arg(long, default_value = "1")]
    neighborhood_size: usize,
}

impl SplitArgs {
    fn strategy(&self) -> SplitStrategy {
        match self.strategy {
            CliSplitStrategy::Balanced => SplitStrategy::Balanced {
                validation_fraction: self.val_fraction,
                test_fraction: self.test_fraction,
            },
            CliSplitStrategy::Stratified => SplitStrategy::Stratified {
                train_size: match self.per_class {
                    Some(n) => SplitSize::PerClass(n),
                    None => SplitSize::Fraction(self.train_size),
                },
                validation_fraction: self.val_fraction,
            },
        }
    }
}

#[derive(Args, Clone)]
struct ModelArgs {
    /// Model architecture
    #[arg(long, default_value = "conv1d")]
    model_name: CliModelKind,

    /// Convolution kernel length
    #[arg(long, default_value = "3")]
    kernel_size: usize,

    /// Kernels per convolution, or units per hidden dense layer
    #[arg(long, default_value = "16")]
    n_kernels: usize,

    /// Number of hidden blocks
    #[arg(long, default_value = "1")]
    n_layers: usize,

    /// Learning rate
    #[arg(long, default_value = "0.005")]
    lr: f64,

    /// Samples per gradient step
    #[arg(long, default_value = "150")]
    batch_size: usize,

    /// Maximum number of epochs
    #[arg(long, default_value = "10")]
    epochs: usize,

    /// Keep the training order fixed across epochs
    #[arg(long)]
    no_shuffle: bool,

    /// Epochs without validation-loss improvement before stopping
    #[arg(long, default_value = "3")]
    patience: usize,
}

impl ModelArgs {
    fn classifier(&self, seed: u64) -> HsiClassifier {
        HsiClassifier::new(self.model_name.into())
            .with_kernel_size(self.kernel_size)
            .with_n_kernels(self.n_kernels)
            .with_n_layers(self.n_layers)
            .with_config(TrainingConfig {
                learning_rate: self.lr,
                batch_size: self.batch_size,
                epochs: self.epochs,
                shuffle: !self.no_shuffle,
                patience: self.patience,
                seed,
            })
    }
}

#[derive(Args, Clone)]
struct NoiseArgs {
    /// Noise injection methods applied after normalization
    /// (gaussian, impulsive, shot)
    #[arg(long, num_args = 1..)]
    noise: Vec<String>,

    /// Partitions receiving the noise (train, val, test)
    #[arg(long, num_args = 1..)]
    noise_sets: Vec<String>,

    /// JSON with noise parameters, e.g. '{"mean": 0, "std": 1, "pa": 0.1}'
    #[arg(long)]
    noise_params: Option<String>,
}

impl NoiseArgs {
    fn targets(&self) -> Result<Vec<NoiseTarget>> {
        self.noise_sets.iter().map(|s| s.parse()).collect()
    }

    fn classifier(&self, classifier: HsiClassifier) -> Result<HsiClassifier> {
        if self.noise.is_empty() {
            return Ok(classifier);
        }
        let targets = self.targets()?;
        if targets.is_empty() {
            warn!("Noise methods given without --noise-sets, no partition is affected");
        }
        let noise = noise_transforms(&self.noise, self.noise_params.as_deref())?;
        Ok(classifier.with_noise(noise, &targets))
    }
}

#[derive(Args)]
struct PrepareArgs {
    /// Hyperspectral cube (.npy or .mat, height x width x bands)
    #[arg(long)]
    data: PathBuf,

    /// Reference map (.npy or .mat, height x width, 0 = unlabeled)
    #[arg(long)]
    reference_map: PathBuf,

    /// Output dataset archive (.json)
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    split: SplitArgs,

    /// Seed for the random draws
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset archive produced by `prepare`
    #[arg(long)]
    dataset: PathBuf,

    /// Output directory for the model and metric files
    #[arg(long)]
    dest: PathBuf,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    noise: NoiseArgs,

    /// Seed for initialization, shuffling and noise
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Dataset archive holding the test partition
    #[arg(long)]
    dataset: PathBuf,

    /// Directory for inference_metrics.csv
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Noise injection methods applied to the test partition
    #[arg(long, num_args = 1..)]
    noise: Vec<String>,

    /// JSON with noise parameters
    #[arg(long)]
    noise_params: Option<String>,

    /// Seed for the noise
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Normalize with the archive's training range instead of the range
    /// stored with the model
    #[arg(long)]
    archive_range: bool,

    /// Show detailed metrics
    #[arg(long)]
    detailed: bool,
}

#[derive(Args)]
struct PredictArgs {
    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Hyperspectral cube to classify
    #[arg(long)]
    data: PathBuf,

    /// Output label map (.npy, one-based classes); prints class counts if
    /// not specified
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct InfoArgs {
    /// Model file
    model: PathBuf,
}

#[derive(Args)]
struct ExperimentArgs {
    /// Hyperspectral cube
    #[arg(long)]
    data: PathBuf,

    /// Reference map
    #[arg(long)]
    reference_map: PathBuf,

    /// Output directory
    #[arg(long)]
    dest: PathBuf,

    /// Number of runs
    #[arg(long, default_value = "1")]
    runs: u64,

    /// Seed of the first run; run i uses seed + i
    #[arg(long, default_value = "0")]
    seed: u64,

    #[command(flatten)]
    split: SplitArgs,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    noise: NoiseArgs,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Prepare(args) => prepare_command(args),
        Commands::Train(args) => train_command(args),
        Commands::Evaluate(args) => evaluate_command(args),
        Commands::Predict(args) => predict_command(args),
        Commands::Info(args) => info_command(args),
        Commands::Experiment(args) => experiment_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn prepare_command(args: PrepareArgs) -> Result<()> {
    info!("Data file: {:?}", args.data);
    info!("Reference map: {:?}", args.reference_map);

    let strategy = args.split.strategy();
    let archive = quick::prepare_with_neighborhood(
        &args.data,
        &args.reference_map,
        args.split.neighborhood_size,
        strategy,
        args.seed,
    )?;
    archive.save_to_file(&args.output)?;

    println!("=== Dataset Archive ===");
    println!("Output: {:?}", args.output);
    println!("Strategy: {strategy:?}");
    println!("Seed: {}", args.seed);
    println!("Bands: {}", archive.n_bands);
    println!("Neighborhood: {0}x{0}", archive.neighborhood_size);
    println!("Classes: {}", archive.n_classes);
    println!("Training range: [{:.6}, {:.6}]", archive.min, archive.max);
    for (name, set) in [
        ("train", &archive.splits.train),
        ("validation", &archive.splits.validation),
        ("test", &archive.splits.test),
    ] {
        println!(
            "  {name:<10} {:>7} samples, per class {:?}",
            set.samples().len(),
            set.class_counts()
        );
    }
    if let Some(ratio) = archive.splits.train.imbalance_ratio() {
        if ratio > 1.0 {
            warn!("Training partition is imbalanced (largest/smallest class = {ratio:.2})");
        }
    }

    Ok(())
}

fn load_archive(path: &Path) -> Result<DatasetArchive> {
    info!("Loading dataset archive from: {path:?}");
    let archive = DatasetArchive::load_from_file(path)?;
    info!(
        "Archive: {} bands, {} classes, {} train / {} validation / {} test samples",
        archive.n_bands,
        archive.n_classes,
        archive.splits.train.samples().len(),
        archive.splits.validation.samples().len(),
        archive.splits.test.samples().len()
    );
    Ok(archive)
}

fn train_command(args: TrainArgs) -> Result<()> {
    let archive = load_archive(&args.dataset)?;
    let kind: ModelKind = args.model.model_name.into();
    let model_path = args.dest.join(format!("{kind}.json"));

    let classifier = args
        .noise
        .classifier(args.model.classifier(args.seed))?
        .with_checkpoint(&model_path);
    let model = classifier.train(&archive)?;

    let history = model.history();
    let metrics_path = save_metrics(&args.dest, "training_metrics.csv", &history.columns())?;
    save_min_max(&args.dest, archive.min, archive.max)?;

    info!("Training completed in {} epochs", history.len());
    println!("=== Training Results ===");
    println!("Model saved to: {model_path:?}");
    println!("Metrics saved to: {metrics_path:?}");
    if let Some(best) = history.best() {
        println!(
            "Best epoch: {} (val_loss {:.4}, val_acc {:.4})",
            best.epoch + 1,
            best.val_loss,
            best.val_acc
        );
    }
    if history.stopped_early {
        println!("Stopped early after {} epochs", history.len());
    }
    println!("Average epoch time: {:.3}s", history.average_epoch_time());

    Ok(())
}

fn print_metrics(metrics: &EvaluationMetrics) {
    println!("  Overall Accuracy: {:.4}", metrics.overall_accuracy);
    println!("  Average Accuracy: {:.4}", metrics.average_accuracy);
    println!("  Kappa:            {:.4}", metrics.kappa);
    println!("  Inference Time:   {:.4}s", metrics.inference_time);
    println!("  Per-class Accuracy:");
    for (class, acc) in metrics.per_class_accuracy.iter().enumerate() {
        match acc {
            Some(acc) => println!("    {:>3}: {acc:.4}", class + 1),
            None => println!("    {:>3}: -", class + 1),
        }
    }
}

fn evaluate_command(args: EvaluateArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let model = TrainedModel::load(&args.model)?;
    let archive = load_archive(&args.dataset)?;

    if archive.sample_dim() != model.network().input_features() {
        return Err(HsiError::DimensionMismatch {
            expected: model.network().input_features(),
            actual: archive.sample_dim(),
        });
    }
    let model = if args.archive_range {
        info!(
            "Normalizing with the archive range [{}, {}]",
            archive.min, archive.max
        );
        model.with_normalization(archive.range())?
    } else {
        model
    };
    if archive.range() != model.normalization() {
        warn!(
            "Model was trained with range [{}, {}], archive range is [{}, {}]; using the model's",
            model.normalization().min,
            model.normalization().max,
            archive.min,
            archive.max
        );
    }

    let noise = noise_transforms(&args.noise, args.noise_params.as_deref())?;
    let metrics = model.evaluate_with_noise(&archive.splits.test, &noise, args.seed)?;

    println!("acc: {}", metrics.overall_accuracy);
    if args.detailed {
        println!("\nDetailed Metrics:");
        print_metrics(&metrics);
    }

    if let Some(dest) = &args.dest {
        let path = save_metrics(dest, "inference_metrics.csv", &metrics.columns())?;
        info!("Metrics saved to: {path:?}");
    }

    Ok(())
}

fn predict_command(args: PredictArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let model = TrainedModel::load(&args.model)?;

    info!("Loading scene from: {:?}", args.data);
    let cube = HyperspectralCube::from_array(load_array(&args.data)?)?;
    if cube.bands() != model.network().input_size() {
        return Err(HsiError::DimensionMismatch {
            expected: model.network().input_size(),
            actual: cube.bands(),
        });
    }

    let neighborhood_size = model.network().params().neighborhood_size;
    info!(
        "Classifying {} pixels with a {} model ({neighborhood_size}x{neighborhood_size} windows)",
        cube.height() * cube.width(),
        model.network().kind()
    );
    let labels: Vec<usize> = model
        .predict_rows(&cube_patches(&cube, neighborhood_size)?)?
        .iter()
        .map(|prediction| prediction.label)
        .collect();

    if let Some(output_path) = args.output {
        let map = Array2::from_shape_vec(
            (cube.height(), cube.width()),
            labels.iter().map(|&l| (l + 1) as f64).collect(),
        )?;
        write_npy_file(&output_path, &map)?;
        info!("Label map saved to: {output_path:?}");
    } else {
        let mut counts = vec![0usize; model.n_classes()];
        for &label in &labels {
            counts[label] += 1;
        }
        println!("# Predicted pixels per class for {} pixels", labels.len());
        println!("# Format: class count");
        for (class, count) in counts.iter().enumerate() {
            println!("{} {}", class + 1, count);
        }
    }

    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let model = ModelFile::load_from_file(&args.model)?;
    model.print_summary();
    Ok(())
}

fn experiment_command(args: ExperimentArgs) -> Result<()> {
    if args.runs == 0 {
        return Err(HsiError::InvalidParameter(
            "number of runs must be positive".to_string(),
        ));
    }
    let results_path = args.dest.join("experiment_results.csv");
    if !results_path.exists() {
        save_to_csv(
            &results_path,
            &[
                "run",
                "seed",
                "acc",
                "avg_acc",
                "kappa",
                "inference_time",
                "epochs",
                "avg_epoch_time",
            ],
        )?;
    }

    let strategy = args.split.strategy();
    let mut accuracies = Vec::new();
    for run in 0..args.runs {
        let seed = args.seed.checked_add(run).ok_or_else(|| {
            HsiError::InvalidParameter(format!(
                "seed {} plus run {run} exceeds the largest seed",
                args.seed
            ))
        })?;
        let run_dir = args.dest.join(format!("run_{run}"));
        info!("Run {}/{} with seed {seed}", run + 1, args.runs);

        let archive = quick::prepare_with_neighborhood(
            &args.data,
            &args.reference_map,
            args.split.neighborhood_size,
            strategy,
            seed,
        )?;
        let classifier = args
            .noise
            .classifier(args.model.classifier(seed))?
            .with_checkpoint(run_dir.join("model.json"));
        let model = classifier.train(&archive)?;
        save_metrics(&run_dir, "training_metrics.csv", &model.history().columns())?;

        let test_noise = if args.noise.targets()?.contains(&NoiseTarget::Test) {
            noise_transforms(&args.noise.noise, args.noise.noise_params.as_deref())?
        } else {
            Vec::new()
        };
        let metrics = model.evaluate_with_noise(&archive.splits.test, &test_noise, seed)?;
        save_metrics(&run_dir, "inference_metrics.csv", &metrics.columns())?;

        save_to_csv(
            &results_path,
            &[
                run as f64,
                seed as f64,
                metrics.overall_accuracy,
                metrics.average_accuracy,
                metrics.kappa,
                metrics.inference_time,
                model.history().len() as f64,
                model.history().average_epoch_time(),
            ],
        )?;
        println!("run {run}: acc: {}", metrics.overall_accuracy);
        accuracies.push(metrics.overall_accuracy);
    }

    let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    let std = (accuracies.iter().map(|a| (a - mean).powi(2)).sum::<f64>()
        / accuracies.len() as f64)
        .sqrt();
    println!("=== Experiment Results ===");
    println!("Runs: {}", args.runs);
    println!("Mean accuracy: {mean:.4} (std {std:.4})");
    println!("Results saved to: {results_path:?}");

    Ok(())
}
