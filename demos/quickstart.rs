//! Quickstart: classify a synthetic hyperspectral scene
//!
//! Builds a small scene with three spectrally distinct materials, splits the
//! labeled pixels, trains a dense network and a 3x3 neighbourhood
//! convolutional network, and prints their test metrics.
//!
//! Run with `cargo run --example quickstart`.

use hsikit::api::{quick, HsiClassifier};
use hsikit::core::{Classifier, Dataset};
use hsikit::data::{extract_labeled_patches, extract_labeled_samples, HyperspectralCube, ReferenceMap};
use hsikit::metrics::EvaluationMetrics;
use hsikit::model::ModelKind;
use hsikit::persistence::DatasetArchive;
use hsikit::split::{split, SplitStrategy};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;

const HEIGHT: usize = 16;
const WIDTH: usize = 16;
const BANDS: usize = 12;

/// Class code of a pixel: three vertical stripes with an unlabeled border
fn class_code(row: usize, col: usize) -> usize {
    if row == 0 || row == HEIGHT - 1 {
        0
    } else {
        col * 3 / WIDTH + 1
    }
}

/// Reflectance of a material in one band, with a little texture
fn reflectance(code: usize, row: usize, col: usize, band: usize) -> f64 {
    let texture = ((row * 7 + col * 5 + band * 3) % 11) as f64;
    let b = band as f64;
    match code {
        // vegetation: red edge
        1 => {
            let level = if band < BANDS / 2 { 200.0 } else { 1800.0 };
            level + texture
        }
        // soil: slowly rising
        2 => 600.0 + 60.0 * b + texture,
        // water: dark and falling
        _ => 500.0 - 35.0 * b + texture,
    }
}

fn synthetic_scene() -> Result<(HyperspectralCube, ReferenceMap), Box<dyn std::error::Error>> {
    let codes = Array2::from_shape_fn((HEIGHT, WIDTH), |(r, c)| class_code(r, c));
    let data = Array3::from_shape_fn((HEIGHT, WIDTH, BANDS), |(r, c, b)| {
        reflectance(class_code(r, c).max(1), r, c, b)
    });
    Ok((HyperspectralCube::new(data)?, ReferenceMap::new(codes)))
}

fn report(name: &str, metrics: &EvaluationMetrics) {
    println!("  {name}");
    println!("    Overall Accuracy: {:.4}", metrics.overall_accuracy);
    println!("    Average Accuracy: {:.4}", metrics.average_accuracy);
    println!("    Kappa:            {:.4}", metrics.kappa);
    println!("    Test samples:     {}", metrics.n_samples);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== hsikit quickstart ===");
    println!();

    let (cube, reference) = synthetic_scene()?;
    println!(
        "Scene: {}x{} pixels, {} bands, {} labeled pixels in {} classes",
        cube.height(),
        cube.width(),
        cube.bands(),
        reference.labeled_count(),
        reference.n_classes()
    );

    let strategy = SplitStrategy::Balanced {
        validation_fraction: 0.1,
        test_fraction: 0.3,
    };

    // Single pixel spectra
    let pixels = extract_labeled_samples(&cube, &reference)?;
    let archive = quick::prepare_set(&pixels, strategy, 7)?;
    println!(
        "Split: {} train, {} validation, {} test",
        archive.splits.train.len(),
        archive.splits.validation.len(),
        archive.splits.test.len()
    );
    println!();

    let dense = HsiClassifier::new(ModelKind::Dense)
        .with_n_kernels(16)
        .with_learning_rate(0.01)
        .with_batch_size(16)
        .with_epochs(40)
        .with_seed(7)
        .train(&archive)?;
    report("dense, single pixel", &dense.evaluate(&archive.splits.test)?);

    let first = archive.splits.test.get_sample(0);
    let prediction = dense.predict(&first.spectrum);
    println!(
        "    First test pixel: class {} predicted as {} (p = {:.3})",
        first.label + 1,
        prediction.label + 1,
        prediction.confidence
    );
    println!();

    // 3x3 neighbourhoods
    let patches = extract_labeled_patches(&cube, &reference, 3)?;
    let splits = split(&patches, &strategy, &mut StdRng::seed_from_u64(7))?;
    let archive = DatasetArchive::with_neighborhood(splits, patches.n_classes(), 3, strategy, 7)?;
    let conv = HsiClassifier::new(ModelKind::Conv1d)
        .with_n_kernels(8)
        .with_kernel_size(3)
        .with_learning_rate(0.01)
        .with_batch_size(16)
        .with_epochs(20)
        .with_seed(7)
        .train(&archive)?;
    report("conv1d, 3x3 neighbourhood", &conv.evaluate(&archive.splits.test)?);
    println!();
    println!("{}", conv.network().summary());

    Ok(())
}
