//! Integration tests for the CLI application
//!
//! These tests verify that the CLI commands work correctly with real data files.

use hsikit::data::{read_npy_file, write_npy_file};
use ndarray::{Array2, Array3};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const HEIGHT: usize = 8;
const WIDTH: usize = 9;
const BANDS: usize = 5;

/// Helper to create a synthetic scene on disk
struct TestScene {
    dir: TempDir,
    data: PathBuf,
    reference: PathBuf,
}

impl TestScene {
    fn new() -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        let mut cube = Vec::new();
        let mut reference = Vec::new();
        for row in 0..HEIGHT {
            for col in 0..WIDTH {
                let class = (row + col) % 3 + 1;
                for b in 0..BANDS {
                    let jitter = ((row * 5 + col + b) % 4) as f64;
                    let value = match class {
                        1 => 20.0 * b as f64,
                        2 => 100.0 - 20.0 * b as f64,
                        _ => 50.0,
                    };
                    cube.push(value + jitter);
                }
                reference.push(class as f64);
            }
        }

        let data = dir.path().join("scene.npy");
        let reference_path = dir.path().join("scene_gt.npy");
        write_npy_file(
            &data,
            &Array3::from_shape_vec((HEIGHT, WIDTH, BANDS), cube).unwrap(),
        )
        .unwrap();
        write_npy_file(
            &reference_path,
            &Array2::from_shape_vec((HEIGHT, WIDTH), reference).unwrap(),
        )
        .unwrap();

        Ok(Self {
            dir,
            data,
            reference: reference_path,
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hsikit"))
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "Command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Run `prepare` and return the archive path
fn prepare(scene: &TestScene) -> PathBuf {
    prepare_with(scene, "dataset.json", &[])
}

fn prepare_with(scene: &TestScene, name: &str, extra: &[&str]) -> PathBuf {
    let archive = scene.path(name);
    let mut args = vec![
        "prepare",
        "--data",
        arg(&scene.data),
        "--reference-map",
        arg(&scene.reference),
        "--output",
        arg(&archive),
        "--val-fraction",
        "0.2",
        "--test-fraction",
        "0.2",
        "--seed",
        "3",
    ];
    args.extend_from_slice(extra);
    assert_success(&run(&args));
    archive
}

/// Run `train` with a small dense model and return the destination directory
fn train(scene: &TestScene, archive: &Path) -> PathBuf {
    train_into(scene, archive, "models")
}

fn train_into(scene: &TestScene, archive: &Path, name: &str) -> PathBuf {
    let dest = scene.path(name);
    let output = run(&[
        "train",
        "--dataset",
        arg(archive),
        "--dest",
        arg(&dest),
        "--model-name",
        "dense",
        "--n-kernels",
        "8",
        "--epochs",
        "5",
        "--batch-size",
        "8",
        "--lr",
        "0.01",
    ]);
    assert_success(&output);
    dest
}

#[test]
fn test_cli_help() {
    let output = run(&["--help"]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["prepare", "train", "evaluate", "predict", "info", "experiment"] {
        assert!(stdout.contains(command), "help is missing {command}");
    }
}

#[test]
fn test_cli_prepare() {
    let scene = TestScene::new().unwrap();
    let archive = prepare(&scene);

    let content = fs::read_to_string(&archive).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["n_classes"], 3);
    assert_eq!(json["n_bands"], BANDS);
    assert_eq!(json["seed"], 3);
}

#[test]
fn test_cli_train_writes_outputs() {
    let scene = TestScene::new().unwrap();
    let archive = prepare(&scene);
    let dest = train(&scene, &archive);

    assert!(dest.join("dense.json").exists());

    let metrics = fs::read_to_string(dest.join("training_metrics.csv")).unwrap();
    let mut lines = metrics.lines();
    assert_eq!(
        lines.next(),
        Some("loss,acc,val_loss,val_acc,TimeHistory")
    );
    assert!(lines.count() >= 1);

    let min_max = fs::read_to_string(dest.join("min-max.csv")).unwrap();
    assert_eq!(min_max.lines().count(), 2);
}

#[test]
fn test_cli_evaluate() {
    let scene = TestScene::new().unwrap();
    let archive = prepare(&scene);
    let dest = train(&scene, &archive);
    let results = scene.path("results");

    let output = run(&[
        "evaluate",
        "--model",
        arg(&dest.join("dense.json")),
        "--dataset",
        arg(&archive),
        "--dest",
        arg(&results),
        "--detailed",
    ]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let acc_line = stdout
        .lines()
        .find(|l| l.starts_with("acc: "))
        .expect("missing accuracy line");
    let acc: f64 = acc_line["acc: ".len()..].trim().parse().unwrap();
    assert!((0.0..=1.0).contains(&acc));
    assert!(stdout.contains("Kappa"));

    let metrics = fs::read_to_string(results.join("inference_metrics.csv")).unwrap();
    assert!(metrics.starts_with("acc,avg_acc,kappa,inference_time,class_0"));
}

#[test]
fn test_cli_evaluate_with_noise() {
    let scene = TestScene::new().unwrap();
    let archive = prepare(&scene);
    let dest = train(&scene, &archive);

    let output = run(&[
        "evaluate",
        "--model",
        arg(&dest.join("dense.json")),
        "--dataset",
        arg(&archive),
        "--noise",
        "shot",
        "gaussian",
        "--noise-params",
        r#"{"pa": 0.5, "photons": 50}"#,
    ]);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("acc: "));

    let output = run(&[
        "evaluate",
        "--model",
        arg(&dest.join("dense.json")),
        "--dataset",
        arg(&archive),
        "--noise",
        "speckle",
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_predict_label_map() {
    let scene = TestScene::new().unwrap();
    let archive = prepare(&scene);
    let dest = train(&scene, &archive);
    let map_path = scene.path("prediction.npy");

    let output = run(&[
        "predict",
        "--model",
        arg(&dest.join("dense.json")),
        "--data",
        arg(&scene.data),
        "--output",
        arg(&map_path),
    ]);
    assert_success(&output);

    let map = read_npy_file(&map_path).unwrap();
    assert_eq!(map.shape(), &[HEIGHT, WIDTH]);
    assert!(map.iter().all(|&v| (1.0..=3.0).contains(&v)));

    // without an output file the class counts are printed
    let output = run(&[
        "predict",
        "--model",
        arg(&dest.join("dense.json")),
        "--data",
        arg(&scene.data),
    ]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let total: usize = stdout
        .lines()
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().nth(1)?.parse::<usize>().ok())
        .sum();
    assert_eq!(total, HEIGHT * WIDTH);
}

#[test]
fn test_cli_info() {
    let scene = TestScene::new().unwrap();
    let archive = prepare(&scene);
    let dest = train(&scene, &archive);

    let output = run(&["info", arg(&dest.join("dense.json"))]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("=== HSI Model Summary ==="));
    assert!(stdout.contains("Model Kind: dense"));
    assert!(stdout.contains("total parameters"));
}

#[test]
fn test_cli_experiment() {
    let scene = TestScene::new().unwrap();
    let dest = scene.path("experiment");

    let output = run(&[
        "experiment",
        "--data",
        arg(&scene.data),
        "--reference-map",
        arg(&scene.reference),
        "--dest",
        arg(&dest),
        "--runs",
        "2",
        "--seed",
        "10",
        "--model-name",
        "linear",
        "--epochs",
        "2",
        "--val-fraction",
        "0.2",
        "--test-fraction",
        "0.2",
    ]);
    assert_success(&output);

    let results = fs::read_to_string(dest.join("experiment_results.csv")).unwrap();
    let lines: Vec<&str> = results.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("run,seed,acc"));
    assert!(lines[1].starts_with("0,10,"));
    assert!(lines[2].starts_with("1,11,"));
    assert!(dest.join("run_0").join("model.json").exists());
    assert!(dest.join("run_1").join("inference_metrics.csv").exists());
}

#[test]
fn test_cli_error_handling() {
    let scene = TestScene::new().unwrap();

    // unsupported input format
    let bogus = scene.path("scene.tif");
    fs::write(&bogus, b"not an array").unwrap();
    let output = run(&[
        "prepare",
        "--data",
        arg(&bogus),
        "--reference-map",
        arg(&scene.reference),
        "--output",
        arg(&scene.path("dataset.json")),
    ]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));

    // missing model file
    let output = run(&["info", arg(&scene.path("missing.json"))]);
    assert!(!output.status.success());

    // fractions summing above one
    let output = run(&[
        "prepare",
        "--data",
        arg(&scene.data),
        "--reference-map",
        arg(&scene.reference),
        "--output",
        arg(&scene.path("dataset.json")),
        "--val-fraction",
        "0.6",
        "--test-fraction",
        "0.6",
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_neighborhood_pipeline() {
    let scene = TestScene::new().unwrap();
    let archive = prepare_with(
        &scene,
        "patches.json",
        &["--neighborhood-size", "3"],
    );

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&archive).unwrap()).unwrap();
    assert_eq!(json["n_bands"], BANDS);
    assert_eq!(json["neighborhood_size"], 3);
    let first = &json["splits"]["train"]["samples"][0]["spectrum"];
    assert_eq!(first.as_array().unwrap().len(), 9 * BANDS);

    let dest = train_into(&scene, &archive, "patch_models");
    let output = run(&["info", arg(&dest.join("dense.json"))]);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Neighborhood Size: 3"));

    let map_path = scene.path("patch_prediction.npy");
    let output = run(&[
        "predict",
        "--model",
        arg(&dest.join("dense.json")),
        "--data",
        arg(&scene.data),
        "--output",
        arg(&map_path),
    ]);
    assert_success(&output);
    assert_eq!(read_npy_file(&map_path).unwrap().shape(), &[HEIGHT, WIDTH]);

    // a single-pixel archive does not fit a 3x3 model
    let pixels = prepare(&scene);
    let output = run(&[
        "evaluate",
        "--model",
        arg(&dest.join("dense.json")),
        "--dataset",
        arg(&pixels),
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_evaluate_with_archive_range() {
    let scene = TestScene::new().unwrap();
    let archive = prepare(&scene);
    let dest = train(&scene, &archive);

    let output = run(&[
        "evaluate",
        "--model",
        arg(&dest.join("dense.json")),
        "--dataset",
        arg(&archive),
        "--archive-range",
    ]);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("acc: "));
}

#[test]
fn test_cli_experiment_seed_overflow() {
    let scene = TestScene::new().unwrap();
    let dest = scene.path("overflow");

    let output = run(&[
        "experiment",
        "--data",
        arg(&scene.data),
        "--reference-map",
        arg(&scene.reference),
        "--dest",
        arg(&dest),
        "--runs",
        "2",
        "--seed",
        "18446744073709551615",
        "--model-name",
        "linear",
        "--epochs",
        "1",
    ]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("exceeds the largest seed"));
}
