//! Classification scores and CSV reports

use crate::core::{Classifier, Dataset, HsiError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Counts of (actual, predicted) label pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    n_classes: usize,
    /// Row-major `counts[actual * n_classes + predicted]`
    counts: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Build from parallel label slices
    pub fn from_labels(actual: &[usize], predicted: &[usize], n_classes: usize) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(HsiError::DimensionMismatch {
                expected: actual.len(),
                actual: predicted.len(),
            });
        }
        let mut matrix = Self::new(n_classes);
        for (&a, &p) in actual.iter().zip(predicted) {
            matrix.add(a, p)?;
        }
        Ok(matrix)
    }

    pub fn add(&mut self, actual: usize, predicted: usize) -> Result<()> {
        for label in [actual, predicted] {
            if label >= self.n_classes {
                return Err(HsiError::InvalidLabel {
                    label,
                    n_classes: self.n_classes,
                });
            }
        }
        self.counts[actual * self.n_classes + predicted] += 1;
        Ok(())
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual * self.n_classes + predicted]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    fn correct(&self) -> usize {
        (0..self.n_classes).map(|c| self.get(c, c)).sum()
    }

    fn row_sum(&self, actual: usize) -> usize {
        (0..self.n_classes).map(|p| self.get(actual, p)).sum()
    }

    fn col_sum(&self, predicted: usize) -> usize {
        (0..self.n_classes).map(|a| self.get(a, predicted)).sum()
    }

    /// Fraction of correctly classified samples
    pub fn overall_accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f64 / total as f64,
        }
    }

    /// Recall of each class; `None` for classes absent from the data
    pub fn per_class_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.n_classes)
            .map(|c| match self.row_sum(c) {
                0 => None,
                n => Some(self.get(c, c) as f64 / n as f64),
            })
            .collect()
    }

    /// Mean of the per-class accuracies over the classes present
    pub fn average_accuracy(&self) -> f64 {
        let present: Vec<f64> = self.per_class_accuracy().into_iter().flatten().collect();
        if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        }
    }

    /// Cohen's kappa: agreement corrected for chance
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let observed = self.correct() as f64 / total;
        let expected = (0..self.n_classes)
            .map(|c| self.row_sum(c) as f64 * self.col_sum(c) as f64)
            .sum::<f64>()
            / (total * total);
        if (1.0 - expected).abs() < f64::EPSILON {
            // every sample in one class, predicted as that class
            return if observed >= 1.0 { 1.0 } else { 0.0 };
        }
        (observed - expected) / (1.0 - expected)
    }
}

/// Scores of a classifier on a labeled dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub overall_accuracy: f64,
    pub average_accuracy: f64,
    pub kappa: f64,
    pub per_class_accuracy: Vec<Option<f64>>,
    /// Seconds spent predicting the whole dataset
    pub inference_time: f64,
    pub n_samples: usize,
    pub confusion_matrix: ConfusionMatrix,
}

impl EvaluationMetrics {
    pub fn from_confusion(matrix: ConfusionMatrix, inference_time: f64) -> Self {
        Self {
            overall_accuracy: matrix.overall_accuracy(),
            average_accuracy: matrix.average_accuracy(),
            kappa: matrix.kappa(),
            per_class_accuracy: matrix.per_class_accuracy(),
            inference_time,
            n_samples: matrix.total(),
            confusion_matrix: matrix,
        }
    }

    /// Named metric columns for [`save_metrics`]; absent classes are NaN
    pub fn columns(&self) -> Vec<(String, Vec<f64>)> {
        let mut columns = vec![
            ("acc".to_string(), vec![self.overall_accuracy]),
            ("avg_acc".to_string(), vec![self.average_accuracy]),
            ("kappa".to_string(), vec![self.kappa]),
            ("inference_time".to_string(), vec![self.inference_time]),
        ];
        for (class, acc) in self.per_class_accuracy.iter().enumerate() {
            columns.push((format!("class_{class}"), vec![acc.unwrap_or(f64::NAN)]));
        }
        columns
    }
}

/// Predict every sample of `dataset` and score the predictions
pub fn evaluate<C: Classifier, D: Dataset>(classifier: &C, dataset: &D) -> Result<EvaluationMetrics> {
    if dataset.is_empty() {
        return Err(HsiError::EmptyDataset);
    }
    let start = Instant::now();
    let predictions = classifier.predict_batch(dataset);
    let inference_time = start.elapsed().as_secs_f64();

    let predicted: Vec<usize> = predictions.iter().map(|p| p.label).collect();
    let matrix =
        ConfusionMatrix::from_labels(&dataset.get_labels(), &predicted, classifier.n_classes())?;
    debug!(
        "Scored {} samples in {:.3}s",
        predicted.len(),
        inference_time
    );
    Ok(EvaluationMetrics::from_confusion(matrix, inference_time))
}

/// Write named metric columns as `dest/file_name` with a header row
///
/// Columns may differ in length only when a column holds a single value,
/// which is then repeated on every row.
pub fn save_metrics<P: AsRef<Path>>(
    dest: P,
    file_name: &str,
    metrics: &[(String, Vec<f64>)],
) -> Result<PathBuf> {
    let n_rows = metrics.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    for (name, values) in metrics {
        if values.len() != n_rows && values.len() != 1 {
            return Err(HsiError::InvalidParameter(format!(
                "metric '{name}' has {} values, expected {n_rows}",
                values.len()
            )));
        }
    }

    fs::create_dir_all(dest.as_ref())?;
    let path = dest.as_ref().join(file_name);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(metrics.iter().map(|(name, _)| name.as_str()))?;
    for row in 0..n_rows {
        writer.write_record(metrics.iter().map(|(_, values)| {
            let value = if values.len() == 1 { values[0] } else { values[row] };
            value.to_string()
        }))?;
    }
    writer.flush()?;
    Ok(path)
}

/// Append one comma-joined row to a CSV file, creating it when absent
///
/// A path with another extension is redirected to the same name with
/// `.csv`.
pub fn save_to_csv<P: AsRef<Path>, T: ToString>(path: P, values: &[T]) -> Result<PathBuf> {
    let path = path.as_ref();
    let path = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => path.to_path_buf(),
        _ => path.with_extension("csv"),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(file);
    writer.write_record(values.iter().map(|v| v.to_string()))?;
    writer.flush()?;
    Ok(path)
}

/// Write `dest/min-max.csv`: the minimum and the maximum on separate lines
pub fn save_min_max<P: AsRef<Path>>(dest: P, min: f64, max: f64) -> Result<PathBuf> {
    fs::create_dir_all(dest.as_ref())?;
    let path = dest.as_ref().join("min-max.csv");
    fs::write(&path, format!("{min:.6}\n{max:.6}\n"))?;
    Ok(path)
}
