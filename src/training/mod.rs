//! Mini-batch training loop
//!
//! Each epoch shuffles the training set (optionally), takes one burn Adam
//! step per batch on the mean cross-entropy of the batch and then scores the
//! network on the training and validation sets. Two policies watch those scores:
//!
//! - checkpointing keeps the network with the highest validation accuracy
//!   and reports every improvement to a callback
//! - early stopping ends training once validation loss has not improved
//!   for `patience` consecutive epochs

use crate::core::{Dataset, HsiError, Result, SampleSet};
use crate::model::network::{input_tensor, target_tensor};
use crate::model::{Network, SpectralNet, TrainBackend};
use crate::split::batches;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Training hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub shuffle: bool,
    /// Epochs without validation-loss improvement before stopping
    pub patience: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.005,
            batch_size: 150,
            epochs: 10,
            shuffle: true,
            patience: 3,
            seed: 0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(HsiError::InvalidParameter(
                "batch size must be positive".to_string(),
            ));
        }
        if self.epochs == 0 {
            return Err(HsiError::InvalidParameter(
                "number of epochs must be positive".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(HsiError::InvalidParameter(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Scores recorded at the end of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
    /// Wall time of the epoch in seconds
    pub time: f64,
}

/// Per-epoch scores of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    /// Epoch (zero-based) whose network was kept
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Mean epoch wall time in seconds
    pub fn average_epoch_time(&self) -> f64 {
        if self.epochs.is_empty() {
            return 0.0;
        }
        self.epochs.iter().map(|e| e.time).sum::<f64>() / self.epochs.len() as f64
    }

    pub fn best(&self) -> Option<&EpochRecord> {
        self.best_epoch.and_then(|i| self.epochs.get(i))
    }

    /// Named metric columns, with the average epoch time as a single-value
    /// column
    pub fn columns(&self) -> Vec<(String, Vec<f64>)> {
        let column = |name: &str, f: fn(&EpochRecord) -> f64| {
            (name.to_string(), self.epochs.iter().map(f).collect())
        };
        vec![
            column("loss", |e| e.loss),
            column("acc", |e| e.acc),
            column("val_loss", |e| e.val_loss),
            column("val_acc", |e| e.val_acc),
            ("TimeHistory".to_string(), vec![self.average_epoch_time()]),
        ]
    }
}

/// Result of [`Trainer::fit`]
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Network from the epoch with the best validation accuracy
    pub best: Network,
    /// Network after the last completed epoch
    pub last: Network,
    pub history: TrainingHistory,
}

/// Runs the epoch loop for one network
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train without observing checkpoints
    pub fn fit(
        &self,
        network: Network,
        train: &SampleSet,
        validation: &SampleSet,
    ) -> Result<TrainingOutcome> {
        self.fit_with_checkpoint(network, train, validation, |_, _| Ok(()))
    }

    /// Train, calling `on_improvement` whenever validation accuracy beats
    /// every previous epoch
    pub fn fit_with_checkpoint<F>(
        &self,
        network: Network,
        train: &SampleSet,
        validation: &SampleSet,
        mut on_improvement: F,
    ) -> Result<TrainingOutcome>
    where
        F: FnMut(&Network, &EpochRecord) -> Result<()>,
    {
        if train.is_empty() {
            return Err(HsiError::EmptyDataset);
        }
        let n_classes = network.params().n_classes;
        for set in [train, validation] {
            if !set.is_empty() && set.dim() != network.input_features() {
                return Err(HsiError::DimensionMismatch {
                    expected: network.input_features(),
                    actual: set.dim(),
                });
            }
            if let Some(sample) = set.iter().find(|s| s.label >= n_classes) {
                return Err(HsiError::InvalidLabel {
                    label: sample.label,
                    n_classes,
                });
            }
        }
        let monitor_train = validation.is_empty();
        if monitor_train {
            warn!("Validation set is empty, monitoring training scores instead");
        }

        let device = Default::default();
        let shape = network.params().input_shape();
        let loss_fn = CrossEntropyLossConfig::new().init(&device);
        let mut optimizer = AdamConfig::new()
            .with_epsilon(1e-7)
            .init::<TrainBackend, SpectralNet<TrainBackend>>();
        let mut model = network.model().clone();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();

        let mut history = TrainingHistory::default();
        let mut best = network.clone();
        let mut best_acc = f64::NEG_INFINITY;
        let mut best_loss = f64::INFINITY;
        let mut wait = 0;

        info!(
            "Training {} model on {} samples ({} validation) for up to {} epochs",
            network.kind(),
            train.len(),
            validation.len(),
            self.config.epochs
        );

        for epoch in 0..self.config.epochs {
            let start = Instant::now();
            if self.config.shuffle {
                order.shuffle(&mut rng);
            }

            for range in batches(order.len(), self.config.batch_size) {
                let batch = &order[range];
                let rows: Vec<&[f64]> = batch
                    .iter()
                    .map(|&i| train.get_sample(i).spectrum.as_slice())
                    .collect();
                let labels: Vec<usize> = batch.iter().map(|&i| train.get_sample(i).label).collect();

                let logits = model.forward(input_tensor(&rows, shape, &device));
                let loss = loss_fn.forward(logits, target_tensor(&labels, &device));
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.config.learning_rate, model, grads);
            }

            let current = network.with_model(model.clone());
            let (loss, acc) = current.evaluate_loss(train)?;
            let (val_loss, val_acc) = if monitor_train {
                (loss, acc)
            } else {
                current.evaluate_loss(validation)?
            };
            let record = EpochRecord {
                epoch,
                loss,
                acc,
                val_loss,
                val_acc,
                time: start.elapsed().as_secs_f64(),
            };
            history.epochs.push(record);

            info!(
                "Epoch {}/{}: loss {:.4} - acc {:.4} - val_loss {:.4} - val_acc {:.4} ({:.2}s)",
                epoch + 1,
                self.config.epochs,
                loss,
                acc,
                val_loss,
                val_acc,
                record.time
            );

            if val_acc > best_acc {
                debug!("val_acc improved from {best_acc:.5} to {val_acc:.5}");
                best_acc = val_acc;
                best = current;
                history.best_epoch = Some(epoch);
                on_improvement(&best, &record)?;
            }

            if val_loss < best_loss {
                best_loss = val_loss;
                wait = 0;
            } else {
                wait += 1;
                if wait >= self.config.patience {
                    info!("Early stopping after epoch {}", epoch + 1);
                    history.stopped_early = true;
                    break;
                }
            }
        }

        Ok(TrainingOutcome {
            best,
            last: network.with_model(model),
            history,
        })
    }
}
