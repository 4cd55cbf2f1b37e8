//! Class-aware train/validation/test partitioning
//!
//! Two strategies are provided:
//!
//! - [`SplitStrategy::Balanced`]: every class contributes the same number of
//!   samples to each partition, derived from the smallest class population.
//!   Samples beyond the quotas are left out.
//! - [`SplitStrategy::Stratified`]: each class contributes a fraction of its
//!   own population (or a fixed count) to training, a share of that to
//!   validation, and everything else to test.
//!
//! All draws are uniform without replacement, so the partitions never share
//! a sample.

use crate::core::{Dataset, HsiError, Result, SampleSet};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Per-class training quota for stratified splits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitSize {
    /// Fraction of each class population, in (0, 1]
    Fraction(f64),
    /// Fixed number of samples per class, capped at the class population
    PerClass(usize),
}

/// Partitioning strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SplitStrategy {
    Balanced {
        validation_fraction: f64,
        test_fraction: f64,
    },
    Stratified {
        train_size: SplitSize,
        /// Fraction of the training draw moved to validation
        validation_fraction: f64,
    },
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self::Balanced {
            validation_fraction: 0.1,
            test_fraction: 0.1,
        }
    }
}

impl SplitStrategy {
    /// Check that fractions are in range
    pub fn validate(&self) -> Result<()> {
        match *self {
            SplitStrategy::Balanced {
                validation_fraction,
                test_fraction,
            } => {
                check_fraction("validation fraction", validation_fraction)?;
                check_fraction("test fraction", test_fraction)?;
                // absorbs rounding in sums such as 0.1 + 0.9
                if validation_fraction + test_fraction > 1.0 + 1e-9 {
                    return Err(HsiError::InvalidParameter(format!(
                        "validation ({validation_fraction}) and test ({test_fraction}) fractions must sum to at most 1"
                    )));
                }
            }
            SplitStrategy::Stratified {
                train_size,
                validation_fraction,
            } => {
                check_fraction("validation fraction", validation_fraction)?;
                match train_size {
                    SplitSize::Fraction(f) if !(f > 0.0 && f <= 1.0) => {
                        return Err(HsiError::InvalidParameter(format!(
                            "training fraction must be in (0, 1], got {f}"
                        )));
                    }
                    SplitSize::PerClass(0) => {
                        return Err(HsiError::InvalidParameter(
                            "training samples per class must be positive".to_string(),
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(HsiError::InvalidParameter(format!(
            "{name} must be between 0 and 1, got {value}"
        )));
    }
    Ok(())
}

/// Source indices of each partition, already shuffled
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

/// Train, validation and test sample sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSplits {
    pub train: SampleSet,
    pub validation: SampleSet,
    pub test: SampleSet,
}

/// Indices of the samples of each class, in dataset order
///
/// The result has one entry per class `0..=max_label`.
pub fn group_by_class(set: &SampleSet) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); set.n_classes()];
    for (i, sample) in set.iter().enumerate() {
        groups[sample.label].push(i);
    }
    groups
}

/// Draw `count` pool entries uniformly without replacement, removing them
/// from the pool while keeping the rest in order
fn draw(pool: &mut Vec<usize>, count: usize, rng: &mut StdRng) -> Vec<usize> {
    let count = count.min(pool.len());
    let positions = index::sample(rng, pool.len(), count).into_vec();

    let mut taken = vec![false; pool.len()];
    let drawn = positions
        .iter()
        .map(|&p| {
            taken[p] = true;
            pool[p]
        })
        .collect();

    let mut position = 0;
    pool.retain(|_| {
        let keep = !taken[position];
        position += 1;
        keep
    });
    drawn
}

/// Compute the partition indices for a sample set
pub fn split_indices(
    set: &SampleSet,
    strategy: &SplitStrategy,
    rng: &mut StdRng,
) -> Result<SplitIndices> {
    strategy.validate()?;
    if set.is_empty() {
        return Err(HsiError::EmptyDataset);
    }

    let mut groups = group_by_class(set);
    if let Some(empty) = groups.iter().position(Vec::is_empty) {
        return Err(HsiError::InvalidDataset(format!(
            "class {empty} has no samples; labels must be contiguous"
        )));
    }

    let mut indices = SplitIndices::default();
    match *strategy {
        SplitStrategy::Balanced {
            validation_fraction,
            test_fraction,
        } => {
            let lowest = groups.iter().map(Vec::len).min().unwrap_or(0);
            let test_size = (lowest as f64 * test_fraction) as usize;
            let validation_size = (lowest as f64 * validation_fraction) as usize;
            let train_size = (lowest as f64 * (1.0 - (test_fraction + validation_fraction))) as usize;

            info!(
                "Balanced split: lowest class population {lowest}, per-class sizes train={train_size} val={validation_size} test={test_size}"
            );
            if train_size == 0 {
                warn!("Smallest class is too small to contribute training samples");
            }

            for pool in &mut groups {
                indices.test.extend(draw(pool, test_size, rng));
            }
            for pool in &mut groups {
                indices.validation.extend(draw(pool, validation_size, rng));
            }
            for pool in &mut groups {
                indices.train.extend(draw(pool, train_size, rng));
            }
        }
        SplitStrategy::Stratified {
            train_size,
            validation_fraction,
        } => {
            for (class, pool) in groups.iter_mut().enumerate() {
                let quota = match train_size {
                    SplitSize::Fraction(f) => (pool.len() as f64 * f) as usize,
                    SplitSize::PerClass(n) => n.min(pool.len()),
                };
                let mut train = draw(pool, quota, rng);
                let validation_size = (quota as f64 * validation_fraction) as usize;
                let validation = draw(&mut train, validation_size, rng);

                debug!(
                    "Class {class}: train={} val={} test={}",
                    train.len(),
                    validation.len(),
                    pool.len()
                );

                indices.train.extend(train);
                indices.validation.extend(validation);
                indices.test.append(pool);
            }
        }
    }

    indices.train.shuffle(rng);
    indices.validation.shuffle(rng);
    indices.test.shuffle(rng);

    Ok(indices)
}

/// Split a sample set into shuffled train, validation and test sets
pub fn split(set: &SampleSet, strategy: &SplitStrategy, rng: &mut StdRng) -> Result<DataSplits> {
    let indices = split_indices(set, strategy, rng)?;

    let gather = |picked: &[usize]| -> Result<SampleSet> {
        let mut subset = SampleSet::new(set.dim());
        for &i in picked {
            subset.push(set.get_sample(i).clone())?;
        }
        Ok(subset)
    };

    let splits = DataSplits {
        train: gather(&indices.train)?,
        validation: gather(&indices.validation)?,
        test: gather(&indices.test)?,
    };

    info!(
        "Split {} samples into train={} val={} test={}",
        set.len(),
        splits.train.len(),
        splits.validation.len(),
        splits.test.len()
    );
    Ok(splits)
}

/// Contiguous index ranges of at most `batch_size` covering `0..len`
///
/// # Panics
/// Panics if `batch_size` is zero
pub fn batches(len: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    assert!(batch_size > 0, "batch size must be positive");
    (0..len)
        .step_by(batch_size)
        .map(move |start| start..(start + batch_size).min(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Sample;
    use rand::SeedableRng;
    use std::collections::HashSet;

    /// Classes with populations `counts`; each spectrum encodes its index
    fn dataset(counts: &[usize]) -> SampleSet {
        let mut samples = Vec::new();
        for (label, &count) in counts.iter().enumerate() {
            for _ in 0..count {
                let id = samples.len() as f64;
                samples.push(Sample::new(vec![id, label as f64], label));
            }
        }
        SampleSet::from_samples(samples).unwrap()
    }

    fn per_class(set: &SampleSet, picked: &[usize], n_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; n_classes];
        for &i in picked {
            counts[set.get_sample(i).label] += 1;
        }
        counts
    }

    fn assert_disjoint(indices: &SplitIndices) {
        let mut seen = HashSet::new();
        for &i in indices
            .train
            .iter()
            .chain(&indices.validation)
            .chain(&indices.test)
        {
            assert!(seen.insert(i), "index {i} appears in two partitions");
        }
    }

    #[test]
    fn test_balanced_split_quotas() {
        let set = dataset(&[20, 50, 35]);
        let mut rng = StdRng::seed_from_u64(0);
        let strategy = SplitStrategy::Balanced {
            validation_fraction: 0.1,
            test_fraction: 0.2,
        };

        let indices = split_indices(&set, &strategy, &mut rng).unwrap();
        assert_disjoint(&indices);

        // lowest population 20: test 4, val 2, train floor(20 * (1 - 0.3))
        let train_expected = (20.0 * (1.0 - (0.2 + 0.1))) as usize;
        assert_eq!(per_class(&set, &indices.test, 3), vec![4; 3]);
        assert_eq!(per_class(&set, &indices.validation, 3), vec![2; 3]);
        assert_eq!(per_class(&set, &indices.train, 3), vec![train_expected; 3]);

        for class in 0..3 {
            let used = per_class(&set, &indices.test, 3)[class]
                + per_class(&set, &indices.validation, 3)[class]
                + per_class(&set, &indices.train, 3)[class];
            assert!(used <= set.class_counts()[class]);
        }
    }

    #[test]
    fn test_stratified_split_uses_every_sample() {
        let set = dataset(&[10, 40, 25]);
        let mut rng = StdRng::seed_from_u64(7);
        let strategy = SplitStrategy::Stratified {
            train_size: SplitSize::Fraction(0.5),
            validation_fraction: 0.2,
        };

        let indices = split_indices(&set, &strategy, &mut rng).unwrap();
        assert_disjoint(&indices);

        let train = per_class(&set, &indices.train, 3);
        let validation = per_class(&set, &indices.validation, 3);
        let test = per_class(&set, &indices.test, 3);
        assert_eq!(train, vec![4, 16, 10]);
        assert_eq!(validation, vec![1, 4, 2]);
        assert_eq!(test, vec![5, 20, 13]);

        for class in 0..3 {
            assert_eq!(
                train[class] + validation[class] + test[class],
                set.class_counts()[class]
            );
        }
    }

    #[test]
    fn test_stratified_per_class_count_is_capped() {
        let set = dataset(&[3, 12]);
        let mut rng = StdRng::seed_from_u64(1);
        let strategy = SplitStrategy::Stratified {
            train_size: SplitSize::PerClass(5),
            validation_fraction: 0.0,
        };

        let indices = split_indices(&set, &strategy, &mut rng).unwrap();
        assert_eq!(per_class(&set, &indices.train, 2), vec![3, 5]);
        assert_eq!(per_class(&set, &indices.test, 2), vec![0, 7]);
        assert!(indices.validation.is_empty());
    }

    #[test]
    fn test_split_is_reproducible() {
        let set = dataset(&[15, 15]);
        let strategy = SplitStrategy::default();

        let a = split(&set, &strategy, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = split(&set, &strategy, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);

        let c = split(&set, &strategy, &mut StdRng::seed_from_u64(43)).unwrap();
        assert_ne!(a.train, c.train);
    }

    #[test]
    fn test_split_sets_carry_samples() {
        let set = dataset(&[10, 10]);
        let mut rng = StdRng::seed_from_u64(3);
        let splits = split(&set, &SplitStrategy::default(), &mut rng).unwrap();

        assert_eq!(splits.test.len(), 2);
        assert_eq!(splits.validation.len(), 2);
        assert_eq!(splits.train.len(), 16);
        assert_eq!(splits.train.dim(), 2);
        for sample in splits.train.iter() {
            assert_eq!(sample.spectrum[1] as usize, sample.label);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let set = dataset(&[10, 10]);
        let mut rng = StdRng::seed_from_u64(0);

        let too_large = SplitStrategy::Balanced {
            validation_fraction: 0.6,
            test_fraction: 0.5,
        };
        assert!(matches!(
            split_indices(&set, &too_large, &mut rng),
            Err(HsiError::InvalidParameter(_))
        ));

        let negative = SplitStrategy::Balanced {
            validation_fraction: -0.1,
            test_fraction: 0.1,
        };
        assert!(split_indices(&set, &negative, &mut rng).is_err());

        let zero_train = SplitStrategy::Stratified {
            train_size: SplitSize::Fraction(0.0),
            validation_fraction: 0.1,
        };
        assert!(split_indices(&set, &zero_train, &mut rng).is_err());
    }

    #[test]
    fn test_fractions_summing_to_one_are_accepted() {
        let set = dataset(&[10, 10]);
        let mut rng = StdRng::seed_from_u64(0);

        for (validation_fraction, test_fraction) in [(0.5, 0.5), (0.3, 0.7), (0.1, 0.9), (1.0, 0.0)] {
            let strategy = SplitStrategy::Balanced {
                validation_fraction,
                test_fraction,
            };
            assert!(strategy.validate().is_ok(), "{validation_fraction} + {test_fraction}");
        }

        let indices = split_indices(
            &set,
            &SplitStrategy::Balanced {
                validation_fraction: 0.5,
                test_fraction: 0.5,
            },
            &mut rng,
        )
        .unwrap();
        assert!(indices.train.is_empty());
        assert_eq!(indices.validation.len(), 10);
        assert_eq!(indices.test.len(), 10);
    }

    #[test]
    fn test_stratified_full_validation_fraction() {
        let set = dataset(&[10, 10]);
        let mut rng = StdRng::seed_from_u64(4);
        let strategy = SplitStrategy::Stratified {
            train_size: SplitSize::Fraction(0.5),
            validation_fraction: 1.0,
        };

        let indices = split_indices(&set, &strategy, &mut rng).unwrap();
        assert!(indices.train.is_empty());
        assert_eq!(indices.validation.len(), 10);
        assert_eq!(indices.test.len(), 10);
        assert_disjoint(&indices);

        let above_one = SplitStrategy::Stratified {
            train_size: SplitSize::Fraction(0.5),
            validation_fraction: 1.01,
        };
        assert!(split_indices(&set, &above_one, &mut rng).is_err());
    }

    #[test]
    fn test_missing_class_rejected() {
        let set = SampleSet::from_samples(vec![
            Sample::new(vec![0.0], 0),
            Sample::new(vec![1.0], 2),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            split_indices(&set, &SplitStrategy::default(), &mut rng),
            Err(HsiError::InvalidDataset(_))
        ));
    }

    #[test]
    fn test_group_by_class() {
        let set = dataset(&[2, 3]);
        assert_eq!(group_by_class(&set), vec![vec![0, 1], vec![2, 3, 4]]);
    }

    #[test]
    fn test_batches() {
        let ranges: Vec<_> = batches(7, 3).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        assert_eq!(batches(0, 4).count(), 0);
        assert_eq!(batches(4, 4).collect::<Vec<_>>(), vec![0..4]);
    }
}
