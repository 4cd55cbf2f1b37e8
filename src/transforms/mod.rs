//! Sample set transformations
//!
//! Transformations run in place over a [`SampleSet`] and are chained with
//! [`apply_transformations`]. Normalization comes first; noise injection
//! (see [`noise`]) is appended after it for robustness experiments.

pub mod noise;

use crate::core::{HsiError, Result, SampleSet, Transform};
use log::debug;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub use self::noise::{noise_transforms, NoiseKind, NoiseParams, NoiseTarget};

/// Global value range of a sample set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRange {
    pub min: f64,
    pub max: f64,
}

/// Smallest and largest value over every band of every sample
pub fn data_range(set: &SampleSet) -> Result<DataRange> {
    let mut values = set.iter().flat_map(|s| s.spectrum.iter().copied()).peekable();
    if values.peek().is_none() {
        return Err(HsiError::EmptyDataset);
    }
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    Ok(DataRange { min, max })
}

/// Min-max scaling `x -> (x - min) / (max - min)` with a fixed range
///
/// The range is taken from the training partition and reused for every
/// other partition, so validation and test values may fall outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxNormalize {
    min: f64,
    max: f64,
}

impl MinMaxNormalize {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(max > min) {
            return Err(HsiError::InvalidParameter(format!(
                "normalization range is degenerate: min={min}, max={max}"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn from_range(range: DataRange) -> Result<Self> {
        Self::new(range.min, range.max)
    }

    /// Scale a single spectrum in place
    pub fn normalize(&self, spectrum: &mut [f64]) {
        let scale = self.max - self.min;
        for value in spectrum {
            *value = (*value - self.min) / scale;
        }
    }
}

impl Transform for MinMaxNormalize {
    fn name(&self) -> &str {
        "min-max"
    }

    fn apply(&self, set: &mut SampleSet, _rng: &mut StdRng) -> Result<()> {
        for sample in set.samples_mut() {
            self.normalize(&mut sample.spectrum);
        }
        Ok(())
    }
}

/// Apply transformations in order
pub fn apply_transformations(
    set: &mut SampleSet,
    transforms: &[Box<dyn Transform>],
    rng: &mut StdRng,
) -> Result<()> {
    for transform in transforms {
        debug!("Applying {} to {} samples", transform.name(), set.samples().len());
        transform.apply(set, rng)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Sample;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn set() -> SampleSet {
        SampleSet::from_samples(vec![
            Sample::new(vec![2.0, 4.0, 6.0], 0),
            Sample::new(vec![10.0, 8.0, 3.0], 1),
        ])
        .unwrap()
    }

    #[test]
    fn test_data_range() {
        let range = data_range(&set()).unwrap();
        assert_eq!(range.min, 2.0);
        assert_eq!(range.max, 10.0);

        assert!(matches!(
            data_range(&SampleSet::default()),
            Err(HsiError::EmptyDataset)
        ));
    }

    #[test]
    fn test_min_max_normalize_maps_to_unit_interval() {
        let mut data = set();
        let normalize = MinMaxNormalize::from_range(data_range(&data).unwrap()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        normalize.apply(&mut data, &mut rng).unwrap();

        let spectra: Vec<&[f64]> = data.iter().map(|s| s.spectrum.as_slice()).collect();
        assert_relative_eq!(spectra[0][0], 0.0);
        assert_relative_eq!(spectra[0][1], 0.25);
        assert_relative_eq!(spectra[1][0], 1.0);
        assert_relative_eq!(spectra[1][2], 0.125);
    }

    #[test]
    fn test_degenerate_range_rejected() {
        assert!(MinMaxNormalize::new(1.0, 1.0).is_err());
        assert!(MinMaxNormalize::new(2.0, 1.0).is_err());
        assert!(MinMaxNormalize::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_apply_transformations_in_order() {
        let mut data = set();
        let transforms: Vec<Box<dyn Transform>> = vec![
            Box::new(MinMaxNormalize::new(2.0, 10.0).unwrap()),
            Box::new(MinMaxNormalize::new(0.0, 0.5).unwrap()),
        ];
        let mut rng = StdRng::seed_from_u64(0);
        apply_transformations(&mut data, &transforms, &mut rng).unwrap();

        // (10 - 2) / 8 = 1, then 1 / 0.5 = 2
        assert_relative_eq!(data.samples()[1].spectrum[0], 2.0);
    }
}
