//! Noise injection for robustness experiments
//!
//! Each injector picks a fraction `pa` of the samples and, within each of
//! them, a fraction `pb` of the bands. With `bc` set, the same bands are
//! corrupted in every affected sample; otherwise bands are drawn per sample.
//!
//! Parameters come from a JSON object such as
//! `{"mean": 0, "std": 0.05, "pa": 0.1, "pb": 0.5}`; missing keys keep their
//! defaults.

use crate::core::{HsiError, Result, SampleSet, Transform};
use crate::transforms::data_range;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parameters shared by all noise injectors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    /// Gaussian mean
    pub mean: f64,
    /// Gaussian standard deviation
    pub std: f64,
    /// Fraction of samples affected
    pub pa: f64,
    /// Fraction of bands affected in each affected sample
    pub pb: f64,
    /// Corrupt the same bands in every affected sample
    pub bc: bool,
    /// Probability that an impulse is white (set to the maximum)
    pub pw: f64,
    /// Photon count scale for shot noise
    pub photons: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
            pa: 0.1,
            pb: 1.0,
            bc: true,
            pw: 0.5,
            photons: 100.0,
        }
    }
}

impl NoiseParams {
    /// Parse from a JSON object, defaulting absent keys
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("pa", self.pa), ("pb", self.pb), ("pw", self.pw)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HsiError::InvalidParameter(format!(
                    "noise parameter {name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if !(self.std >= 0.0 && self.std.is_finite()) {
            return Err(HsiError::InvalidParameter(format!(
                "noise std must be a non-negative number, got {}",
                self.std
            )));
        }
        if !(self.photons > 0.0) {
            return Err(HsiError::InvalidParameter(format!(
                "photon scale must be positive, got {}",
                self.photons
            )));
        }
        Ok(())
    }
}

/// Available noise models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    /// Additive Gaussian noise `N(mean, std)`
    Gaussian,
    /// Salt-and-pepper impulses at the set's extreme values
    Impulsive,
    /// Signal-dependent Poisson noise
    Shot,
}

impl FromStr for NoiseKind {
    type Err = HsiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gaussian" => Ok(Self::Gaussian),
            "impulsive" => Ok(Self::Impulsive),
            "shot" => Ok(Self::Shot),
            other => Err(HsiError::InvalidParameter(format!(
                "unknown noise '{other}', expected gaussian, impulsive or shot"
            ))),
        }
    }
}

impl fmt::Display for NoiseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseKind::Gaussian => write!(f, "gaussian"),
            NoiseKind::Impulsive => write!(f, "impulsive"),
            NoiseKind::Shot => write!(f, "shot"),
        }
    }
}

/// Partition that receives noise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseTarget {
    Train,
    Val,
    Test,
}

impl FromStr for NoiseTarget {
    type Err = HsiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "val" | "validation" => Ok(Self::Val),
            "test" => Ok(Self::Test),
            other => Err(HsiError::InvalidParameter(format!(
                "unknown noise set '{other}', expected train, val or test"
            ))),
        }
    }
}

/// A configured noise injector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseInjection {
    kind: NoiseKind,
    params: NoiseParams,
    name: &'static str,
}

impl NoiseInjection {
    pub fn new(kind: NoiseKind, params: NoiseParams) -> Result<Self> {
        params.validate()?;
        let name = match kind {
            NoiseKind::Gaussian => "gaussian noise",
            NoiseKind::Impulsive => "impulsive noise",
            NoiseKind::Shot => "shot noise",
        };
        Ok(Self { kind, params, name })
    }

    pub fn kind(&self) -> NoiseKind {
        self.kind
    }
}

impl Transform for NoiseInjection {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, set: &mut SampleSet, rng: &mut StdRng) -> Result<()> {
        let n_samples = set.samples().len();
        if n_samples == 0 {
            return Ok(());
        }
        let n_bands = set.samples()[0].spectrum.len();
        let affected_samples = (n_samples as f64 * self.params.pa) as usize;
        let affected_bands = (n_bands as f64 * self.params.pb) as usize;
        if affected_samples == 0 || affected_bands == 0 {
            return Ok(());
        }

        let range = data_range(set)?;
        let gaussian = Normal::new(self.params.mean, self.params.std)
            .map_err(|e| HsiError::InvalidParameter(format!("gaussian noise: {e}")))?;
        let shared_bands = if self.params.bc {
            Some(index::sample(rng, n_bands, affected_bands).into_vec())
        } else {
            None
        };

        let chosen = index::sample(rng, n_samples, affected_samples).into_vec();
        let samples = set.samples_mut();
        for i in chosen {
            let bands = match &shared_bands {
                Some(bands) => bands.clone(),
                None => index::sample(rng, n_bands, affected_bands).into_vec(),
            };
            let spectrum = &mut samples[i].spectrum;
            for band in bands {
                let value = &mut spectrum[band];
                match self.kind {
                    NoiseKind::Gaussian => *value += gaussian.sample(rng),
                    NoiseKind::Impulsive => {
                        *value = if rng.gen_bool(self.params.pw) {
                            range.max
                        } else {
                            range.min
                        };
                    }
                    NoiseKind::Shot => {
                        let lambda = *value * self.params.photons;
                        *value = if lambda > 0.0 {
                            let poisson = Poisson::new(lambda).map_err(|e| {
                                HsiError::InvalidParameter(format!("shot noise: {e}"))
                            })?;
                            poisson.sample(rng) / self.params.photons
                        } else {
                            0.0
                        };
                    }
                }
            }
        }
        Ok(())
    }
}

/// Build noise injectors from their names and a JSON parameter object
pub fn noise_transforms<S: AsRef<str>>(
    names: &[S],
    params_json: Option<&str>,
) -> Result<Vec<Box<dyn Transform>>> {
    let params = match params_json {
        Some(json) => NoiseParams::from_json(json)?,
        None => NoiseParams::default(),
    };
    names
        .iter()
        .map(|name| {
            let kind: NoiseKind = name.as_ref().parse()?;
            Ok(Box::new(NoiseInjection::new(kind, params)?) as Box<dyn Transform>)
        })
        .collect()
}
