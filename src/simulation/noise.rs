use rand::RngExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::signal_processing::normalize;

/// Corruption applied to true headings before they are recorded
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct NoiseConfig {
    pub seed: Option<u64>,
    pub jitter: Option<JitterConfig>,
    pub spikes: Option<SpikeConfig>,
    pub dropouts: Option<DropoutConfig>,
}

impl NoiseConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_jitter(mut self, std_degrees: f64) -> Self {
        self.jitter = Some(JitterConfig { std_degrees });
        self
    }

    pub fn with_spikes(mut self, probability: f64, min_offset: f64, max_offset: f64) -> Self {
        self.spikes = Some(SpikeConfig {
            probability,
            min_offset_degrees: min_offset,
            max_offset_degrees: max_offset,
        });
        self
    }

    pub fn with_dropouts(mut self, probability: f64) -> Self {
        self.dropouts = Some(DropoutConfig { probability });
        self
    }
}

/// Gaussian sensor noise
#[derive(Clone, Debug, serde::Deserialize)]
pub struct JitterConfig {
    pub std_degrees: f64,
}

/// Occasional wild readings, e.g. from nearby ferrous metal
#[derive(Clone, Debug, serde::Deserialize)]
pub struct SpikeConfig {
    pub probability: f64,
    pub min_offset_degrees: f64,
    pub max_offset_degrees: f64,
}

/// Readings delivered without a usable number
#[derive(Clone, Debug, serde::Deserialize)]
pub struct DropoutConfig {
    pub probability: f64,
}

/// Stateful noise generator; seeded runs are reproducible
pub struct CompassNoise {
    config: NoiseConfig,
    rng: ChaCha8Rng,
    normal: Option<Normal<f64>>,
}

impl CompassNoise {
    pub fn new(config: &NoiseConfig) -> Self {
        let normal = config.jitter.as_ref().and_then(|j| {
            Normal::new(0.0, j.std_degrees)
                .map_err(|e| log::warn!("Ignoring jitter std {}: {}", j.std_degrees, e))
                .ok()
        });
        Self {
            config: config.clone(),
            rng: create_rng(config.seed),
            normal,
        }
    }

    /// Corrupt one heading; `None` is a dropout
    pub fn apply(&mut self, heading: f64) -> Option<f64> {
        if let Some(dropouts) = &self.config.dropouts {
            if self.rng.random::<f64>() < dropouts.probability {
                return None;
            }
        }

        let mut corrupted = heading;
        if let Some(normal) = &self.normal {
            corrupted += normal.sample(&mut self.rng);
        }

        if let Some(spikes) = &self.config.spikes {
            if self.rng.random::<f64>() < spikes.probability {
                let span = spikes.max_offset_degrees - spikes.min_offset_degrees;
                let offset = spikes.min_offset_degrees + self.rng.random::<f64>() * span;
                let sign = if self.rng.random::<bool>() { 1.0 } else { -1.0 };
                corrupted += sign * offset;
            }
        }

        Some(normalize(corrupted))
    }
}

fn create_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => rand::make_rng(),
    }
}
