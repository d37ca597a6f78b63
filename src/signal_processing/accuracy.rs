use crate::config::AccuracyConfig;

/// Maps the dispersion of recent headings to a 0-100 confidence score
///
/// Mean and population standard deviation are computed on raw degree values,
/// so a steady heading jittering across north scores poorly. Each
/// `degrees_per_point` of standard deviation costs one point.
#[derive(Debug, Clone)]
pub struct AccuracyEstimator {
    window: usize,
    min_samples: usize,
    degrees_per_point: f64,
}

impl AccuracyEstimator {
    pub fn new(config: &AccuracyConfig) -> Self {
        Self {
            window: config.window,
            min_samples: config.min_samples,
            degrees_per_point: config.degrees_per_point,
        }
    }

    /// Score the newest `window` headings of a chronological slice
    pub fn estimate(&self, headings: &[f64]) -> f64 {
        if headings.len() < self.min_samples {
            return 0.0;
        }

        let recent = &headings[headings.len().saturating_sub(self.window)..];
        let std_dev = population_std_dev(recent);

        (100.0 - std_dev / self.degrees_per_point).clamp(0.0, 100.0)
    }
}

impl Default for AccuracyEstimator {
    fn default() -> Self {
        Self::new(&AccuracyConfig::default())
    }
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
