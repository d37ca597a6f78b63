use crate::config::{FilterConfig, SmoothingMethod};

use super::math::{angle_diff, interpolate, normalize};

/// Recency-weighted moving average over circular values
///
/// Keeps the last N headings in a circular buffer and averages them with
/// linearly increasing weights (oldest 1, newest N). Offsets are taken with
/// `angle_diff` relative to the newest heading, so a window straddling north
/// averages to a heading near north instead of near 180°.
#[derive(Debug, Clone)]
pub struct WeightedMovingAverage {
    buffer: Vec<f64>,
    index: usize,
    filled: bool,
}

impl WeightedMovingAverage {
    /// Create a new weighted moving average
    ///
    /// # Arguments
    /// * `window_size` - Number of headings to average (at least 1)
    pub fn new(window_size: usize) -> Self {
        Self {
            buffer: vec![0.0; window_size.max(1)],
            index: 0,
            filled: false,
        }
    }

    /// Add a heading and return the updated weighted average in [0, 360)
    pub fn add(&mut self, heading: f64) -> f64 {
        self.buffer[self.index] = normalize(heading);
        self.index = (self.index + 1) % self.buffer.len();

        if self.index == 0 {
            self.filled = true;
        }

        self.average()
    }

    /// Weighted average of the current window, in [0, 360)
    pub fn average(&self) -> f64 {
        let ordered = self.ordered();
        let Some(&newest) = ordered.last() else {
            return 0.0;
        };

        let mut weighted_offset = 0.0;
        let mut total_weight = 0.0;
        for (i, &heading) in ordered.iter().enumerate() {
            let weight = (i + 1) as f64;
            weighted_offset += weight * angle_diff(newest, heading);
            total_weight += weight;
        }

        normalize(newest + weighted_offset / total_weight)
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.filled = false;
    }

    /// Stored headings, oldest first
    fn ordered(&self) -> Vec<f64> {
        if self.filled {
            let (newer, older) = self.buffer.split_at(self.index);
            older.iter().chain(newer.iter()).copied().collect()
        } else {
            self.buffer[..self.index].to_vec()
        }
    }
}

/// Wraparound-aware low-pass filter for headings
///
/// Holds the last published heading. `step` proposes the next heading by
/// moving `factor` of the short arc from the last published heading toward
/// the new sample; the caller decides whether the proposal is significant
/// and `commit`s it.
#[derive(Debug, Clone)]
pub struct CircularSmoother {
    factor: f64,
    weighted: Option<WeightedMovingAverage>,
    last_published: f64,
}

impl CircularSmoother {
    pub fn new(factor: f64) -> Self {
        Self {
            factor,
            weighted: None,
            last_published: 0.0,
        }
    }

    /// Exponential smoothing preceded by a weighted moving average
    pub fn with_weighted_window(factor: f64, window_size: usize) -> Self {
        Self {
            factor,
            weighted: Some(WeightedMovingAverage::new(window_size)),
            last_published: 0.0,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        match config.smoothing_method {
            SmoothingMethod::Exponential => Self::new(config.smoothing_factor),
            SmoothingMethod::Weighted => {
                Self::with_weighted_window(config.smoothing_factor, config.weighted_window)
            }
        }
    }

    /// Proposed heading for a new sample, in [0, 360)
    pub fn step(&mut self, sample: f64) -> f64 {
        let target = match self.weighted.as_mut() {
            Some(wma) => wma.add(sample),
            None => normalize(sample),
        };
        normalize(interpolate(self.last_published, target, self.factor))
    }

    /// Accept a heading as the new reference for smoothing
    pub fn commit(&mut self, heading: f64) {
        self.last_published = normalize(heading);
    }

    pub fn last_published(&self) -> f64 {
        self.last_published
    }

    pub fn reset(&mut self) {
        self.last_published = 0.0;
        if let Some(wma) = self.weighted.as_mut() {
            wma.reset();
        }
    }
}

impl Default for CircularSmoother {
    fn default() -> Self {
        Self::new(0.3)
    }
}
