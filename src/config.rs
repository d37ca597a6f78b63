//! Configuration for the heading fusion engine.
//!
//! Every section implements `Default` with the values the pipeline was tuned
//! with, and deserializes with `#[serde(default)]` so a TOML file only needs
//! to name the values it overrides:
//!
//! ```toml
//! [filter]
//! smoothing_factor = 0.4
//!
//! [rate_limit]
//! publish_interval_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FusionError, Result};

/// Smoothing strategy applied before the significance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMethod {
    /// Exponential step from the last published heading toward the new sample
    Exponential,
    /// Recency-weighted average of the last few samples, then the exponential step
    Weighted,
}

/// What to do with a location fix older than the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutOfOrderPolicy {
    /// Drop the late fix
    Discard,
    /// Accept the late fix as the new position without deriving a bearing
    Replace,
}

/// System-wide fusion configuration
///
/// # Example
/// ```
/// use headingfusion::config::FusionConfig;
///
/// let mut config = FusionConfig::default();
/// config.filter.smoothing_factor = 0.4;
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Sample intake and publication
    pub heading: HeadingConfig,
    /// Outlier rejection and smoothing
    pub filter: FilterConfig,
    /// Dispersion based accuracy score
    pub accuracy: AccuracyConfig,
    /// Passive and manual calibration
    pub calibration: CalibrationConfig,
    /// Notification rate limits
    pub rate_limit: RateLimitConfig,
    /// GPS fallback
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeadingConfig {
    /// Update interval requested from the sensor (a hint; the source picks its own rate)
    pub update_interval_ms: u64,
    /// Minimum change in degrees before a new heading is published
    pub significance_degrees: f64,
    /// Number of normalized headings kept for filtering and statistics
    pub history_capacity: usize,
}

/// Outlier rejection and smoothing configuration
///
/// The outlier reference is the linear median of the history, so a history
/// straddling north (e.g. 359° and 1°) picks a poor reference. This matches
/// the behaviour the UI was built against.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples further than this from the median are rejected (degrees)
    pub outlier_threshold_degrees: f64,
    pub smoothing_method: SmoothingMethod,
    /// Exponential smoothing factor in (0, 1); higher follows the sensor faster
    pub smoothing_factor: f64,
    /// Window of the weighted moving average variant
    pub weighted_window: usize,
}

/// Accuracy score configuration
///
/// Dispersion is the ordinary standard deviation of raw degree values, which
/// overstates spread across the 0°/360° boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccuracyConfig {
    /// Number of most recent headings considered
    pub window: usize,
    /// Below this many headings the accuracy is 0
    pub min_samples: usize,
    /// Degrees of standard deviation that cost one accuracy point
    pub degrees_per_point: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// History length required before the passive check runs
    pub min_samples: usize,
    /// Observed heading range (degrees) that counts as calibrated
    pub range_threshold_degrees: f64,
    /// Cadence of the manual calibration routine
    pub tick_interval_ms: u64,
    /// Samples taken by one manual calibration run
    pub tick_budget: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Leading-edge throttle on heading notifications
    pub publish_interval_ms: u64,
    /// Quiet period after which held-back headings and accuracy-only changes
    /// are announced
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Distance filter passed to the location watch
    pub distance_filter_m: f64,
    /// Minimum interval passed to the location watch
    pub min_interval_ms: u64,
    /// Fixes closer than this to the previous one keep the previous heading
    pub min_bearing_distance_m: f64,
    pub out_of_order: OutOfOrderPolicy,
}

impl FusionConfig {
    /// Parse a (possibly partial) TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| FusionError::Config(format!("{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FusionError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.filter;
        if !(f.smoothing_factor > 0.0 && f.smoothing_factor < 1.0) {
            return Err(FusionError::Config(format!(
                "smoothing_factor must be in (0, 1), got {}",
                f.smoothing_factor
            )));
        }
        if !(f.outlier_threshold_degrees > 0.0) {
            return Err(FusionError::Config(
                "outlier_threshold_degrees must be positive".into(),
            ));
        }
        if f.weighted_window == 0 {
            return Err(FusionError::Config("weighted_window must be non-zero".into()));
        }
        if self.heading.history_capacity == 0 {
            return Err(FusionError::Config("history_capacity must be non-zero".into()));
        }
        if !(self.heading.significance_degrees >= 0.0) {
            return Err(FusionError::Config(
                "significance_degrees must not be negative".into(),
            ));
        }
        if self.accuracy.window == 0 || !(self.accuracy.degrees_per_point > 0.0) {
            return Err(FusionError::Config(
                "accuracy window and degrees_per_point must be positive".into(),
            ));
        }
        let c = &self.calibration;
        if c.tick_interval_ms == 0 || c.tick_budget == 0 {
            return Err(FusionError::Config(
                "calibration tick interval and budget must be non-zero".into(),
            ));
        }
        if !(c.range_threshold_degrees > 0.0 && c.range_threshold_degrees < 360.0) {
            return Err(FusionError::Config(format!(
                "range_threshold_degrees must be in (0, 360), got {}",
                c.range_threshold_degrees
            )));
        }
        if self.rate_limit.publish_interval_ms == 0 {
            return Err(FusionError::Config("publish_interval_ms must be non-zero".into()));
        }
        if !(self.location.min_bearing_distance_m >= 0.0) {
            return Err(FusionError::Config(
                "min_bearing_distance_m must not be negative".into(),
            ));
        }
        Ok(())
    }
}

impl HeadingConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

impl CalibrationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl RateLimitConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl LocationConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            significance_degrees: 0.5,
            history_capacity: 20,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            outlier_threshold_degrees: 45.0,
            smoothing_method: SmoothingMethod::Exponential,
            smoothing_factor: 0.3,
            weighted_window: 3,
        }
    }
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            window: 5,
            min_samples: 3,
            degrees_per_point: 3.6,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            range_threshold_degrees: 300.0,
            tick_interval_ms: 200,
            tick_budget: 50,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 100,
            settle_ms: 250,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            distance_filter_m: 1.0,
            min_interval_ms: 1000,
            min_bearing_distance_m: 1.0,
            out_of_order: OutOfOrderPolicy::Discard,
        }
    }
}
