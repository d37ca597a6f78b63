pub mod accuracy;
pub mod calibration;
pub mod history;
pub mod math;
pub mod outlier;
pub mod smoothing;

pub use accuracy::AccuracyEstimator;
pub use calibration::{CalibrationDetector, CalibrationState};
pub use history::HeadingHistory;
pub use math::{Coordinate, angle_diff, bearing, normalize};
pub use outlier::OutlierFilter;
pub use smoothing::{CircularSmoother, WeightedMovingAverage};
