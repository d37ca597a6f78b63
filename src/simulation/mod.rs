//! Synthetic sensor sessions for tests and the `generate_headings` tool.

mod measure;
mod noise;
mod scenario;

pub use measure::{ErrorStats, angle_error, truth_at};
pub use noise::{CompassNoise, DropoutConfig, JitterConfig, NoiseConfig, SpikeConfig};
pub use scenario::{GeneratedScenario, GpsTrack, RotationProfile, Scenario, generate_recording};
