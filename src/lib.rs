pub mod config;
pub mod error;
pub mod fusion;
pub mod output;
pub mod rate_limit;
pub mod sensor;
pub mod signal_processing;

#[cfg(feature = "simulation")]
pub mod simulation;

pub use config::FusionConfig;
pub use error::{ErrorKind, FusionError, Result};
pub use fusion::{
    FusionHandle, FusionOutput, FusionService, FusionState, HeadingFusionController,
    LocationHeadingFusion, LocationState, Snapshot,
};
