mod controller;
mod location;
mod service;

pub use controller::{FusionOutput, FusionState, HeadingFusionController};
pub use location::{AccuracyClass, HeadingOrigin, LocationHeadingFusion, LocationState};
pub use service::{FusionHandle, FusionService, Snapshot};
