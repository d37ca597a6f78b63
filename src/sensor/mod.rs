//! Sensor collaborators and the events they deliver.
//!
//! Sources never call into the fusion engine directly. Each subscription is
//! handed an [`EventSink`] tagged with the session that created it, and
//! everything the source observes is queued as a [`SensorEvent`] for the
//! owning event loop to process in order.

pub mod manual;
pub mod replay;

use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::signal_processing::Coordinate;
use crate::signal_processing::math::heading_from_vector;

pub use manual::{ManualFeeder, ManualLocationFeeder, ManualLocationSource, ManualSource};
pub use replay::{Recording, ReplayRecord, ReplaySource};

/// Identifies one start/stop session of a controller
pub type SessionId = u64;

/// Vectors shorter than this have no meaningful direction
const MIN_VECTOR_MAGNITUDE: f64 = 1e-9;

/// Raw, unvalidated reading as delivered by a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawReading {
    /// Compass heading in degrees (may be unnormalized or NaN)
    Heading {
        degrees: f64,
        accuracy: Option<f64>,
    },
    /// Horizontal magnetometer vector
    Vector { x: f64, y: f64 },
}

/// Validated heading sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadingSample {
    /// Finite angle in degrees, not yet normalized
    pub angle_degrees: f64,
    /// Accuracy reported by the sensor, if any
    pub accuracy_degrees: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RawReading {
    /// Validate a reading
    ///
    /// Non-finite values are `InvalidSample`. A zero-length magnetometer
    /// vector is finite but has no heading and is a `ProcessingFailure`.
    pub fn into_sample(self, timestamp: DateTime<Utc>) -> Result<HeadingSample> {
        match self {
            Self::Heading { degrees, accuracy } => {
                if !degrees.is_finite() {
                    return Err(FusionError::InvalidSample(format!(
                        "non-finite heading {}",
                        degrees
                    )));
                }
                Ok(HeadingSample {
                    angle_degrees: degrees,
                    accuracy_degrees: accuracy.filter(|a| a.is_finite()),
                    timestamp,
                })
            }
            Self::Vector { x, y } => {
                if !x.is_finite() || !y.is_finite() {
                    return Err(FusionError::InvalidSample(format!(
                        "non-finite magnetometer vector ({}, {})",
                        x, y
                    )));
                }
                if x.hypot(y) < MIN_VECTOR_MAGNITUDE {
                    return Err(FusionError::ProcessingFailure(
                        "zero-length magnetometer vector".into(),
                    ));
                }
                Ok(HeadingSample {
                    angle_degrees: heading_from_vector(x, y),
                    accuracy_degrees: None,
                    timestamp,
                })
            }
        }
    }
}

/// A single position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Course over ground reported by the receiver, if any
    pub gps_heading: Option<f64>,
    /// Horizontal accuracy in metres
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Something a source observed, tagged with the session it belongs to
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Reading {
        session: SessionId,
        reading: RawReading,
        timestamp: DateTime<Utc>,
    },
    SourceFailed {
        session: SessionId,
        message: String,
    },
    Fix {
        session: SessionId,
        fix: LocationFix,
    },
    FixFailed {
        session: SessionId,
        message: String,
    },
}

/// Session-tagged sender handed to a source on subscription
///
/// Every send reports whether the event loop is still listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<SensorEvent>,
    session: SessionId,
}

impl EventSink {
    pub fn new(tx: Sender<SensorEvent>, session: SessionId) -> Self {
        Self { tx, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn reading(&self, reading: RawReading) -> bool {
        self.reading_at(reading, Utc::now())
    }

    pub fn reading_at(&self, reading: RawReading, timestamp: DateTime<Utc>) -> bool {
        self.send(SensorEvent::Reading {
            session: self.session,
            reading,
            timestamp,
        })
    }

    pub fn failure(&self, message: impl Into<String>) -> bool {
        self.send(SensorEvent::SourceFailed {
            session: self.session,
            message: message.into(),
        })
    }

    pub fn fix(&self, fix: LocationFix) -> bool {
        self.send(SensorEvent::Fix {
            session: self.session,
            fix,
        })
    }

    pub fn fix_failure(&self, message: impl Into<String>) -> bool {
        self.send(SensorEvent::FixFailed {
            session: self.session,
            message: message.into(),
        })
    }

    fn send(&self, event: SensorEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Live subscription to a source
///
/// `cancel` is idempotent. Implementations also cancel on drop.
pub trait SourceSubscription: Send {
    fn cancel(&mut self);
}

/// Compass or magnetometer
pub trait HeadingSource: Send {
    /// Start delivering readings to `sink`
    ///
    /// `update_interval` is a hint; the source picks its own rate. Fails with
    /// `SourceUnavailable` when the sensor is missing or refuses.
    fn subscribe(
        &mut self,
        update_interval: Duration,
        sink: EventSink,
    ) -> Result<Box<dyn SourceSubscription>>;
}

/// Options for a location watch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub distance_filter_m: f64,
    pub min_interval: Duration,
}

/// GPS receiver
pub trait LocationSource: Send {
    /// Ask the platform for location access
    fn request_permission(&mut self) -> Result<()> {
        Ok(())
    }

    fn current_fix(&mut self) -> Result<LocationFix>;

    /// Start delivering fixes to `sink`; cancelling the subscription clears the watch
    fn watch(
        &mut self,
        options: WatchOptions,
        sink: EventSink,
    ) -> Result<Box<dyn SourceSubscription>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_reading_validation() {
        let now = Utc::now();
        let sample = RawReading::Heading {
            degrees: -45.0,
            accuracy: Some(3.0),
        }
        .into_sample(now)
        .unwrap();
        assert_eq!(sample.angle_degrees, -45.0);
        assert_eq!(sample.accuracy_degrees, Some(3.0));

        let nan = RawReading::Heading {
            degrees: f64::NAN,
            accuracy: None,
        };
        assert!(matches!(nan.into_sample(now), Err(FusionError::InvalidSample(_))));
    }

    #[test]
    fn test_vector_reading_validation() {
        let now = Utc::now();
        let sample = RawReading::Vector { x: 0.0, y: 25.0 }.into_sample(now).unwrap();
        assert!((sample.angle_degrees - 90.0).abs() < 1e-9);

        let inf = RawReading::Vector {
            x: f64::INFINITY,
            y: 0.0,
        };
        assert!(matches!(inf.into_sample(now), Err(FusionError::InvalidSample(_))));

        let zero = RawReading::Vector { x: 0.0, y: 0.0 };
        assert!(matches!(zero.into_sample(now), Err(FusionError::ProcessingFailure(_))));
    }

    #[test]
    fn test_sink_reports_closed_loop() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = EventSink::new(tx, 7);
        assert!(sink.reading(RawReading::Vector { x: 1.0, y: 0.0 }));
        match rx.try_recv().unwrap() {
            SensorEvent::Reading { session, .. } => assert_eq!(session, 7),
            other => panic!("unexpected event {:?}", other),
        }
        drop(rx);
        assert!(!sink.failure("gone"));
    }
}
