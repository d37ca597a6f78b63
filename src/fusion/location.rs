use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use super::controller::FusionOutput;
use crate::config::{LocationConfig, OutOfOrderPolicy};
use crate::error::{ErrorKind, FusionError, Result};
use crate::sensor::{
    EventSink, LocationFix, LocationSource, SensorEvent, SessionId, SourceSubscription,
    WatchOptions,
};
use crate::signal_processing::math::{bearing, distance_m, normalize};

/// Where `LocationState.heading` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingOrigin {
    /// Course over ground reported by the receiver
    Gps,
    /// Bearing from the previous fix
    Derived,
    /// Carried over because this fix could not produce one
    Retained,
}

/// Coarse grading of a fix's horizontal accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyClass {
    Good,
    Moderate,
    Poor,
}

impl AccuracyClass {
    pub fn from_meters(accuracy_m: f64) -> Self {
        if accuracy_m <= 20.0 {
            Self::Good
        } else if accuracy_m <= 50.0 {
            Self::Moderate
        } else {
            Self::Poor
        }
    }
}

/// Position with the best available heading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationState {
    pub latitude: f64,
    pub longitude: f64,
    /// GPS or derived heading, independent of the compass
    pub heading: f64,
    pub heading_origin: HeadingOrigin,
    /// Fused compass heading while the compass is running
    pub compass_heading: Option<f64>,
    /// Compass heading when it is healthy, otherwise `heading`
    pub display_heading: f64,
    /// Horizontal accuracy in metres
    pub accuracy: f64,
    pub accuracy_class: AccuracyClass,
    pub timestamp: DateTime<Utc>,
}

/// Combines GPS fixes with the fused compass heading
///
/// A fix's own course is preferred when present and nonzero; otherwise the
/// heading is the bearing from the previous fix, provided the receiver moved
/// far enough for the bearing to mean something. For display, a running and
/// healthy compass wins over both.
pub struct LocationHeadingFusion {
    source: Box<dyn LocationSource>,
    events: Sender<SensorEvent>,
    options: WatchOptions,
    min_bearing_distance_m: f64,
    out_of_order: OutOfOrderPolicy,
    session: SessionId,
    watch: Option<Box<dyn SourceSubscription>>,
    previous: Option<LocationFix>,
    state: Option<LocationState>,
    compass: FusionOutput,
    error: Option<ErrorKind>,
    observers: Vec<Sender<LocationState>>,
}

impl LocationHeadingFusion {
    pub fn new(
        config: &LocationConfig,
        source: Box<dyn LocationSource>,
        events: Sender<SensorEvent>,
    ) -> Self {
        Self {
            source,
            events,
            options: WatchOptions {
                distance_filter_m: config.distance_filter_m,
                min_interval: config.min_interval(),
            },
            min_bearing_distance_m: config.min_bearing_distance_m,
            out_of_order: config.out_of_order,
            session: 0,
            watch: None,
            previous: None,
            state: None,
            compass: FusionOutput::default(),
            error: None,
            observers: Vec::new(),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.watch.is_some()
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> Option<LocationState> {
        self.state
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    pub fn subscribe(&mut self) -> Receiver<LocationState> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.observers.push(tx);
        rx
    }

    /// Request permission, take an initial fix and watch for more
    ///
    /// A no-op while already tracking.
    pub fn start_tracking(&mut self) -> Result<()> {
        if self.is_tracking() {
            log::debug!("Location tracking already running");
            return Ok(());
        }

        self.session += 1;
        self.previous = None;

        if let Err(e) = self.source.request_permission() {
            log::error!("Location permission denied: {}", e);
            self.error = Some(ErrorKind::PermissionDenied);
            return Err(FusionError::PermissionDenied);
        }

        let initial = self.source.current_fix().map_err(|e| self.unavailable(e))?;
        let sink = EventSink::new(self.events.clone(), self.session);
        let watch = self
            .source
            .watch(self.options, sink)
            .map_err(|e| self.unavailable(e))?;

        self.watch = Some(watch);
        self.error = None;
        log::info!(
            "Location tracking started (session {}, distance filter {} m, interval {:?})",
            self.session,
            self.options.distance_filter_m,
            self.options.min_interval
        );
        self.on_fix(initial);
        Ok(())
    }

    pub fn stop_tracking(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.cancel();
            self.session += 1;
            log::info!("Location tracking stopped");
        }
    }

    pub fn handle_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Fix { session, fix } => {
                if self.accepts(session) {
                    self.on_fix(fix);
                } else {
                    log::trace!("Dropping fix from stale session {}", session);
                }
            }
            SensorEvent::FixFailed { session, message } => {
                if self.accepts(session) {
                    log::warn!("Location watch error: {}", message);
                    self.error = Some(ErrorKind::SourceUnavailable);
                }
            }
            SensorEvent::Reading { .. } | SensorEvent::SourceFailed { .. } => {
                log::trace!("Location fusion ignoring compass event");
            }
        }
    }

    /// Fold a new fix into the location state
    ///
    /// Returns the new state, or `None` when the fix was dropped.
    pub fn on_fix(&mut self, fix: LocationFix) -> Option<LocationState> {
        if !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            log::debug!("Dropping fix with non-finite position");
            return None;
        }

        let ordering = self.previous.map(|prev| fix.timestamp.cmp(&prev.timestamp));
        if ordering == Some(Ordering::Less) {
            match self.out_of_order {
                OutOfOrderPolicy::Discard => {
                    log::debug!("Discarding out-of-order fix at {}", fix.timestamp);
                    return None;
                }
                OutOfOrderPolicy::Replace => {
                    log::debug!("Out-of-order fix at {} replaces previous", fix.timestamp);
                }
            }
        }

        let retained = self.state.map(|s| s.heading).unwrap_or(0.0);
        let gps_heading = fix.gps_heading.filter(|h| h.is_finite() && *h != 0.0);

        let (heading, heading_origin) = match (gps_heading, self.previous) {
            (Some(gps), _) => (normalize(gps), HeadingOrigin::Gps),
            (None, Some(prev)) if ordering == Some(Ordering::Greater) => {
                let from = prev.coordinate();
                let to = fix.coordinate();
                if distance_m(&from, &to) >= self.min_bearing_distance_m {
                    (bearing(&from, &to), HeadingOrigin::Derived)
                } else {
                    (retained, HeadingOrigin::Retained)
                }
            }
            _ => (retained, HeadingOrigin::Retained),
        };

        let mut state = LocationState {
            latitude: fix.latitude,
            longitude: fix.longitude,
            heading,
            heading_origin,
            compass_heading: None,
            display_heading: heading,
            accuracy: fix.accuracy,
            accuracy_class: AccuracyClass::from_meters(fix.accuracy),
            timestamp: fix.timestamp,
        };
        self.apply_compass(&mut state);

        self.previous = Some(fix);
        self.state = Some(state);
        self.error = None;
        self.notify(state);
        Some(state)
    }

    /// Track the latest compass output
    ///
    /// Observers hear about it only when the displayed heading changes.
    pub fn update_compass(&mut self, output: FusionOutput) -> Option<LocationState> {
        self.compass = output;
        let mut state = self.state?;
        let before = state;
        self.apply_compass(&mut state);
        if state == before {
            return None;
        }
        self.state = Some(state);
        self.notify(state);
        Some(state)
    }

    fn apply_compass(&self, state: &mut LocationState) {
        let healthy = self.compass.is_active && self.compass.error.is_none();
        state.compass_heading = self.compass.is_active.then_some(self.compass.heading);
        state.display_heading = if healthy {
            self.compass.heading
        } else {
            state.heading
        };
    }

    fn accepts(&self, session: SessionId) -> bool {
        self.is_tracking() && session == self.session
    }

    fn unavailable(&mut self, e: FusionError) -> FusionError {
        log::error!("Error starting location tracking: {}", e);
        self.error = Some(ErrorKind::SourceUnavailable);
        match e {
            FusionError::SourceUnavailable(_) => e,
            other => FusionError::SourceUnavailable(other.to_string()),
        }
    }

    fn notify(&mut self, state: LocationState) {
        self.observers.retain(|tx| tx.send(state).is_ok());
    }
}

impl Drop for LocationHeadingFusion {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}
