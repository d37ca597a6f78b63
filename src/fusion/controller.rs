use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};

use crate::config::FusionConfig;
use crate::error::{ErrorKind, FusionError, Result};
use crate::rate_limit::{Debounce, Throttle};
use crate::sensor::{
    EventSink, HeadingSample, HeadingSource, RawReading, SensorEvent, SessionId,
    SourceSubscription,
};
use crate::signal_processing::math::heading_to_cardinal;
use crate::signal_processing::{
    AccuracyEstimator, CalibrationDetector, CalibrationState, CircularSmoother, HeadingHistory,
    OutlierFilter, angle_diff, normalize,
};

/// Lifecycle of the heading pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionState {
    Idle,
    Active,
    /// The source could not be subscribed or failed at runtime
    ErrorStopped,
}

/// Snapshot published to observers
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FusionOutput {
    /// Smoothed heading in [0, 360)
    pub heading: f64,
    /// Confidence score in [0, 100]
    pub accuracy: f64,
    pub is_active: bool,
    pub is_calibrated: bool,
    pub error: Option<ErrorKind>,
}

impl FusionOutput {
    pub fn cardinal(&self) -> &'static str {
        heading_to_cardinal(self.heading)
    }
}

impl Default for FusionOutput {
    fn default() -> Self {
        Self {
            heading: 0.0,
            accuracy: 0.0,
            is_active: false,
            is_calibrated: false,
            error: None,
        }
    }
}

/// Turns raw compass readings into a stable, rate-limited heading
///
/// Owns the source subscription and every piece of per-session state. The
/// controller never reads the clock: each timed operation takes `now`, and
/// `next_deadline()` tells the owning loop when `on_timer` is due.
///
/// Per reading: validate, normalize, append to history, reject outliers,
/// smooth against the last published heading, publish through the throttle
/// when the change is significant, then refresh accuracy and passive
/// calibration. Headings or accuracy changes the throttle held back are
/// announced after a quiet period.
pub struct HeadingFusionController {
    source: Box<dyn HeadingSource>,
    events: Sender<SensorEvent>,
    update_interval: Duration,
    significance: f64,
    state: FusionState,
    session: SessionId,
    subscription: Option<Box<dyn SourceSubscription>>,
    history: HeadingHistory,
    outlier: OutlierFilter,
    smoother: CircularSmoother,
    accuracy: AccuracyEstimator,
    calibration: CalibrationDetector,
    throttle: Throttle,
    settle: Debounce<()>,
    output: FusionOutput,
    observers: Vec<Sender<FusionOutput>>,
}

impl HeadingFusionController {
    /// Create an idle controller
    ///
    /// # Arguments
    /// * `config` - Validated before use
    /// * `source` - Compass or magnetometer to subscribe on `start`
    /// * `events` - Queue the source's readings are delivered to
    pub fn new(
        config: &FusionConfig,
        source: Box<dyn HeadingSource>,
        events: Sender<SensorEvent>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            source,
            events,
            update_interval: config.heading.update_interval(),
            significance: config.heading.significance_degrees,
            state: FusionState::Idle,
            session: 0,
            subscription: None,
            history: HeadingHistory::new(config.heading.history_capacity),
            outlier: OutlierFilter::new(config.filter.outlier_threshold_degrees),
            smoother: CircularSmoother::from_config(&config.filter),
            accuracy: AccuracyEstimator::new(&config.accuracy),
            calibration: CalibrationDetector::new(&config.calibration),
            throttle: Throttle::new(config.rate_limit.publish_interval()),
            settle: Debounce::new(config.rate_limit.settle()),
            output: FusionOutput::default(),
            observers: Vec::new(),
        })
    }

    pub fn state(&self) -> FusionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == FusionState::Active
    }

    /// Session id of the current (or most recent) subscription
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn output(&self) -> FusionOutput {
        self.output
    }

    pub fn calibration_state(&self) -> &CalibrationState {
        self.calibration.state()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_running()
    }

    /// Register an observer; it receives a snapshot on every notification
    pub fn subscribe(&mut self) -> Receiver<FusionOutput> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.observers.push(tx);
        rx
    }

    pub fn add_observer(&mut self, observer: Sender<FusionOutput>) {
        self.observers.push(observer);
    }

    /// Subscribe to the source and begin a fresh session
    ///
    /// A no-op while already active. On failure the controller moves to
    /// `ErrorStopped` with `SourceUnavailable` and the error is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.state == FusionState::Active {
            log::debug!("Compass already started");
            return Ok(());
        }

        self.session += 1;
        self.reset_session();

        let sink = EventSink::new(self.events.clone(), self.session);
        match self.source.subscribe(self.update_interval, sink) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.state = FusionState::Active;
                self.output = FusionOutput {
                    is_active: true,
                    ..FusionOutput::default()
                };
                log::info!("Compass started (session {})", self.session);
                self.notify();
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    FusionError::SourceUnavailable(_) => e,
                    other => FusionError::SourceUnavailable(other.to_string()),
                };
                log::error!("Error starting compass: {}", e);
                self.subscription = None;
                self.state = FusionState::ErrorStopped;
                self.output.is_active = false;
                self.output.error = Some(ErrorKind::SourceUnavailable);
                self.notify();
                Err(e)
            }
        }
    }

    /// End the session: unsubscribe, cancel timers, clear history and calibration
    ///
    /// A no-op unless active. Readings still queued from the old session are
    /// ignored afterwards.
    pub fn stop(&mut self) {
        if self.state != FusionState::Active {
            return;
        }

        log::info!("Stopping compass (session {})", self.session);
        self.cancel_subscription();
        self.session += 1;
        self.reset_session();
        self.state = FusionState::Idle;
        self.output.is_active = false;
        self.output.accuracy = 0.0;
        self.output.is_calibrated = false;
        self.notify();
    }

    /// Start (or restart) the manual calibration routine
    pub fn calibrate(&mut self, now: Instant) {
        if self.state != FusionState::Active {
            log::warn!("Ignoring calibrate request: compass is not active");
            return;
        }
        log::info!("Starting manual calibration");
        self.calibration.begin(now);
        if self.output.is_calibrated {
            self.output.is_calibrated = false;
            self.notify();
        }
    }

    pub fn handle_event(&mut self, event: SensorEvent, now: Instant) {
        match event {
            SensorEvent::Reading {
                session,
                reading,
                timestamp,
            } => self.handle_reading(session, reading, timestamp, now),
            SensorEvent::SourceFailed { session, message } => {
                self.handle_source_failure(session, &message)
            }
            SensorEvent::Fix { .. } | SensorEvent::FixFailed { .. } => {
                log::trace!("Heading controller ignoring location event");
            }
        }
    }

    /// Run one reading through the pipeline
    pub fn handle_reading(
        &mut self,
        session: SessionId,
        reading: RawReading,
        timestamp: DateTime<Utc>,
        now: Instant,
    ) {
        if !self.accepts(session) {
            log::trace!("Dropping reading from stale session {}", session);
            return;
        }

        let result = reading
            .into_sample(timestamp)
            .and_then(|sample| self.process_sample(&sample, now));

        match result {
            Ok(()) => {}
            Err(FusionError::InvalidSample(reason)) => {
                log::debug!("Dropping invalid sample: {}", reason);
            }
            Err(e) => {
                log::warn!("Error processing compass data: {}", e);
                self.output.error = e.kind();
                self.notify();
            }
        }
    }

    /// The source reported it can no longer deliver readings
    pub fn handle_source_failure(&mut self, session: SessionId, message: &str) {
        if !self.accepts(session) {
            return;
        }
        log::error!("Sensor error: {}", message);
        self.cancel_subscription();
        self.reset_session();
        self.state = FusionState::ErrorStopped;
        self.output.is_active = false;
        self.output.error = Some(ErrorKind::SourceUnavailable);
        self.notify();
    }

    /// Earliest instant `on_timer` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.settle.deadline(), self.calibration.next_tick()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run whatever timed work is due at `now`
    pub fn on_timer(&mut self, now: Instant) {
        if self.state != FusionState::Active {
            return;
        }

        if self.settle.poll(now).is_some() {
            self.output.heading = self.smoother.last_published();
            self.notify();
        }

        if self.calibration.next_tick().is_some_and(|due| now >= due) {
            // tap the newest validated heading rather than the throttled output
            let heading = self.history.last().unwrap_or(self.output.heading);
            if let Some(calibrated) = self.calibration.tick(now, heading) {
                self.output.is_calibrated = calibrated;
                self.notify();
            }
        }
    }

    fn process_sample(&mut self, sample: &HeadingSample, now: Instant) -> Result<()> {
        let heading = normalize(sample.angle_degrees);
        log::trace!(
            "Heading sample {:.1}° (sensor accuracy {:?}) at {}",
            heading,
            sample.accuracy_degrees,
            sample.timestamp
        );

        self.history.push(heading);
        let headings = self.history.to_vec();

        let filtered = self.outlier.filter(&headings);
        let target = filtered.last().copied().unwrap_or(heading);
        if filtered.last() != Some(&heading) {
            log::debug!("Rejected outlier {:.1}°, smoothing toward {:.1}°", heading, target);
        }

        let candidate = self.smoother.step(target);
        if !candidate.is_finite() || !(0.0..360.0).contains(&candidate) {
            return Err(FusionError::ProcessingFailure(format!(
                "smoothed heading {} out of range",
                candidate
            )));
        }

        let mut changed = false;
        if self.output.error == Some(ErrorKind::ProcessingFailure) {
            self.output.error = None;
            changed = true;
        }

        let mut heading_held = false;
        if angle_diff(self.smoother.last_published(), candidate).abs() > self.significance {
            self.smoother.commit(candidate);
            if self.throttle.admit(now) {
                self.output.heading = candidate;
                changed = true;
            } else {
                heading_held = true;
            }
        }

        let accuracy = self.accuracy.estimate(&headings);
        let accuracy_changed = accuracy != self.output.accuracy;
        self.output.accuracy = accuracy;

        if self.calibration.observe_history(&headings) {
            self.output.is_calibrated = true;
            changed = true;
        }

        if changed {
            self.notify();
        }
        if heading_held || (accuracy_changed && !changed) {
            self.settle.call(now, ());
        }
        Ok(())
    }

    fn accepts(&self, session: SessionId) -> bool {
        self.state == FusionState::Active && session == self.session
    }

    fn cancel_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    fn reset_session(&mut self) {
        self.history.clear();
        self.smoother.reset();
        self.calibration.reset();
        self.throttle.cancel();
        self.settle.cancel();
    }

    fn notify(&mut self) {
        let output = self.output;
        self.observers.retain(|tx| tx.send(output).is_ok());
    }
}

impl Drop for HeadingFusionController {
    fn drop(&mut self) {
        self.cancel_subscription();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{ManualFeeder, ManualSource};

    struct Rig {
        controller: HeadingFusionController,
        feeder: ManualFeeder,
        events: Receiver<SensorEvent>,
        outputs: Receiver<FusionOutput>,
        start: Instant,
    }

    impl Rig {
        fn new() -> Self {
            Self::with_config(FusionConfig::default())
        }

        fn with_config(config: FusionConfig) -> Self {
            let (source, feeder) = ManualSource::new();
            let (tx, events) = crossbeam_channel::unbounded();
            let mut controller = HeadingFusionController::new(&config, Box::new(source), tx).unwrap();
            let outputs = controller.subscribe();
            Self {
                controller,
                feeder,
                events,
                outputs,
                start: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.start + Duration::from_millis(ms)
        }

        /// Push a heading and process everything queued at `ms`
        fn feed(&mut self, ms: u64, degrees: f64) {
            self.feeder.push_heading(degrees);
            self.pump(ms);
        }

        fn pump(&mut self, ms: u64) {
            let now = self.at(ms);
            while let Ok(event) = self.events.try_recv() {
                self.controller.handle_event(event, now);
            }
        }

        fn drain_outputs(&self) -> Vec<FusionOutput> {
            self.outputs.try_iter().collect()
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.controller.start().unwrap();
        assert_eq!(rig.feeder.live_subscriptions(), 1);
        assert_eq!(rig.controller.state(), FusionState::Active);
        assert!(rig.controller.output().is_active);
        assert_eq!(rig.feeder.requested_interval(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut rig = Rig::new();
        rig.controller.stop();
        assert_eq!(rig.controller.state(), FusionState::Idle);
        assert!(rig.drain_outputs().is_empty());
    }

    #[test]
    fn test_first_sample_published_immediately() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.drain_outputs();

        rig.feed(0, 90.0);
        let outputs = rig.drain_outputs();
        assert_eq!(outputs.len(), 1);
        // 30% of the way from the reset heading of 0
        assert!((outputs[0].heading - 27.0).abs() < 1e-9);
        assert!(outputs[0].is_active);
    }

    #[test]
    fn test_stop_cancels_and_ignores_stale_readings() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.feeder.push_heading(90.0);

        rig.controller.stop();
        assert_eq!(rig.feeder.live_subscriptions(), 0);
        assert!(!rig.controller.output().is_active);
        rig.drain_outputs();

        // the reading queued before stop belongs to the old session
        rig.pump(10);
        assert!(rig.drain_outputs().is_empty());
        assert_eq!(rig.controller.output().heading, 0.0);

        rig.controller.start().unwrap();
        assert_eq!(rig.feeder.live_subscriptions(), 1);
    }

    #[test]
    fn test_invalid_sample_dropped_silently() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.feed(0, 90.0);
        let before = rig.controller.output();
        rig.drain_outputs();

        rig.feed(200, f64::NAN);
        assert!(rig.drain_outputs().is_empty());
        assert_eq!(rig.controller.output(), before);
        assert_eq!(rig.controller.state(), FusionState::Active);
    }

    #[test]
    fn test_processing_failure_is_recoverable() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.feed(0, 90.0);
        let good = rig.controller.output().heading;

        rig.feeder.push(RawReading::Vector { x: 0.0, y: 0.0 });
        rig.pump(200);
        let output = rig.controller.output();
        assert_eq!(output.error, Some(ErrorKind::ProcessingFailure));
        assert_eq!(output.heading, good);
        assert!(output.is_active);
        assert_eq!(rig.feeder.live_subscriptions(), 1);

        rig.feeder.push(RawReading::Vector { x: 0.0, y: 1.0 });
        rig.pump(400);
        assert_eq!(rig.controller.output().error, None);
    }

    #[test]
    fn test_subscription_failure_stops_with_error() {
        let mut rig = Rig::new();
        rig.feeder.reject_subscriptions(Some("module missing"));

        let err = rig.controller.start().unwrap_err();
        assert!(matches!(err, FusionError::SourceUnavailable(_)));
        assert_eq!(rig.controller.state(), FusionState::ErrorStopped);
        let output = rig.controller.output();
        assert!(!output.is_active);
        assert_eq!(output.error, Some(ErrorKind::SourceUnavailable));

        // stop is a no-op in this state and keeps the error visible
        rig.controller.stop();
        assert_eq!(rig.controller.output().error, Some(ErrorKind::SourceUnavailable));

        rig.feeder.reject_subscriptions(None);
        rig.controller.start().unwrap();
        assert_eq!(rig.controller.output().error, None);
        assert_eq!(rig.feeder.live_subscriptions(), 1);
    }

    #[test]
    fn test_runtime_source_failure() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.feeder.fail("sensor disconnected");
        rig.pump(0);

        assert_eq!(rig.controller.state(), FusionState::ErrorStopped);
        assert_eq!(rig.controller.output().error, Some(ErrorKind::SourceUnavailable));
        assert_eq!(rig.feeder.live_subscriptions(), 0);
    }

    #[test]
    fn test_insignificant_changes_not_published() {
        let mut config = FusionConfig::default();
        config.heading.significance_degrees = 5.0;
        let mut rig = Rig::with_config(config);
        rig.controller.start().unwrap();

        rig.feed(0, 10.0); // 0 -> 3, under the threshold
        assert_eq!(rig.controller.output().heading, 0.0);

        rig.feed(200, 100.0); // 0 -> 30
        assert!((rig.controller.output().heading - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_throttle_holds_back_then_settles() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.drain_outputs();

        for i in 0..10u64 {
            rig.feed(i * 5, 90.0);
        }
        let outputs = rig.drain_outputs();
        assert_eq!(outputs.len(), 1, "throttle should pass only the first change");
        assert!((outputs[0].heading - 27.0).abs() < 1e-9);

        // after the quiet period the held-back heading is announced
        let deadline = rig.controller.next_deadline().unwrap();
        assert_eq!(deadline, rig.at(45 + 250));
        rig.controller.on_timer(deadline);
        let settled = rig.drain_outputs();
        assert_eq!(settled.len(), 1);
        assert!(settled[0].heading > 80.0, "settled at {}", settled[0].heading);
    }

    #[test]
    fn test_outlier_spike_ignored() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        for i in 0..20u64 {
            rig.feed(i * 200, 90.0);
        }
        // converges until the next step would fall under the significance threshold
        let steady = rig.controller.output().heading;
        assert!((steady - 90.0).abs() < 2.0, "steady at {}", steady);

        rig.feed(4000, 270.0);
        assert!((rig.controller.output().heading - steady).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_tracks_history() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.feed(0, 90.0);
        rig.feed(200, 90.0);
        assert_eq!(rig.controller.output().accuracy, 0.0);
        rig.feed(400, 90.0);
        assert_eq!(rig.controller.output().accuracy, 100.0);
    }

    #[test]
    fn test_passive_calibration() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        // the sweep has to fit inside the history window
        for i in 0..18u64 {
            rig.feed(i * 200, i as f64 * 20.0);
        }
        assert!(rig.controller.output().is_calibrated);
        assert!(rig.controller.calibration_state().range() > 300.0);

        rig.controller.stop();
        assert!(!rig.controller.output().is_calibrated);
        assert_eq!(rig.controller.calibration_state().sample_count, 0);
    }

    #[test]
    fn test_manual_calibration_ticks() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.feed(0, 0.0);

        rig.controller.calibrate(rig.at(0));
        assert!(rig.controller.is_calibrating());

        // rotate the device while the routine samples every 200 ms
        let mut ms = 0;
        for tick in 1..=50u64 {
            ms = tick * 200;
            rig.feed(ms - 10, (tick as f64 * 7.0) % 360.0);
            let due = rig.controller.next_deadline().unwrap();
            rig.controller.on_timer(due.max(rig.at(ms)));
        }
        assert!(!rig.controller.is_calibrating(), "still calibrating at {} ms", ms);
        assert!(rig.controller.output().is_calibrated);
        assert_eq!(rig.controller.calibration_state().sample_count, 50);
    }

    #[test]
    fn test_manual_verdict_not_overturned_by_next_sample() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        for i in 0..12u64 {
            rig.feed(i * 100, i as f64 * 30.0);
        }
        assert!(rig.controller.output().is_calibrated);

        // held still for the whole run
        let begin = rig.at(1200);
        rig.controller.calibrate(begin);
        while let Some(due) = rig.controller.next_deadline() {
            rig.controller.on_timer(due);
        }
        assert!(!rig.controller.is_calibrating());
        assert!(!rig.controller.output().is_calibrated);
        assert_eq!(rig.controller.calibration_state().sample_count, 50);

        rig.feed(20_000, 330.0);
        assert!(!rig.controller.output().is_calibrated);
        assert_eq!(rig.controller.calibration_state().sample_count, 50);
    }

    #[test]
    fn test_calibrate_while_idle_ignored() {
        let mut rig = Rig::new();
        rig.controller.calibrate(rig.at(0));
        assert!(!rig.controller.is_calibrating());
        assert_eq!(rig.controller.next_deadline(), None);
    }

    #[test]
    fn test_stop_cancels_timers() {
        let mut rig = Rig::new();
        rig.controller.start().unwrap();
        rig.feed(0, 90.0);
        rig.feed(5, 90.0);
        rig.controller.calibrate(rig.at(5));
        assert!(rig.controller.next_deadline().is_some());

        rig.controller.stop();
        assert_eq!(rig.controller.next_deadline(), None);
        rig.drain_outputs();
        rig.controller.on_timer(rig.at(10_000));
        assert!(rig.drain_outputs().is_empty());
    }
}
