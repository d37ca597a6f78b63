use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::Receiver;
use headingfusion::config::FusionConfig;
use headingfusion::error::{ErrorKind, FusionError};
use headingfusion::fusion::HeadingOrigin;
use headingfusion::sensor::{
    LocationFix, ManualLocationFeeder, ManualLocationSource, ManualSource, ReplaySource,
};
use headingfusion::simulation::{
    GpsTrack, NoiseConfig, RotationProfile, Scenario, angle_error, generate_recording,
};
use headingfusion::{FusionService, FusionState};

const WAIT: Duration = Duration::from_secs(5);

fn fix(latitude: f64, longitude: f64, gps_heading: Option<f64>) -> LocationFix {
    LocationFix {
        latitude,
        longitude,
        gps_heading,
        accuracy: 6.0,
        timestamp: Utc::now(),
    }
}

/// Wait until a received value satisfies `pred`
fn wait_for<T>(rx: &Receiver<T>, pred: impl Fn(&T) -> bool) -> Option<T> {
    let deadline = Instant::now() + WAIT;
    while let Ok(value) = rx.recv_deadline(deadline) {
        if pred(&value) {
            return Some(value);
        }
    }
    None
}

fn location_pair() -> (Option<Box<dyn headingfusion::sensor::LocationSource>>, ManualLocationFeeder) {
    let (source, feeder) = ManualLocationSource::new();
    (Some(Box::new(source)), feeder)
}

#[test]
fn test_no_output_after_stop() {
    let (source, feeder) = ManualSource::new();
    let service = FusionService::spawn(&FusionConfig::default(), Box::new(source), None).unwrap();
    let outputs = service.subscribe().unwrap();

    service.start().unwrap();
    feeder.push_heading(90.0);
    assert!(wait_for(&outputs, |o| o.heading > 0.0).is_some());

    service.stop().unwrap();
    let stopped = wait_for(&outputs, |o| !o.is_active).unwrap();
    assert_eq!(stopped.accuracy, 0.0);
    assert_eq!(feeder.live_subscriptions(), 0);

    assert_eq!(feeder.push_heading(180.0), 0);
    assert!(outputs.recv_timeout(Duration::from_millis(400)).is_err());
}

#[test]
fn test_stop_without_start() {
    let (source, _feeder) = ManualSource::new();
    let service = FusionService::spawn(&FusionConfig::default(), Box::new(source), None).unwrap();
    let outputs = service.subscribe().unwrap();
    service.stop().unwrap();
    assert_eq!(service.snapshot().unwrap().state, FusionState::Idle);
    assert!(outputs.try_recv().is_err());
}

#[test]
fn test_start_failure_reported() {
    let (source, feeder) = ManualSource::new();
    feeder.reject_subscriptions(Some("no compass"));
    let service = FusionService::spawn(&FusionConfig::default(), Box::new(source), None).unwrap();

    let err = service.start().unwrap_err();
    assert!(matches!(err, FusionError::SourceUnavailable(_)));
    let snapshot = service.snapshot().unwrap();
    assert_eq!(snapshot.state, FusionState::ErrorStopped);
    assert_eq!(snapshot.output.error, Some(ErrorKind::SourceUnavailable));
}

#[test]
fn test_manual_calibration_lifecycle() {
    let mut config = FusionConfig::default();
    config.calibration.tick_interval_ms = 10;
    config.calibration.tick_budget = 5;

    let (source, feeder) = ManualSource::new();
    let service = FusionService::spawn(&config, Box::new(source), None).unwrap();
    service.start().unwrap();
    feeder.push_heading(90.0);

    service.calibrate().unwrap();
    let snapshot = service.snapshot().unwrap();
    assert!(snapshot.calibrating);

    let deadline = Instant::now() + WAIT;
    let mut snapshot = service.snapshot().unwrap();
    while snapshot.calibrating && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        snapshot = service.snapshot().unwrap();
    }
    assert!(!snapshot.calibrating);
    assert_eq!(snapshot.calibration.sample_count, 5);
    assert!(!snapshot.output.is_calibrated);
}

#[test]
fn test_tracking_falls_back_to_gps() {
    let (compass, compass_feeder) = ManualSource::new();
    compass_feeder.reject_subscriptions(Some("no magnetometer"));
    let (location, location_feeder) = location_pair();
    location_feeder.set_current_fix(Some(fix(10.0, 20.0, Some(135.0))));

    let service = FusionService::spawn(&FusionConfig::default(), Box::new(compass), location).unwrap();
    let states = service.subscribe_location().unwrap();
    service.start_tracking().unwrap();

    let state = wait_for(&states, |_| true).unwrap();
    assert_eq!(state.heading_origin, HeadingOrigin::Gps);
    assert_eq!(state.display_heading, 135.0);
    assert_eq!(state.compass_heading, None);

    let snapshot = service.snapshot().unwrap();
    assert!(snapshot.tracking);
    assert_eq!(snapshot.output.error, Some(ErrorKind::SourceUnavailable));
    assert_eq!(location_feeder.live_watches(), 1);
}

#[test]
fn test_tracking_prefers_compass() {
    let (compass, compass_feeder) = ManualSource::new();
    let (location, location_feeder) = location_pair();
    location_feeder.set_current_fix(Some(fix(10.0, 20.0, None)));

    let service = FusionService::spawn(&FusionConfig::default(), Box::new(compass), location).unwrap();
    let states = service.subscribe_location().unwrap();
    service.start_tracking().unwrap();
    assert_eq!(compass_feeder.live_subscriptions(), 1);

    compass_feeder.push_heading(100.0);
    let state = wait_for(&states, |s| s.display_heading > 0.0).unwrap();
    assert_eq!(state.compass_heading, Some(state.display_heading));
    assert!((state.display_heading - 30.0).abs() < 1e-9);

    // a fix moving north derives a bearing, but the compass keeps the display
    location_feeder.push(fix(10.001, 20.0, None));
    let state = wait_for(&states, |s| s.heading_origin == HeadingOrigin::Derived).unwrap();
    assert!(state.heading.abs() < 1e-6);
    assert!((state.display_heading - 30.0).abs() < 1e-9);

    service.stop_tracking().unwrap();
    assert_eq!(compass_feeder.live_subscriptions(), 0);
    assert_eq!(location_feeder.live_watches(), 0);
    // with the compass off the display falls back to the derived bearing
    let state = service.snapshot().unwrap().location.unwrap();
    assert!(state.display_heading.abs() < 1e-6);
}

#[test]
fn test_location_watch_error_reported() {
    let (compass, _compass_feeder) = ManualSource::new();
    let (location, location_feeder) = location_pair();
    location_feeder.set_current_fix(Some(fix(10.0, 20.0, Some(90.0))));

    let service = FusionService::spawn(&FusionConfig::default(), Box::new(compass), location).unwrap();
    service.start_tracking().unwrap();
    assert_eq!(service.snapshot().unwrap().location_error, None);

    assert_eq!(location_feeder.fail("gps lost"), 1);
    let deadline = Instant::now() + WAIT;
    let mut snapshot = service.snapshot().unwrap();
    while snapshot.location_error.is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
        snapshot = service.snapshot().unwrap();
    }
    assert_eq!(snapshot.location_error, Some(ErrorKind::SourceUnavailable));
    assert!(snapshot.tracking);
    assert_eq!(snapshot.output.error, None);

    // the next accepted fix clears it
    let states = service.subscribe_location().unwrap();
    location_feeder.push(fix(10.001, 20.0, Some(90.0)));
    assert!(wait_for(&states, |s| s.latitude > 10.0).is_some());
    assert_eq!(service.snapshot().unwrap().location_error, None);
}

#[test]
fn test_tracking_permission_denied() {
    let (compass, compass_feeder) = ManualSource::new();
    let (location, location_feeder) = location_pair();
    location_feeder.deny_permission(true);

    let service = FusionService::spawn(&FusionConfig::default(), Box::new(compass), location).unwrap();
    assert_eq!(service.start_tracking(), Err(FusionError::PermissionDenied));
    assert_eq!(compass_feeder.live_subscriptions(), 0);
    assert!(!service.snapshot().unwrap().tracking);
}

#[test]
fn test_replay_end_to_end() {
    let scenario = Scenario {
        duration_sec: 3.0,
        profile: RotationProfile::Steady { heading: 250.0 },
        noise: NoiseConfig::default().with_seed(21).with_jitter(1.5),
        gps: Some(GpsTrack {
            report_course: true,
            ..GpsTrack::default()
        }),
        ..Scenario::default()
    };
    let generated = generate_recording(&scenario);
    let replay = ReplaySource::new(generated.recording, 5.0);
    let finished = replay.finished();

    let service = FusionService::spawn(
        &FusionConfig::default(),
        Box::new(replay.heading_source()),
        Some(Box::new(replay.location_source())),
    )
    .unwrap();
    let outputs = service.subscribe().unwrap();
    service.start_tracking().unwrap();

    finished.recv_timeout(WAIT).unwrap();
    finished.recv_timeout(WAIT).unwrap();
    std::thread::sleep(Duration::from_millis(800));

    let snapshot = service.snapshot().unwrap();
    assert!(
        angle_error(snapshot.output.heading, 250.0).abs() < 5.0,
        "heading {}",
        snapshot.output.heading
    );
    let location = snapshot.location.unwrap();
    assert_eq!(location.heading_origin, HeadingOrigin::Gps);
    assert!((location.heading - 250.0).abs() < 1e-9);
    assert_eq!(location.display_heading, snapshot.output.heading);
    assert!(outputs.try_iter().count() > 2);
}
