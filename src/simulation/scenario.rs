use crate::sensor::{Recording, ReplayRecord};
use crate::signal_processing::math::{Coordinate, EARTH_RADIUS_M};
use crate::signal_processing::normalize;

use super::noise::{CompassNoise, NoiseConfig};

/// How the device's true heading evolves over time
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RotationProfile {
    /// Fixed heading
    Steady { heading: f64 },
    /// Constant rate turn
    Turn {
        start: f64,
        rate_degrees_per_sec: f64,
    },
    /// Sinusoidal swing around a center heading
    Sweep {
        center: f64,
        amplitude: f64,
        period_sec: f64,
    },
}

impl RotationProfile {
    pub fn heading_at(&self, t_sec: f64) -> f64 {
        match *self {
            Self::Steady { heading } => normalize(heading),
            Self::Turn {
                start,
                rate_degrees_per_sec,
            } => normalize(start + rate_degrees_per_sec * t_sec),
            Self::Sweep {
                center,
                amplitude,
                period_sec,
            } => {
                let phase = if period_sec > 0.0 {
                    2.0 * std::f64::consts::PI * t_sec / period_sec
                } else {
                    0.0
                };
                normalize(center + amplitude * phase.sin())
            }
        }
    }
}

impl Default for RotationProfile {
    fn default() -> Self {
        Self::Steady { heading: 0.0 }
    }
}

/// A vehicle driving in the direction it faces
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct GpsTrack {
    pub start: Coordinate,
    pub speed_mps: f64,
    pub fix_interval_ms: u64,
    /// Horizontal accuracy reported with every fix
    pub accuracy_m: f64,
    /// Whether fixes carry a course over ground
    pub report_course: bool,
}

impl Default for GpsTrack {
    fn default() -> Self {
        Self {
            start: Coordinate::new(37.7749, -122.4194),
            speed_mps: 10.0,
            fix_interval_ms: 1000,
            accuracy_m: 8.0,
            report_course: false,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub duration_sec: f64,
    pub sample_interval_ms: u64,
    pub profile: RotationProfile,
    pub noise: NoiseConfig,
    /// Record magnetometer vectors instead of compass headings
    pub vector_readings: bool,
    /// Magnitude of recorded magnetometer vectors
    pub field_strength: f64,
    pub gps: Option<GpsTrack>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            duration_sec: 10.0,
            sample_interval_ms: 100,
            profile: RotationProfile::default(),
            noise: NoiseConfig::default(),
            vector_readings: false,
            field_strength: 25.0,
            gps: None,
        }
    }
}

/// A synthetic recording plus the headings it was generated from
#[derive(Debug, Clone)]
pub struct GeneratedScenario {
    pub recording: Recording,
    /// `(t_ms, true heading)` for every compass sample
    pub truth: Vec<(u64, f64)>,
}

pub fn generate_recording(scenario: &Scenario) -> GeneratedScenario {
    let mut noise = CompassNoise::new(&scenario.noise);
    let duration_ms = (scenario.duration_sec.max(0.0) * 1000.0) as u64;
    let step = scenario.sample_interval_ms.max(1);

    let mut records = Vec::new();
    let mut truth = Vec::new();

    for t_ms in (0..=duration_ms).step_by(step as usize) {
        let heading = scenario.profile.heading_at(t_ms as f64 / 1000.0);
        truth.push((t_ms, heading));

        let record = match noise.apply(heading) {
            Some(measured) if scenario.vector_readings => {
                let radians = measured.to_radians();
                ReplayRecord::Vector {
                    t_ms,
                    x: scenario.field_strength * radians.cos(),
                    y: scenario.field_strength * radians.sin(),
                }
            }
            measured => ReplayRecord::Heading {
                t_ms,
                degrees: measured,
                accuracy: None,
            },
        };
        records.push(record);
    }

    if let Some(track) = &scenario.gps {
        records.extend(generate_fixes(track, &scenario.profile, duration_ms));
    }

    records.sort_by_key(ReplayRecord::t_ms);
    GeneratedScenario {
        recording: Recording { records },
        truth,
    }
}

fn generate_fixes(track: &GpsTrack, profile: &RotationProfile, duration_ms: u64) -> Vec<ReplayRecord> {
    let step = track.fix_interval_ms.max(1);
    let mut position = track.start;
    let mut fixes = Vec::new();
    let mut last_ms = 0;

    for t_ms in (0..=duration_ms).step_by(step as usize) {
        let heading = profile.heading_at(t_ms as f64 / 1000.0);
        let distance = track.speed_mps * (t_ms - last_ms) as f64 / 1000.0;
        position = advance(position, heading, distance);
        last_ms = t_ms;

        fixes.push(ReplayRecord::Fix {
            t_ms,
            latitude: position.latitude,
            longitude: position.longitude,
            gps_heading: track.report_course.then_some(heading),
            accuracy: track.accuracy_m,
        });
    }
    fixes
}

/// Move `distance_m` along `heading` on a locally flat Earth
fn advance(from: Coordinate, heading: f64, distance_m: f64) -> Coordinate {
    let radians = heading.to_radians();
    let d_lat = distance_m * radians.cos() / EARTH_RADIUS_M;
    let d_lon = distance_m * radians.sin() / (EARTH_RADIUS_M * from.latitude.to_radians().cos());
    Coordinate::new(
        from.latitude + d_lat.to_degrees(),
        from.longitude + d_lon.to_degrees(),
    )
}
