//! Angular helpers shared by every stage of the pipeline.
//!
//! All angles are degrees clockwise from north.

/// Mean Earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Normalize any finite angle to [0, 360)
pub fn normalize(degrees: f64) -> f64 {
    let wrapped = ((degrees % 360.0) + 360.0) % 360.0;
    // tiny negative inputs round up to exactly 360.0 in the addition
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Shortest signed rotation from `from` to `to`, in (-180, 180]
///
/// Exactly opposite headings resolve to +180, so `angle_diff(a, b) ==
/// -angle_diff(b, a)` holds everywhere except at that tie.
pub fn angle_diff(from: f64, to: f64) -> f64 {
    let diff = normalize(to) - normalize(from);
    if diff > 180.0 {
        diff - 360.0
    } else if diff <= -180.0 {
        diff + 360.0
    } else {
        diff
    }
}

/// Step `factor` of the way from `from` toward `to` along the short arc
///
/// The result is not normalized.
pub fn interpolate(from: f64, to: f64, factor: f64) -> f64 {
    from + angle_diff(from, to) * factor
}

/// Initial great-circle bearing from one position to another, in [0, 360)
pub fn bearing(from: &Coordinate, to: &Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    normalize(y.atan2(x).to_degrees())
}

/// Haversine distance in metres
pub fn distance_m(from: &Coordinate, to: &Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Heading of a horizontal magnetometer vector, in [0, 360)
pub fn heading_from_vector(x: f64, y: f64) -> f64 {
    normalize(y.atan2(x).to_degrees())
}

/// Eight-point compass rose label for a heading
pub fn heading_to_cardinal(heading: f64) -> &'static str {
    const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let index = (normalize(heading) / 45.0).round() as usize % DIRECTIONS.len();
    DIRECTIONS[index]
}
