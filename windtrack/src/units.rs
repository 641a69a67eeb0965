//! Stateless conversion helpers shared by the parsers and the interpolator.

use crate::Timestamp;

pub const KMH_PER_MPS: f64 = 3.6;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 16-point compass rose: English abbreviation, German abbreviation, degrees.
const COMPASS_POINTS: [(&str, &str, f64); 16] = [
    ("N", "N", 0.0),
    ("NNE", "NNO", 22.5),
    ("NE", "NO", 45.0),
    ("ENE", "ONO", 67.5),
    ("E", "O", 90.0),
    ("ESE", "OSO", 112.5),
    ("SE", "SO", 135.0),
    ("SSE", "SSO", 157.5),
    ("S", "S", 180.0),
    ("SSW", "SSW", 202.5),
    ("SW", "SW", 225.0),
    ("WSW", "WSW", 247.5),
    ("W", "W", 270.0),
    ("WNW", "WNW", 292.5),
    ("NW", "NW", 315.0),
    ("NNW", "NNW", 337.5),
];

pub fn mps_to_kmh(speed_mps: f64) -> f64 {
    speed_mps * KMH_PER_MPS
}

/// Maps compass text (English or German abbreviations) to degrees in `[0, 360)`.
pub fn map_direction(text: &str) -> Option<f64> {
    let key = text.trim().to_ascii_uppercase();
    COMPASS_POINTS
        .iter()
        .find(|(en, de, _)| *en == key || *de == key)
        .map(|&(_, _, deg)| deg)
}

/// Parses temperatures such as `" 28.3 C"`, `"28.4C"`, `"-2.5 °C"` or `"28.5"`.
pub fn parse_temperature(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let numeric = match trimmed.find('C') {
        Some(idx) if idx > 0 => &trimmed[..idx],
        _ => trimmed,
    };
    numeric.trim().trim_end_matches('°').trim().parse().ok()
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from the first fix to the second, in `[0, 360)`.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();
    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// FIT positions are stored as semicircles (2^31 per 180°).
pub fn semicircles_to_degrees(semicircles: f64) -> f64 {
    semicircles * (180.0 / 2_147_483_648.0)
}

/// Numeric time axis used for curve fitting.
pub fn epoch_millis(time: Timestamp) -> f64 {
    time.timestamp_millis() as f64
}
