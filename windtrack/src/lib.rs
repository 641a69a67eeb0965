//! Correlates high-speed GPS track segments with time-interpolated weather-station readings.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod correlate;
pub mod interpolate;
pub mod parse;
pub mod segment;
pub mod units;
pub mod window;

pub use correlate::{
    correlate, correlate_segment, merge, CorrelateParams, CorrelatedSegment, Correlation,
    SegmentFailure,
};
pub use interpolate::{interpolate, DirectionMode, NaturalSpline, WeatherField};
pub use parse::{parse_tracks, parse_weather_csv};
pub use segment::{extract, extract_from_tracks, filter_by_interval, select_segments};
pub use window::{select_window, Window};

pub type Timestamp = DateTime<Utc>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WtError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("failed to parse weather table: {0}")]
    WeatherParse(String),
    #[error("insufficient data for interpolation: {available} weather point(s), need at least 2")]
    InsufficientData { available: usize },
    #[error("no weather data brackets {from} .. {to}")]
    EmptyWindow { from: Timestamp, to: Timestamp },
    #[error("alignment mismatch: {actual} weather points for {expected} track points")]
    Alignment { expected: usize, actual: usize },
    #[error("weather point {index} does not share its track point's timestamp")]
    Misaligned { index: usize },
    #[error("invalid series: {0}")]
    InvalidSeries(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Wind annotation written onto a track point by correlation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct WindReading {
    pub direction_deg: f64,
    pub speed_kmh: f64,
    pub gust_kmh: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    pub time: Timestamp,
    pub lat: f64,
    pub lon: f64,
    pub elevation_m: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub wind: Option<WindReading>,
}

impl TrackPoint {
    pub fn new(
        time: Timestamp,
        lat: f64,
        lon: f64,
        elevation_m: f64,
        speed_kmh: f64,
        course_deg: f64,
    ) -> Self {
        Self {
            time,
            lat,
            lon,
            elevation_m,
            speed_kmh,
            course_deg,
            wind: None,
        }
    }

    /// Copy of this point carrying the given wind annotation.
    pub fn with_wind(&self, wind: WindReading) -> Self {
        Self {
            wind: Some(wind),
            ..self.clone()
        }
    }
}

/// A non-empty, chronologically ordered run of track points.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TrackSegment {
    points: Vec<TrackPoint>,
}

impl TrackSegment {
    pub fn new(points: Vec<TrackPoint>) -> Result<Self, WtError> {
        if points.is_empty() {
            return Err(WtError::InvalidSeries("track segment has no points".into()));
        }
        if let Some(idx) = points.windows(2).position(|w| w[1].time < w[0].time) {
            return Err(WtError::InvalidSeries(format!(
                "track point {} is earlier than its predecessor",
                idx + 1
            )));
        }
        Ok(Self { points })
    }

    /// Wraps a run that is already known to be non-empty and ordered.
    pub(crate) fn from_run(points: Vec<TrackPoint>) -> Self {
        debug_assert!(!points.is_empty());
        Self { points }
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<TrackPoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> &TrackPoint {
        &self.points[0]
    }

    pub fn last(&self) -> &TrackPoint {
        &self.points[self.points.len() - 1]
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.points.iter().map(|p| p.time).collect()
    }

    /// Time range spanned by the segment, first to last point.
    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            start: self.first().time,
            end: self.last().time,
        }
    }

    /// True once every point carries a wind annotation.
    pub fn has_wind(&self) -> bool {
        self.points.iter().all(|p| p.wind.is_some())
    }

    pub fn summary(&self) -> SegmentSummary {
        let interval = self.interval();
        let max_speed_kmh = self
            .points
            .iter()
            .map(|p| p.speed_kmh)
            .fold(f64::NEG_INFINITY, f64::max);
        let mean_speed_kmh =
            self.points.iter().map(|p| p.speed_kmh).sum::<f64>() / self.points.len() as f64;
        SegmentSummary {
            start: interval.start,
            end: interval.end,
            duration_s: (interval.end - interval.start).num_milliseconds() as f64 / 1000.0,
            points: self.points.len(),
            max_speed_kmh,
            mean_speed_kmh,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentSummary {
    pub start: Timestamp,
    pub end: Timestamp,
    pub duration_s: f64,
    pub points: usize,
    pub max_speed_kmh: f64,
    pub mean_speed_kmh: f64,
}

#[derive(Clone, Debug, Serialize, Default, PartialEq)]
pub struct Track {
    pub name: Option<String>,
    pub segments: Vec<TrackSegment>,
}

impl Track {
    pub fn point_count(&self) -> usize {
        self.segments.iter().map(TrackSegment::len).sum()
    }
}

/// One weather-station sample. Direction is in degrees, speeds in km/h, temperatures in °C.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct WeatherPoint {
    pub time: Timestamp,
    pub direction_deg: f64,
    pub wind_kmh: f64,
    pub gust_kmh: f64,
    pub temperature_c: f64,
    pub chill_c: f64,
}

impl WeatherPoint {
    /// A sample at `time` with every numeric field zeroed.
    pub fn empty_at(time: Timestamp) -> Self {
        Self {
            time,
            direction_deg: 0.0,
            wind_kmh: 0.0,
            gust_kmh: 0.0,
            temperature_c: 0.0,
            chill_c: 0.0,
        }
    }
}

/// A `(start, end)` pair whose bounds are both exclusive when tested against samples.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "IntervalBounds")]
pub struct TimeInterval {
    start: Timestamp,
    end: Timestamp,
}

impl TimeInterval {
    /// `start == end` is accepted for single-instant segments; nothing lies strictly inside it.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, WtError> {
        if start > end {
            return Err(WtError::InvalidParameter(format!(
                "interval start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn contains(&self, time: Timestamp) -> bool {
        self.start < time && time < self.end
    }
}

#[derive(Deserialize)]
struct IntervalBounds {
    start: Timestamp,
    end: Timestamp,
}

impl TryFrom<IntervalBounds> for TimeInterval {
    type Error = WtError;

    fn try_from(bounds: IntervalBounds) -> Result<Self, Self::Error> {
        TimeInterval::new(bounds.start, bounds.end)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub speed_threshold_kmh: f64,
    pub min_points: usize,
    pub direction_mode: DirectionMode,
    pub strict_padding: bool,
    pub parallel: bool,
    /// Time zone of the weather table's local timestamps.
    pub weather_tz: Tz,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            speed_threshold_kmh: 32.0,
            min_points: 150,
            direction_mode: DirectionMode::Scalar,
            strict_padding: true,
            parallel: false,
            weather_tz: chrono_tz::Europe::Vienna,
            from: None,
            to: None,
        }
    }
}

impl Params {
    pub fn from_json_str(text: &str) -> Result<Self, WtError> {
        serde_json::from_str(text).map_err(|e| WtError::InvalidParameter(e.to_string()))
    }

    pub fn correlate_params(&self) -> CorrelateParams {
        CorrelateParams {
            direction_mode: self.direction_mode,
            strict_padding: self.strict_padding,
            parallel: self.parallel,
        }
    }

    /// Optional time filter applied to track points before extraction.
    ///
    /// A missing bound is left open, so `from` alone keeps everything after it.
    pub fn time_filter(&self) -> Result<Option<TimeInterval>, WtError> {
        match (self.from, self.to) {
            (None, None) => Ok(None),
            (from, to) => {
                let start = from.unwrap_or(DateTime::<Utc>::MIN_UTC);
                let end = to.unwrap_or(DateTime::<Utc>::MAX_UTC);
                if start >= end {
                    return Err(WtError::InvalidParameter(format!(
                        "time filter start {} is not before end {}",
                        start, end
                    )));
                }
                TimeInterval::new(start, end).map(Some)
            }
        }
    }
}
