//! Per-segment correlation of track points with resampled weather readings.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::interpolate::{interpolate, DirectionMode};
use crate::window::select_window;
use crate::{TimeInterval, TrackSegment, WeatherPoint, WindReading, WtError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelateParams {
    pub direction_mode: DirectionMode,
    /// Treat a window missing either pad as [`WtError::EmptyWindow`] instead of letting the
    /// interpolator zero-fill the uncovered points.
    pub strict_padding: bool,
    /// Spread segments over the rayon pool. Output order is unaffected.
    pub parallel: bool,
}

impl Default for CorrelateParams {
    fn default() -> Self {
        Self {
            direction_mode: DirectionMode::Scalar,
            strict_padding: true,
            parallel: false,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CorrelatedSegment {
    /// Position of the segment in the input slice.
    pub index: usize,
    pub segment: TrackSegment,
    /// The resampled weather the segment was enriched from, one point per track point.
    pub weather: Vec<WeatherPoint>,
}

#[derive(Clone, Debug)]
pub struct SegmentFailure {
    pub index: usize,
    pub interval: TimeInterval,
    pub error: WtError,
}

#[derive(Clone, Debug, Default)]
pub struct Correlation {
    pub segments: Vec<CorrelatedSegment>,
    pub failures: Vec<SegmentFailure>,
}

impl Correlation {
    pub fn attempted(&self) -> usize {
        self.segments.len() + self.failures.len()
    }

    pub fn succeeded(&self) -> usize {
        self.segments.len()
    }

    pub fn into_segments(self) -> Vec<TrackSegment> {
        self.segments.into_iter().map(|s| s.segment).collect()
    }
}

/// Enriches every segment with wind readings interpolated from `weather`.
///
/// A segment that cannot be correlated is recorded in [`Correlation::failures`] and
/// the remaining segments are still processed.
pub fn correlate(
    segments: &[TrackSegment],
    weather: &[WeatherPoint],
    params: &CorrelateParams,
) -> Correlation {
    let run = |(index, segment): (usize, &TrackSegment)| {
        (index, correlate_segment(segment, weather, params))
    };
    let outcomes: Vec<_> = if params.parallel {
        segments.par_iter().enumerate().map(run).collect()
    } else {
        segments.iter().enumerate().map(run).collect()
    };

    let mut result = Correlation::default();
    for (index, outcome) in outcomes {
        match outcome {
            Ok((segment, weather)) => result.segments.push(CorrelatedSegment {
                index,
                segment,
                weather,
            }),
            Err(error) => {
                let interval = segments[index].interval();
                warn!(
                    segment = index,
                    from = %interval.start(),
                    to = %interval.end(),
                    "skipping segment: {}",
                    error
                );
                result.failures.push(SegmentFailure {
                    index,
                    interval,
                    error,
                });
            }
        }
    }
    info!(
        "correlated {} of {} segments",
        result.succeeded(),
        result.attempted()
    );
    result
}

/// Correlates one segment, returning the enriched copy and the resampled weather.
pub fn correlate_segment(
    segment: &TrackSegment,
    weather: &[WeatherPoint],
    params: &CorrelateParams,
) -> Result<(TrackSegment, Vec<WeatherPoint>), WtError> {
    let interval = segment.interval();
    let window = select_window(weather, &interval)?;
    if !window.is_bracketed() {
        if params.strict_padding {
            return Err(WtError::EmptyWindow {
                from: interval.start(),
                to: interval.end(),
            });
        }
        debug!(
            left_pad = window.has_left_pad(),
            right_pad = window.has_right_pad(),
            "weather window only partially covers {} .. {}",
            interval.start(),
            interval.end()
        );
    }

    let resampled = interpolate(window.points(), &segment.timestamps(), params.direction_mode)?;
    let enriched = merge(segment, &resampled)?;
    debug!(
        points = enriched.len(),
        knots = window.len(),
        "enriched segment {} .. {}",
        interval.start(),
        interval.end()
    );
    Ok((enriched, resampled))
}

/// Writes wind direction, speed and gust onto copies of the segment's points, pairing
/// the i-th weather point with the i-th track point.
pub fn merge(segment: &TrackSegment, weather: &[WeatherPoint]) -> Result<TrackSegment, WtError> {
    if weather.len() != segment.len() {
        return Err(WtError::Alignment {
            expected: segment.len(),
            actual: weather.len(),
        });
    }
    let points = segment
        .points()
        .iter()
        .zip(weather)
        .enumerate()
        .map(|(index, (point, reading))| {
            if point.time != reading.time {
                return Err(WtError::Misaligned { index });
            }
            Ok(point.with_wind(WindReading {
                direction_deg: reading.direction_deg,
                speed_kmh: reading.wind_kmh,
                gust_kmh: reading.gust_kmh,
            }))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TrackSegment::from_run(points))
}
