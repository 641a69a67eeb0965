//! Selection of the weather samples that bracket a time interval.

use crate::{TimeInterval, WeatherPoint, WtError};

/// Contiguous slice of a weather series around an interval.
///
/// The left pad is the last sample at or before the interval start, the right pad the
/// first sample at or after its end. Either may be missing when the series does not
/// reach that far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window<'a> {
    points: &'a [WeatherPoint],
    has_left_pad: bool,
    has_right_pad: bool,
}

impl<'a> Window<'a> {
    pub fn points(&self) -> &'a [WeatherPoint] {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_left_pad(&self) -> bool {
        self.has_left_pad
    }

    pub fn has_right_pad(&self) -> bool {
        self.has_right_pad
    }

    /// Both pads present, so interpolation over the interval never extrapolates.
    pub fn is_bracketed(&self) -> bool {
        self.has_left_pad && self.has_right_pad
    }
}

/// Smallest slice of `points` that brackets `interval`.
///
/// `points` must be in strictly increasing time order. The result holds the left pad,
/// every sample strictly inside the interval and the right pad, and nothing past it.
/// With no sample inside, the two nearest bracketing samples are returned. A series
/// that neither reaches into nor brackets the interval yields [`WtError::EmptyWindow`].
pub fn select_window<'a>(
    points: &'a [WeatherPoint],
    interval: &TimeInterval,
) -> Result<Window<'a>, WtError> {
    debug_assert!(points.windows(2).all(|w| w[0].time < w[1].time));
    let (from, to) = (interval.start(), interval.end());

    let at_or_before = points.partition_point(|p| p.time <= from);
    let inside_end = at_or_before + points[at_or_before..].partition_point(|p| p.time < to);

    let has_left_pad = at_or_before > 0;
    let has_right_pad = inside_end < points.len();
    let inside = inside_end - at_or_before;
    if inside == 0 && !(has_left_pad && has_right_pad) {
        return Err(WtError::EmptyWindow { from, to });
    }

    let start = if has_left_pad { at_or_before - 1 } else { 0 };
    let end = if has_right_pad {
        inside_end + 1
    } else {
        points.len()
    };
    Ok(Window {
        points: &points[start..end],
        has_left_pad,
        has_right_pad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ts, weather_point};
    use crate::Timestamp;

    fn series(secs: &[i64]) -> Vec<WeatherPoint> {
        secs.iter().map(|&s| weather_point(s, s as f64)).collect()
    }

    fn times(window: &Window<'_>) -> Vec<Timestamp> {
        window.points().iter().map(|p| p.time).collect()
    }

    fn interval(from: i64, to: i64) -> TimeInterval {
        TimeInterval::new(ts(from), ts(to)).unwrap()
    }

    #[test]
    fn test_bracketing_points_without_inner_samples() {
        let points = series(&[0, 10, 20, 30]);
        let window = select_window(&points, &interval(12, 18)).unwrap();
        assert_eq!(times(&window), vec![ts(10), ts(20)]);
        assert!(window.is_bracketed());
    }

    #[test]
    fn test_samples_on_bounds_are_pads() {
        let points = series(&[0, 10, 20, 30]);
        let window = select_window(&points, &interval(10, 20)).unwrap();
        assert_eq!(times(&window), vec![ts(10), ts(20)]);
    }

    #[test]
    fn test_inner_samples_with_pads_and_stop_after_right_pad() {
        let points = series(&[0, 10, 20, 30, 40, 50]);
        let window = select_window(&points, &interval(5, 25)).unwrap();
        assert_eq!(times(&window), vec![ts(0), ts(10), ts(20), ts(30)]);
    }

    #[test]
    fn test_bracketing_property() {
        let points = series(&[0, 7, 13, 20, 26, 41, 55, 60]);
        for (from, to) in [(1, 2), (3, 30), (7, 13), (14, 54), (20, 59), (0, 60)] {
            let window = select_window(&points, &interval(from, to)).unwrap();
            let first = window.points().first().unwrap().time;
            let last = window.points().last().unwrap().time;
            assert!(first <= ts(from), "window for ({}, {})", from, to);
            assert!(last >= ts(to), "window for ({}, {})", from, to);
        }
    }

    #[test]
    fn test_missing_pads_are_reported() {
        let points = series(&[0, 10, 20, 30]);
        let window = select_window(&points, &interval(-5, 15)).unwrap();
        assert_eq!(times(&window), vec![ts(0), ts(10), ts(20)]);
        assert!(!window.has_left_pad());
        assert!(window.has_right_pad());

        let window = select_window(&points, &interval(25, 45)).unwrap();
        assert_eq!(times(&window), vec![ts(20), ts(30)]);
        assert!(window.has_left_pad());
        assert!(!window.has_right_pad());
    }

    #[test]
    fn test_no_coverage_is_empty_window() {
        let points = series(&[0, 10, 20, 30]);
        assert!(matches!(
            select_window(&points, &interval(40, 50)),
            Err(WtError::EmptyWindow { .. })
        ));
        assert!(matches!(
            select_window(&points, &interval(-20, -10)),
            Err(WtError::EmptyWindow { .. })
        ));
        assert!(select_window(&[], &interval(0, 10)).is_err());
    }

    #[test]
    fn test_single_instant_interval() {
        let points = series(&[0, 10, 20]);
        let window = select_window(&points, &interval(10, 10)).unwrap();
        assert_eq!(times(&window), vec![ts(10), ts(20)]);
        let window = select_window(&points, &interval(15, 15)).unwrap();
        assert_eq!(times(&window), vec![ts(10), ts(20)]);
    }
}
