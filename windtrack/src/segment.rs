//! Speed-threshold segmentation of track points.

use tracing::debug;

use crate::{Params, TimeInterval, Track, TrackPoint, TrackSegment, WtError};

/// Split `points` into maximal runs whose speed is strictly above `speed_threshold_kmh`.
///
/// A run is kept only when it holds more than `min_points` points; a run of exactly
/// `min_points` is dropped. Points keep their input order, so ordered input yields
/// ordered segments.
pub fn extract(
    points: &[TrackPoint],
    speed_threshold_kmh: f64,
    min_points: usize,
) -> Vec<TrackSegment> {
    let mut segments = Vec::new();
    let mut run: Vec<TrackPoint> = Vec::new();
    for point in points {
        if point.speed_kmh > speed_threshold_kmh {
            run.push(point.clone());
        } else {
            close_run(&mut run, min_points, &mut segments);
        }
    }
    close_run(&mut run, min_points, &mut segments);
    segments
}

fn close_run(run: &mut Vec<TrackPoint>, min_points: usize, segments: &mut Vec<TrackSegment>) {
    if run.len() > min_points {
        segments.push(TrackSegment::from_run(std::mem::take(run)));
    } else {
        run.clear();
    }
}

/// Runs [`extract`] over every segment of every track, in order.
pub fn extract_from_tracks(
    tracks: &[Track],
    speed_threshold_kmh: f64,
    min_points: usize,
) -> Vec<TrackSegment> {
    tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| extract(segment.points(), speed_threshold_kmh, min_points))
        .collect()
}

/// Points strictly inside `interval`.
pub fn filter_by_interval(points: &[TrackPoint], interval: &TimeInterval) -> Vec<TrackPoint> {
    points
        .iter()
        .filter(|p| interval.contains(p.time))
        .cloned()
        .collect()
}

/// Applies the optional time filter from `params`, then extracts high-speed segments.
pub fn select_segments(tracks: &[Track], params: &Params) -> Result<Vec<TrackSegment>, WtError> {
    let filter = params.time_filter()?;
    let mut out = Vec::new();
    for (track_idx, track) in tracks.iter().enumerate() {
        for segment in &track.segments {
            let extracted = match filter.as_ref() {
                Some(interval) => extract(
                    &filter_by_interval(segment.points(), interval),
                    params.speed_threshold_kmh,
                    params.min_points,
                ),
                None => extract(
                    segment.points(),
                    params.speed_threshold_kmh,
                    params.min_points,
                ),
            };
            debug!(
                track = track_idx,
                name = track.name.as_deref().unwrap_or(""),
                points = segment.len(),
                extracted = extracted.len(),
                "segmented track"
            );
            out.extend(extracted);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{track_point, ts};

    fn points_with_speeds(speeds: &[f64]) -> Vec<TrackPoint> {
        speeds
            .iter()
            .enumerate()
            .map(|(i, &s)| track_point(i as i64, s))
            .collect()
    }

    fn speeds_of(segment: &TrackSegment) -> Vec<f64> {
        segment.points().iter().map(|p| p.speed_kmh).collect()
    }

    #[test]
    fn test_extract_two_runs() {
        let points = points_with_speeds(&[10.0, 40.0, 45.0, 50.0, 5.0, 60.0, 60.0, 60.0, 5.0]);
        let segments = extract(&points, 30.0, 2);
        assert_eq!(segments.len(), 2);
        assert_eq!(speeds_of(&segments[0]), vec![40.0, 45.0, 50.0]);
        assert_eq!(speeds_of(&segments[1]), vec![60.0, 60.0, 60.0]);
        assert_eq!(segments[1].first().time, ts(5));
    }

    #[test]
    fn test_min_points_is_exclusive() {
        let exact = points_with_speeds(&[0.0, 50.0, 50.0, 50.0, 0.0]);
        assert!(extract(&exact, 30.0, 3).is_empty());
        let longer = points_with_speeds(&[0.0, 50.0, 50.0, 50.0, 50.0, 0.0]);
        let segments = extract(&longer, 30.0, 3);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 4);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let points = points_with_speeds(&[30.0, 30.0, 30.0, 30.0]);
        assert!(extract(&points, 30.0, 0).is_empty());
    }

    #[test]
    fn test_trailing_run_is_closed() {
        let points = points_with_speeds(&[5.0, 35.0, 36.0, 37.0]);
        let segments = extract(&points, 30.0, 2);
        assert_eq!(segments.len(), 1);
        assert_eq!(speeds_of(&segments[0]), vec![35.0, 36.0, 37.0]);
    }

    #[test]
    fn test_empty_and_negative_threshold() {
        assert!(extract(&[], 30.0, 0).is_empty());
        let points = points_with_speeds(&[0.0, 1.0, 2.0]);
        let segments = extract(&points, -1.0, 0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 3);
    }

    #[test]
    fn test_every_emitted_point_clears_threshold() {
        // Deterministic pseudo-random speeds around the threshold.
        let mut state = 0x2545_f491_u64;
        let speeds: Vec<f64> = (0..500)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state % 60) as f64
            })
            .collect();
        let points = points_with_speeds(&speeds);
        for min_points in [0usize, 1, 2, 5] {
            for segment in extract(&points, 25.0, min_points) {
                assert!(segment.len() > min_points);
                assert!(segment.points().iter().all(|p| p.speed_kmh > 25.0));
            }
        }
    }

    #[test]
    fn test_filter_by_interval_excludes_bounds() {
        let points = points_with_speeds(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let interval = TimeInterval::new(ts(1), ts(3)).unwrap();
        let filtered = filter_by_interval(&points, &interval);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].time, ts(2));
    }

    #[test]
    fn test_select_segments_applies_time_filter() {
        let segment =
            TrackSegment::new(points_with_speeds(&[50.0, 50.0, 50.0, 50.0, 50.0, 50.0])).unwrap();
        let tracks = vec![Track {
            name: Some("session".into()),
            segments: vec![segment],
        }];
        let params = Params {
            speed_threshold_kmh: 30.0,
            min_points: 2,
            ..Params::default()
        };
        assert_eq!(select_segments(&tracks, &params).unwrap()[0].len(), 6);

        let filtered = Params {
            from: Some(ts(1)),
            ..params
        };
        let segments = select_segments(&tracks, &filtered).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 4);
        assert_eq!(extract_from_tracks(&tracks, 30.0, 2).len(), 1);
    }
}
