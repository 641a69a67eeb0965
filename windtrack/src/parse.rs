//! Input adapters: GPX/FIT tracks and CSV weather tables.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, warn};
use xml::reader::{EventReader, XmlEvent};

use crate::units::{
    haversine_distance, initial_bearing, map_direction, mps_to_kmh, parse_temperature,
    semicircles_to_degrees,
};
use crate::{Timestamp, Track, TrackPoint, TrackSegment, WeatherPoint, WtError};

/// Station-local timestamp layout of the weather table, e.g. `11:42:00 30.05.2020`.
pub const WEATHER_TIME_FORMAT: &str = "%H:%M:%S %d.%m.%Y";

/// Parse GPX or FIT tracks from bytes using the provided format hint (extension).
pub fn parse_tracks(input: &[u8], format: &str) -> Result<Vec<Track>, WtError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".gpx") || format_lc == "gpx" {
        parse_gpx_tracks(input)
    } else if format_lc.ends_with(".fit") || format_lc == "fit" {
        parse_fit_tracks(input)
    } else {
        Err(WtError::UnsupportedFormat(format.to_string()))
    }
}

#[derive(Clone, Copy, Debug)]
struct Fix {
    time: Timestamp,
    lat: f64,
    lon: f64,
    ele: f64,
    speed_mps: Option<f64>,
    course_deg: Option<f64>,
}

/// `<course>` of every `trkpt` in document order, `None` where a point has none.
///
/// GPX 1.0 loggers write `<course>` next to `<speed>`; the `gpx` reader keeps the speed
/// but rejects the course element, so it is collected here and stripped before reading.
fn scan_trkpt_courses(input: &[u8]) -> Result<Vec<Option<f64>>, WtError> {
    let mut courses = Vec::new();
    let mut current: Option<f64> = None;
    let (mut in_trkpt, mut in_course) = (false, false);
    for event in EventReader::new(input) {
        match event.map_err(|e| WtError::GpxParse(e.to_string()))? {
            XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                "trkpt" => {
                    in_trkpt = true;
                    current = None;
                }
                "course" if in_trkpt => in_course = true,
                _ => {}
            },
            XmlEvent::Characters(text) if in_course => {
                current = text.trim().parse::<f64>().ok().map(|c| c.rem_euclid(360.0));
            }
            XmlEvent::EndElement { name } => match name.local_name.as_str() {
                "course" => in_course = false,
                "trkpt" => {
                    courses.push(current.take());
                    in_trkpt = false;
                }
                _ => {}
            },
            _ => {}
        }
    }
    Ok(courses)
}

/// Removes `<course>..</course>` and `<course/>` elements from GPX text.
fn strip_course_elements(text: &str) -> String {
    const CLOSE: &str = "</course>";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<course") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = match tail.find('>') {
            Some(gt) if tail[..gt].ends_with('/') => gt + 1,
            Some(gt) => tail.find(CLOSE).map(|c| c + CLOSE.len()).unwrap_or(gt + 1),
            None => tail.len(),
        };
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

fn parse_gpx_tracks(input: &[u8]) -> Result<Vec<Track>, WtError> {
    use gpx::read;
    use std::io::Cursor;

    let courses = scan_trkpt_courses(input)?;
    let gpx = if input.windows(7).any(|w| w == b"<course") {
        let text = std::str::from_utf8(input).map_err(|e| WtError::GpxParse(e.to_string()))?;
        read(Cursor::new(strip_course_elements(text).into_bytes()))
    } else {
        read(Cursor::new(input))
    }
    .map_err(|e| WtError::GpxParse(e.to_string()))?;
    let mut courses = courses.into_iter();
    let mut tracks = Vec::with_capacity(gpx.tracks.len());

    for track in gpx.tracks {
        let mut segments = Vec::with_capacity(track.segments.len());
        for segment in track.segments {
            let mut fixes = Vec::with_capacity(segment.points.len());
            for point in segment.points {
                let course_deg = courses.next().flatten();
                let Some(time) = point.time.as_ref() else {
                    continue;
                };
                let iso = time
                    .format()
                    .map_err(|e| WtError::GpxParse(e.to_string()))?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| WtError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);
                let geo = point.point();
                fixes.push(Fix {
                    time: utc,
                    lat: geo.y(),
                    lon: geo.x(),
                    ele: point.elevation.unwrap_or(0.0),
                    speed_mps: point.speed,
                    course_deg,
                });
            }
            if let Some(segment) = segment_from_fixes(fixes)? {
                segments.push(segment);
            }
        }
        debug!(
            name = track.name.as_deref().unwrap_or(""),
            segments = segments.len(),
            "parsed GPX track"
        );
        tracks.push(Track {
            name: track.name,
            segments,
        });
    }
    Ok(tracks)
}

fn parse_fit_tracks(input: &[u8]) -> Result<Vec<Track>, WtError> {
    use fitparser::de::from_bytes;
    use fitparser::profile::MesgNum;

    let records = from_bytes(input).map_err(|e| WtError::FitParse(e.to_string()))?;
    let mut fixes = Vec::new();

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut time: Option<Timestamp> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;
        let mut ele: Option<f64> = None;
        let mut speed: Option<f64> = None;
        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        time = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => lat = field_f64(field.value()).map(semicircles_to_degrees),
                "position_long" => lon = field_f64(field.value()).map(semicircles_to_degrees),
                "altitude" | "enhanced_altitude" => ele = field_f64(field.value()).or(ele),
                "speed" | "enhanced_speed" => speed = field_f64(field.value()).or(speed),
                _ => {}
            }
        }
        if let (Some(time), Some(lat), Some(lon)) = (time, lat, lon) {
            fixes.push(Fix {
                time,
                lat,
                lon,
                ele: ele.unwrap_or(0.0),
                speed_mps: speed,
                course_deg: None,
            });
        }
    }

    let segments = segment_from_fixes(fixes)?.into_iter().collect();
    Ok(vec![Track {
        name: None,
        segments,
    }])
}

/// Positions decode as signed semicircles; altitude and speed come back scaled to floats.
fn field_f64(value: &fitparser::Value) -> Option<f64> {
    use fitparser::Value;
    match *value {
        Value::Float64(v) => Some(v),
        Value::Float32(v) => Some(f64::from(v)),
        Value::SInt32(v) => Some(f64::from(v)),
        Value::UInt32(v) => Some(f64::from(v)),
        Value::UInt16(v) => Some(f64::from(v)),
        _ => None,
    }
}

/// Turns raw fixes into a segment. Speed and course reported by the device win; the
/// rest is derived from consecutive positions, and the first fix borrows the motion of
/// the second.
fn segment_from_fixes(mut fixes: Vec<Fix>) -> Result<Option<TrackSegment>, WtError> {
    if fixes.is_empty() {
        return Ok(None);
    }
    fixes.sort_by_key(|f| f.time);

    let mut motion: Vec<(f64, f64)> = Vec::with_capacity(fixes.len());
    for pair in fixes.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let dt = (b.time - a.time).num_milliseconds() as f64 / 1000.0;
        let derived = if dt > 0.0 {
            mps_to_kmh(haversine_distance(a.lat, a.lon, b.lat, b.lon) / dt)
        } else {
            motion.last().map(|m| m.0).unwrap_or(0.0)
        };
        motion.push((
            b.speed_mps.map(mps_to_kmh).unwrap_or(derived),
            b.course_deg
                .unwrap_or_else(|| initial_bearing(a.lat, a.lon, b.lat, b.lon)),
        ));
    }
    let (next_speed, next_course) = motion.first().copied().unwrap_or((0.0, 0.0));
    let head = &fixes[0];
    motion.insert(
        0,
        (
            head.speed_mps.map(mps_to_kmh).unwrap_or(next_speed),
            head.course_deg.unwrap_or(next_course),
        ),
    );

    let points = fixes
        .iter()
        .zip(motion)
        .map(|(fix, (speed_kmh, course_deg))| {
            TrackPoint::new(fix.time, fix.lat, fix.lon, fix.ele, speed_kmh, course_deg)
        })
        .collect();
    TrackSegment::new(points).map(Some)
}

#[derive(Debug, Deserialize)]
struct WeatherRow {
    time: String,
    direction: String,
    wind: f64,
    gust: f64,
    temperature: String,
    chill: String,
}

/// Parse a weather table with header `time,direction,wind,gust,temperature,chill`.
///
/// Times are station-local ([`WEATHER_TIME_FORMAT`]) in `tz`, daylight saving included.
/// The repeated hour at the autumn change resolves to its first occurrence; a time in
/// the skipped spring hour is an error. Direction is compass text or degrees. The result
/// is ascending with duplicate timestamps dropped, whatever the row order of the table.
pub fn parse_weather_csv(input: &[u8], tz: Tz) -> Result<Vec<WeatherPoint>, WtError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let mut points = Vec::new();
    for (idx, row) in reader.deserialize::<WeatherRow>().enumerate() {
        let line = idx + 2;
        let row = row.map_err(|e| WtError::WeatherParse(format!("line {}: {}", line, e)))?;
        let naive = NaiveDateTime::parse_from_str(&row.time, WEATHER_TIME_FORMAT).map_err(|e| {
            WtError::WeatherParse(format!("line {}: bad time '{}': {}", line, row.time, e))
        })?;
        let local = match tz.from_local_datetime(&naive) {
            LocalResult::Single(local) => local,
            LocalResult::Ambiguous(earliest, _) => {
                warn!(line, time = %row.time, "repeated local hour, taking the earlier instant");
                earliest
            }
            LocalResult::None => {
                return Err(WtError::WeatherParse(format!(
                    "line {}: time '{}' does not exist in {}",
                    line,
                    row.time,
                    tz.name()
                )))
            }
        };
        let time = local.with_timezone(&Utc);
        let direction_deg = map_direction(&row.direction)
            .or_else(|| row.direction.parse::<f64>().ok().map(|d| d.rem_euclid(360.0)))
            .ok_or_else(|| {
                WtError::WeatherParse(format!(
                    "line {}: unknown direction '{}'",
                    line, row.direction
                ))
            })?;
        let temperature_c = parse_temperature(&row.temperature).ok_or_else(|| {
            WtError::WeatherParse(format!(
                "line {}: bad temperature '{}'",
                line, row.temperature
            ))
        })?;
        let chill_c = parse_temperature(&row.chill).ok_or_else(|| {
            WtError::WeatherParse(format!("line {}: bad chill '{}'", line, row.chill))
        })?;
        points.push(WeatherPoint {
            time,
            direction_deg,
            wind_kmh: row.wind,
            gust_kmh: row.gust,
            temperature_c,
            chill_c,
        });
    }

    let rows = points.len();
    points.sort_by_key(|p| p.time);
    points.dedup_by_key(|p| p.time);
    if points.len() != rows {
        debug!(
            dropped = rows - points.len(),
            "dropped weather rows with duplicate timestamps"
        );
    }
    Ok(points)
}
