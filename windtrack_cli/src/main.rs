use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use windtrack::{
    correlate, parse_tracks, parse_weather_csv, select_segments, Correlation, DirectionMode,
    Params, Timestamp, Track,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Correlate GPS speed runs with weather-station wind", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich the high-speed segments of GPX/FIT tracks with interpolated wind readings
    Correlate(CorrelateArgs),
    /// List the high-speed segments found in GPX/FIT tracks
    Segments(SegmentationArgs),
}

#[derive(Args, Debug)]
struct SegmentationArgs {
    /// GPX/FIT files to ingest
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    tracks: Vec<PathBuf>,

    /// Optional params JSON; explicit flags override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Speed threshold (km/h) a point must exceed to belong to a segment
    #[arg(long)]
    threshold: Option<f64>,

    /// Segments must hold more than this many points
    #[arg(long)]
    min_points: Option<usize>,

    /// Only consider points after this RFC 3339 time
    #[arg(long, value_parser = parse_timestamp)]
    from: Option<Timestamp>,

    /// Only consider points before this RFC 3339 time
    #[arg(long, value_parser = parse_timestamp)]
    to: Option<Timestamp>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct CorrelateArgs {
    #[command(flatten)]
    segmentation: SegmentationArgs,

    /// Weather table CSV (time,direction,wind,gust,temperature,chill)
    #[arg(long, value_hint = ValueHint::FilePath)]
    weather: PathBuf,

    /// Output CSV path for enriched track points (`-` for stdout)
    #[arg(short, long, default_value = "windtrack.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional CSV path for the resampled weather of every segment
    #[arg(long, value_hint = ValueHint::FilePath)]
    weather_output: Option<PathBuf>,

    /// Interpolate wind direction on the unwrapped circle
    #[arg(long, action = ArgAction::SetTrue)]
    circular: bool,

    /// Correlate segments the weather only partially covers
    #[arg(long, action = ArgAction::SetTrue)]
    lenient_padding: bool,

    /// Correlate segments in parallel
    #[arg(long, action = ArgAction::SetTrue)]
    parallel: bool,

    /// IANA time zone of the weather table's local times (default Europe/Vienna)
    #[arg(long, value_parser = parse_tz)]
    weather_tz: Option<Tz>,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

fn parse_timestamp(text: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 time: {}", e))
}

fn parse_tz(text: &str) -> Result<Tz, String> {
    text.parse::<Tz>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Correlate(args) => args.segmentation.verbose,
        Command::Segments(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Correlate(args) => handle_correlate(args),
        Command::Segments(args) => handle_segments(args),
    }
}

fn load_params(args: &SegmentationArgs) -> Result<Params> {
    let mut params = match args.params.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Params::from_json_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => Params::default(),
    };
    if let Some(threshold) = args.threshold {
        params.speed_threshold_kmh = threshold;
    }
    if let Some(min_points) = args.min_points {
        params.min_points = min_points;
    }
    if args.from.is_some() {
        params.from = args.from;
    }
    if args.to.is_some() {
        params.to = args.to;
    }
    if !params.speed_threshold_kmh.is_finite() {
        return Err(anyhow!("speed threshold must be finite"));
    }
    Ok(params)
}

fn load_tracks(paths: &[PathBuf]) -> Result<Vec<Track>> {
    let inputs: Vec<(usize, &PathBuf)> = paths.iter().enumerate().collect();
    let mut parsed: Vec<(usize, Vec<Track>)> = inputs
        .par_iter()
        .map(|(file_id, path)| -> Result<(usize, Vec<Track>)> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let hint = path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("gpx");
            let tracks = parse_tracks(&data, hint)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((*file_id, tracks))
        })
        .collect::<Result<Vec<_>>>()?;

    // Restore original ordering by file index
    parsed.sort_by_key(|(id, _)| *id);
    Ok(parsed.into_iter().flat_map(|(_, tracks)| tracks).collect())
}

fn handle_correlate(args: CorrelateArgs) -> Result<()> {
    let mut params = load_params(&args.segmentation)?;
    if args.circular {
        params.direction_mode = DirectionMode::Circular;
    }
    if args.lenient_padding {
        params.strict_padding = false;
    }
    if args.parallel {
        params.parallel = true;
    }
    if let Some(tz) = args.weather_tz {
        params.weather_tz = tz;
    }
    let timed = args.profile || args.segmentation.verbose;

    let t_parse = Instant::now();
    let tracks = load_tracks(&args.segmentation.tracks)?;
    let weather_bytes = fs::read(&args.weather)
        .with_context(|| format!("failed to read {}", args.weather.display()))?;
    let weather = parse_weather_csv(&weather_bytes, params.weather_tz)
        .with_context(|| format!("failed to parse {}", args.weather.display()))?;
    if timed {
        info!(
            "Parse stage: {:.1} ms ({} tracks, {} weather rows)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            tracks.len(),
            weather.len()
        );
    }

    let segments = select_segments(&tracks, &params)?;
    if segments.is_empty() {
        warn!(
            "No segment faster than {:.1} km/h with more than {} points",
            params.speed_threshold_kmh, params.min_points
        );
    }

    let t_correlate = Instant::now();
    let correlation = correlate(&segments, &weather, &params.correlate_params());
    if timed {
        info!(
            "Correlate stage: {:.1} ms",
            t_correlate.elapsed().as_secs_f64() * 1000.0
        );
    }
    info!(
        "Correlated {} of {} segments ({} skipped)",
        correlation.succeeded(),
        correlation.attempted(),
        correlation.failures.len()
    );

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_track_rows(&correlation, &mut writer)?;
    } else {
        let mut writer = csv_file(&args.output)?;
        write_track_rows(&correlation, &mut writer)?;
        info!("Wrote enriched track CSV: {}", args.output.display());
    }

    if let Some(path) = args.weather_output.as_ref() {
        let mut writer = csv_file(path)?;
        write_weather_rows(&correlation, &mut writer)?;
        info!("Wrote resampled weather CSV: {}", path.display());
    }
    Ok(())
}

fn handle_segments(args: SegmentationArgs) -> Result<()> {
    let params = load_params(&args)?;
    let tracks = load_tracks(&args.tracks)?;
    let segments = select_segments(&tracks, &params)?;
    info!(
        "{} segment(s) above {:.1} km/h in {} track(s)",
        segments.len(),
        params.speed_threshold_kmh,
        tracks.len()
    );

    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());
    writer.write_record([
        "segment",
        "start",
        "end",
        "duration_s",
        "points",
        "max_speed_kmh",
        "mean_speed_kmh",
    ])?;
    for (index, segment) in segments.iter().enumerate() {
        let summary = segment.summary();
        writer.write_record([
            index.to_string(),
            summary.start.to_rfc3339(),
            summary.end.to_rfc3339(),
            format!("{:.3}", summary.duration_s),
            summary.points.to_string(),
            format!("{:.3}", summary.max_speed_kmh),
            format!("{:.3}", summary.mean_speed_kmh),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_file(path: &Path) -> Result<csv::Writer<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(csv::Writer::from_writer(file))
}

fn write_track_rows<W: Write>(correlation: &Correlation, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "segment",
        "time",
        "lat",
        "lon",
        "elevation_m",
        "speed_kmh",
        "course_deg",
        "wind_direction_deg",
        "wind_kmh",
        "gust_kmh",
    ])?;

    for correlated in &correlation.segments {
        for point in correlated.segment.points() {
            let wind = point.wind;
            writer.write_record([
                correlated.index.to_string(),
                point.time.to_rfc3339(),
                format!("{:.6}", point.lat),
                format!("{:.6}", point.lon),
                format!("{:.3}", point.elevation_m),
                format!("{:.3}", point.speed_kmh),
                format!("{:.3}", point.course_deg),
                wind.map(|w| format!("{:.3}", w.direction_deg))
                    .unwrap_or_default(),
                wind.map(|w| format!("{:.3}", w.speed_kmh))
                    .unwrap_or_default(),
                wind.map(|w| format!("{:.3}", w.gust_kmh))
                    .unwrap_or_default(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn write_weather_rows<W: Write>(
    correlation: &Correlation,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "segment",
        "time",
        "direction_deg",
        "wind_kmh",
        "gust_kmh",
        "temperature_c",
        "chill_c",
    ])?;

    for correlated in &correlation.segments {
        for reading in &correlated.weather {
            writer.write_record([
                correlated.index.to_string(),
                reading.time.to_rfc3339(),
                format!("{:.3}", reading.direction_deg),
                format!("{:.3}", reading.wind_kmh),
                format!("{:.3}", reading.gust_kmh),
                format!("{:.3}", reading.temperature_c),
                format!("{:.3}", reading.chill_c),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}
