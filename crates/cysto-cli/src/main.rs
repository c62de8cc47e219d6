use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cysto_lib::{
    config::{read_config, AnalysisConfig},
    detectors::{
        peaks::{
            coerce_distance, snap_to_local_max, DetectionParams, FinderMode, PeakDetection,
            PeakDetector,
        },
        segments::{derive_segments, snap_event, EventRole, SegmentDerivation, SegmentParams},
    },
    io::{
        report::{write_report, Report},
        session::{delimiter_for, read_session, write_session, Session},
        text as text_io,
    },
    metrics::summary::SessionSummary,
    signal::{EventPoint, Interval, Peak},
    simulation::{simulate_cystometrogram, SimulationConfig},
    sweep::{ParameterSweep, SweepConfig},
};
use log::info;
use serde::Serialize;
use std::{
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "cysto",
    version,
    about = "Cystometry analysis: peaks, voiding segments and parameter suggestions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    Precise,
    Approximate,
}

impl From<Mode> for FinderMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Precise => FinderMode::Precise,
            Mode::Approximate => FinderMode::Approximate,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Marker {
    Onset,
    Empty,
}

impl From<Marker> for EventRole {
    fn from(marker: Marker) -> Self {
        match marker {
            Marker::Onset => EventRole::Onset,
            Marker::Empty => EventRole::Empty,
        }
    }
}

/// Options shared by every subcommand that reads a recording.
#[derive(Args, Debug)]
struct SessionArgs {
    /// Exported recording (.csv is comma separated, anything else tab separated)
    #[arg(long)]
    input: PathBuf,
    /// TOML analysis config with [detection], [segments] and [sweep] sections
    #[arg(long)]
    config: Option<PathBuf>,
    /// Start of the experiment window in seconds
    #[arg(long)]
    window_start: Option<f64>,
    /// End of the experiment window in seconds
    #[arg(long)]
    window_end: Option<f64>,
    /// Interval to keep, as START:END seconds; repeatable
    #[arg(long = "keep", value_parser = parse_interval)]
    keep: Vec<Interval>,
    /// Peak finder strategy (overrides sweep.mode from the config)
    #[arg(long, value_enum)]
    mode: Option<Mode>,
}

#[derive(Args, Debug, Default)]
struct DetectionArgs {
    #[arg(long)]
    height: Option<f64>,
    #[arg(long)]
    threshold: Option<f64>,
    /// Minimum peak separation in samples
    #[arg(long)]
    distance: Option<f64>,
    #[arg(long)]
    prominence: Option<f64>,
    #[arg(long)]
    width: Option<f64>,
}

impl DetectionArgs {
    fn overlay(&self, base: &DetectionParams) -> DetectionParams {
        base.merged(&DetectionParams {
            height: self.height,
            threshold: self.threshold,
            distance: self.distance.and_then(coerce_distance),
            prominence: self.prominence,
            width: self.width,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect pressure peaks
    Peaks {
        #[command(flatten)]
        session: SessionArgs,
        #[command(flatten)]
        detection: DetectionArgs,
        /// Newline-delimited peak times to snap onto local maxima instead of detecting
        #[arg(long)]
        snap: Option<PathBuf>,
        /// Search window in seconds around each snapped time
        #[arg(long, default_value_t = 10.0)]
        snap_window: f64,
    },
    /// Suggest detection parameters for an expected number of voids
    Suggest {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        expected: usize,
        /// Maximum parameter sets to evaluate (overrides sweep.budget)
        #[arg(long)]
        budget: Option<usize>,
    },
    /// Derive onset/peak/empty segments and their metrics
    Segments {
        #[command(flatten)]
        session: SessionArgs,
        #[command(flatten)]
        detection: DetectionArgs,
        /// Use these peak times instead of detecting peaks
        #[arg(long)]
        peaks: Option<PathBuf>,
    },
    /// Write summary, points and segments CSVs into a directory
    Report {
        #[command(flatten)]
        session: SessionArgs,
        #[command(flatten)]
        detection: DetectionArgs,
        #[arg(long)]
        peaks: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Snap hand-placed onset or empty markers onto samples whose slope fits
    Markers {
        #[command(flatten)]
        session: SessionArgs,
        /// Newline-delimited marker times
        #[arg(long)]
        times: PathBuf,
        #[arg(long, value_enum)]
        role: Marker,
    },
    /// Whole-recording summary
    Summary {
        #[command(flatten)]
        session: SessionArgs,
        #[command(flatten)]
        detection: DetectionArgs,
    },
    /// Write a synthetic recording in the export layout
    Simulate {
        #[arg(long, default_value_t = 3)]
        voids: usize,
        #[arg(long, default_value_t = 300.0)]
        interval: f64,
        #[arg(long, default_value_t = 0.5)]
        noise: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Output file; stdout (tab separated) when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Peaks {
            session,
            detection,
            snap,
            snap_window,
        } => cmd_peaks(&session, &detection, snap.as_deref(), snap_window)?,
        Commands::Suggest {
            session,
            expected,
            budget,
        } => cmd_suggest(&session, expected, budget)?,
        Commands::Segments {
            session,
            detection,
            peaks,
        } => cmd_segments(&session, &detection, peaks.as_deref())?,
        Commands::Report {
            session,
            detection,
            peaks,
            out,
        } => cmd_report(&session, &detection, peaks.as_deref(), &out)?,
        Commands::Markers {
            session,
            times,
            role,
        } => cmd_markers(&session, &times, role.into())?,
        Commands::Summary { session, detection } => cmd_summary(&session, &detection)?,
        Commands::Simulate {
            voids,
            interval,
            noise,
            seed,
            out,
        } => cmd_simulate(voids, interval, noise, seed, out.as_deref())?,
    }
    Ok(())
}

fn parse_interval(raw: &str) -> Result<Interval, String> {
    let (start, end) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {raw}"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("not a time: {s}"))
    };
    Ok(Interval::new(parse(start)?, parse(end)?))
}

/// A recording with its window and kept intervals applied, plus the config
/// it was analysed with.
struct Loaded {
    session: Session,
    config: AnalysisConfig,
    window: Option<Interval>,
    kept_intervals: Option<usize>,
    mode: FinderMode,
}

fn load(args: &SessionArgs) -> Result<Loaded> {
    let config = match &args.config {
        Some(path) => read_config(path)?,
        None => AnalysisConfig::default(),
    };
    let mut session = read_session(&args.input)
        .with_context(|| format!("loading {}", args.input.display()))?;

    let window = match (args.window_start, args.window_end) {
        (None, None) => None,
        (start, end) => {
            let times = &session.pressure.times;
            let start = start.or(times.first().copied()).unwrap_or(0.0);
            let end = end.or(times.last().copied()).unwrap_or(start);
            Some(Interval::new(start, end))
        }
    };
    if let Some(window) = window {
        session = session.window(window.start, window.end);
    }
    let kept_intervals = if args.keep.is_empty() {
        None
    } else {
        session = session.keep_intervals(&args.keep);
        Some(args.keep.len())
    };
    if session.pressure.is_empty() {
        bail!("no pressure samples left in {}", args.input.display());
    }
    let mode = args.mode.map(FinderMode::from).unwrap_or(config.sweep.mode);
    info!(
        "analysing {} pressure samples from {} ({:?} finder)",
        session.pressure.len(),
        args.input.display(),
        mode
    );
    Ok(Loaded {
        session,
        config,
        window,
        kept_intervals,
        mode,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn detect(loaded: &Loaded, detection: &DetectionArgs) -> PeakDetection {
    let params = detection.overlay(&loaded.config.detection);
    let detector = PeakDetector::new(loaded.mode);
    detector.detect(&loaded.session.pressure, &params)
}

/// Snap each listed time onto the nearby local maximum, dropping duplicates.
fn snapped_peaks(loaded: &Loaded, path: &Path, window_sec: f64) -> Result<Vec<Peak>> {
    let pressure = &loaded.session.pressure;
    let times = text_io::read_peak_times(path)?;
    let mut peaks: Vec<Peak> = times
        .into_iter()
        .filter_map(|t| snap_to_local_max(pressure, t, window_sec))
        .collect();
    peaks.sort_by_key(|p| p.index);
    peaks.dedup_by_key(|p| p.index);
    Ok(peaks)
}

fn peaks_for(
    loaded: &Loaded,
    detection: &DetectionArgs,
    peak_file: Option<&Path>,
) -> Result<(Vec<Peak>, DetectionParams)> {
    match peak_file {
        Some(path) => {
            let times = text_io::read_peak_times(path)?;
            let peaks = times
                .into_iter()
                .filter_map(|t| {
                    let idx = loaded.session.pressure.nearest_index(t)?;
                    Some(Peak::at(&loaded.session.pressure, idx))
                })
                .collect();
            Ok((peaks, DetectionParams::default()))
        }
        None => {
            let found = detect(loaded, detection);
            Ok((found.peaks, found.params_used))
        }
    }
}

fn segments_for(loaded: &Loaded, peaks: &[Peak]) -> (SegmentDerivation, SegmentParams) {
    let session = &loaded.session;
    let params = loaded.config.segment_params();
    let derivation = derive_segments(&session.pressure, Some(&session.volume), peaks, &params);
    (derivation, params)
}

fn cmd_peaks(
    args: &SessionArgs,
    detection: &DetectionArgs,
    snap: Option<&Path>,
    snap_window: f64,
) -> Result<()> {
    let loaded = load(args)?;
    match snap {
        Some(path) => {
            let peaks = snapped_peaks(&loaded, path, snap_window)?;
            print_json(&PeakDetection {
                peaks,
                params_used: DetectionParams::default(),
            })
        }
        None => print_json(&detect(&loaded, detection)),
    }
}

fn cmd_suggest(args: &SessionArgs, expected: usize, budget: Option<usize>) -> Result<()> {
    let loaded = load(args)?;
    let sweep = ParameterSweep::new(SweepConfig {
        budget: budget.unwrap_or(loaded.config.sweep.budget),
        mode: loaded.mode,
    });
    print_json(&sweep.run(&loaded.session.pressure, expected))
}

fn cmd_segments(
    args: &SessionArgs,
    detection: &DetectionArgs,
    peak_file: Option<&Path>,
) -> Result<()> {
    let loaded = load(args)?;
    let (peaks, _) = peaks_for(&loaded, detection, peak_file)?;
    let (derivation, _) = segments_for(&loaded, &peaks);
    print_json(&derivation)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportOutput {
    files: Vec<PathBuf>,
    summary: SessionSummary,
}

fn cmd_report(
    args: &SessionArgs,
    detection: &DetectionArgs,
    peak_file: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let loaded = load(args)?;
    let (peaks, params_used) = peaks_for(&loaded, detection, peak_file)?;
    let (derivation, segment_params) = segments_for(&loaded, &peaks);
    let report = Report {
        session: &loaded.session,
        peaks: &peaks,
        derivation: &derivation,
        detection: &params_used,
        segment_params: &segment_params,
        window: loaded.window,
        kept_intervals: loaded.kept_intervals,
    };
    let files = write_report(out, &report)?;
    print_json(&ReportOutput {
        files,
        summary: report.summary(),
    })
}

#[derive(Serialize)]
struct MarkerOutput {
    role: EventRole,
    points: Vec<EventPoint>,
}

fn cmd_markers(args: &SessionArgs, times_path: &Path, role: EventRole) -> Result<()> {
    let loaded = load(args)?;
    let params = loaded.config.segment_params();
    let points = text_io::read_peak_times(times_path)?
        .into_iter()
        .filter_map(|t| snap_event(&loaded.session.pressure, t, role, &params))
        .collect();
    print_json(&MarkerOutput { role, points })
}

fn cmd_summary(args: &SessionArgs, detection: &DetectionArgs) -> Result<()> {
    let loaded = load(args)?;
    let (peaks, _) = peaks_for(&loaded, detection, None)?;
    let (derivation, _) = segments_for(&loaded, &peaks);
    print_json(&SessionSummary::from_session(
        &loaded.session,
        peaks.len(),
        derivation.segments.len(),
    ))
}

fn cmd_simulate(
    voids: usize,
    interval: f64,
    noise: f64,
    seed: u64,
    out: Option<&Path>,
) -> Result<()> {
    let sim = simulate_cystometrogram(&SimulationConfig {
        voids,
        void_interval_sec: interval,
        noise_sd: noise,
        seed,
        ..Default::default()
    });
    let session = Session {
        pressure: sim.pressure,
        volume: sim.volume,
        scale: sim.scale,
    };
    match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            write_session(BufWriter::new(file), &session, delimiter_for(path))?;
        }
        None => write_session(io::stdout().lock(), &session, b'\t')?,
    }
    Ok(())
}
