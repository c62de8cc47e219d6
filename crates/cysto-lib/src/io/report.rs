use crate::{
    detectors::{
        peaks::DetectionParams,
        segments::{SegmentDerivation, SegmentParams},
    },
    io::session::Session,
    metrics::summary::SessionSummary,
    signal::{EventPoint, Interval, Peak},
};
use anyhow::{Context, Result};
use csv::WriterBuilder;
use log::debug;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const SUMMARY_FILE: &str = "summary.csv";
pub const POINTS_FILE: &str = "points.csv";
pub const SEGMENTS_FILE: &str = "segments.csv";

type FileWriter = fn(&Path, &Report<'_>) -> Result<()>;

/// Everything that goes into an exported report.
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    pub session: &'a Session,
    pub peaks: &'a [Peak],
    pub derivation: &'a SegmentDerivation,
    pub detection: &'a DetectionParams,
    pub segment_params: &'a SegmentParams,
    pub window: Option<Interval>,
    pub kept_intervals: Option<usize>,
}

impl Report<'_> {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from_session(
            self.session,
            self.peaks.len(),
            self.derivation.segments.len(),
        )
    }
}

/// Write `summary.csv`, `points.csv` and `segments.csv` into `dir`,
/// creating it if needed. Returns the written paths.
pub fn write_report(dir: &Path, report: &Report<'_>) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let files: [(&str, FileWriter); 3] = [
        (SUMMARY_FILE, write_summary),
        (POINTS_FILE, write_points),
        (SEGMENTS_FILE, write_segments),
    ];
    let mut written = Vec::with_capacity(files.len());
    for (name, write) in files {
        let path = dir.join(name);
        write(&path, report).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    debug!("wrote report to {}", dir.display());
    Ok(written)
}

fn write_summary(path: &Path, report: &Report<'_>) -> Result<()> {
    let summary = report.summary();
    let mut writer = WriterBuilder::new().flexible(true).from_path(path)?;
    writer.write_record(["Metric", "Value"])?;

    let mut rows: Vec<(&str, String)> = Vec::new();
    if let Some(window) = report.window {
        rows.push(("Experiment Window Start", window.start.to_string()));
        rows.push(("Experiment Window End", window.end.to_string()));
    }
    rows.push(("Duration", summary.duration_sec.to_string()));
    rows.push(("Max Pressure", summary.max_pressure.to_string()));
    rows.push(("Final Volume", summary.final_volume.to_string()));
    rows.push(("Peak Count", summary.peak_count.to_string()));
    rows.push(("Segment Count", summary.segment_count.to_string()));
    if let Some(kept) = report.kept_intervals {
        rows.push(("Kept Intervals", kept.to_string()));
    }
    for (metric, value) in rows {
        writer.write_record([metric, value.as_str()])?;
    }
    write_params(&mut writer, "Peak Detection Params", report.detection)?;
    write_params(&mut writer, "Onset/Empty Params", report.segment_params)?;
    writer.flush()?;
    Ok(())
}

/// Title row followed by one key/value row per set parameter.
fn write_params<W: std::io::Write, T: Serialize>(
    writer: &mut csv::Writer<W>,
    title: &str,
    params: &T,
) -> Result<()> {
    let value = serde_json::to_value(params)?;
    let Some(map) = value.as_object().filter(|map| !map.is_empty()) else {
        return Ok(());
    };
    writer.write_record([title, ""])?;
    for (key, value) in map {
        writer.write_record([key.clone(), value.to_string()])?;
    }
    Ok(())
}

fn write_points(path: &Path, report: &Report<'_>) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(["type", "time", "value", "index"])?;
    let points = &report.derivation.points;
    let peaks = report.peaks.iter().copied().map(EventPoint::from);
    let rows = peaks
        .map(|p| ("peak", p))
        .chain(points.onset.iter().map(|p| ("onset", *p)))
        .chain(points.empty.iter().map(|p| ("empty", *p)));
    for (kind, point) in rows {
        writer.write_record([
            kind.to_string(),
            point.time.to_string(),
            point.value.to_string(),
            point.index.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_segments(path: &Path, report: &Report<'_>) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record([
        "i",
        "onsetTime",
        "peakTime",
        "emptyTime",
        "onsetMethod",
        "emptyMethod",
        "imiSec",
        "maxPressure",
        "avgPressureBetweenEmptyAndNextOnset",
        "deltaVolume",
    ])?;
    let optional = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for segment in &report.derivation.segments {
        let m = &segment.metrics;
        writer.write_record([
            segment.i.to_string(),
            segment.onset_time.to_string(),
            segment.peak_time.to_string(),
            segment.empty_time.to_string(),
            method_label(segment.onset_method),
            method_label(segment.empty_method),
            optional(m.imi_sec),
            m.max_pressure.to_string(),
            optional(m.avg_pressure_between_empty_and_next_onset),
            optional(m.delta_volume),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn method_label<T: Serialize>(method: T) -> String {
    serde_json::to_value(method)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detectors::{peaks::detect_peaks, segments::derive_segments},
        simulation::{simulate_cystometrogram, SimulationConfig},
    };

    #[test]
    fn writes_all_three_files() {
        let sim = simulate_cystometrogram(&SimulationConfig {
            voids: 2,
            noise_sd: 0.0,
            ..Default::default()
        });
        let session = Session {
            pressure: sim.pressure,
            volume: sim.volume,
            scale: sim.scale,
        };
        let detection = DetectionParams {
            height: Some(20.0),
            ..Default::default()
        };
        let peaks = detect_peaks(&session.pressure, &detection).peaks;
        let segment_params = SegmentParams::default();
        let volume = Some(&session.volume);
        let derivation = derive_segments(&session.pressure, volume, &peaks, &segment_params);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report");
        let report = Report {
            session: &session,
            peaks: &peaks,
            derivation: &derivation,
            detection: &detection,
            segment_params: &segment_params,
            window: Some(Interval::new(0.0, 900.0)),
            kept_intervals: None,
        };
        let written = write_report(&out, &report).unwrap();
        assert_eq!(written.len(), 3);

        let summary = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        assert!(summary.starts_with("Metric,Value\n"));
        assert!(summary.contains("Peak Count,2\n"));
        assert!(summary.contains("Experiment Window End,900\n"));
        assert!(summary.contains("height,20.0\n"));
        assert!(summary.contains("kNoise,3.0\n"));
        assert!(!summary.contains("Kept Intervals"));

        let points = fs::read_to_string(out.join(POINTS_FILE)).unwrap();
        assert_eq!(points.lines().count(), 1 + 3 * 2);
        assert!(points.contains("peak,300,40,300\n"));

        let segments = fs::read_to_string(out.join(SEGMENTS_FILE)).unwrap();
        let rows: Vec<&str> = segments.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("0,"));
        // last segment has no following onset
        let last: Vec<&str> = rows[2].split(',').collect();
        assert_eq!(last[4], "detected");
        assert_eq!(last[8], "");
    }
}
