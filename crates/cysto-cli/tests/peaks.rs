use assert_cmd::cargo::cargo_bin_cmd;
use cysto_lib::detectors::peaks::PeakDetection;
use serde_json::Value;
use std::{error::Error, path::PathBuf};

#[test]
fn detects_both_voids() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("cysto");
    cmd.args([
        "peaks",
        "--input",
        &sample_path("test_data/cmg_sample.csv"),
        "--height",
        "20",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let detection: PeakDetection = serde_json::from_slice(&output)?;

    let times: Vec<f64> = detection.peaks.iter().map(|p| p.time).collect();
    assert_eq!(times, vec![300.0, 600.0]);
    assert_close(detection.peaks[0].value, 40.15, 1e-9);
    assert_eq!(detection.params_used.height, Some(20.0));
    Ok(())
}

#[test]
fn approximate_mode_reports_only_honoured_params() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("cysto");
    cmd.args([
        "peaks",
        "--input",
        &sample_path("test_data/cmg_sample.csv"),
        "--height",
        "20",
        "--distance",
        "59.6",
        "--prominence",
        "3",
        "--mode",
        "approximate",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let json: Value = serde_json::from_slice(&output)?;

    assert_eq!(json["paramsUsed"]["distance"], 60);
    assert!(json["paramsUsed"].get("prominence").is_none());
    assert_eq!(json["peaks"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[test]
fn window_restricts_detection() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("cysto");
    cmd.args([
        "peaks",
        "--input",
        &sample_path("test_data/cmg_sample.csv"),
        "--height",
        "20",
        "--window-start",
        "450",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let detection: PeakDetection = serde_json::from_slice(&output)?;
    assert_eq!(detection.peaks.len(), 1);
    assert_eq!(detection.peaks[0].time, 600.0);
    // indices refer to the windowed series
    assert_eq!(detection.peaks[0].index, 150);
    Ok(())
}

#[test]
fn snaps_manual_times_to_local_maxima() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("cysto");
    cmd.args([
        "peaks",
        "--input",
        &sample_path("test_data/cmg_sample.csv"),
        "--snap",
        &sample_path("test_data/peak_times.txt"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let detection: PeakDetection = serde_json::from_slice(&output)?;
    let indices: Vec<usize> = detection.peaks.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![300, 600]);
    Ok(())
}

#[test]
fn flat_recording_has_no_peaks() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flat.csv");
    let mut text = String::from("Elapsed Time,Scale,Tot Infused Vol,Bladder Pressure\n");
    for i in 0..50 {
        text.push_str(&format!("{i},0,0,7.5\n"));
    }
    std::fs::write(&path, text)?;

    let mut cmd = cargo_bin_cmd!("cysto");
    cmd.args(["peaks", "--input", path.to_str().expect("utf8 path")]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let detection: PeakDetection = serde_json::from_slice(&output)?;
    assert!(detection.peaks.is_empty());
    Ok(())
}

#[test]
fn missing_column_fails_with_message() {
    let mut cmd = cargo_bin_cmd!("cysto");
    cmd.args([
        "peaks",
        "--input",
        &sample_path("test_data/missing_column.csv"),
    ]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("Tot Infused Vol"), "stderr: {stderr}");
}

fn assert_close(a: f64, b: f64, tol: f64) {
    let diff = (a - b).abs();
    assert!(
        diff <= tol,
        "diff {} exceeded tol {} ({} vs {})",
        diff,
        tol,
        a,
        b
    );
}

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn sample_path(relative: &str) -> String {
    workspace_root()
        .join(relative)
        .to_string_lossy()
        .to_string()
}
