use anyhow::{Context, Result};
use std::path::Path;

/// Parse newline-delimited peak times in seconds, ignoring blank/comment lines.
pub fn parse_peak_times(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {} is not a time: {}", idx + 1, trimmed))?;
        if !val.is_finite() {
            anyhow::bail!("line {} is not a finite time: {}", idx + 1, trimmed);
        }
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no peak times found");
    }
    out.sort_by(f64::total_cmp);
    Ok(out)
}

/// Read peak times from disk.
pub fn read_peak_times(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_peak_times(&text)
}
