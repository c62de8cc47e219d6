use crate::io::session::Session;
use serde::{Deserialize, Serialize};

/// Whole-recording figures reported next to the per-cycle metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub duration_sec: f64,
    pub max_pressure: f64,
    pub final_volume: f64,
    pub peak_count: usize,
    pub segment_count: usize,
}

impl SessionSummary {
    /// Duration comes from the first non-empty channel (pressure, then
    /// scale, then volume). Missing channels report zero.
    pub fn from_session(session: &Session, peak_count: usize, segment_count: usize) -> Self {
        let reference = [&session.pressure, &session.scale, &session.volume]
            .into_iter()
            .find(|series| !series.is_empty());
        Self {
            duration_sec: reference.map_or(0.0, |series| series.duration()),
            max_pressure: session.pressure.max_value().unwrap_or(0.0),
            final_volume: session.volume.final_value().unwrap_or(0.0),
            peak_count,
            segment_count,
        }
    }
}
