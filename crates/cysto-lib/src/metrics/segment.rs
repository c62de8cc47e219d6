use crate::signal::SampleSeries;
use serde::{Deserialize, Serialize};

/// Per-cycle measurements attached to each derived segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetrics {
    /// Time from the previous cycle's empty to this onset.
    pub imi_sec: Option<f64>,
    pub max_pressure: f64,
    /// Mean pressure strictly between this empty and the next onset.
    pub avg_pressure_between_empty_and_next_onset: Option<f64>,
    /// Infused volume change from onset to empty.
    pub delta_volume: Option<f64>,
}

/// Inter-micturition interval; only defined when the onset follows the
/// previous empty.
pub fn inter_micturition_interval(previous_empty: Option<f64>, onset_time: f64) -> Option<f64> {
    let prev = previous_empty?;
    let imi = onset_time - prev;
    (imi > 0.0 && imi.is_finite()).then_some(imi)
}

/// Volume at the empty time minus volume at the onset time, both read from
/// the nearest volume sample.
pub fn delta_volume(
    volume: Option<&SampleSeries>,
    onset_time: f64,
    empty_time: f64,
) -> Option<f64> {
    let volume = volume?;
    let at_onset = volume.value_at(onset_time)?;
    let at_empty = volume.value_at(empty_time)?;
    let delta = at_empty - at_onset;
    delta.is_finite().then_some(delta)
}

/// Mean of the samples with `start < time < end`.
pub fn mean_between(series: &SampleSeries, start: f64, end: f64) -> Option<f64> {
    if !(start < end) {
        return None;
    }
    let lo = series.times.partition_point(|&t| t <= start);
    let hi = series.times.partition_point(|&t| t < end);
    if lo >= hi {
        return None;
    }
    let span = &series.values[lo..hi];
    let mean = span.iter().sum::<f64>() / span.len() as f64;
    mean.is_finite().then_some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> SampleSeries {
        let times: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let values = times.iter().map(|t| t * 2.0).collect();
        SampleSeries::new(times, values)
    }

    #[test]
    fn imi_requires_positive_gap() {
        assert_eq!(inter_micturition_interval(None, 10.0), None);
        assert_eq!(inter_micturition_interval(Some(4.0), 10.0), Some(6.0));
        assert_eq!(inter_micturition_interval(Some(10.0), 10.0), None);
        assert_eq!(inter_micturition_interval(Some(12.0), 10.0), None);
    }

    #[test]
    fn delta_volume_uses_nearest_samples() {
        let volume = ramp(10);
        assert_eq!(delta_volume(Some(&volume), 2.2, 6.6), Some(10.0));
        assert_eq!(delta_volume(None, 2.0, 6.0), None);
        let empty = SampleSeries::default();
        assert_eq!(delta_volume(Some(&empty), 2.0, 6.0), None);
    }

    #[test]
    fn mean_between_excludes_endpoints() {
        let s = ramp(10);
        // samples 3, 4, 5 -> values 6, 8, 10
        assert_eq!(mean_between(&s, 2.0, 6.0), Some(8.0));
        assert_eq!(mean_between(&s, 2.0, 3.0), None);
        assert_eq!(mean_between(&s, 6.0, 2.0), None);
    }
}
