//! Onset / peak / empty localisation for voiding cycles.
//!
//! The pressure trace is median filtered, smoothed over a time window and
//! differentiated once per call. Each peak then gets an onset (the start of
//! the sustained rise before it) and an empty (the return to a flat
//! baseline after it), with offset-based fallbacks when the signal gives no
//! clear answer.

use crate::{
    filters::{
        mad, median, median_filter, odd_kernel, time_derivative, time_moving_average, MAD_TO_SIGMA,
    },
    metrics::segment::{delta_volume, inter_micturition_interval, mean_between, SegmentMetrics},
    signal::{nearest_index, EventPoint, Peak, SampleSeries},
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Lower bound on the robust noise estimate so perfectly flat traces still
/// admit strict threshold comparisons.
pub const NOISE_FLOOR: f64 = 1e-6;

/// Tuning for onset/empty localisation. Windows are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentParams {
    pub median_kernel: usize,
    pub ma_window_sec: f64,
    pub derivative_window_sec: f64,
    pub pre_window_sec: f64,
    pub guard_sec: f64,
    pub k_noise: f64,
    pub slope_threshold: f64,
    pub sustain_sec: f64,
    pub min_after_peak_sec: f64,
    pub post_window_sec: f64,
    pub drop_slope_threshold: f64,
    pub flat_slope_threshold: f64,
    pub flat_tolerance_k_noise: f64,
    pub dwell_sec: f64,
    pub fallback_onset_sec: f64,
    pub fallback_empty_sec: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            median_kernel: 5,
            ma_window_sec: 5.0,
            derivative_window_sec: 5.0,
            pre_window_sec: 120.0,
            guard_sec: 2.0,
            k_noise: 3.0,
            slope_threshold: 0.02,
            sustain_sec: 3.0,
            min_after_peak_sec: 10.0,
            post_window_sec: 180.0,
            drop_slope_threshold: 0.05,
            flat_slope_threshold: 0.01,
            flat_tolerance_k_noise: 2.0,
            dwell_sec: 5.0,
            fallback_onset_sec: 300.0,
            fallback_empty_sec: 100.0,
        }
    }
}

impl SegmentParams {
    /// Apply request overrides on top of these values.
    pub fn merged(&self, overrides: &SegmentOverrides) -> Self {
        let pick = |value: Option<f64>, current: f64| {
            value.filter(|v| v.is_finite()).unwrap_or(current)
        };
        let median_kernel = overrides
            .median_kernel
            .filter(|v| v.is_finite())
            .map(|v| v.round().max(0.0) as usize)
            .unwrap_or(self.median_kernel);
        Self {
            median_kernel,
            ma_window_sec: pick(overrides.ma_window_sec, self.ma_window_sec),
            derivative_window_sec: pick(
                overrides.derivative_window_sec,
                self.derivative_window_sec,
            ),
            pre_window_sec: pick(overrides.pre_window_sec, self.pre_window_sec),
            guard_sec: pick(overrides.guard_sec, self.guard_sec),
            k_noise: pick(overrides.k_noise, self.k_noise),
            slope_threshold: pick(overrides.slope_threshold, self.slope_threshold),
            sustain_sec: pick(overrides.sustain_sec, self.sustain_sec),
            min_after_peak_sec: pick(overrides.min_after_peak_sec, self.min_after_peak_sec),
            post_window_sec: pick(overrides.post_window_sec, self.post_window_sec),
            drop_slope_threshold: pick(overrides.drop_slope_threshold, self.drop_slope_threshold),
            flat_slope_threshold: pick(overrides.flat_slope_threshold, self.flat_slope_threshold),
            flat_tolerance_k_noise: pick(
                overrides.flat_tolerance_k_noise,
                self.flat_tolerance_k_noise,
            ),
            dwell_sec: pick(overrides.dwell_sec, self.dwell_sec),
            fallback_onset_sec: pick(overrides.fallback_onset_sec, self.fallback_onset_sec),
            fallback_empty_sec: pick(overrides.fallback_empty_sec, self.fallback_empty_sec),
        }
        .normalized()
    }

    /// Median kernel forced odd and at least one.
    pub fn normalized(self) -> Self {
        Self {
            median_kernel: odd_kernel(self.median_kernel),
            ..self
        }
    }
}

/// Sparse request-side overrides for [`SegmentParams`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SegmentOverrides {
    pub median_kernel: Option<f64>,
    pub ma_window_sec: Option<f64>,
    pub derivative_window_sec: Option<f64>,
    pub pre_window_sec: Option<f64>,
    pub guard_sec: Option<f64>,
    pub k_noise: Option<f64>,
    pub slope_threshold: Option<f64>,
    pub sustain_sec: Option<f64>,
    pub min_after_peak_sec: Option<f64>,
    pub post_window_sec: Option<f64>,
    pub drop_slope_threshold: Option<f64>,
    pub flat_slope_threshold: Option<f64>,
    pub flat_tolerance_k_noise: Option<f64>,
    pub dwell_sec: Option<f64>,
    pub fallback_onset_sec: Option<f64>,
    pub fallback_empty_sec: Option<f64>,
}

/// How a segment boundary was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMethod {
    Detected,
    Fallback,
    Corrected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventRole {
    Onset,
    Peak,
    Empty,
}

/// One contraction-voiding cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub i: usize,
    pub onset_time: f64,
    pub peak_time: f64,
    pub empty_time: f64,
    pub onset_method: BoundaryMethod,
    pub empty_method: BoundaryMethod,
    pub metrics: SegmentMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPoints {
    pub onset: Vec<EventPoint>,
    pub peak: Vec<EventPoint>,
    pub empty: Vec<EventPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentDerivation {
    pub points: EventPoints,
    pub segments: Vec<Segment>,
}

/// Smoothed pressure and its time derivative.
#[derive(Debug, Clone)]
pub struct SmoothedPressure {
    pub smoothed: Vec<f64>,
    pub derivative: Vec<f64>,
}

/// Median filter, then time-window moving average, then time-window slope.
pub fn smooth_pressure(pressure: &SampleSeries, params: &SegmentParams) -> SmoothedPressure {
    let filtered = median_filter(&pressure.values, params.median_kernel);
    let smoothed = time_moving_average(&pressure.times, &filtered, params.ma_window_sec);
    let derivative = time_derivative(&pressure.times, &smoothed, params.derivative_window_sec);
    SmoothedPressure {
        smoothed,
        derivative,
    }
}

/// Inclusive index range of samples with `start <= time <= end`.
fn index_range(times: &[f64], start: f64, end: f64) -> Option<(usize, usize)> {
    if !(start <= end) {
        return None;
    }
    let lo = times.partition_point(|&t| t < start);
    let hi = times.partition_point(|&t| t <= end);
    (lo < hi).then(|| (lo, hi - 1))
}

/// Median baseline and MAD-based noise of a window.
fn baseline_and_noise(window: &[f64]) -> (f64, f64) {
    let baseline = median(window).unwrap_or(0.0);
    let noise = mad(window).map_or(0.0, |m| m * MAD_TO_SIGMA);
    (baseline, noise.max(NOISE_FLOOR))
}

/// First index `s` in `start..=last_start` such that `accept` holds for
/// every sample from `s` until `duration` seconds have elapsed. The run may
/// continue past `last_start` but not to `limit`.
fn earliest_sustained(
    times: &[f64],
    start: usize,
    last_start: usize,
    limit: usize,
    duration: f64,
    accept: impl Fn(usize) -> bool,
) -> Option<usize> {
    let mut run: Option<usize> = None;
    for j in start..limit.min(times.len()) {
        if !accept(j) {
            run = None;
            if j >= last_start {
                break;
            }
            continue;
        }
        let s = match run {
            Some(s) => s,
            None if j > last_start => break,
            None => {
                run = Some(j);
                j
            }
        };
        if times[j] - times[s] >= duration {
            return Some(s);
        }
    }
    None
}

fn find_onset(
    times: &[f64],
    smooth: &SmoothedPressure,
    peak: usize,
    params: &SegmentParams,
) -> Option<usize> {
    let peak_time = times[peak];
    let (lo, hi) = index_range(
        times,
        peak_time - params.pre_window_sec,
        peak_time - params.guard_sec,
    )?;
    let hi = hi.min(peak.checked_sub(1)?);
    if lo > hi {
        return None;
    }
    let (baseline, noise) = baseline_and_noise(&smooth.smoothed[lo..=hi]);
    let threshold = baseline + params.k_noise * noise;
    earliest_sustained(times, lo, hi, peak, params.sustain_sec, |j| {
        smooth.smoothed[j] > threshold && smooth.derivative[j] > params.slope_threshold
    })
}

fn find_empty(
    times: &[f64],
    smooth: &SmoothedPressure,
    peak: usize,
    params: &SegmentParams,
) -> Option<(usize, BoundaryMethod)> {
    let peak_time = times[peak];
    let (lo, hi) = index_range(
        times,
        peak_time + params.min_after_peak_sec,
        peak_time + params.post_window_sec,
    )?;
    let lo = lo.max(peak + 1);
    if lo > hi {
        return None;
    }
    let drop = (lo..=hi)
        .find(|&j| smooth.derivative[j] < -params.drop_slope_threshold)
        .unwrap_or(lo);
    let (baseline, noise) = baseline_and_noise(&smooth.smoothed[drop..=hi]);
    let tolerance = params.flat_tolerance_k_noise * noise;
    let flat = earliest_sustained(times, drop, hi, times.len(), params.dwell_sec, |j| {
        smooth.derivative[j].abs() < params.flat_slope_threshold
            && (smooth.smoothed[j] - baseline).abs() < tolerance
    });
    if let Some(idx) = flat {
        return Some((idx, BoundaryMethod::Detected));
    }
    let lowest = (lo..=hi).fold(lo, |acc, j| {
        if smooth.smoothed[j] < smooth.smoothed[acc] {
            j
        } else {
            acc
        }
    });
    Some((lowest, BoundaryMethod::Fallback))
}

fn fallback_onset(times: &[f64], peak_time: f64, params: &SegmentParams) -> usize {
    let target = (peak_time - params.fallback_onset_sec).max(times[0]);
    nearest_index(times, target).unwrap_or(0)
}

fn fallback_empty(times: &[f64], anchor_time: f64, params: &SegmentParams) -> usize {
    let last = times.len() - 1;
    let target = (anchor_time + params.fallback_empty_sec).min(times[last]);
    nearest_index(times, target).unwrap_or(last)
}

/// Latest sample strictly earlier in time than `idx`.
fn previous_distinct(times: &[f64], idx: usize) -> Option<usize> {
    let pos = times.partition_point(|&t| t < times[idx]);
    pos.checked_sub(1)
}

/// Earliest sample strictly later in time than `idx`.
fn next_distinct(times: &[f64], idx: usize) -> Option<usize> {
    let pos = times.partition_point(|&t| t <= times[idx]);
    (pos < times.len()).then_some(pos)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Triple {
    onset: usize,
    onset_method: BoundaryMethod,
    peak: usize,
    empty: usize,
    empty_method: BoundaryMethod,
}

/// Ordering invariants, checked and repaired in this fixed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderingCheck {
    OnsetBeforePeak,
    EmptyAfterPeak,
    EmptyAfterOnset,
}

const ORDERING_CHECKS: [OrderingCheck; 3] = [
    OrderingCheck::OnsetBeforePeak,
    OrderingCheck::EmptyAfterPeak,
    OrderingCheck::EmptyAfterOnset,
];

impl OrderingCheck {
    fn holds(self, times: &[f64], t: &Triple) -> bool {
        match self {
            OrderingCheck::OnsetBeforePeak => times[t.onset] < times[t.peak],
            OrderingCheck::EmptyAfterPeak => times[t.empty] > times[t.peak],
            OrderingCheck::EmptyAfterOnset => times[t.empty] > times[t.onset],
        }
    }

    /// Re-derive the offending boundary from its fallback offset, then step
    /// to the adjacent distinct sample if the offset still lands wrong.
    /// `None` when no sample can satisfy the check.
    fn repair(self, times: &[f64], t: &mut Triple, params: &SegmentParams) -> Option<()> {
        match self {
            OrderingCheck::OnsetBeforePeak => {
                t.onset = fallback_onset(times, times[t.peak], params);
                if times[t.onset] >= times[t.peak] {
                    t.onset = previous_distinct(times, t.peak)?;
                }
                t.onset_method = BoundaryMethod::Corrected;
            }
            OrderingCheck::EmptyAfterPeak => {
                t.empty = fallback_empty(times, times[t.peak], params);
                if times[t.empty] <= times[t.peak] {
                    t.empty = next_distinct(times, t.peak)?;
                }
                t.empty_method = BoundaryMethod::Corrected;
            }
            OrderingCheck::EmptyAfterOnset => {
                t.empty = fallback_empty(times, times[t.onset], params);
                if times[t.empty] <= times[t.onset] {
                    t.empty = next_distinct(times, t.onset)?;
                }
                t.empty_method = BoundaryMethod::Corrected;
            }
        }
        Some(())
    }
}

fn enforce_ordering(times: &[f64], mut triple: Triple, params: &SegmentParams) -> Option<Triple> {
    for check in ORDERING_CHECKS {
        if !check.holds(times, &triple) {
            debug!("segment at peak {} violates {:?}", triple.peak, check);
            check.repair(times, &mut triple, params)?;
        }
    }
    ORDERING_CHECKS
        .iter()
        .all(|check| check.holds(times, &triple))
        .then_some(triple)
}

/// Derive onset/peak/empty triples and per-segment metrics.
///
/// A peak keeps its own index when that still points at its time in
/// `pressure`; otherwise it is matched by nearest time. Peaks are processed
/// in ascending time order. A peak sitting on the first or last distinct
/// timestamp has no strictly ordered triple and is skipped.
pub fn derive_segments(
    pressure: &SampleSeries,
    volume: Option<&SampleSeries>,
    peaks: &[Peak],
    params: &SegmentParams,
) -> SegmentDerivation {
    let params = params.normalized();
    if pressure.is_empty() || peaks.is_empty() {
        return SegmentDerivation::default();
    }
    let times = &pressure.times;
    let smooth = smooth_pressure(pressure, &params);

    let mut peak_indices: Vec<usize> = peaks
        .iter()
        .filter(|p| p.time.is_finite())
        .filter_map(|p| match times.get(p.index) {
            Some(&t) if t == p.time => Some(p.index),
            _ => nearest_index(times, p.time),
        })
        .collect();
    peak_indices.sort_unstable();
    peak_indices.dedup();

    let mut out = SegmentDerivation::default();
    for peak in peak_indices {
        let (onset, onset_method) = match find_onset(times, &smooth, peak, &params) {
            Some(idx) => (idx, BoundaryMethod::Detected),
            None => (fallback_onset(times, times[peak], &params), BoundaryMethod::Fallback),
        };
        let (empty, empty_method) = find_empty(times, &smooth, peak, &params).unwrap_or_else(|| {
            (fallback_empty(times, times[peak], &params), BoundaryMethod::Fallback)
        });

        let candidate = Triple {
            onset,
            onset_method,
            peak,
            empty,
            empty_method,
        };
        let Some(triple) = enforce_ordering(times, candidate, &params) else {
            warn!(
                "skipping peak at t={} (index {}): no ordered onset/empty exists",
                times[peak],
                peak
            );
            continue;
        };

        let onset_point = EventPoint::at(pressure, triple.onset);
        let peak_point = EventPoint::at(pressure, triple.peak);
        let empty_point = EventPoint::at(pressure, triple.empty);
        let previous_empty = out.segments.last().map(|s: &Segment| s.empty_time);

        out.segments.push(Segment {
            i: out.segments.len(),
            onset_time: onset_point.time,
            peak_time: peak_point.time,
            empty_time: empty_point.time,
            onset_method: triple.onset_method,
            empty_method: triple.empty_method,
            metrics: SegmentMetrics {
                imi_sec: inter_micturition_interval(previous_empty, onset_point.time),
                max_pressure: peak_point.value,
                avg_pressure_between_empty_and_next_onset: None,
                delta_volume: delta_volume(volume, onset_point.time, empty_point.time),
            },
        });
        out.points.onset.push(onset_point);
        out.points.peak.push(peak_point);
        out.points.empty.push(empty_point);
    }

    let next_onsets: Vec<f64> = out.segments.iter().skip(1).map(|s| s.onset_time).collect();
    for (segment, next_onset) in out.segments.iter_mut().zip(next_onsets) {
        segment.metrics.avg_pressure_between_empty_and_next_onset =
            mean_between(pressure, segment.empty_time, next_onset);
    }

    debug!(
        "derived {} segments from {} peaks",
        out.segments.len(),
        peaks.len()
    );
    out
}

/// Snap a manually placed onset or empty marker onto a nearby sample whose
/// local slope fits the role, falling back to the nearest sample.
///
/// Slopes are backward differences (forward at the first sample); a zero
/// time step counts as one second.
pub fn snap_event(
    series: &SampleSeries,
    time: f64,
    role: EventRole,
    params: &SegmentParams,
) -> Option<EventPoint> {
    let nearest = series.nearest_index(time)?;
    if role == EventRole::Peak || series.len() < 2 {
        return Some(EventPoint::at(series, nearest));
    }
    let times = &series.times;
    let values = &series.values;
    let slope = |i: usize| {
        let (a, b) = if i == 0 { (0, 1) } else { (i - 1, i) };
        let dt = times[b] - times[a];
        let dt = if dt == 0.0 { 1.0 } else { dt };
        (values[b] - values[a]) / dt
    };
    let fits = |i: usize| match role {
        EventRole::Onset => slope(i) >= params.slope_threshold,
        _ => slope(i).abs() <= params.flat_slope_threshold,
    };
    let distance = |i: usize| (times[i] - time).abs();
    let best = (0..series.len())
        .filter(|&i| fits(i))
        .min_by(|&a, &b| distance(a).total_cmp(&distance(b)))
        .unwrap_or(nearest);
    Some(EventPoint::at(series, best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::peaks::{detect_peaks, DetectionParams};
    use crate::simulation::{simulate_cystometrogram, SimulationConfig};

    fn uniform(values: Vec<f64>) -> SampleSeries {
        let times = (0..values.len()).map(|i| i as f64).collect();
        SampleSeries::new(times, values)
    }

    /// Baseline 5 until t=200, linear ramp to 45 at t=240, fast decline to
    /// a plateau of 8 reached at t=255.
    fn ramp_and_plateau() -> SampleSeries {
        let values = (0..600).map(|i| {
            let t = i as f64;
            if t <= 200.0 {
                5.0
            } else if t <= 240.0 {
                5.0 + (t - 200.0)
            } else if t <= 255.0 {
                45.0 - 37.0 * (t - 240.0) / 15.0
            } else {
                8.0
            }
        });
        uniform(values.collect())
    }

    fn assert_ordered(derivation: &SegmentDerivation) {
        for s in &derivation.segments {
            assert!(
                s.onset_time < s.peak_time && s.peak_time < s.empty_time,
                "unordered segment {:?}",
                s
            );
        }
        for pair in derivation.segments.windows(2) {
            assert!(pair[0].peak_time < pair[1].peak_time);
        }
    }

    #[test]
    fn single_ramp_and_plateau() {
        let pressure = ramp_and_plateau();
        let peaks = detect_peaks(&pressure, &DetectionParams::default()).peaks;
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 240);

        let result = derive_segments(&pressure, None, &peaks, &SegmentParams::default());
        assert_eq!(result.segments.len(), 1);
        let seg = &result.segments[0];
        let (onset, empty) = (seg.onset_time, seg.empty_time);
        assert!((190.0..=200.0).contains(&onset), "onset {}", onset);
        assert!((250.0..=265.0).contains(&empty), "empty {}", empty);
        assert_eq!(seg.onset_method, BoundaryMethod::Detected);
        assert_eq!(seg.empty_method, BoundaryMethod::Detected);
        assert_eq!(seg.metrics.max_pressure, 45.0);
        assert_eq!(seg.metrics.delta_volume, None);
        assert_eq!(seg.metrics.imi_sec, None);
        assert_eq!(seg.metrics.avg_pressure_between_empty_and_next_onset, None);
        assert_eq!(result.points.peak[0].index, 240);
    }

    #[test]
    fn delta_volume_follows_infusion() {
        let pressure = ramp_and_plateau();
        let volume = uniform((0..600).map(|i| i as f64 * 0.5).collect());
        let peaks = detect_peaks(&pressure, &DetectionParams::default()).peaks;
        let result = derive_segments(&pressure, Some(&volume), &peaks, &SegmentParams::default());
        let seg = &result.segments[0];
        let expected = 0.5 * (seg.empty_time - seg.onset_time);
        assert!((seg.metrics.delta_volume.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn metrics_chain_across_segments() {
        let sim = simulate_cystometrogram(&SimulationConfig {
            voids: 3,
            noise_sd: 0.0,
            ..Default::default()
        });
        let peaks = detect_peaks(
            &sim.pressure,
            &DetectionParams {
                height: Some(20.0),
                distance: Some(60),
                ..Default::default()
            },
        )
        .peaks;
        assert_eq!(peaks.len(), 3);
        let params = SegmentParams::default();
        let result = derive_segments(&sim.pressure, Some(&sim.volume), &peaks, &params);
        assert_eq!(result.segments.len(), 3);
        assert_ordered(&result);

        let segs = &result.segments;
        assert_eq!(segs[0].metrics.imi_sec, None);
        for pair in segs.windows(2) {
            let gap = pair[1].onset_time - pair[0].empty_time;
            assert_eq!(pair[1].metrics.imi_sec, Some(gap));
            let avg = pair[0]
                .metrics
                .avg_pressure_between_empty_and_next_onset
                .expect("filling phase between voids");
            assert!(avg > 0.0 && avg < 20.0, "avg {}", avg);
        }
        let trailing = segs[2].metrics.avg_pressure_between_empty_and_next_onset;
        assert_eq!(trailing, None);
        for (i, seg) in segs.iter().enumerate() {
            assert_eq!(seg.i, i);
            assert!(seg.metrics.delta_volume.unwrap() > 0.0);
        }
    }

    #[test]
    fn ordering_holds_on_noisy_recordings() {
        let params = SegmentParams::default();
        for seed in 0..12 {
            let sim = simulate_cystometrogram(&SimulationConfig {
                voids: 4,
                noise_sd: 1.5,
                seed,
                ..Default::default()
            });
            let peaks = detect_peaks(&sim.pressure, &DetectionParams::default()).peaks;
            assert!(!peaks.is_empty());
            let result = derive_segments(&sim.pressure, Some(&sim.volume), &peaks, &params);
            assert_eq!(result.segments.len(), peaks.len());
            assert_ordered(&result);
            if let Some(last) = result.segments.last() {
                assert_eq!(last.metrics.avg_pressure_between_empty_and_next_onset, None);
            }
            for pair in result.segments.windows(2) {
                if pair[1].onset_time <= pair[0].empty_time {
                    assert_eq!(pair[1].metrics.imi_sec, None);
                }
            }
        }
    }

    #[test]
    fn overlapping_cycles_have_no_imi() {
        // two crests 30 s apart: the second onset precedes the first empty
        let values: Vec<f64> = (0..300)
            .map(|i| {
                let t = i as f64;
                5.0 + 30.0 * (-((t - 120.0) / 6.0).powi(2)).exp()
                    + 30.0 * (-((t - 150.0) / 6.0).powi(2)).exp()
            })
            .collect();
        let pressure = uniform(values);
        let peaks = detect_peaks(
            &pressure,
            &DetectionParams {
                height: Some(20.0),
                ..Default::default()
            },
        )
        .peaks;
        assert_eq!(peaks.len(), 2);
        let result = derive_segments(&pressure, None, &peaks, &SegmentParams::default());
        assert_eq!(result.segments.len(), 2);
        assert_ordered(&result);
        let (first, second) = (&result.segments[0], &result.segments[1]);
        assert!(second.onset_time <= first.empty_time);
        assert_eq!(second.metrics.imi_sec, None);
        let between = first.metrics.avg_pressure_between_empty_and_next_onset;
        assert_eq!(between, None);
    }

    #[test]
    fn boundary_peaks_are_corrected_or_skipped() {
        let pressure = uniform(vec![1.0, 2.0, 3.0, 2.0, 1.0]);
        let at = |index: usize| Peak::at(&pressure, index);

        // first and last samples admit no strictly ordered triple
        let result = derive_segments(&pressure, None, &[at(0), at(4)], &SegmentParams::default());
        assert!(result.segments.is_empty());

        // peaks one sample in from each edge fall back to the edge samples
        let result = derive_segments(&pressure, None, &[at(1), at(3)], &SegmentParams::default());
        assert_eq!(result.segments.len(), 2);
        assert_ordered(&result);
        assert_eq!(result.points.onset[0].index, 0);
        assert_eq!(result.points.empty[1].index, 4);
    }

    #[test]
    fn short_series_fallbacks_stay_ordered() {
        let pressure = uniform(vec![0.0, 4.0, 1.0]);
        let params = SegmentParams {
            fallback_onset_sec: 0.0,
            fallback_empty_sec: 0.0,
            ..Default::default()
        };
        let result = derive_segments(&pressure, None, &[Peak::at(&pressure, 1)], &params);
        assert_eq!(result.segments.len(), 1);
        let seg = &result.segments[0];
        let triple = (seg.onset_time, seg.peak_time, seg.empty_time);
        assert_eq!(triple, (0.0, 1.0, 2.0));
        assert_eq!(seg.onset_method, BoundaryMethod::Corrected);
        assert_eq!(seg.empty_method, BoundaryMethod::Corrected);
    }

    #[test]
    fn duplicate_timestamps_do_not_break_ordering() {
        let pressure = SampleSeries::new(
            vec![0.0, 1.0, 1.0, 1.0, 2.0, 3.0],
            vec![0.0, 1.0, 5.0, 1.0, 0.5, 0.0],
        );
        let params = SegmentParams {
            fallback_onset_sec: 0.0,
            fallback_empty_sec: 0.0,
            ..Default::default()
        };
        let result = derive_segments(&pressure, None, &[Peak::at(&pressure, 2)], &params);
        assert_eq!(result.segments.len(), 1);
        assert_ordered(&result);
    }

    #[test]
    fn ordering_correction_is_idempotent() {
        let times: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let params = SegmentParams::default();
        let broken = Triple {
            onset: 30,
            onset_method: BoundaryMethod::Detected,
            peak: 20,
            empty: 10,
            empty_method: BoundaryMethod::Detected,
        };
        let once = enforce_ordering(&times, broken, &params).unwrap();
        let twice = enforce_ordering(&times, once, &params).unwrap();
        assert_eq!(once, twice);
        assert!(once.onset < once.peak && once.peak < once.empty);
        assert_eq!(once.onset, 0);
        assert_eq!(once.empty, 49);
    }

    #[test]
    fn empty_inputs_yield_empty_derivation() {
        let pressure = ramp_and_plateau();
        let params = SegmentParams::default();
        let result = derive_segments(&pressure, None, &[], &params);
        assert_eq!(result, SegmentDerivation::default());
        let peak = Peak {
            time: 1.0,
            value: 1.0,
            index: 0,
        };
        let empty = SampleSeries::default();
        let result = derive_segments(&empty, None, &[peak], &params);
        assert_eq!(result, SegmentDerivation::default());
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let json = r#"{"medianKernel": 4, "kNoise": 2.5, "dwellSec": null}"#;
        let overrides: SegmentOverrides = serde_json::from_str(json).unwrap();
        let params = SegmentParams::default().merged(&overrides);
        assert_eq!(params.median_kernel, 5);
        assert_eq!(params.k_noise, 2.5);
        assert_eq!(params.dwell_sec, SegmentParams::default().dwell_sec);
        let misspelt = serde_json::from_str::<SegmentOverrides>(r#"{"kNoize": 1}"#);
        assert!(misspelt.is_err());

        let zero = SegmentParams {
            median_kernel: 0,
            ..Default::default()
        };
        assert_eq!(zero.normalized().median_kernel, 1);
    }

    #[test]
    fn peak_index_wins_over_duplicate_timestamp() {
        let pressure = SampleSeries::new(vec![0.0, 1.0, 1.0, 2.0], vec![0.0, 5.0, 6.0, 0.0]);
        let peak = Peak::at(&pressure, 2);
        let result = derive_segments(&pressure, None, &[peak], &SegmentParams::default());
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].metrics.max_pressure, 6.0);
        assert_eq!(result.points.peak[0].index, 2);

        // a stale index falls back to the nearest sample in time
        let stale = Peak {
            time: 1.0,
            value: 6.0,
            index: 7,
        };
        let result = derive_segments(&pressure, None, &[stale], &SegmentParams::default());
        assert_eq!(result.points.peak[0].index, 1);
    }

    #[test]
    fn snapping_respects_slope_role() {
        let pressure = ramp_and_plateau();
        let params = SegmentParams::default();
        // t=198 is flat; the closest rising sample is on the ramp
        let onset = snap_event(&pressure, 198.0, EventRole::Onset, &params).unwrap();
        assert_eq!(onset.index, 201);
        // t=250 is mid-decline; the closest flat sample starts the plateau
        let empty = snap_event(&pressure, 250.0, EventRole::Empty, &params).unwrap();
        assert_eq!(empty.index, 256);
        let peak = snap_event(&pressure, 240.4, EventRole::Peak, &params).unwrap();
        assert_eq!(peak.index, 240);
    }
}
