use crate::signal::{Peak, SampleSeries};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Sparse constraints for the local-maximum search. `None` leaves a
/// constraint off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DetectionParams {
    /// Minimum absolute peak value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Minimum rise over both immediate neighbours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Minimum separation between kept peaks, in samples.
    #[serde(
        default,
        deserialize_with = "sample_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub distance: Option<usize>,
    /// Minimum topographic prominence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prominence: Option<f64>,
    /// Minimum width (samples) at half prominence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

impl DetectionParams {
    /// Drop non-finite values and clamp the distance to at least one sample.
    pub fn normalized(&self) -> Self {
        Self {
            height: finite(self.height),
            threshold: finite(self.threshold),
            distance: self.distance.map(|d| d.max(1)),
            prominence: finite(self.prominence),
            width: finite(self.width),
        }
    }

    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn merged(&self, other: &DetectionParams) -> Self {
        Self {
            height: other.height.or(self.height),
            threshold: other.threshold.or(self.threshold),
            distance: other.distance.or(self.distance),
            prominence: other.prominence.or(self.prominence),
            width: other.width.or(self.width),
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        *self == Self::default()
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Coerce a numeric distance (possibly fractional) into a sample count.
pub fn coerce_distance(raw: f64) -> Option<usize> {
    if raw.is_finite() {
        Some(raw.round().max(1.0) as usize)
    } else {
        None
    }
}

fn sample_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f64> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(coerce_distance))
}

/// Peaks plus the constraints that were actually enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakDetection {
    pub peaks: Vec<Peak>,
    pub params_used: DetectionParams,
}

/// Strategy for turning a value column into peak indices.
pub trait PeakFinder: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Indices of accepted peaks, strictly ascending.
    fn find(&self, values: &[f64], params: &DetectionParams) -> Vec<usize>;

    /// The subset of `params` this strategy honours.
    fn applied(&self, params: &DetectionParams) -> DetectionParams;
}

/// Full search: height, threshold, distance, prominence and width passes.
#[derive(Debug, Clone, Copy)]
pub struct PreciseFinder {
    /// Bound on the prominence base search, in samples. `None` walks the
    /// whole series.
    pub prominence_window: Option<usize>,
    /// Relative height (fraction of prominence) at which widths are taken.
    pub rel_height: f64,
}

impl Default for PreciseFinder {
    fn default() -> Self {
        Self {
            prominence_window: None,
            rel_height: 0.5,
        }
    }
}

impl PeakFinder for PreciseFinder {
    fn name(&self) -> &'static str {
        "precise"
    }

    fn find(&self, values: &[f64], params: &DetectionParams) -> Vec<usize> {
        let mut peaks = local_maxima(values);
        if let Some(height) = params.height {
            peaks = filter_by_height(&peaks, values, height);
        }
        if let Some(threshold) = params.threshold {
            peaks = filter_by_threshold(&peaks, values, threshold);
        }
        if let Some(distance) = params.distance {
            peaks = filter_by_distance(&peaks, values, distance);
        }
        if let Some(prominence) = params.prominence {
            peaks = filter_by_prominence(&peaks, values, prominence, self.prominence_window);
        }
        if let Some(width) = params.width {
            peaks = filter_by_width(
                &peaks,
                values,
                width,
                self.rel_height,
                self.prominence_window,
            );
        }
        peaks
    }

    fn applied(&self, params: &DetectionParams) -> DetectionParams {
        *params
    }
}

/// Degraded search used when the full algorithm is not wanted.
///
/// Strict local maxima, the height floor, and a left-to-right "minimum gap
/// since the last accepted peak" rule. The gap rule keeps the earliest peak
/// of a cluster rather than the tallest, so results are approximate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateFinder;

impl PeakFinder for ApproximateFinder {
    fn name(&self) -> &'static str {
        "approximate"
    }

    fn find(&self, values: &[f64], params: &DetectionParams) -> Vec<usize> {
        let mut peaks = local_maxima(values);
        if let Some(height) = params.height {
            peaks = filter_by_height(&peaks, values, height);
        }
        let Some(min_gap) = params.distance else {
            return peaks;
        };
        let mut kept: Vec<usize> = Vec::with_capacity(peaks.len());
        for idx in peaks {
            match kept.last() {
                Some(&last) if idx - last < min_gap => continue,
                _ => kept.push(idx),
            }
        }
        kept
    }

    fn applied(&self, params: &DetectionParams) -> DetectionParams {
        DetectionParams {
            height: params.height,
            distance: params.distance,
            ..DetectionParams::default()
        }
    }
}

/// Which peak finder to use; picked once when a detector is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinderMode {
    #[default]
    Precise,
    Approximate,
}

impl FinderMode {
    pub fn finder(self) -> Box<dyn PeakFinder> {
        match self {
            FinderMode::Precise => Box::new(PreciseFinder::default()),
            FinderMode::Approximate => Box::new(ApproximateFinder),
        }
    }
}

/// Peak detector bound to one finder strategy.
#[derive(Debug)]
pub struct PeakDetector {
    finder: Box<dyn PeakFinder>,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self::new(FinderMode::Precise)
    }
}

impl PeakDetector {
    pub fn new(mode: FinderMode) -> Self {
        Self {
            finder: mode.finder(),
        }
    }

    pub fn with_finder(finder: Box<dyn PeakFinder>) -> Self {
        Self { finder }
    }

    pub fn finder_name(&self) -> &'static str {
        self.finder.name()
    }

    /// Detect peaks in `series`. Fewer than three samples yields no peaks.
    pub fn detect(&self, series: &SampleSeries, params: &DetectionParams) -> PeakDetection {
        let cleaned = params.normalized();
        let params_used = self.finder.applied(&cleaned);
        if series.len() < 3 {
            return PeakDetection {
                peaks: Vec::new(),
                params_used,
            };
        }
        let indices = self.finder.find(&series.values, &params_used);
        debug!(
            "{} finder found {} peaks in {} samples",
            self.finder.name(),
            indices.len(),
            series.len()
        );
        let peaks = indices.into_iter().map(|i| Peak::at(series, i)).collect();
        PeakDetection { peaks, params_used }
    }
}

/// Detect peaks with the precise finder.
pub fn detect_peaks(series: &SampleSeries, params: &DetectionParams) -> PeakDetection {
    PeakDetector::default().detect(series, params)
}

/// Strict local maxima: greater than both neighbours.
pub fn local_maxima(values: &[f64]) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    (1..values.len() - 1)
        .filter(|&i| values[i] > values[i - 1] && values[i] > values[i + 1])
        .collect()
}

pub fn filter_by_height(peaks: &[usize], values: &[f64], min_height: f64) -> Vec<usize> {
    peaks
        .iter()
        .copied()
        .filter(|&i| values[i] >= min_height)
        .collect()
}

/// Keep peaks rising at least `threshold` above both neighbours.
pub fn filter_by_threshold(peaks: &[usize], values: &[f64], threshold: f64) -> Vec<usize> {
    peaks
        .iter()
        .copied()
        .filter(|&i| {
            let rise = (values[i] - values[i - 1]).min(values[i] - values[i + 1]);
            rise >= threshold
        })
        .collect()
}

/// Greedy highest-first selection enforcing `distance` samples between
/// kept peaks. Among equal heights the later index is visited first.
pub fn filter_by_distance(peaks: &[usize], values: &[f64], distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks.to_vec();
    }
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| values[peaks[a]].total_cmp(&values[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// Prominence of a peak with the bases that bound it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prominence {
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
}

/// Topographic prominence of each peak.
///
/// From the peak, walk outward on each side until a strictly higher sample
/// or the window edge is met, tracking the minimum crossed. The prominence
/// is the peak value minus the higher of the two minima.
pub fn peak_prominences(peaks: &[usize], values: &[f64], window: Option<usize>) -> Vec<Prominence> {
    let n = values.len();
    peaks
        .iter()
        .map(|&peak| {
            let (i_min, i_max) = match window {
                Some(w) if w > 1 => (peak.saturating_sub(w / 2), (peak + w / 2).min(n - 1)),
                _ => (0, n - 1),
            };
            let peak_val = values[peak];

            let mut left_min = peak_val;
            let mut left_base = peak;
            let mut i = peak;
            loop {
                if values[i] > peak_val {
                    break;
                }
                if values[i] < left_min {
                    left_min = values[i];
                    left_base = i;
                }
                if i == i_min {
                    break;
                }
                i -= 1;
            }

            let mut right_min = peak_val;
            let mut right_base = peak;
            i = peak;
            loop {
                if values[i] > peak_val {
                    break;
                }
                if values[i] < right_min {
                    right_min = values[i];
                    right_base = i;
                }
                if i == i_max {
                    break;
                }
                i += 1;
            }

            Prominence {
                prominence: peak_val - left_min.max(right_min),
                left_base,
                right_base,
            }
        })
        .collect()
}

pub fn filter_by_prominence(
    peaks: &[usize],
    values: &[f64],
    min_prominence: f64,
    window: Option<usize>,
) -> Vec<usize> {
    peaks
        .iter()
        .zip(peak_prominences(peaks, values, window))
        .filter(|(_, p)| p.prominence >= min_prominence)
        .map(|(&idx, _)| idx)
        .collect()
}

/// Width of each peak at `rel_height` of its prominence, in samples, with
/// linear interpolation at the crossing points.
pub fn peak_widths(
    peaks: &[usize],
    values: &[f64],
    rel_height: f64,
    window: Option<usize>,
) -> Vec<f64> {
    peaks
        .iter()
        .zip(peak_prominences(peaks, values, window))
        .map(|(&peak, prom)| {
            let height = values[peak] - prom.prominence * rel_height;

            let mut i = peak;
            while prom.left_base < i && height < values[i] {
                i -= 1;
            }
            let mut left_ip = i as f64;
            if values[i] < height {
                left_ip += (height - values[i]) / (values[i + 1] - values[i]);
            }

            i = peak;
            while i < prom.right_base && height < values[i] {
                i += 1;
            }
            let mut right_ip = i as f64;
            if values[i] < height {
                right_ip -= (height - values[i]) / (values[i - 1] - values[i]);
            }

            right_ip - left_ip
        })
        .collect()
}

pub fn filter_by_width(
    peaks: &[usize],
    values: &[f64],
    min_width: f64,
    rel_height: f64,
    window: Option<usize>,
) -> Vec<usize> {
    peaks
        .iter()
        .zip(peak_widths(peaks, values, rel_height, window))
        .filter(|(_, w)| *w >= min_width)
        .map(|(&idx, _)| idx)
        .collect()
}

/// Move a manually placed peak onto the nearest local maximum.
///
/// Looks at samples within `window_sec` of `time`; among samples that are
/// at least as high as both neighbours, the one closest (in samples) to
/// the click wins, ties going to the higher value. Without such a sample
/// the highest value in the window is used.
pub fn snap_to_local_max(series: &SampleSeries, time: f64, window_sec: f64) -> Option<Peak> {
    let start = series.nearest_index(time)?;
    let times = &series.times;
    let values = &series.values;
    let window_sec = window_sec.max(0.0);

    let mut left = start;
    while left > 0 && time - times[left - 1] <= window_sec {
        left -= 1;
    }
    let mut right = start;
    while right + 1 < series.len() && times[right + 1] - time <= window_sec {
        right += 1;
    }
    let reach = (start - left).max(right - start);
    let lo = start.saturating_sub(reach);
    let hi = (start + reach).min(series.len() - 1);

    let dominates = |i: usize| {
        let prev = if i > 0 {
            values[i - 1]
        } else {
            f64::NEG_INFINITY
        };
        let next = if i + 1 < values.len() {
            values[i + 1]
        } else {
            f64::NEG_INFINITY
        };
        values[i] >= prev && values[i] >= next
    };

    let mut best: Option<usize> = None;
    for i in (lo..=hi).filter(|&i| dominates(i)) {
        best = match best {
            None => Some(i),
            Some(b) => {
                let (d, bd) = (i.abs_diff(start), b.abs_diff(start));
                if d < bd || (d == bd && values[i] > values[b]) {
                    Some(i)
                } else {
                    Some(b)
                }
            }
        };
    }

    let idx = best.unwrap_or_else(|| {
        (lo..=hi).fold(lo, |acc, i| if values[i] > values[acc] { i } else { acc })
    });
    Some(Peak::at(series, idx))
}
