//! Grid search over peak-detection parameters.
//!
//! Candidate parameter sets are derived from the pressure distribution and
//! the expected number of voids, each set is run through the detector, and
//! the results are scored on how well the peak count, spacing and local
//! prominence fit the expectation.

use crate::{
    detectors::peaks::{DetectionParams, FinderMode, PeakDetector},
    filters::{median, percentile},
    signal::{finite_or_null, Peak, SampleSeries},
};
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUDGET: usize = 60;
pub const MAX_CANDIDATES: usize = 5;
/// Samples inspected on each side when scoring a peak's local prominence.
pub const LOCAL_PROMINENCE_WINDOW: usize = 5;

const HEIGHT_PERCENTILES: [f64; 4] = [50.0, 60.0, 70.0, 80.0];
const DISTANCE_MULTIPLIERS: [f64; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];
const PROMINENCE_FRACTIONS: [f64; 3] = [0.05, 0.10, 0.15];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub budget: usize,
    pub mode: FinderMode,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
            mode: FinderMode::Precise,
        }
    }
}

/// One evaluated parameter set. Lower scores are better.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub params: DetectionParams,
    pub peaks: Vec<Peak>,
    #[serde(serialize_with = "finite_or_null")]
    pub score: f64,
}

impl Candidate {
    /// Placeholder returned when nothing could be evaluated.
    pub fn sentinel() -> Self {
        Self {
            params: DetectionParams::default(),
            peaks: Vec::new(),
            score: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResult {
    pub best: Candidate,
    pub candidates: Vec<Candidate>,
    /// How many parameter sets were scored before ranking.
    pub evaluated: usize,
}

/// Parameter sweep bound to one detector strategy.
#[derive(Debug)]
pub struct ParameterSweep {
    detector: PeakDetector,
    budget: usize,
}

impl Default for ParameterSweep {
    fn default() -> Self {
        Self::new(SweepConfig::default())
    }
}

impl ParameterSweep {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            detector: PeakDetector::new(config.mode),
            budget: config.budget.max(1),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn run(&self, pressure: &SampleSeries, expected_count: usize) -> SweepResult {
        let values = &pressure.values;
        let grid = parameter_grid(values, expected_count, self.budget);
        let mut candidates = self.evaluate(pressure, &grid, expected_count);
        let evaluated = candidates.len();

        rank(&mut candidates);
        candidates.truncate(MAX_CANDIDATES);
        let best = candidates
            .first()
            .cloned()
            .unwrap_or_else(Candidate::sentinel);
        debug!(
            "sweep scored {} parameter sets, best score {} with {} peaks",
            evaluated,
            best.score,
            best.peaks.len()
        );
        SweepResult {
            best,
            candidates,
            evaluated,
        }
    }

    fn score_one(
        &self,
        pressure: &SampleSeries,
        params: &DetectionParams,
        expected: usize,
    ) -> Candidate {
        let detection = self.detector.detect(pressure, params);
        let used = &detection.params_used;
        let score = score_candidate(&pressure.values, &detection.peaks, used, expected);
        Candidate {
            params: detection.params_used,
            peaks: detection.peaks,
            score,
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn evaluate(
        &self,
        pressure: &SampleSeries,
        grid: &[DetectionParams],
        expected: usize,
    ) -> Vec<Candidate> {
        grid.iter()
            .map(|params| self.score_one(pressure, params, expected))
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn evaluate(
        &self,
        pressure: &SampleSeries,
        grid: &[DetectionParams],
        expected: usize,
    ) -> Vec<Candidate> {
        use rayon::prelude::*;
        grid.par_iter()
            .map(|params| self.score_one(pressure, params, expected))
            .collect()
    }
}

/// Run the sweep with the precise finder.
pub fn suggest_params(
    pressure: &SampleSeries,
    expected_count: usize,
    budget: usize,
) -> SweepResult {
    ParameterSweep::new(SweepConfig {
        budget,
        ..Default::default()
    })
    .run(pressure, expected_count)
}

/// Distinct 50/60/70/80th percentiles, ascending; `[None]` for no data.
pub fn height_candidates(values: &[f64]) -> Vec<Option<f64>> {
    let mut heights: Vec<f64> = HEIGHT_PERCENTILES
        .iter()
        .filter_map(|&pct| percentile(values, pct))
        .collect();
    heights.sort_by(f64::total_cmp);
    heights.dedup();
    if heights.is_empty() {
        vec![None]
    } else {
        heights.into_iter().map(Some).collect()
    }
}

/// Multiples of the spacing expected between `expected_count` evenly spread
/// peaks, distinct and ascending.
pub fn distance_candidates(length: usize, expected_count: usize) -> Vec<usize> {
    if length == 0 {
        return vec![1];
    }
    let spacing = length as f64 / expected_count.max(1) as f64;
    let mut distances: Vec<usize> = DISTANCE_MULTIPLIERS
        .iter()
        .map(|m| ((spacing * m).round() as usize).max(1))
        .collect();
    distances.sort_unstable();
    distances.dedup();
    distances
}

/// No constraint plus 5/10/15% of the value range; only `[None]` when the
/// series is flat or empty.
pub fn prominence_candidates(values: &[f64]) -> Vec<Option<f64>> {
    let range = value_range(values);
    if range > 0.0 {
        std::iter::once(None)
            .chain(PROMINENCE_FRACTIONS.iter().map(|f| Some(range * f)))
            .collect()
    } else {
        vec![None]
    }
}

/// Enumerate distance, then prominence, then height, stopping at `budget`.
pub fn parameter_grid(
    values: &[f64],
    expected_count: usize,
    budget: usize,
) -> Vec<DetectionParams> {
    let heights = height_candidates(values);
    let prominences = prominence_candidates(values);
    let distances = distance_candidates(values.len(), expected_count);
    let (heights, prominences) = (&heights, &prominences);

    distances
        .iter()
        .flat_map(move |&distance| {
            prominences.iter().flat_map(move |&prominence| {
                heights.iter().map(move |&height| DetectionParams {
                    height,
                    distance: Some(distance),
                    prominence,
                    ..Default::default()
                })
            })
        })
        .take(budget.max(1))
        .collect()
}

/// Peak value minus the higher of the minima within `window` samples on
/// either side. An empty side counts as the peak itself.
pub fn local_prominence(values: &[f64], index: usize, window: usize) -> f64 {
    let start = index.saturating_sub(window);
    let end = (index + window + 1).min(values.len());
    let peak = values[index];
    let side_min = |side: &[f64]| side.iter().copied().reduce(f64::min).unwrap_or(peak);
    let left = side_min(&values[start..index]);
    let right = side_min(&values[index + 1..end]);
    peak - left.max(right)
}

/// Count, spacing and prominence penalties, summed.
pub fn score_candidate(
    values: &[f64],
    peaks: &[Peak],
    params: &DetectionParams,
    expected: usize,
) -> f64 {
    let count_penalty = (peaks.len() as f64 - expected as f64).abs();

    let mut distance_penalty = 0.0;
    if let Some(distance) = params.distance.filter(|_| peaks.len() > 1) {
        let mut indices: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        indices.sort_unstable();
        let d = distance as f64;
        for gap in indices.windows(2).map(|w| w[1] - w[0]) {
            if gap < distance {
                distance_penalty += (d - gap as f64) / d.max(1.0);
            }
        }
    }

    let mut prominence_penalty = 0.0;
    let range = value_range(values);
    if !peaks.is_empty() && range > 0.0 {
        let local = |p: &Peak| local_prominence(values, p.index, LOCAL_PROMINENCE_WINDOW);
        let prominences: Vec<f64> = peaks
            .iter()
            .filter(|p| p.index < values.len())
            .map(local)
            .collect();
        if let Some(med) = median(&prominences) {
            if med < 0.03 * range {
                prominence_penalty = 0.75;
            } else if med < 0.06 * range {
                prominence_penalty = 0.25;
            }
        }
    }

    count_penalty + distance_penalty + prominence_penalty
}

/// Ascending score, then more peaks, then smaller distance. Stable, so
/// equal candidates keep enumeration order.
pub fn rank(candidates: &mut [Candidate]) {
    let distance = |c: &Candidate| c.params.distance.unwrap_or(0);
    candidates.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| b.peaks.len().cmp(&a.peaks.len()))
            .then_with(|| distance(a).cmp(&distance(b)))
    });
}

fn value_range(values: &[f64]) -> f64 {
    let max = values.iter().copied().reduce(f64::max);
    let min = values.iter().copied().reduce(f64::min);
    match (max, min) {
        (Some(max), Some(min)) => max - min,
        _ => 0.0,
    }
}
