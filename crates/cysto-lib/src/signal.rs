use serde::{Deserialize, Serialize, Serializer};

/// One time/value observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

/// Time-ordered samples stored column-wise.
///
/// Times are expected to ascend; ingestion sorts rows before building a
/// series, and every analysis routine relies on that for binary search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSeries {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl SampleSeries {
    /// Build a series from parallel columns. Extra entries in the longer
    /// column are discarded.
    pub fn new(mut times: Vec<f64>, mut values: Vec<f64>) -> Self {
        let n = times.len().min(values.len());
        times.truncate(n);
        values.truncate(n);
        Self { times, values }
    }

    pub fn from_samples(samples: &[Sample]) -> Self {
        samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time span between the first and last sample (0 when empty).
    pub fn duration(&self) -> f64 {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    pub fn sample(&self, index: usize) -> Option<Sample> {
        Some(Sample {
            time: *self.times.get(index)?,
            value: *self.values.get(index)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.times
            .iter()
            .zip(self.values.iter())
            .map(|(&time, &value)| Sample { time, value })
    }

    pub fn nearest_index(&self, target: f64) -> Option<usize> {
        nearest_index(&self.times, target)
    }

    /// Value of the sample closest in time to `target`.
    pub fn value_at(&self, target: f64) -> Option<f64> {
        self.nearest_index(target).map(|idx| self.values[idx])
    }

    pub fn max_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn final_value(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Samples with `start <= time <= end`. Bounds are swapped when reversed.
    pub fn window(&self, start: f64, end: f64) -> SampleSeries {
        let (lo, hi) = if start <= end {
            (start, end)
        } else {
            (end, start)
        };
        self.iter()
            .filter(|s| s.time >= lo && s.time <= hi)
            .collect()
    }

    /// Keep only samples falling inside at least one of `intervals`.
    /// An empty interval list keeps everything.
    pub fn keep_intervals(&self, intervals: &[Interval]) -> SampleSeries {
        if intervals.is_empty() {
            return self.clone();
        }
        let merged = merge_intervals(intervals);
        self.iter()
            .filter(|s| merged.iter().any(|iv| iv.contains(s.time)))
            .collect()
    }
}

impl FromIterator<Sample> for SampleSeries {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut times = Vec::new();
        let mut values = Vec::new();
        for sample in iter {
            times.push(sample.time);
            values.push(sample.value);
        }
        Self { times, values }
    }
}

/// Index of the sample closest to `target` in an ascending time column.
///
/// Binary search for the insertion point, then pick whichever bracketing
/// sample is numerically closer; ties go to the earlier sample.
pub fn nearest_index(times: &[f64], target: f64) -> Option<usize> {
    if times.is_empty() {
        return None;
    }
    let pos = times.partition_point(|&t| t < target);
    if pos == 0 {
        return Some(0);
    }
    if pos >= times.len() {
        return Some(times.len() - 1);
    }
    let before = pos - 1;
    if (times[pos] - target).abs() < (times[before] - target).abs() {
        Some(pos)
    } else {
        Some(before)
    }
}

/// Closed time interval used for trimming recordings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }
}

/// Normalize, sort and coalesce overlapping intervals.
pub fn merge_intervals(intervals: &[Interval]) -> Vec<Interval> {
    let mut sorted: Vec<Interval> = intervals
        .iter()
        .map(|iv| Interval::new(iv.start, iv.end))
        .collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for iv in sorted {
        match merged.last_mut() {
            Some(last) if iv.start <= last.end => last.end = last.end.max(iv.end),
            _ => merged.push(iv),
        }
    }
    merged
}

/// A pressure maximum; `index` points into the series it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub time: f64,
    pub value: f64,
    pub index: usize,
}

impl Peak {
    pub fn at(series: &SampleSeries, index: usize) -> Self {
        Self {
            time: series.times[index],
            value: series.values[index],
            index,
        }
    }
}

/// Onset, peak or empty marker of a voiding cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventPoint {
    pub time: f64,
    pub value: f64,
    pub index: usize,
}

impl EventPoint {
    pub fn at(series: &SampleSeries, index: usize) -> Self {
        Self {
            time: series.times[index],
            value: series.values[index],
            index,
        }
    }
}

impl From<Peak> for EventPoint {
    fn from(peak: Peak) -> Self {
        Self {
            time: peak.time,
            value: peak.value,
            index: peak.index,
        }
    }
}

/// Serialize non-finite floats as `null` so JSON output stays valid.
pub(crate) fn finite_or_null<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_none()
    }
}
