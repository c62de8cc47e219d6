//! Robust statistics and the smoothing pipeline shared by the detectors.
//!
//! Windows are expressed in seconds and resolved against the time column,
//! so irregularly sampled recordings are smoothed over the same physical
//! span everywhere.

/// Scale factor turning a MAD into a Gaussian standard deviation estimate.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Median; the mean of the two middle values for even lengths.
pub fn median(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(median_of_sorted(&sorted))
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around the median (unscaled).
pub fn mad(data: &[f64]) -> Option<f64> {
    let center = median(data)?;
    let deviations: Vec<f64> = data.iter().map(|x| (x - center).abs()).collect();
    median(&deviations)
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(data: &[f64], pct: f64) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Running median over `kernel` samples centred on each index.
///
/// Windows are clipped at the series edges. Even kernels are widened by one
/// so the window stays symmetric.
pub fn median_filter(data: &[f64], kernel: usize) -> Vec<f64> {
    let kernel = odd_kernel(kernel);
    if kernel <= 1 || data.len() < 2 {
        return data.to_vec();
    }
    let half = kernel / 2;
    let mut out = Vec::with_capacity(data.len());
    let mut window = Vec::with_capacity(kernel);
    for i in 0..data.len() {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(data.len());
        window.clear();
        window.extend_from_slice(&data[start..end]);
        window.sort_by(f64::total_cmp);
        out.push(median_of_sorted(&window));
    }
    out
}

/// Force a kernel size to be odd and at least one.
pub fn odd_kernel(kernel: usize) -> usize {
    if kernel == 0 {
        1
    } else if kernel % 2 == 0 {
        kernel + 1
    } else {
        kernel
    }
}

/// Mean of all samples whose time lies within `window_sec / 2` of each
/// sample's own time.
pub fn time_moving_average(times: &[f64], values: &[f64], window_sec: f64) -> Vec<f64> {
    let n = times.len().min(values.len());
    let half = half_window(window_sec);
    let mut out = Vec::with_capacity(n);
    let mut lo = 0usize;
    let mut hi = 0usize;
    for i in 0..n {
        let t = times[i];
        while lo < i && times[lo] < t - half {
            lo += 1;
        }
        if hi < i + 1 {
            hi = i + 1;
        }
        while hi < n && times[hi] <= t + half {
            hi += 1;
        }
        let span = &values[lo..hi];
        out.push(span.iter().sum::<f64>() / span.len() as f64);
    }
    out
}

/// Symmetric slope over a `window_sec` time span.
///
/// The slope runs between the first and last samples inside the window.
/// When the window holds nothing but the sample itself the immediate
/// neighbours are used instead, which degrades to a one-sided difference at
/// the series boundaries. A zero time span yields a slope of 0.0.
pub fn time_derivative(times: &[f64], values: &[f64], window_sec: f64) -> Vec<f64> {
    let n = times.len().min(values.len());
    if n < 2 {
        return vec![0.0; n];
    }
    let half = half_window(window_sec);
    let mut out = Vec::with_capacity(n);
    let mut lo = 0usize;
    let mut hi = 0usize;
    for i in 0..n {
        let t = times[i];
        while lo < i && times[lo] < t - half {
            lo += 1;
        }
        if hi < i {
            hi = i;
        }
        while hi + 1 < n && times[hi + 1] <= t + half {
            hi += 1;
        }
        let (a, b) = if lo == hi {
            (i.saturating_sub(1), (i + 1).min(n - 1))
        } else {
            (lo, hi)
        };
        let dt = times[b] - times[a];
        if dt > 0.0 && dt.is_finite() {
            out.push((values[b] - values[a]) / dt);
        } else {
            out.push(0.0);
        }
    }
    out
}

fn half_window(window_sec: f64) -> f64 {
    if window_sec.is_finite() && window_sec > 0.0 {
        window_sec / 2.0
    } else {
        0.0
    }
}
