//! Synthetic cystometrograms for tests and demos.

use crate::signal::SampleSeries;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SimulationConfig {
    pub sample_rate_hz: f64,
    /// Number of voiding contractions.
    pub voids: usize,
    /// Spacing between contraction peaks; the first peak sits one interval in.
    pub void_interval_sec: f64,
    pub baseline_pressure: f64,
    pub contraction_amplitude: f64,
    pub rise_sec: f64,
    pub fall_sec: f64,
    /// Infusion pump rate in ml/s.
    pub infusion_rate: f64,
    pub noise_sd: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1.0,
            voids: 3,
            void_interval_sec: 300.0,
            baseline_pressure: 5.0,
            contraction_amplitude: 35.0,
            rise_sec: 40.0,
            fall_sec: 15.0,
            infusion_rate: 0.1,
            noise_sd: 0.5,
            seed: 7,
        }
    }
}

/// Simulated recording with the channels ingestion would produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedSession {
    pub pressure: SampleSeries,
    pub volume: SampleSeries,
    pub scale: SampleSeries,
    pub peak_times: Vec<f64>,
}

/// Build a recording of `voids` triangular contractions over a flat
/// baseline, with a linear infusion and a scale that steps up as each void
/// drains the bladder.
pub fn simulate_cystometrogram(config: &SimulationConfig) -> SimulatedSession {
    let rate = if config.sample_rate_hz > 0.0 {
        config.sample_rate_hz
    } else {
        1.0
    };
    let interval = config.void_interval_sec.max(1.0);
    let duration = interval * (config.voids as f64 + 1.0);
    let n = (duration * rate).round() as usize + 1;
    let peak_times: Vec<f64> = (1..=config.voids).map(|k| k as f64 * interval).collect();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = (config.noise_sd > 0.0)
        .then(|| Normal::new(0.0, config.noise_sd).ok())
        .flatten();
    let void_volume = interval * config.infusion_rate;
    let fall = config.fall_sec;
    let mut times = Vec::with_capacity(n);
    let mut pressure = Vec::with_capacity(n);
    let mut volume = Vec::with_capacity(n);
    let mut scale = Vec::with_capacity(n);

    for i in 0..n {
        let t = i as f64 / rate;
        let contraction: f64 = peak_times
            .iter()
            .map(|&peak| contraction_shape(t - peak, config))
            .sum();
        let clean = config.baseline_pressure + config.contraction_amplitude * contraction;
        let jitter = noise.as_ref().map_or(0.0, |d| d.sample(&mut rng));
        let voided: f64 = peak_times
            .iter()
            .map(|&peak| void_volume * drain_fraction(t - peak, fall))
            .sum();

        times.push(t);
        pressure.push(clean + jitter);
        volume.push(config.infusion_rate * t);
        scale.push(voided);
    }

    SimulatedSession {
        pressure: SampleSeries::new(times.clone(), pressure),
        volume: SampleSeries::new(times.clone(), volume),
        scale: SampleSeries::new(times, scale),
        peak_times,
    }
}

/// Unit-height triangle: linear rise to the peak, faster linear fall.
fn contraction_shape(dt: f64, config: &SimulationConfig) -> f64 {
    if dt <= 0.0 && dt >= -config.rise_sec && config.rise_sec > 0.0 {
        1.0 + dt / config.rise_sec
    } else if dt > 0.0 && dt <= config.fall_sec && config.fall_sec > 0.0 {
        1.0 - dt / config.fall_sec
    } else {
        0.0
    }
}

fn drain_fraction(dt: f64, fall_sec: f64) -> f64 {
    if dt <= 0.0 {
        0.0
    } else if fall_sec <= 0.0 || dt >= fall_sec {
        1.0
    } else {
        dt / fall_sec
    }
}
