//! # Heart Rate Variability Module
//!
//! Windowed HRV over artifact-free inter-beat intervals.
//!
//! ## Key Types
//! - `AnalysisWindow`: most recent clean intervals, bounded by capacity
//! - `HrvResult`: time and frequency domain metrics for one analysis cycle
//! - `HrvAnalyzer`: wall-clock cadence deciding when a cycle runs
//!
//! ## Frequency Domain
//! Intervals are placed on their cumulative time axis, resampled at 4 Hz,
//! mean-removed and Hann-windowed before the FFT. LF is [0.04, 0.15) Hz and
//! HF is [0.15, 0.40) Hz; `hf_nu` is HF as a percentage of LF + HF.

use crate::packet::Timestamp;
use crate::timeseries::RollingBuffer;
use chrono::{DateTime, Local};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::time::{Duration, Instant};

const RESAMPLE_HZ: f64 = 4.0;
const MIN_FFT_LEN: usize = 256;
const LF_BAND: (f64, f64) = (0.04, 0.15);
const HF_BAND: (f64, f64) = (0.15, 0.40);

/// Clean intervals feeding the analyzer. Oldest values drop out silently.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    intervals: RollingBuffer<f64>,
}

impl AnalysisWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            intervals: RollingBuffer::new(capacity),
        }
    }

    pub fn push(&mut self, ibi_ms: f64) {
        self.intervals.push(ibi_ms);
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.intervals.snapshot()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HrvResult {
    pub computed_at: DateTime<Local>,
    pub sample_count: usize,
    pub mean_nn_ms: f64,
    pub mean_hr_bpm: f64,
    pub sdnn_ms: f64,
    pub rmssd_ms: f64,
    pub lf_power: f64,
    pub hf_power: f64,
    /// HF power in normalized units (0-100)
    pub hf_nu: f64,
}

/// Compute metrics over a full interval sequence. Needs at least two intervals.
pub fn compute(nn_ms: &[f64], computed_at: DateTime<Local>) -> Option<HrvResult> {
    if nn_ms.len() < 2 {
        return None;
    }

    let n = nn_ms.len() as f64;
    let mean_nn_ms = nn_ms.iter().sum::<f64>() / n;
    let variance = nn_ms.iter().map(|v| (v - mean_nn_ms).powi(2)).sum::<f64>() / (n - 1.0);
    let (lf_power, hf_power) = band_powers(nn_ms);
    let total = lf_power + hf_power;

    Some(HrvResult {
        computed_at,
        sample_count: nn_ms.len(),
        mean_nn_ms,
        mean_hr_bpm: if mean_nn_ms > 0.0 { 60_000.0 / mean_nn_ms } else { 0.0 },
        sdnn_ms: variance.sqrt(),
        rmssd_ms: rmssd(nn_ms),
        lf_power,
        hf_power,
        hf_nu: if total > 0.0 { 100.0 * hf_power / total } else { 0.0 },
    })
}

/// Root mean square of successive differences
pub fn rmssd(nn_ms: &[f64]) -> f64 {
    if nn_ms.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = nn_ms.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    (sum_sq / (nn_ms.len() - 1) as f64).sqrt()
}

/// Evenly resample the interval series on its own time axis
fn resample(nn_ms: &[f64], fs: f64) -> Vec<f64> {
    let mut times = Vec::with_capacity(nn_ms.len());
    let mut elapsed = 0.0;
    for (i, nn) in nn_ms.iter().enumerate() {
        if i > 0 {
            elapsed += nn / 1000.0;
        }
        times.push(elapsed);
    }

    let duration = elapsed;
    let count = (duration * fs).floor() as usize + 1;
    let mut resampled = Vec::with_capacity(count);
    let mut j = 0;
    for k in 0..count {
        let t = k as f64 / fs;
        while j + 2 < times.len() && times[j + 1] < t {
            j += 1;
        }
        let (t0, t1) = (times[j], times[j + 1]);
        let (v0, v1) = (nn_ms[j], nn_ms[j + 1]);
        let value = if t1 > t0 {
            v0 + (v1 - v0) * ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
        } else {
            v0
        };
        resampled.push(value);
    }
    resampled
}

/// LF and HF power (ms²) of the interval series
fn band_powers(nn_ms: &[f64]) -> (f64, f64) {
    let signal = resample(nn_ms, RESAMPLE_HZ);
    let n = signal.len();
    if n < 4 {
        return (0.0, 0.0);
    }

    let mean = signal.iter().sum::<f64>() / n as f64;
    let window: Vec<f64> = (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
        .collect();
    let window_power: f64 = window.iter().map(|w| w * w).sum();

    let fft_len = n.next_power_of_two().max(MIN_FFT_LEN);
    let mut buffer: Vec<Complex<f64>> = signal
        .iter()
        .zip(window.iter())
        .map(|(s, w)| Complex::new((s - mean) * w, 0.0))
        .collect();
    buffer.resize(fft_len, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_len);
    fft.process(&mut buffer);

    let df = RESAMPLE_HZ / fft_len as f64;
    let scale = 1.0 / (RESAMPLE_HZ * window_power);
    let mut lf = 0.0;
    let mut hf = 0.0;
    for (k, bin) in buffer.iter().enumerate().take(fft_len / 2 + 1).skip(1) {
        let freq = k as f64 * df;
        // one-sided density, Nyquist bin is not doubled
        let factor = if k == fft_len / 2 { 1.0 } else { 2.0 };
        let power = bin.norm_sqr() * scale * factor * df;
        if freq >= LF_BAND.0 && freq < LF_BAND.1 {
            lf += power;
        } else if freq >= HF_BAND.0 && freq < HF_BAND.1 {
            hf += power;
        }
    }
    (lf, hf)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Cadence not yet elapsed
    Waiting,
    /// Cadence elapsed but the window was too small; the cycle is spent anyway
    Skipped { available: usize },
    Computed(HrvResult),
}

/// Decides when an analysis cycle runs
#[derive(Debug, Clone)]
pub struct HrvAnalyzer {
    interval: Duration,
    min_samples: usize,
    last_cycle: Instant,
}

impl HrvAnalyzer {
    pub fn new(interval: Duration, min_samples: usize, started: Instant) -> Self {
        Self {
            interval,
            min_samples,
            last_cycle: started,
        }
    }

    /// Called every tick. The cadence clock restarts whenever the interval
    /// elapses, whether or not the window was large enough.
    pub fn poll(&mut self, now: Timestamp, window: &AnalysisWindow) -> AnalysisOutcome {
        if now.mono.saturating_duration_since(self.last_cycle) <= self.interval {
            return AnalysisOutcome::Waiting;
        }
        self.last_cycle = now.mono;

        if window.len() <= self.min_samples {
            log::debug!(
                "Skipping HRV cycle: {} clean intervals, need more than {}",
                window.len(),
                self.min_samples
            );
            return AnalysisOutcome::Skipped {
                available: window.len(),
            };
        }

        match compute(&window.values(), now.wall) {
            Some(result) => {
                log::info!(
                    "HRV over {} intervals: RMSSD {:.1} ms, HF {:.1} n.u.",
                    result.sample_count,
                    result.rmssd_ms,
                    result.hf_nu
                );
                AnalysisOutcome::Computed(result)
            }
            None => AnalysisOutcome::Skipped {
                available: window.len(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(start: Instant, secs: u64) -> Timestamp {
        Timestamp {
            mono: start + Duration::from_secs(secs),
            wall: Local::now(),
        }
    }

    /// Intervals modulated at 0.25 Hz (a respiratory rhythm) around 800 ms
    fn breathing_series(count: usize) -> Vec<f64> {
        let mut t = 0.0;
        (0..count)
            .map(|_| {
                let nn = 800.0 + 40.0 * (2.0 * std::f64::consts::PI * 0.25 * t).sin();
                t += nn / 1000.0;
                nn
            })
            .collect()
    }

    fn filled_window(values: &[f64]) -> AnalysisWindow {
        let mut window = AnalysisWindow::new(225);
        for v in values {
            window.push(*v);
        }
        window
    }

    #[test]
    fn test_rmssd_known_values() {
        // diffs 10, -20, 10 -> sqrt((100 + 400 + 100) / 3)
        let rmssd = rmssd(&[800.0, 810.0, 790.0, 800.0]);
        assert!((rmssd - 200.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(super::rmssd(&[800.0]), 0.0);
    }

    #[test]
    fn test_compute_time_domain() {
        let result = compute(&[1000.0, 1000.0, 1000.0], Local::now()).unwrap();
        assert_eq!(result.mean_nn_ms, 1000.0);
        assert_eq!(result.mean_hr_bpm, 60.0);
        assert_eq!(result.sdnn_ms, 0.0);
        assert_eq!(result.rmssd_ms, 0.0);
        assert_eq!(result.hf_nu, 0.0);
        assert!(compute(&[800.0], Local::now()).is_none());
    }

    #[test]
    fn test_respiratory_modulation_lands_in_hf() {
        let series = breathing_series(200);
        let result = compute(&series, Local::now()).unwrap();
        assert!(result.hf_power > result.lf_power);
        assert!(result.hf_nu > 80.0, "hf_nu = {}", result.hf_nu);
    }

    #[test]
    fn test_slow_modulation_lands_in_lf() {
        let mut t = 0.0;
        let series: Vec<f64> = (0..200)
            .map(|_| {
                let nn = 900.0 + 50.0 * (2.0 * std::f64::consts::PI * 0.1 * t).sin();
                t += nn / 1000.0;
                nn
            })
            .collect();
        let result = compute(&series, Local::now()).unwrap();
        assert!(result.hf_nu < 20.0, "hf_nu = {}", result.hf_nu);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let series = breathing_series(120);
        let wall = Local::now();
        assert_eq!(compute(&series, wall), compute(&series, wall));
    }

    #[test]
    fn test_analyzer_waits_for_interval() {
        let start = Instant::now();
        let mut analyzer = HrvAnalyzer::new(Duration::from_secs(30), 50, start);
        let window = filled_window(&breathing_series(100));

        assert_eq!(analyzer.poll(at(start, 10), &window), AnalysisOutcome::Waiting);
        assert_eq!(analyzer.poll(at(start, 30), &window), AnalysisOutcome::Waiting);
        assert!(matches!(analyzer.poll(at(start, 31), &window), AnalysisOutcome::Computed(_)));
        // clock restarted at 31s
        assert_eq!(analyzer.poll(at(start, 45), &window), AnalysisOutcome::Waiting);
        assert!(matches!(analyzer.poll(at(start, 62), &window), AnalysisOutcome::Computed(_)));
    }

    #[test]
    fn test_analyzer_never_runs_below_minimum() {
        let start = Instant::now();
        let mut analyzer = HrvAnalyzer::new(Duration::from_secs(30), 50, start);
        let window = filled_window(&breathing_series(50));

        assert_eq!(
            analyzer.poll(at(start, 31), &window),
            AnalysisOutcome::Skipped { available: 50 }
        );
    }

    #[test]
    fn test_skipped_cycle_still_resets_clock() {
        let start = Instant::now();
        let mut analyzer = HrvAnalyzer::new(Duration::from_secs(30), 50, start);
        let mut window = filled_window(&breathing_series(10));

        assert!(matches!(analyzer.poll(at(start, 31), &window), AnalysisOutcome::Skipped { .. }));

        for v in breathing_series(60) {
            window.push(v);
        }
        // data is now sufficient but the next cycle is not due until 61s
        assert_eq!(analyzer.poll(at(start, 32), &window), AnalysisOutcome::Waiting);
        assert!(matches!(analyzer.poll(at(start, 62), &window), AnalysisOutcome::Computed(_)));
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let mut window = AnalysisWindow::new(3);
        for v in [700.0, 710.0, 720.0, 730.0] {
            window.push(v);
        }
        assert_eq!(window.values(), vec![710.0, 720.0, 730.0]);
    }
}
