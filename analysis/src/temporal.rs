//! Temporal descriptors: tempo, onsets, silence.
//!
//! Onsets come from a spectral-flux envelope; tempo from the autocorrelation
//! of that envelope, constrained to the 40-240 BPM lag range with a
//! confidence cutoff below which 0 (indeterminate) is returned.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::utils::hann_window;

pub const MIN_BPM: f64 = 40.;
pub const MAX_BPM: f64 = 240.;

/// Normalized autocorrelation below which a tempo peak is not trusted.
const TEMPO_CONFIDENCE: f64 = 0.1;

/// Flux must exceed the local running mean by this factor to count as an
/// onset.
const ONSET_THRESHOLD_FACTOR: f64 = 1.5;

const SILENCE_FRAME_SECS: f64 = 0.05;
const SILENCE_THRESHOLD_DBFS: f64 = -60.;

/// Spectral-flux onset envelope over a mono buffer.
pub struct FluxDesc {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    prev_magnitudes: Vec<f64>,
    flux: Vec<f64>,
}

impl FluxDesc {
    pub const WINDOW_SIZE: usize = 1024;
    pub const HOP_SIZE: usize = 512;

    #[must_use]
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(Self::WINDOW_SIZE),
            window: hann_window(Self::WINDOW_SIZE),
            prev_magnitudes: vec![0.; Self::WINDOW_SIZE / 2],
            flux: Vec::new(),
        }
    }

    pub fn do_(&mut self, chunk: &[f32]) {
        debug_assert_eq!(chunk.len(), Self::WINDOW_SIZE);
        let mut buffer: Vec<Complex<f32>> = chunk
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.))
            .collect();
        self.fft.process(&mut buffer);

        let mut frame_flux = 0.;
        for (prev, c) in self.prev_magnitudes.iter_mut().zip(&buffer) {
            let magnitude = f64::from(c.norm());
            // Half-wave rectified difference: only rising energy counts.
            frame_flux += (magnitude - *prev).max(0.);
            *prev = magnitude;
        }
        self.flux.push(frame_flux);
    }

    pub fn process_all(&mut self, mono: &[f32]) {
        for chunk in mono.windows(Self::WINDOW_SIZE).step_by(Self::HOP_SIZE) {
            self.do_(chunk);
        }
    }

    #[must_use]
    pub fn get_value(self) -> Vec<f64> {
        self.flux
    }
}

impl Default for FluxDesc {
    fn default() -> Self {
        Self::new()
    }
}

/// Tempo in BPM from the autocorrelation of the flux envelope.
///
/// Returns 0.0 when no peak in the 40-240 BPM lag range clears the
/// confidence threshold (e.g. ambient material with no beat).
#[must_use]
pub fn estimate_tempo(flux: &[f64], sample_rate: u32) -> f64 {
    if flux.len() < 4 {
        return 0.;
    }

    // Zero-mean the envelope so steady energy does not read as periodicity.
    let mean = flux.iter().sum::<f64>() / flux.len() as f64;
    let centered: Vec<f64> = flux.iter().map(|&f| f - mean).collect();

    let frame_rate = f64::from(sample_rate) / FluxDesc::HOP_SIZE as f64;
    let min_lag = ((60. / MAX_BPM) * frame_rate).floor().max(1.) as usize;
    let max_lag = (((60. / MIN_BPM) * frame_rate).ceil() as usize).min(centered.len() - 1);
    if min_lag >= max_lag {
        return 0.;
    }

    let energy: f64 = centered.iter().map(|&f| f * f).sum();
    if energy <= 1e-18 {
        return 0.;
    }

    let mut best_lag = 0;
    let mut best_value = 0.;
    for lag in min_lag..=max_lag {
        let r: f64 = centered
            .iter()
            .zip(&centered[lag..])
            .map(|(&a, &b)| a * b)
            .sum();
        let normalized = r / energy;
        if normalized > best_value {
            best_value = normalized;
            best_lag = lag;
        }
    }

    if best_value < TEMPO_CONFIDENCE || best_lag == 0 {
        return 0.;
    }

    (60. * frame_rate / best_lag as f64).clamp(MIN_BPM, MAX_BPM)
}

/// Count onsets in the flux envelope: local maxima above a running-mean
/// threshold.
#[must_use]
pub fn count_onsets(flux: &[f64], sample_rate: u32) -> usize {
    if flux.len() < 3 {
        return 0;
    }

    let frame_rate = f64::from(sample_rate) / FluxDesc::HOP_SIZE as f64;
    let mean_window = (frame_rate as usize).max(1);

    let mut onsets = 0;
    for i in 1..flux.len() - 1 {
        let start = i.saturating_sub(mean_window);
        let local_mean = flux[start..i + 1].iter().sum::<f64>() / (i + 1 - start) as f64;
        let threshold = local_mean * ONSET_THRESHOLD_FACTOR;
        if flux[i] > threshold && flux[i] > flux[i - 1] && flux[i] >= flux[i + 1] {
            onsets += 1;
        }
    }
    onsets
}

/// Fraction of 50 ms frames whose RMS falls below -60 dBFS.
#[must_use]
pub fn silence_ratio(mono: &[f32], sample_rate: u32) -> f64 {
    let frame_len = ((SILENCE_FRAME_SECS * f64::from(sample_rate)) as usize).max(1);
    let threshold = 10f64.powf(SILENCE_THRESHOLD_DBFS / 20.);

    let mut silent = 0usize;
    let mut total = 0usize;
    for frame in mono.chunks(frame_len) {
        let rms = crate::utils::rms(frame);
        if rms < threshold {
            silent += 1;
        }
        total += 1;
    }
    if total == 0 {
        return 1.;
    }
    silent as f64 / total as f64
}
