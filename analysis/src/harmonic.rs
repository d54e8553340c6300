//! Harmonic descriptors: harmonicity, pitch stability, chroma concentration.
//!
//! Harmonicity and pitch come from the normalized autocorrelation of short
//! frames (lag-domain pitch detection); chroma folds the averaged spectrum
//! into 12 pitch classes.

use crate::spectrum::AvgSpectrum;
use crate::utils::{coefficient_of_variation, sanitize};

pub const FRAME_SIZE: usize = 2048;

/// Pitch search range in Hz.
const MIN_F0_HZ: f64 = 50.;
const MAX_F0_HZ: f64 = 1000.;

/// Autocorrelation prominence above which a frame's f0 estimate is kept.
const PITCH_CONFIDENCE: f64 = 0.3;

/// Chroma fold range; below ~28 Hz pitch classes are meaningless, above
/// 5 kHz the spectrum is dominated by overtones and noise.
const CHROMA_MIN_HZ: f64 = 27.5;
const CHROMA_MAX_HZ: f64 = 5000.;

/// Accumulates per-frame autocorrelation evidence across one analysis
/// window.
#[derive(Default)]
pub struct HarmonicDesc {
    prominences: Vec<f64>,
    f0s: Vec<f64>,
}

impl HarmonicDesc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze one frame of `FRAME_SIZE` mono samples.
    pub fn do_(&mut self, frame: &[f32], sample_rate: u32) {
        debug_assert_eq!(frame.len(), FRAME_SIZE);

        let samples: Vec<f64> = frame.iter().map(|&s| f64::from(s)).collect();
        let energy: f64 = samples.iter().map(|&s| s * s).sum();
        if energy <= 1e-12 {
            return;
        }

        let min_lag = ((f64::from(sample_rate) / MAX_F0_HZ).floor() as usize).max(1);
        let max_lag =
            ((f64::from(sample_rate) / MIN_F0_HZ).ceil() as usize).min(samples.len() - 1);
        if min_lag >= max_lag {
            return;
        }

        let mut best_lag = 0;
        let mut best_value = 0.;
        for lag in min_lag..=max_lag {
            let r: f64 = samples
                .iter()
                .zip(&samples[lag..])
                .map(|(&a, &b)| a * b)
                .sum();
            let normalized = r / energy;
            if normalized > best_value {
                best_value = normalized;
                best_lag = lag;
            }
        }

        self.prominences.push(best_value.clamp(0., 1.));
        if best_value >= PITCH_CONFIDENCE && best_lag > 0 {
            self.f0s.push(f64::from(sample_rate) / best_lag as f64);
        }
    }

    /// `(harmonic_ratio, pitch_stability)`.
    ///
    /// Harmonic ratio is the mean autocorrelation prominence over all
    /// frames; pitch stability is `1 - CoV` of the confident f0 estimates
    /// (0 when fewer than two frames carried a confident pitch).
    #[must_use]
    pub fn get_value(&self) -> (f64, f64) {
        let harmonic_ratio = if self.prominences.is_empty() {
            0.
        } else {
            self.prominences.iter().sum::<f64>() / self.prominences.len() as f64
        };

        let pitch_stability = if self.f0s.len() < 2 {
            0.
        } else {
            (1. - coefficient_of_variation(&self.f0s)).clamp(0., 1.)
        };

        (sanitize(harmonic_ratio).clamp(0., 1.), pitch_stability)
    }

    /// Merge evidence from another window.
    pub fn merge(&mut self, other: Self) {
        self.prominences.extend(other.prominences);
        self.f0s.extend(other.f0s);
    }
}

/// Fold the averaged spectrum into a 12-bin pitch-class distribution
/// (normalized to sum 1, all zeros for silence).
#[must_use]
pub fn chroma_distribution(spectrum: &AvgSpectrum) -> [f64; 12] {
    let mut chroma = [0.; 12];
    for (k, &energy) in spectrum.bins.iter().enumerate() {
        let freq = spectrum.bin_frequency(k);
        if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&freq) {
            continue;
        }
        // MIDI note number, folded to a pitch class.
        let midi = 69. + 12. * (freq / 440.).log2();
        let pitch_class = (midi.round() as i64).rem_euclid(12) as usize;
        chroma[pitch_class] += energy;
    }

    let total: f64 = chroma.iter().sum();
    if total > 1e-18 {
        for bin in &mut chroma {
            *bin /= total;
        }
    }
    chroma
}

/// Concentration of the chroma distribution: its L2 norm.
///
/// A single dominant pitch class gives 1.0; a perfectly flat distribution
/// gives `1/sqrt(12)` (~0.289). Zero for silence.
#[must_use]
pub fn chroma_energy(chroma: &[f64; 12]) -> f64 {
    sanitize(chroma.iter().map(|&c| c * c).sum::<f64>().sqrt()).clamp(0., 1.)
}
