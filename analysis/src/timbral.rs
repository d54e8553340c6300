//! Spectral-shape descriptors: centroid, rolloff, flatness.
//!
//! All three are computed over the averaged energy spectrum of an analysis
//! window; centroid and rolloff are normalized by the Nyquist frequency so
//! they are comparable across sample rates.

use crate::spectrum::AvgSpectrum;
use crate::utils::sanitize;

const ROLLOFF_ENERGY_FRACTION: f64 = 0.95;

/// Neutral value reported for zero-energy (silent) spectra.
const SILENT_DEFAULT: f64 = 0.5;

/// Energy-weighted mean frequency, normalized to [0, 1] by Nyquist.
#[must_use]
pub fn spectral_centroid(spectrum: &AvgSpectrum) -> f64 {
    let total = spectrum.total_energy();
    if total <= 1e-18 {
        return SILENT_DEFAULT;
    }
    let weighted: f64 = spectrum
        .bins
        .iter()
        .enumerate()
        .map(|(k, &energy)| spectrum.bin_frequency(k) * energy)
        .sum();
    sanitize(weighted / total / spectrum.nyquist()).clamp(0., 1.)
}

/// Frequency below which 95 % of the energy lies, normalized by Nyquist.
#[must_use]
pub fn spectral_rolloff(spectrum: &AvgSpectrum) -> f64 {
    let total = spectrum.total_energy();
    if total <= 1e-18 {
        return SILENT_DEFAULT;
    }
    let target = total * ROLLOFF_ENERGY_FRACTION;
    let mut cumulative = 0.;
    for (k, &energy) in spectrum.bins.iter().enumerate() {
        cumulative += energy;
        if cumulative >= target {
            return sanitize(spectrum.bin_frequency(k) / spectrum.nyquist()).clamp(0., 1.);
        }
    }
    1.
}

/// Geometric-to-arithmetic mean ratio of the spectrum: ~0 for pure tones,
/// ~1 for white noise.
#[must_use]
pub fn spectral_flatness(spectrum: &AvgSpectrum) -> f64 {
    if spectrum.bins.is_empty() {
        return SILENT_DEFAULT;
    }
    let total = spectrum.total_energy();
    if total <= 1e-18 {
        return SILENT_DEFAULT;
    }

    let n = spectrum.bins.len() as f64;
    let log_mean = spectrum
        .bins
        .iter()
        .map(|&energy| (energy + 1e-18).ln())
        .sum::<f64>()
        / n;
    let geometric_mean = log_mean.exp();
    let arithmetic_mean = total / n;

    sanitize(geometric_mean / arithmetic_mean).clamp(0., 1.)
}
