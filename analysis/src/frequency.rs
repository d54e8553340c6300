//! Frequency-balance descriptors.
//!
//! Splits the averaged energy spectrum into seven perceptual bands and
//! expresses each as a percentage of the total in-band energy.

use crate::spectrum::AvgSpectrum;
use crate::utils::sanitize;

/// Band edges in Hz: sub-bass, bass, low-mid, mid, upper-mid, presence, air.
pub const BAND_EDGES_HZ: [f64; 8] = [20., 60., 250., 500., 2000., 4000., 8000., 20000.];

pub const NUM_BANDS: usize = 7;

/// Sum the average energy of each of the seven bands.
#[must_use]
pub fn band_energies(spectrum: &AvgSpectrum) -> [f64; NUM_BANDS] {
    let mut energies = [0.; NUM_BANDS];
    for (k, &energy) in spectrum.bins.iter().enumerate() {
        let freq = spectrum.bin_frequency(k);
        if freq < BAND_EDGES_HZ[0] {
            continue;
        }
        for band in 0..NUM_BANDS {
            if freq >= BAND_EDGES_HZ[band] && freq < BAND_EDGES_HZ[band + 1] {
                energies[band] += energy;
                break;
            }
        }
    }
    energies
}

/// Convert band energies to percentages of the total in-band energy.
///
/// The percentages sum to 100 by construction. Zero-energy input (silence)
/// degrades to a uniform split so the sum invariant holds for every
/// fingerprint that gets written.
#[must_use]
pub fn band_percentages(energies: &[f64; NUM_BANDS]) -> [f64; NUM_BANDS] {
    let total: f64 = energies.iter().sum();
    if total <= 1e-18 {
        return [100. / NUM_BANDS as f64; NUM_BANDS];
    }
    let mut percentages = [0.; NUM_BANDS];
    for (pct, &energy) in percentages.iter_mut().zip(energies) {
        *pct = sanitize(energy / total * 100.).clamp(0., 100.);
    }
    percentages
}

/// Bass-to-mid energy balance in dB: `10·log10(bass / mid)`.
///
/// Bass is the 60–250 Hz band, mid the 500–2000 Hz band.
#[must_use]
pub fn bass_mid_ratio(energies: &[f64; NUM_BANDS]) -> f64 {
    let bass = energies[1].max(1e-18);
    let mid = energies[3].max(1e-18);
    sanitize(10. * (bass / mid).log10()).clamp(-40., 40.)
}
