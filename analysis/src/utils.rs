//! Small numeric helpers shared by the descriptor modules.

use std::f64::consts::PI;

/// Arithmetic mean of a slice, 0 for empty input.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation, 0 for fewer than two values.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Coefficient of variation (std / mean), 0 when the mean is ~0.
#[must_use]
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.abs() < 1e-12 {
        return 0.;
    }
    std_dev(values) / m.abs()
}

/// Root mean square of a sample slice.
#[must_use]
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Absolute peak of a sample slice.
#[must_use]
pub fn peak(samples: &[f32]) -> f64 {
    samples
        .iter()
        .map(|&s| f64::from(s).abs())
        .fold(0., f64::max)
}

/// Hann window of length `n`.
#[must_use]
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let x = 0.5 * (1. - (2. * PI * i as f64 / (n as f64 - 1.)).cos());
            x as f32
        })
        .collect()
}

/// Replace NaN / infinite intermediates with 0 before they reach the
/// packed fingerprint.
#[must_use]
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0. }
}

/// Collapse an interleaved buffer to a mono mix by averaging channels.
#[must_use]
pub fn mono_mix(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 | 1 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mean_and_std() {
        assert_eq!(mean(&[]), 0.);
        assert!((mean(&[1., 2., 3.]) - 2.).abs() < 1e-12);
        assert!((std_dev(&[2., 2., 2.])).abs() < 1e-12);
        assert!((std_dev(&[1., 3.]) - 1.).abs() < 1e-12);
    }

    #[test]
    fn test_rms_peak() {
        let samples = vec![0.5_f32, -0.5, 0.5, -0.5];
        assert!((rms(&samples) - 0.5).abs() < 1e-9);
        assert!((peak(&samples) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(f64::NAN), 0.);
        assert_eq!(sanitize(f64::INFINITY), 0.);
        assert_eq!(sanitize(1.5), 1.5);
    }

    #[test]
    fn test_mono_mix_stereo() {
        let interleaved = vec![1.0_f32, 0.0, 0.5, 0.5];
        assert_eq!(mono_mix(&interleaved, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn test_hann_window_endpoints() {
        let w = hann_window(16);
        assert!(w[0].abs() < 1e-6);
        assert!(w[15].abs() < 1e-6);
        assert!(w[8] > 0.9);
    }
}
