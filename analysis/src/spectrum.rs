//! Averaged short-time energy spectrum.
//!
//! Several descriptors (frequency balance, spectral shape, chroma) consume
//! the same length-weighted average spectrum, so it is computed once per
//! analysis window. Frames are accumulated on the fly; no per-frame storage.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::utils::hann_window;

/// Length-weighted average energy spectrum of an analysis window.
#[derive(Debug, Clone)]
pub struct AvgSpectrum {
    /// Average `|X[k]|^2` per bin, `fft_size / 2` bins.
    pub bins: Vec<f64>,
    pub sample_rate: u32,
    pub fft_size: usize,
}

impl AvgSpectrum {
    /// Center frequency of bin `k` in Hz.
    #[must_use]
    pub fn bin_frequency(&self, k: usize) -> f64 {
        k as f64 * f64::from(self.sample_rate) / self.fft_size as f64
    }

    #[must_use]
    pub fn nyquist(&self) -> f64 {
        f64::from(self.sample_rate) / 2.
    }

    #[must_use]
    pub fn total_energy(&self) -> f64 {
        self.bins.iter().sum()
    }
}

/// Accumulates windowed FFT frames into an [`AvgSpectrum`].
pub struct SpectrumDesc {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    accum: Vec<f64>,
    frames: u64,
    sample_rate: u32,
}

impl SpectrumDesc {
    pub const WINDOW_SIZE: usize = 4096;
    pub const HOP_SIZE: usize = 1024;

    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(Self::WINDOW_SIZE),
            window: hann_window(Self::WINDOW_SIZE),
            accum: vec![0.; Self::WINDOW_SIZE / 2],
            frames: 0,
            sample_rate,
        }
    }

    /// Accumulate one frame of exactly `WINDOW_SIZE` mono samples.
    pub fn do_(&mut self, chunk: &[f32]) {
        debug_assert_eq!(chunk.len(), Self::WINDOW_SIZE);
        let mut buffer: Vec<Complex<f32>> = chunk
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.))
            .collect();
        self.fft.process(&mut buffer);

        let scale = 1. / Self::WINDOW_SIZE as f64;
        for (acc, c) in self.accum.iter_mut().zip(&buffer) {
            let magnitude = f64::from(c.norm()) * scale;
            *acc += magnitude * magnitude;
        }
        self.frames += 1;
    }

    /// Drive the accumulator over an entire mono buffer.
    pub fn process_all(&mut self, mono: &[f32]) {
        for chunk in mono
            .windows(Self::WINDOW_SIZE)
            .step_by(Self::HOP_SIZE)
        {
            self.do_(chunk);
        }
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Finish the accumulation. Returns an all-zero spectrum when no frame
    /// fit the input (callers treat that as silence).
    #[must_use]
    pub fn get_value(mut self) -> AvgSpectrum {
        if self.frames > 0 {
            let n = self.frames as f64;
            for bin in &mut self.accum {
                *bin /= n;
            }
        }
        AvgSpectrum {
            bins: self.accum,
            sample_rate: self.sample_rate,
            fft_size: Self::WINDOW_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::mono_mix;
    use std::f32::consts::TAU;

    fn sine(freq: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
        let n = (secs * sample_rate as f32) as usize;
        (0..n)
            .map(|i| (TAU * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_sine_peak_bin() {
        let sample_rate = 44_100;
        let samples = sine(1000., sample_rate, 2.0);
        let mut desc = SpectrumDesc::new(sample_rate);
        desc.process_all(&mono_mix(&samples, 1));
        let spectrum = desc.get_value();

        let peak_bin = spectrum
            .bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        let peak_freq = spectrum.bin_frequency(peak_bin);
        assert!(
            (peak_freq - 1000.).abs() < 20.,
            "peak at {peak_freq} Hz, expected ~1000 Hz"
        );
    }

    #[test]
    fn test_silence_is_zero_energy() {
        let mut desc = SpectrumDesc::new(44_100);
        desc.process_all(&vec![0.; 44_100]);
        let spectrum = desc.get_value();
        assert!(spectrum.total_energy() < 1e-12);
    }

    #[test]
    fn test_too_short_input_yields_no_frames() {
        let mut desc = SpectrumDesc::new(44_100);
        desc.process_all(&vec![0.1; SpectrumDesc::WINDOW_SIZE - 1]);
        assert_eq!(desc.frames(), 0);
    }
}
