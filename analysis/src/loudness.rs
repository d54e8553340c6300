//! Integrated loudness (BS.1770-style) and crest factor.
//!
//! The loudness pipeline is the standard two-stage K-weighting (high shelf +
//! RLB high-pass) followed by 400 ms gating blocks at 75 % overlap, a
//! -70 LUFS absolute gate and a -10 LU relative gate.

use std::f64::consts::PI;

/// Floor returned for fully gated (silent) input.
pub const SILENCE_LUFS: f64 = -70.0;

const BLOCK_SECS: f64 = 0.4;
const BLOCK_OVERLAP: f64 = 0.75;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;

/// Direct form II transposed biquad section.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Stage 1 of the K-weighting: a ~+4 dB high shelf modeling the
    /// acoustic effect of the head.
    fn k_weight_shelf(sample_rate: f64) -> Self {
        let f0 = 1_681.974_450_955_533;
        let gain_db = 3.999_843_853_973_347;
        let q = 0.707_175_236_955_419_6;

        let k = (PI * f0 / sample_rate).tan();
        let vh = 10f64.powf(gain_db / 20.);
        let vb = vh.powf(0.499_666_774_154_541_6);
        let a0 = 1. + k / q + k * k;

        Self {
            b0: (vh + vb * k / q + k * k) / a0,
            b1: 2. * (k * k - vh) / a0,
            b2: (vh - vb * k / q + k * k) / a0,
            a1: 2. * (k * k - 1.) / a0,
            a2: (1. - k / q + k * k) / a0,
            z1: 0.,
            z2: 0.,
        }
    }

    /// Stage 2 of the K-weighting: the RLB high-pass.
    fn k_weight_highpass(sample_rate: f64) -> Self {
        let f0 = 38.135_470_876_024_44;
        let q = 0.500_327_037_323_877_3;

        let k = (PI * f0 / sample_rate).tan();
        let a0 = 1. + k / q + k * k;

        Self {
            b0: 1.,
            b1: -2.,
            b2: 1.,
            a1: 2. * (k * k - 1.) / a0,
            a2: (1. - k / q + k * k) / a0,
            z1: 0.,
            z2: 0.,
        }
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Gated integrated loudness meter over an interleaved buffer.
pub struct Bs1770Meter {
    sample_rate: u32,
    channels: usize,
}

impl Bs1770Meter {
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: usize::from(channels.max(1)),
        }
    }

    /// Integrated loudness of the buffer in LUFS, floored at
    /// [`SILENCE_LUFS`] when every block is gated away.
    #[must_use]
    pub fn integrated_loudness(&self, interleaved: &[f32]) -> f64 {
        let frames = interleaved.len() / self.channels;
        if frames == 0 {
            return SILENCE_LUFS;
        }

        // K-weight each channel, accumulating per-frame channel-summed
        // squared energy.
        let mut weighted_sq = vec![0.; frames];
        for ch in 0..self.channels {
            let mut shelf = Biquad::k_weight_shelf(f64::from(self.sample_rate));
            let mut highpass = Biquad::k_weight_highpass(f64::from(self.sample_rate));
            for (frame, sq) in weighted_sq.iter_mut().enumerate() {
                let x = f64::from(interleaved[frame * self.channels + ch]);
                let y = highpass.process(shelf.process(x));
                *sq += y * y;
            }
        }

        let block_len = ((BLOCK_SECS * f64::from(self.sample_rate)) as usize).max(1);
        let hop = ((block_len as f64 * (1. - BLOCK_OVERLAP)) as usize).max(1);

        let mut block_powers: Vec<f64> = weighted_sq
            .windows(block_len)
            .step_by(hop)
            .map(|block| block.iter().sum::<f64>() / block.len() as f64)
            .collect();
        if block_powers.is_empty() {
            // Input shorter than one gating block: measure what we have.
            block_powers.push(weighted_sq.iter().sum::<f64>() / frames as f64);
        }

        // Absolute gate.
        let above_absolute: Vec<f64> = block_powers
            .iter()
            .copied()
            .filter(|&p| loudness_of_power(p) > ABSOLUTE_GATE_LUFS)
            .collect();
        if above_absolute.is_empty() {
            return SILENCE_LUFS;
        }

        // Relative gate, -10 LU below the ungated mean.
        let ungated_mean =
            above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
        let relative_gate = loudness_of_power(ungated_mean) + RELATIVE_GATE_LU;

        let gated: Vec<f64> = above_absolute
            .into_iter()
            .filter(|&p| loudness_of_power(p) > relative_gate)
            .collect();
        if gated.is_empty() {
            return SILENCE_LUFS;
        }

        let mean_power = gated.iter().sum::<f64>() / gated.len() as f64;
        loudness_of_power(mean_power).max(SILENCE_LUFS)
    }
}

fn loudness_of_power(power: f64) -> f64 {
    if power <= 0. {
        return f64::NEG_INFINITY;
    }
    -0.691 + 10. * power.log10()
}

/// Crest factor in dB: `20·log10(peak / rms)`, 0 for silent input.
#[must_use]
pub fn crest_factor_db(peak: f64, rms: f64) -> f64 {
    if rms <= 0. || peak <= 0. {
        return 0.;
    }
    (20. * (peak / rms).log10()).clamp(0., 50.)
}
