//! Stereo-image descriptors: width and phase correlation.

use crate::utils::sanitize;

/// Accumulates mid/side energy and L/R covariance over interleaved stereo
/// frames. Mono input short-circuits to `(0.0, 1.0)`.
#[derive(Default)]
pub struct StereoDesc {
    sum_mid_sq: f64,
    sum_side_sq: f64,
    sum_l: f64,
    sum_r: f64,
    sum_ll: f64,
    sum_rr: f64,
    sum_lr: f64,
    frames: u64,
}

impl StereoDesc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed interleaved stereo samples (L then R per frame).
    pub fn do_(&mut self, interleaved: &[f32]) {
        for frame in interleaved.chunks_exact(2) {
            let l = f64::from(frame[0]);
            let r = f64::from(frame[1]);

            let mid = l + r;
            let side = l - r;
            self.sum_mid_sq += mid * mid;
            self.sum_side_sq += side * side;

            self.sum_l += l;
            self.sum_r += r;
            self.sum_ll += l * l;
            self.sum_rr += r * r;
            self.sum_lr += l * r;
            self.frames += 1;
        }
    }

    /// `(stereo_width, phase_correlation)`.
    ///
    /// Width is `RMS(L-R) / RMS(L+R)` clamped to [0, 1]; correlation is the
    /// normalized cross-covariance of the channels in [-1, 1]. Identical
    /// channels give (0, 1).
    #[must_use]
    pub fn get_value(&self) -> (f64, f64) {
        if self.frames == 0 {
            return (0., 1.);
        }
        let n = self.frames as f64;

        let width = if self.sum_mid_sq > 1e-18 {
            sanitize((self.sum_side_sq / self.sum_mid_sq).sqrt()).clamp(0., 1.)
        } else {
            0.
        };

        let mean_l = self.sum_l / n;
        let mean_r = self.sum_r / n;
        let var_l = self.sum_ll / n - mean_l * mean_l;
        let var_r = self.sum_rr / n - mean_r * mean_r;
        let covariance = self.sum_lr / n - mean_l * mean_r;

        let correlation = if var_l > 1e-18 && var_r > 1e-18 {
            sanitize(covariance / (var_l.sqrt() * var_r.sqrt())).clamp(-1., 1.)
        } else {
            // One or both channels flat: treat as perfectly correlated.
            1.
        };

        (width, correlation)
    }
}

/// Descriptor values for mono material.
#[must_use]
pub const fn mono_value() -> (f64, f64) {
    (0., 1.)
}
