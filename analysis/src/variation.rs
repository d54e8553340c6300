//! Variation descriptors: how much the dynamics move over time.
//!
//! The track is cut into one-second sub-windows; the per-window loudness,
//! crest and peak series are summarized into three scalars.

use crate::utils::{coefficient_of_variation, peak, rms, sanitize, std_dev};

pub const SUB_WINDOW_SECS: f64 = 1.0;

const SILENCE_DB_FLOOR: f64 = -120.;

/// Accumulates per-second dynamics series across analysis windows.
#[derive(Default)]
pub struct VariationDesc {
    loudness_db: Vec<f64>,
    crests: Vec<f64>,
    peaks: Vec<f64>,
}

impl VariationDesc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one analysis window of mono samples; it is internally cut into
    /// one-second sub-windows.
    pub fn process_all(&mut self, mono: &[f32], sample_rate: u32) {
        let sub_len = ((SUB_WINDOW_SECS * f64::from(sample_rate)) as usize).max(1);
        for chunk in mono.chunks(sub_len) {
            if chunk.is_empty() {
                continue;
            }
            let chunk_rms = rms(chunk);
            let chunk_peak = peak(chunk);

            self.loudness_db.push(if chunk_rms > 0. {
                (20. * chunk_rms.log10()).max(SILENCE_DB_FLOOR)
            } else {
                SILENCE_DB_FLOOR
            });
            self.crests
                .push(if chunk_rms > 0. { chunk_peak / chunk_rms } else { 1. });
            self.peaks.push(chunk_peak);
        }
    }

    /// `(dynamic_range_variation, loudness_variation_std, peak_consistency)`.
    #[must_use]
    pub fn get_value(&self) -> (f64, f64, f64) {
        let dynamic_range_variation = if self.crests.len() < 2 {
            0.
        } else {
            sanitize(coefficient_of_variation(&self.crests)).clamp(0., 1.)
        };

        let loudness_variation_std = if self.loudness_db.len() < 2 {
            0.
        } else {
            sanitize(std_dev(&self.loudness_db)).max(0.)
        };

        let peak_consistency = if self.peaks.len() < 2 {
            0.5
        } else {
            sanitize(1. / (1. + coefficient_of_variation(&self.peaks))).clamp(0., 1.)
        };

        (
            dynamic_range_variation,
            loudness_variation_std,
            peak_consistency,
        )
    }
}
