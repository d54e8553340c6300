//! Content-aware mastering targets.
//!
//! A pure function of the fingerprint: same descriptor in, same targets
//! out, every time. The engine only produces these parameters; rendering
//! them is somebody else's DSP chain.

use kindred_analysis::Fingerprint;
use serde::Serialize;

/// Streaming loudness target.
pub const TARGET_LUFS: f64 = -14.0;

/// Crest is nudged down but never below this floor.
pub const MIN_TARGET_CREST_DB: f64 = 10.0;
const CREST_REDUCTION: f64 = 0.85;

/// The "ideal" frequency distribution the EQ pulls toward, in band order.
pub const IDEAL_BAND_PCT: [f64; 7] = [5., 15., 18., 22., 20., 13., 7.];

/// 1 % of deviation maps to 0.5 dB of correction.
const EQ_DB_PER_PCT: f64 = 0.5;
const EQ_LIMIT_DB: f64 = 6.0;

/// Per-band EQ corrections in dB, positive meaning boost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EqAdjustments {
    pub sub_bass: f64,
    pub bass: f64,
    pub low_mid: f64,
    pub mid: f64,
    pub upper_mid: f64,
    pub presence: f64,
    pub air: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Compression {
    pub ratio: f64,
    pub amount: f64,
}

/// Processing parameters derived from a fingerprint. Ephemeral: derived on
/// demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MasteringTarget {
    pub target_lufs: f64,
    pub target_crest_db: f64,
    pub eq_adjustments_db: EqAdjustments,
    pub compression: Compression,
}

/// Derive mastering targets from a fingerprint.
#[must_use]
pub fn generate_targets(fingerprint: &Fingerprint) -> MasteringTarget {
    let percentages = fingerprint.frequency_percentages();
    let adjust = |band: usize| eq_adjustment(percentages[band], IDEAL_BAND_PCT[band]);

    MasteringTarget {
        target_lufs: TARGET_LUFS,
        target_crest_db: (fingerprint.crest_db * CREST_REDUCTION).max(MIN_TARGET_CREST_DB),
        eq_adjustments_db: EqAdjustments {
            sub_bass: adjust(0),
            bass: adjust(1),
            low_mid: adjust(2),
            mid: adjust(3),
            upper_mid: adjust(4),
            presence: adjust(5),
            air: adjust(6),
        },
        compression: Compression {
            ratio: 2.5,
            amount: 0.6,
        },
    }
}

/// Gentle proportional correction toward the ideal, clamped to ±6 dB.
fn eq_adjustment(current_pct: f64, ideal_pct: f64) -> f64 {
    ((ideal_pct - current_pct) * EQ_DB_PER_PCT).clamp(-EQ_LIMIT_DB, EQ_LIMIT_DB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fingerprint_with(
        lufs: f64,
        crest_db: f64,
        percentages: [f64; 7],
    ) -> Fingerprint {
        let mut vector = [0.5; kindred_analysis::NUM_DIMENSIONS];
        vector[..7].copy_from_slice(&percentages);
        vector[7] = lufs;
        vector[8] = crest_db;
        Fingerprint::from_vector(vector)
    }

    /// The seed scenario: an already-ideal track gets zero EQ and the
    /// exact documented constants.
    #[test]
    fn test_ideal_track_targets() {
        let fingerprint = fingerprint_with(-10., 12., [5., 15., 18., 22., 20., 13., 7.]);
        let targets = generate_targets(&fingerprint);

        assert_eq!(targets.target_lufs, -14.);
        assert!((targets.target_crest_db - 10.2).abs() < 1e-12);
        assert_eq!(targets.eq_adjustments_db.sub_bass, 0.);
        assert_eq!(targets.eq_adjustments_db.bass, 0.);
        assert_eq!(targets.eq_adjustments_db.low_mid, 0.);
        assert_eq!(targets.eq_adjustments_db.mid, 0.);
        assert_eq!(targets.eq_adjustments_db.upper_mid, 0.);
        assert_eq!(targets.eq_adjustments_db.presence, 0.);
        assert_eq!(targets.eq_adjustments_db.air, 0.);
        assert_eq!(targets.compression, Compression { ratio: 2.5, amount: 0.6 });
    }

    #[test]
    fn test_crest_floor() {
        let fingerprint = fingerprint_with(-10., 8., IDEAL_BAND_PCT);
        // 8 * 0.85 = 6.8 would undercut the floor.
        assert_eq!(generate_targets(&fingerprint).target_crest_db, 10.);

        let fingerprint = fingerprint_with(-10., 20., IDEAL_BAND_PCT);
        assert_eq!(generate_targets(&fingerprint).target_crest_db, 17.);
    }

    #[test]
    fn test_eq_pulls_toward_ideal_and_clamps() {
        // Way too much bass, almost no air.
        let fingerprint = fingerprint_with(-10., 12., [5., 45., 18., 22., 9., 0.5, 0.5]);
        let eq = generate_targets(&fingerprint).eq_adjustments_db;

        // bass: (15 - 45) * 0.5 = -15, clamped to -6.
        assert_eq!(eq.bass, -6.);
        // air: (7 - 0.5) * 0.5 = 3.25 boost.
        assert!((eq.air - 3.25).abs() < 1e-12);
        // upper_mid: (20 - 9) * 0.5 = 5.5, inside the clamp.
        assert!((eq.upper_mid - 5.5).abs() < 1e-12);
    }

    #[test]
    fn test_determinism() {
        let fingerprint = fingerprint_with(-17.3, 14.2, [9., 21., 15., 19., 17., 12., 7.]);
        let a = generate_targets(&fingerprint);
        let b = generate_targets(&fingerprint);
        assert_eq!(a, b);
    }
}
