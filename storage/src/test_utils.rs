//! Helpers shared by this crate's tests and by downstream crates' tests
//! (behind the `test_utils` feature).

use std::path::PathBuf;

use kindred_analysis::Fingerprint;
use rand::{rngs::SmallRng, Rng, SeedableRng};

#[cfg(any(test, feature = "db"))]
use crate::db::schemas::track::Track;
#[cfg(any(test, feature = "db"))]
use crate::errors::StorageResult;
#[cfg(any(test, feature = "db"))]
use surrealdb::{Connection, Surreal};

/// A deterministic, plausible fingerprint: the same seed always yields the
/// same values, different seeds differ in every dimension.
#[must_use]
pub fn arb_fingerprint(seed: u64) -> Fingerprint {
    let mut rng = SmallRng::seed_from_u64(seed);

    // Frequency percentages from a random split that sums to 100.
    let mut raw = [0.; 7];
    for slot in &mut raw {
        *slot = rng.gen_range(0.5..10.0);
    }
    let total: f64 = raw.iter().sum();
    let pct = raw.map(|v| v / total * 100.);

    Fingerprint {
        sub_bass_pct: pct[0],
        bass_pct: pct[1],
        low_mid_pct: pct[2],
        mid_pct: pct[3],
        upper_mid_pct: pct[4],
        presence_pct: pct[5],
        air_pct: pct[6],
        lufs: rng.gen_range(-30.0..-5.0),
        crest_db: rng.gen_range(6.0..20.0),
        bass_mid_ratio: rng.gen_range(-10.0..10.0),
        tempo_bpm: rng.gen_range(60.0..180.0),
        rhythm_stability: rng.gen_range(0.0..1.0),
        transient_density: rng.gen_range(0.0..10.0),
        silence_ratio: rng.gen_range(0.0..0.4),
        spectral_centroid: rng.gen_range(0.0..1.0),
        spectral_rolloff: rng.gen_range(0.0..1.0),
        spectral_flatness: rng.gen_range(0.0..1.0),
        harmonic_ratio: rng.gen_range(0.0..1.0),
        pitch_stability: rng.gen_range(0.0..1.0),
        chroma_energy: rng.gen_range(0.0..1.0),
        dynamic_range_variation: rng.gen_range(0.0..1.0),
        loudness_variation_std: rng.gen_range(0.0..8.0),
        peak_consistency: rng.gen_range(0.0..1.0),
        stereo_width: rng.gen_range(0.0..1.0),
        phase_correlation: rng.gen_range(-1.0..1.0),
    }
}

/// Insert a track row with a synthetic path derived from its id.
///
/// # Errors
///
/// Propagates database errors.
#[cfg(any(test, feature = "db"))]
pub async fn create_track<C: Connection>(
    db: &Surreal<C>,
    track_id: i64,
) -> StorageResult<Track> {
    Ok(Track::create(
        db,
        track_id,
        PathBuf::from(format!("/music/track_{track_id}.flac")),
        180.,
        44_100,
    )
    .await?
    .expect("track already exists"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_arb_fingerprint_is_deterministic() {
        assert_eq!(arb_fingerprint(1), arb_fingerprint(1));
        assert_ne!(arb_fingerprint(1), arb_fingerprint(2));
    }

    #[test]
    fn test_arb_fingerprint_is_plausible() {
        let fingerprint = arb_fingerprint(42);
        assert!(fingerprint.is_finite());
        let sum: f64 = fingerprint.frequency_percentages().iter().sum();
        assert!((sum - 100.).abs() < 0.5);
        assert!(fingerprint.lufs < 0.);
    }
}
