#![allow(clippy::module_name_repetitions)]

use kindred_analysis::{dimension_names, Fingerprint, FINGERPRINT_VERSION};
use serde::{Deserialize, Serialize};
use surrealdb::sql::{Id, Thing};

pub type FingerprintId = Thing;

pub const TABLE_NAME: &str = "fingerprint";

/// Sentinel loudness stored in a pending placeholder row.
pub const PLACEHOLDER_LUFS: f64 = -100.;

/// Schema statements for the fingerprint table: the 25 numeric columns in
/// canonical order, plus bookkeeping. The UNIQUE index on `track_id` is
/// what makes [`claim`](crate::db::crud) mutually exclusive between
/// workers.
#[must_use]
pub fn define_table() -> String {
    let mut statements = String::from(
        "DEFINE TABLE IF NOT EXISTS fingerprint SCHEMAFULL;\n\
         DEFINE FIELD IF NOT EXISTS track_id ON fingerprint TYPE int;\n",
    );
    for name in dimension_names() {
        statements.push_str(&format!(
            "DEFINE FIELD IF NOT EXISTS {name} ON fingerprint TYPE float;\n"
        ));
    }
    statements.push_str(
        "DEFINE FIELD IF NOT EXISTS version ON fingerprint TYPE int;\n\
         DEFINE FIELD IF NOT EXISTS status ON fingerprint TYPE string;\n\
         DEFINE INDEX IF NOT EXISTS fingerprint_track_id_unique_index \
         ON fingerprint FIELDS track_id UNIQUE;",
    );
    statements
}

/// Whether a row is a completed descriptor or a worker's claim marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintStatus {
    /// Placeholder inserted by `claim_next_unfingerprinted_track`; the
    /// numeric columns hold sentinels, not a descriptor.
    Pending,
    Complete,
}

/// One row of the fingerprint table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRow {
    pub id: FingerprintId,
    pub track_id: i64,

    pub sub_bass_pct: f64,
    pub bass_pct: f64,
    pub low_mid_pct: f64,
    pub mid_pct: f64,
    pub upper_mid_pct: f64,
    pub presence_pct: f64,
    pub air_pct: f64,
    pub lufs: f64,
    pub crest_db: f64,
    pub bass_mid_ratio: f64,
    pub tempo_bpm: f64,
    pub rhythm_stability: f64,
    pub transient_density: f64,
    pub silence_ratio: f64,
    pub spectral_centroid: f64,
    pub spectral_rolloff: f64,
    pub spectral_flatness: f64,
    pub harmonic_ratio: f64,
    pub pitch_stability: f64,
    pub chroma_energy: f64,
    pub dynamic_range_variation: f64,
    pub loudness_variation_std: f64,
    pub peak_consistency: f64,
    pub stereo_width: f64,
    pub phase_correlation: f64,

    pub version: u32,
    pub status: FingerprintStatus,
}

impl FingerprintRow {
    #[must_use]
    pub fn make_id(track_id: i64) -> FingerprintId {
        Thing::from((TABLE_NAME, Id::Number(track_id)))
    }

    /// A completed row carrying `fingerprint` for `track_id`.
    #[must_use]
    pub fn completed(track_id: i64, fingerprint: &Fingerprint) -> Self {
        Self::from_parts(
            track_id,
            fingerprint,
            FINGERPRINT_VERSION,
            FingerprintStatus::Complete,
        )
    }

    /// The claim marker: a pending row full of sentinel values. It only
    /// exists so the UNIQUE `track_id` index can arbitrate between
    /// workers; the upsert that follows extraction overwrites it.
    #[must_use]
    pub fn placeholder(track_id: i64) -> Self {
        let mut sentinel = Fingerprint::from_vector([0.; kindred_analysis::NUM_DIMENSIONS]);
        sentinel.lufs = PLACEHOLDER_LUFS;
        Self::from_parts(
            track_id,
            &sentinel,
            FINGERPRINT_VERSION,
            FingerprintStatus::Pending,
        )
    }

    fn from_parts(
        track_id: i64,
        fingerprint: &Fingerprint,
        version: u32,
        status: FingerprintStatus,
    ) -> Self {
        Self {
            id: Self::make_id(track_id),
            track_id,
            sub_bass_pct: fingerprint.sub_bass_pct,
            bass_pct: fingerprint.bass_pct,
            low_mid_pct: fingerprint.low_mid_pct,
            mid_pct: fingerprint.mid_pct,
            upper_mid_pct: fingerprint.upper_mid_pct,
            presence_pct: fingerprint.presence_pct,
            air_pct: fingerprint.air_pct,
            lufs: fingerprint.lufs,
            crest_db: fingerprint.crest_db,
            bass_mid_ratio: fingerprint.bass_mid_ratio,
            tempo_bpm: fingerprint.tempo_bpm,
            rhythm_stability: fingerprint.rhythm_stability,
            transient_density: fingerprint.transient_density,
            silence_ratio: fingerprint.silence_ratio,
            spectral_centroid: fingerprint.spectral_centroid,
            spectral_rolloff: fingerprint.spectral_rolloff,
            spectral_flatness: fingerprint.spectral_flatness,
            harmonic_ratio: fingerprint.harmonic_ratio,
            pitch_stability: fingerprint.pitch_stability,
            chroma_energy: fingerprint.chroma_energy,
            dynamic_range_variation: fingerprint.dynamic_range_variation,
            loudness_variation_std: fingerprint.loudness_variation_std,
            peak_consistency: fingerprint.peak_consistency,
            stereo_width: fingerprint.stereo_width,
            phase_correlation: fingerprint.phase_correlation,
            version,
            status,
        }
    }

    /// The canonical descriptor stored in this row.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            sub_bass_pct: self.sub_bass_pct,
            bass_pct: self.bass_pct,
            low_mid_pct: self.low_mid_pct,
            mid_pct: self.mid_pct,
            upper_mid_pct: self.upper_mid_pct,
            presence_pct: self.presence_pct,
            air_pct: self.air_pct,
            lufs: self.lufs,
            crest_db: self.crest_db,
            bass_mid_ratio: self.bass_mid_ratio,
            tempo_bpm: self.tempo_bpm,
            rhythm_stability: self.rhythm_stability,
            transient_density: self.transient_density,
            silence_ratio: self.silence_ratio,
            spectral_centroid: self.spectral_centroid,
            spectral_rolloff: self.spectral_rolloff,
            spectral_flatness: self.spectral_flatness,
            harmonic_ratio: self.harmonic_ratio,
            pitch_stability: self.pitch_stability,
            chroma_energy: self.chroma_energy,
            dynamic_range_variation: self.dynamic_range_variation,
            loudness_variation_std: self.loudness_variation_std,
            peak_consistency: self.peak_consistency,
            stereo_width: self.stereo_width,
            phase_correlation: self.phase_correlation,
        }
    }

    /// True for a completed row (not a claim placeholder).
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.status, FingerprintStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_define_table_covers_all_dimensions() {
        let ddl = define_table();
        for name in dimension_names() {
            assert!(ddl.contains(&format!("{name} ON fingerprint")), "{name}");
        }
        assert!(ddl.contains("UNIQUE"));
    }

    #[test]
    fn test_completed_round_trips_fingerprint() {
        let fingerprint = Fingerprint::from_vector(std::array::from_fn(|i| i as f64 / 10.));
        let row = FingerprintRow::completed(7, &fingerprint);
        assert_eq!(row.track_id, 7);
        assert!(row.is_complete());
        assert_eq!(row.version, FINGERPRINT_VERSION);
        assert_eq!(row.fingerprint(), fingerprint);
    }

    #[test]
    fn test_placeholder_is_pending_with_sentinels() {
        let row = FingerprintRow::placeholder(3);
        assert!(!row.is_complete());
        assert_eq!(row.lufs, PLACEHOLDER_LUFS);
        assert_eq!(row.tempo_bpm, 0.);
    }

    #[rstest]
    #[case::pending(FingerprintStatus::Pending, "\"pending\"")]
    #[case::complete(FingerprintStatus::Complete, "\"complete\"")]
    fn test_status_serializes_lowercase(
        #[case] status: FingerprintStatus,
        #[case] expected: &str,
    ) {
        assert_eq!(serde_json::to_string(&status).unwrap(), expected);
        let parsed: FingerprintStatus = serde_json::from_str(expected).unwrap();
        assert_eq!(parsed, status);
    }
}
