//! High-level similarity search over the fingerprint repository.
//!
//! Combines normalization, the weighted metric and the coarse pre-filter
//! into the "find tracks like this one" surface.

use std::path::Path;

use kindred_analysis::{Fingerprint, NUM_DIMENSIONS};
use kindred_storage::db::queries::fingerprint::DimensionRange;
use kindred_storage::db::schemas::fingerprint::FingerprintRow;
use log::{debug, info, warn};
use serde::Serialize;
use surrealdb::{Connection, Surreal};

use crate::config::SimilaritySettings;
use crate::distance::{DimensionWeights, DistanceCalculator};
use crate::errors::CoreResult;
use crate::normalizer::Normalizer;

/// Page size when streaming the whole fingerprint table.
const FIT_PAGE_SIZE: usize = 1000;

/// One similar track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub track_id: i64,
    pub distance: f64,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionContribution {
    pub dimension: String,
    pub contribution: f64,
}

/// Why two tracks read as similar or different.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityExplanation {
    pub track_id1: i64,
    pub track_id2: i64,
    pub distance: f64,
    pub similarity_score: f64,
    /// The `top_n` largest contributions, largest first.
    pub top_differences: Vec<DimensionContribution>,
    pub all_contributions: Vec<DimensionContribution>,
}

/// The complete similarity system: normalizer + metric + pre-filter over
/// the repository.
pub struct SimilarityEngine<C: Connection> {
    db: Surreal<C>,
    normalizer: Normalizer,
    distance: DistanceCalculator,
    settings: SimilaritySettings,
}

impl<C: Connection> SimilarityEngine<C> {
    #[must_use]
    pub fn new(db: Surreal<C>, settings: SimilaritySettings) -> Self {
        Self {
            db,
            normalizer: Normalizer::new(
                settings.use_robust_normalization,
                settings.percentile_range,
            ),
            distance: DistanceCalculator::new(&DimensionWeights::default()),
            settings,
        }
    }

    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.normalizer.is_fitted()
    }

    /// Fit the normalizer over every completed fingerprint in the
    /// repository. Returns `false` when the library is still too small.
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    pub async fn fit(&mut self) -> CoreResult<bool> {
        info!("fitting similarity system to library fingerprints");
        let fingerprints = self.all_fingerprints().await?;
        let fitted = self
            .normalizer
            .fit(&fingerprints, self.settings.min_samples);
        if fitted {
            info!("similarity system ready");
        }
        Ok(fitted)
    }

    /// Replace the normalizer with one loaded from disk.
    ///
    /// # Errors
    ///
    /// Propagates load errors.
    pub fn load_normalizer(&mut self, path: &Path) -> CoreResult<()> {
        self.normalizer = Normalizer::load(path)?;
        Ok(())
    }

    /// Persist the fitted normalizer.
    ///
    /// # Errors
    ///
    /// Fails when unfitted or on I/O errors.
    pub fn save_normalizer(&self, path: &Path) -> CoreResult<()> {
        self.normalizer.save(path)
    }

    /// The N most similar tracks to `track_id`, most similar first.
    ///
    /// A track with no (completed) fingerprint yields an empty list, not
    /// an error.
    ///
    /// # Errors
    ///
    /// [`crate::errors::Error::NormalizerNotFitted`] before `fit`, or
    /// repository errors.
    pub async fn find_similar(
        &self,
        track_id: i64,
        n: usize,
        use_prefilter: bool,
    ) -> CoreResult<Vec<SimilarityResult>> {
        let Some(target) = self.completed_fingerprint(track_id).await? else {
            warn!("no fingerprint found for track {track_id}");
            return Ok(vec![]);
        };
        let target_vector = self.normalizer.normalize(&target.to_vector())?;

        let candidate_rows = if use_prefilter {
            self.prefiltered_candidates(&target, n.saturating_mul(self.settings.prefilter_factor))
                .await?
        } else {
            self.all_rows().await?
        };

        let mut candidates: Vec<(i64, [f64; NUM_DIMENSIONS])> = Vec::new();
        for row in &candidate_rows {
            if row.track_id == track_id {
                continue;
            }
            candidates.push((
                row.track_id,
                self.normalizer.normalize(&row.fingerprint().to_vector())?,
            ));
        }
        if candidates.is_empty() {
            warn!("no candidate tracks found for track {track_id}");
            return Ok(vec![]);
        }
        debug!(
            "finding similar tracks for {track_id} among {} candidates",
            candidates.len()
        );

        let closest = self.distance.find_closest_n(&target_vector, &candidates, n);
        Ok(closest
            .into_iter()
            .map(|(track_id, distance)| SimilarityResult {
                track_id,
                distance,
                similarity_score: DistanceCalculator::similarity_score(distance, 1.),
            })
            .collect())
    }

    /// Similarity between two specific tracks; `None` when either lacks a
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// Unfitted normalizer or repository errors.
    pub async fn calculate_similarity(
        &self,
        track_id1: i64,
        track_id2: i64,
    ) -> CoreResult<Option<SimilarityResult>> {
        let (Some(a), Some(b)) = (
            self.completed_fingerprint(track_id1).await?,
            self.completed_fingerprint(track_id2).await?,
        ) else {
            warn!("fingerprint(s) not found for tracks {track_id1}, {track_id2}");
            return Ok(None);
        };

        let va = self.normalizer.normalize(&a.to_vector())?;
        let vb = self.normalizer.normalize(&b.to_vector())?;
        let distance = self.distance.distance(&va, &vb);
        Ok(Some(SimilarityResult {
            track_id: track_id2,
            distance,
            similarity_score: DistanceCalculator::similarity_score(distance, 1.),
        }))
    }

    /// A ranked breakdown of which dimensions pull two tracks apart.
    ///
    /// # Errors
    ///
    /// Unfitted normalizer or repository errors.
    pub async fn similarity_explanation(
        &self,
        track_id1: i64,
        track_id2: i64,
        top_n: usize,
    ) -> CoreResult<Option<SimilarityExplanation>> {
        let (Some(a), Some(b)) = (
            self.completed_fingerprint(track_id1).await?,
            self.completed_fingerprint(track_id2).await?,
        ) else {
            return Ok(None);
        };

        let va = self.normalizer.normalize(&a.to_vector())?;
        let vb = self.normalizer.normalize(&b.to_vector())?;
        let distance = self.distance.distance(&va, &vb);

        let all_contributions: Vec<DimensionContribution> = self
            .distance
            .dimension_contributions(&va, &vb)
            .into_iter()
            .map(|(dimension, contribution)| DimensionContribution {
                dimension: dimension.to_string(),
                contribution,
            })
            .collect();

        let mut ranked = all_contributions.clone();
        ranked.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
        ranked.truncate(top_n);

        Ok(Some(SimilarityExplanation {
            track_id1,
            track_id2,
            distance,
            similarity_score: DistanceCalculator::similarity_score(distance, 1.),
            top_differences: ranked,
            all_contributions,
        }))
    }

    /// Candidates whose coarse dimensions sit near the target, in original
    /// scale: ±3 LUFS, ±2 dB crest, ±8 % bass, ±15 BPM by default.
    async fn prefiltered_candidates(
        &self,
        target: &Fingerprint,
        max_candidates: usize,
    ) -> CoreResult<Vec<FingerprintRow>> {
        let t = self.settings.prefilter;
        let ranges = vec![
            DimensionRange::new("lufs", target.lufs - t.lufs, target.lufs + t.lufs),
            DimensionRange::new(
                "crest_db",
                target.crest_db - t.crest_db,
                target.crest_db + t.crest_db,
            ),
            DimensionRange::new(
                "bass_pct",
                target.bass_pct - t.bass_pct,
                target.bass_pct + t.bass_pct,
            ),
            DimensionRange::new(
                "tempo_bpm",
                target.tempo_bpm - t.tempo_bpm,
                target.tempo_bpm + t.tempo_bpm,
            ),
        ];
        let rows = FingerprintRow::get_by_multi_dimension_range(
            &self.db,
            &ranges,
            Some(max_candidates),
        )
        .await?;
        debug!("pre-filtering kept {} candidates", rows.len());
        Ok(rows)
    }

    async fn completed_fingerprint(&self, track_id: i64) -> CoreResult<Option<Fingerprint>> {
        Ok(FingerprintRow::get_by_track_id(&self.db, track_id)
            .await?
            .filter(FingerprintRow::is_complete)
            .map(|row| row.fingerprint()))
    }

    async fn all_rows(&self) -> CoreResult<Vec<FingerprintRow>> {
        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let page = FingerprintRow::get_all(&self.db, Some(FIT_PAGE_SIZE), offset).await?;
            let page_len = page.len();
            rows.extend(page);
            if page_len < FIT_PAGE_SIZE {
                return Ok(rows);
            }
            offset += page_len;
        }
    }

    async fn all_fingerprints(&self) -> CoreResult<Vec<Fingerprint>> {
        Ok(self
            .all_rows()
            .await?
            .iter()
            .map(FingerprintRow::fingerprint)
            .collect())
    }
}
