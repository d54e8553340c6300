//! Weighted Euclidean distance between normalized fingerprints.

use kindred_analysis::{dimension_names, NUM_DIMENSIONS};

/// Per-dimension weights for the similarity metric.
///
/// The defaults emphasize frequency balance and dynamics, which dominate
/// perceived similarity; the struct total is re-normalized to 1.0 before
/// use, so only the ratios matter.
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionWeights {
    // Frequency (7) - most important for perceived similarity
    pub sub_bass_pct: f64,
    pub bass_pct: f64,
    pub low_mid_pct: f64,
    pub mid_pct: f64,
    pub upper_mid_pct: f64,
    pub presence_pct: f64,
    pub air_pct: f64,
    // Dynamics (3) - very important
    pub lufs: f64,
    pub crest_db: f64,
    pub bass_mid_ratio: f64,
    // Temporal (4) - important for genre/style
    pub tempo_bpm: f64,
    pub rhythm_stability: f64,
    pub transient_density: f64,
    pub silence_ratio: f64,
    // Spectral (3) - moderate importance
    pub spectral_centroid: f64,
    pub spectral_rolloff: f64,
    pub spectral_flatness: f64,
    // Harmonic (3) - moderate importance
    pub harmonic_ratio: f64,
    pub pitch_stability: f64,
    pub chroma_energy: f64,
    // Variation (3) - low importance
    pub dynamic_range_variation: f64,
    pub loudness_variation_std: f64,
    pub peak_consistency: f64,
    // Stereo (2) - low importance
    pub stereo_width: f64,
    pub phase_correlation: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            sub_bass_pct: 0.04,
            bass_pct: 0.06,
            low_mid_pct: 0.05,
            mid_pct: 0.06,
            upper_mid_pct: 0.05,
            presence_pct: 0.04,
            air_pct: 0.03,
            lufs: 0.10,
            crest_db: 0.08,
            bass_mid_ratio: 0.05,
            tempo_bpm: 0.08,
            rhythm_stability: 0.04,
            transient_density: 0.04,
            silence_ratio: 0.02,
            spectral_centroid: 0.05,
            spectral_rolloff: 0.04,
            spectral_flatness: 0.03,
            harmonic_ratio: 0.04,
            pitch_stability: 0.03,
            chroma_energy: 0.02,
            dynamic_range_variation: 0.02,
            loudness_variation_std: 0.02,
            peak_consistency: 0.01,
            stereo_width: 0.02,
            phase_correlation: 0.01,
        }
    }
}

impl DimensionWeights {
    /// The canonical-order weight vector, normalized to sum 1.0.
    #[must_use]
    pub fn to_array(&self) -> [f64; NUM_DIMENSIONS] {
        let mut weights = [
            self.sub_bass_pct,
            self.bass_pct,
            self.low_mid_pct,
            self.mid_pct,
            self.upper_mid_pct,
            self.presence_pct,
            self.air_pct,
            self.lufs,
            self.crest_db,
            self.bass_mid_ratio,
            self.tempo_bpm,
            self.rhythm_stability,
            self.transient_density,
            self.silence_ratio,
            self.spectral_centroid,
            self.spectral_rolloff,
            self.spectral_flatness,
            self.harmonic_ratio,
            self.pitch_stability,
            self.chroma_energy,
            self.dynamic_range_variation,
            self.loudness_variation_std,
            self.peak_consistency,
            self.stereo_width,
            self.phase_correlation,
        ];
        let total: f64 = weights.iter().sum();
        if total > 0. {
            for weight in &mut weights {
                *weight /= total;
            }
        }
        weights
    }

    /// Equal weight on every dimension.
    #[must_use]
    pub fn equal() -> Self {
        let w = 1. / NUM_DIMENSIONS as f64;
        Self {
            sub_bass_pct: w,
            bass_pct: w,
            low_mid_pct: w,
            mid_pct: w,
            upper_mid_pct: w,
            presence_pct: w,
            air_pct: w,
            lufs: w,
            crest_db: w,
            bass_mid_ratio: w,
            tempo_bpm: w,
            rhythm_stability: w,
            transient_density: w,
            silence_ratio: w,
            spectral_centroid: w,
            spectral_rolloff: w,
            spectral_flatness: w,
            harmonic_ratio: w,
            pitch_stability: w,
            chroma_energy: w,
            dynamic_range_variation: w,
            loudness_variation_std: w,
            peak_consistency: w,
            stereo_width: w,
            phase_correlation: w,
        }
    }

    /// Default weights with the frequency group doubled.
    #[must_use]
    pub fn frequency_focused() -> Self {
        let mut weights = Self::default();
        weights.sub_bass_pct *= 2.;
        weights.bass_pct *= 2.;
        weights.low_mid_pct *= 2.;
        weights.mid_pct *= 2.;
        weights.upper_mid_pct *= 2.;
        weights.presence_pct *= 2.;
        weights.air_pct *= 2.;
        weights
    }

    /// Default weights with the dynamics group doubled.
    #[must_use]
    pub fn dynamics_focused() -> Self {
        let mut weights = Self::default();
        weights.lufs *= 2.;
        weights.crest_db *= 2.;
        weights.bass_mid_ratio *= 2.;
        weights
    }
}

/// The metric: `d = sqrt(sum(w_i * (x_i - y_i)^2))` on normalized
/// vectors. Immutable after construction and shareable across threads.
#[derive(Clone, Debug)]
pub struct DistanceCalculator {
    weights: [f64; NUM_DIMENSIONS],
}

impl Default for DistanceCalculator {
    fn default() -> Self {
        Self::new(&DimensionWeights::default())
    }
}

impl DistanceCalculator {
    #[must_use]
    pub fn new(weights: &DimensionWeights) -> Self {
        Self {
            weights: weights.to_array(),
        }
    }

    /// Weighted Euclidean distance between two normalized vectors.
    #[must_use]
    pub fn distance(
        &self,
        a: &[f64; NUM_DIMENSIONS],
        b: &[f64; NUM_DIMENSIONS],
    ) -> f64 {
        let sum: f64 = self
            .weights
            .iter()
            .zip(a.iter().zip(b))
            .map(|(&w, (&x, &y))| w * (x - y) * (x - y))
            .sum();
        sum.sqrt()
    }

    /// Distances from `target` to every candidate, in input order.
    #[must_use]
    pub fn distance_batch(
        &self,
        target: &[f64; NUM_DIMENSIONS],
        candidates: &[[f64; NUM_DIMENSIONS]],
    ) -> Vec<f64> {
        candidates
            .iter()
            .map(|candidate| self.distance(target, candidate))
            .collect()
    }

    /// The up-to-`n` closest candidates, sorted ascending by distance.
    ///
    /// Uses a partial selection (O(m) `select_nth_unstable`) and only
    /// sorts the winning slice, instead of sorting all m candidates.
    #[must_use]
    pub fn find_closest_n(
        &self,
        target: &[f64; NUM_DIMENSIONS],
        candidates: &[(i64, [f64; NUM_DIMENSIONS])],
        n: usize,
    ) -> Vec<(i64, f64)> {
        if candidates.is_empty() || n == 0 {
            return vec![];
        }

        let mut scored: Vec<(i64, f64)> = candidates
            .iter()
            .map(|(track_id, vector)| (*track_id, self.distance(target, vector)))
            .collect();

        let n = n.min(scored.len());
        if n < scored.len() {
            scored.select_nth_unstable_by(n - 1, |a, b| a.1.total_cmp(&b.1));
            scored.truncate(n);
        }
        scored.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));
        scored
    }

    /// Map a distance to a [0, 1] similarity score.
    #[must_use]
    pub fn similarity_score(distance: f64, max_distance: f64) -> f64 {
        1. - distance.clamp(0., max_distance) / max_distance
    }

    /// Per-dimension `w_i * (a_i - b_i)^2` terms, for explaining why two
    /// tracks read as similar or different.
    #[must_use]
    pub fn dimension_contributions(
        &self,
        a: &[f64; NUM_DIMENSIONS],
        b: &[f64; NUM_DIMENSIONS],
    ) -> Vec<(&'static str, f64)> {
        dimension_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, self.weights[i] * (a[i] - b[i]) * (a[i] - b[i])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn arb_vector(rng: &mut SmallRng) -> [f64; NUM_DIMENSIONS] {
        std::array::from_fn(|_| rng.gen_range(0.0..1.0))
    }

    #[test]
    fn test_weights_sum_to_one() {
        for weights in [
            DimensionWeights::default(),
            DimensionWeights::equal(),
            DimensionWeights::frequency_focused(),
            DimensionWeights::dynamics_focused(),
        ] {
            let sum: f64 = weights.to_array().iter().sum();
            assert!((sum - 1.).abs() < 1e-12, "sum was {sum}");
        }
    }

    #[test]
    fn test_focused_presets_shift_mass() {
        let default_weights = DimensionWeights::default().to_array();
        let frequency = DimensionWeights::frequency_focused().to_array();
        // After re-normalization the frequency dims gained share...
        assert!(frequency[0] > default_weights[0]);
        // ...at the expense of everything else.
        assert!(frequency[7] < default_weights[7]);
    }

    #[test]
    fn test_metric_properties() {
        // Non-negativity, symmetry, identity of indiscernibles.
        let calculator = DistanceCalculator::default();
        let mut rng = SmallRng::seed_from_u64(17);
        for _ in 0..100 {
            let a = arb_vector(&mut rng);
            let b = arb_vector(&mut rng);
            let d_ab = calculator.distance(&a, &b);
            let d_ba = calculator.distance(&b, &a);
            assert!(d_ab >= 0.);
            assert!((d_ab - d_ba).abs() < 1e-12);
            assert!(calculator.distance(&a, &a) < 1e-6);
        }
    }

    #[test]
    fn test_triangle_inequality() {
        let calculator = DistanceCalculator::default();
        let mut rng = SmallRng::seed_from_u64(99);
        for _ in 0..200 {
            let a = arb_vector(&mut rng);
            let b = arb_vector(&mut rng);
            let c = arb_vector(&mut rng);
            let direct = calculator.distance(&a, &c);
            let via = calculator.distance(&a, &b) + calculator.distance(&b, &c);
            assert!(direct <= via + 1e-6, "{direct} > {via}");
        }
    }

    #[test]
    fn test_batch_matches_single() {
        let calculator = DistanceCalculator::default();
        let mut rng = SmallRng::seed_from_u64(3);
        let target = arb_vector(&mut rng);
        let candidates: Vec<[f64; NUM_DIMENSIONS]> =
            (0..20).map(|_| arb_vector(&mut rng)).collect();

        let batch = calculator.distance_batch(&target, &candidates);
        for (candidate, &d) in candidates.iter().zip(&batch) {
            assert_eq!(calculator.distance(&target, candidate), d);
        }
    }

    #[test]
    fn test_find_closest_n_matches_full_sort() {
        let calculator = DistanceCalculator::default();
        let mut rng = SmallRng::seed_from_u64(42);
        let target = arb_vector(&mut rng);
        let candidates: Vec<(i64, [f64; NUM_DIMENSIONS])> =
            (0..200).map(|i| (i, arb_vector(&mut rng))).collect();

        let top = calculator.find_closest_n(&target, &candidates, 10);
        assert_eq!(top.len(), 10);

        let mut all: Vec<(i64, f64)> = candidates
            .iter()
            .map(|(id, v)| (*id, calculator.distance(&target, v)))
            .collect();
        all.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));
        assert_eq!(top, all[..10].to_vec());
    }

    #[test]
    fn test_find_closest_n_edge_cases() {
        let calculator = DistanceCalculator::default();
        let target = [0.5; NUM_DIMENSIONS];
        assert!(calculator.find_closest_n(&target, &[], 5).is_empty());

        let candidates = vec![(1, [0.4; NUM_DIMENSIONS]), (2, [0.9; NUM_DIMENSIONS])];
        assert!(calculator.find_closest_n(&target, &candidates, 0).is_empty());
        // Asking for more than exist returns all, sorted.
        let all = calculator.find_closest_n(&target, &candidates, 10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, 1);
    }

    #[test]
    fn test_similarity_score() {
        assert_eq!(DistanceCalculator::similarity_score(0., 1.), 1.);
        assert_eq!(DistanceCalculator::similarity_score(1., 1.), 0.);
        assert_eq!(DistanceCalculator::similarity_score(2., 1.), 0.);
        assert!((DistanceCalculator::similarity_score(0.25, 1.) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_contributions_sum_to_squared_distance() {
        let calculator = DistanceCalculator::default();
        let mut rng = SmallRng::seed_from_u64(5);
        let a = arb_vector(&mut rng);
        let b = arb_vector(&mut rng);

        let contributions = calculator.dimension_contributions(&a, &b);
        assert_eq!(contributions.len(), NUM_DIMENSIONS);
        let total: f64 = contributions.iter().map(|(_, c)| c).sum();
        let distance = calculator.distance(&a, &b);
        assert!((total - distance * distance).abs() < 1e-12);
    }
}
