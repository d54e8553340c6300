//! Per-dimension min/max normalization of fingerprints.
//!
//! Dimensions live on wildly different scales (tempo spans ~140 BPM,
//! phase correlation spans 2.0); without normalization the large-range
//! dimensions would dominate every distance. Fitting uses robust
//! percentiles by default so a single broken outlier cannot stretch a
//! dimension flat.

use std::collections::BTreeMap;
use std::path::Path;

use kindred_analysis::utils::{mean, std_dev};
use kindred_analysis::{dimension_names, Fingerprint, NUM_DIMENSIONS};
use log::{debug, info, warn};
use ndarray::prelude::*;
use ndarray_stats::{interpolate::Linear, Quantile1dExt};
use noisy_float::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{CoreResult, Error};

pub const DEFAULT_MIN_SAMPLES: usize = 10;

/// A dimension whose fitted range is narrower than this normalizes to 0.5.
const ZERO_VARIANCE_EPSILON: f64 = 1e-6;

/// Fitted statistics for one dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// The persisted form of a fitted normalizer.
#[derive(Serialize, Deserialize)]
struct StatsFile {
    use_robust: bool,
    percentile_range: (f64, f64),
    dimensions: BTreeMap<String, DimensionStats>,
}

#[derive(Clone, Debug)]
pub struct Normalizer {
    use_robust: bool,
    percentile_range: (f64, f64),
    stats: Vec<DimensionStats>,
    fitted: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(true, (5., 95.))
    }
}

impl Normalizer {
    #[must_use]
    pub const fn new(use_robust: bool, percentile_range: (f64, f64)) -> Self {
        Self {
            use_robust,
            percentile_range,
            stats: Vec::new(),
            fitted: false,
        }
    }

    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Fit per-dimension statistics over a fingerprint population.
    ///
    /// Returns `false` (leaving the normalizer unfitted) for fewer than
    /// `min_samples` inputs.
    pub fn fit(&mut self, fingerprints: &[Fingerprint], min_samples: usize) -> bool {
        if fingerprints.len() < min_samples {
            warn!(
                "insufficient fingerprints for normalization: {} < {min_samples}",
                fingerprints.len()
            );
            return false;
        }
        info!(
            "calculating normalization statistics from {} fingerprints",
            fingerprints.len()
        );

        let vectors: Vec<[f64; NUM_DIMENSIONS]> =
            fingerprints.iter().map(Fingerprint::to_vector).collect();

        let mut stats = Vec::with_capacity(NUM_DIMENSIONS);
        for (i, name) in dimension_names().into_iter().enumerate() {
            let values: Vec<f64> = vectors.iter().map(|v| v[i]).collect();

            let absolute = (
                values.iter().copied().fold(f64::INFINITY, f64::min),
                values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            );
            let (min, max) = if self.use_robust {
                robust_range(&values, self.percentile_range).unwrap_or(absolute)
            } else {
                absolute
            };

            let dim = DimensionStats {
                name: name.to_string(),
                min,
                max,
                mean: mean(&values),
                std: std_dev(&values),
                count: values.len(),
            };
            debug!(
                "  {name}: min={:.3}, max={:.3}, mean={:.3}, std={:.3}",
                dim.min, dim.max, dim.mean, dim.std
            );
            stats.push(dim);
        }

        self.stats = stats;
        self.fitted = true;
        true
    }

    /// Map a raw vector into the [0, 1] similarity space.
    ///
    /// Values outside the fitted range clip to the boundary; a
    /// zero-variance dimension maps to 0.5 for every input.
    ///
    /// # Errors
    ///
    /// [`Error::NormalizerNotFitted`] when `fit` has not succeeded.
    pub fn normalize(&self, vector: &[f64; NUM_DIMENSIONS]) -> CoreResult<[f64; NUM_DIMENSIONS]> {
        if !self.fitted {
            return Err(Error::NormalizerNotFitted);
        }

        let mut normalized = [0.; NUM_DIMENSIONS];
        for (i, slot) in normalized.iter_mut().enumerate() {
            let stats = &self.stats[i];
            let range = stats.max - stats.min;
            *slot = if range > ZERO_VARIANCE_EPSILON {
                ((vector[i] - stats.min) / range).clamp(0., 1.)
            } else {
                0.5
            };
        }
        Ok(normalized)
    }

    /// Inverse of [`normalize`](Self::normalize), without re-clipping.
    ///
    /// # Errors
    ///
    /// [`Error::NormalizerNotFitted`] when `fit` has not succeeded.
    pub fn denormalize(
        &self,
        normalized: &[f64; NUM_DIMENSIONS],
    ) -> CoreResult<[f64; NUM_DIMENSIONS]> {
        if !self.fitted {
            return Err(Error::NormalizerNotFitted);
        }

        let mut vector = [0.; NUM_DIMENSIONS];
        for (i, slot) in vector.iter_mut().enumerate() {
            let stats = &self.stats[i];
            *slot = normalized[i] * (stats.max - stats.min) + stats.min;
        }
        Ok(vector)
    }

    /// Persist the fitted statistics as JSON.
    ///
    /// # Errors
    ///
    /// [`Error::NormalizerNotFitted`] when unfitted, or an I/O error.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if !self.fitted {
            return Err(Error::NormalizerNotFitted);
        }
        let file = StatsFile {
            use_robust: self.use_robust,
            percentile_range: self.percentile_range,
            dimensions: self
                .stats
                .iter()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        info!("normalization statistics saved to {}", path.display());
        Ok(())
    }

    /// Load previously saved statistics; the result is fitted.
    ///
    /// # Errors
    ///
    /// I/O and JSON errors, or [`Error::NormalizerNotFitted`] when the
    /// file does not cover all 25 dimensions.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let file: StatsFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;

        let mut stats = Vec::with_capacity(NUM_DIMENSIONS);
        for name in dimension_names() {
            let Some(dim) = file.dimensions.get(name) else {
                warn!("stats file {} is missing dimension {name}", path.display());
                return Err(Error::NormalizerNotFitted);
            };
            stats.push(dim.clone());
        }

        info!("normalization statistics loaded from {}", path.display());
        Ok(Self {
            use_robust: file.use_robust,
            percentile_range: file.percentile_range,
            stats,
            fitted: true,
        })
    }

    /// The fitted statistics keyed by dimension name (empty if unfitted).
    #[must_use]
    pub fn stats_summary(&self) -> BTreeMap<String, DimensionStats> {
        self.stats
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect()
    }
}

/// Percentile-based range, `None` if the quantiles cannot be computed.
fn robust_range(values: &[f64], percentile_range: (f64, f64)) -> Option<(f64, f64)> {
    let mut array = arr1(values).mapv(n64);
    let lo = array
        .quantile_mut(n64(percentile_range.0 / 100.), &Linear)
        .ok()?;
    let hi = array
        .quantile_mut(n64(percentile_range.1 / 100.), &Linear)
        .ok()?;
    Some((lo.raw(), hi.raw()))
}
