//! Engine configuration.
//!
//! Every tunable named in the component contracts lives here with its
//! documented default; a TOML file and `KINDRED_*` environment variables
//! can override any of them.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use kindred_analysis::{AnalysisStrategy, DEFAULT_SAMPLING_INTERVAL_SECS};
use serde::Deserialize;

use crate::errors::CoreResult;
use crate::monitor::ResourceLimits;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Where the embedded database lives.
    pub db_path: PathBuf,
    /// Where the fitted normalizer statistics are persisted.
    pub normalizer_stats_path: PathBuf,
    pub extractor: ExtractorSettings,
    pub pool: PoolSettings,
    pub monitor: ResourceLimits,
    pub similarity: SimilaritySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("kindred_db"),
            normalizer_stats_path: PathBuf::from("normalizer_stats.json"),
            extractor: ExtractorSettings::default(),
            pool: PoolSettings::default(),
            monitor: ResourceLimits::default(),
            similarity: SimilaritySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file with `KINDRED_*`
    /// environment overrides (e.g. `KINDRED_POOL__NUM_WORKERS=8`).
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be parsed, or a value cannot
    /// be deserialized.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("KINDRED").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractorSettings {
    /// "sampling" (default) or "full-track".
    pub strategy: StrategyKind,
    /// Stride between sampling window starts, in seconds.
    pub sampling_interval_secs: f64,
    /// Whether `.25d` sidecar files are read and written.
    pub use_sidecar_files: bool,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Sampling,
            sampling_interval_secs: DEFAULT_SAMPLING_INTERVAL_SECS,
            use_sidecar_files: true,
        }
    }
}

impl ExtractorSettings {
    #[must_use]
    pub const fn analysis_strategy(&self) -> AnalysisStrategy {
        match self.strategy {
            StrategyKind::FullTrack => AnalysisStrategy::FullTrack,
            StrategyKind::Sampling => AnalysisStrategy::Sampling {
                interval_secs: self.sampling_interval_secs,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    FullTrack,
    Sampling,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    /// Worker thread count; `None` auto-sizes from the CPU count.
    pub num_workers: Option<usize>,
    /// Initial size of the processing semaphore (concurrent load+analyze).
    pub semaphore_size: usize,
    /// Bound on `stop()` joining the workers.
    pub shutdown_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            num_workers: None,
            semaphore_size: 16,
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimilaritySettings {
    /// Percentile-based min/max during normalizer fitting.
    pub use_robust_normalization: bool,
    /// Percentiles used when robust normalization is on.
    pub percentile_range: (f64, f64),
    /// Minimum fingerprints required to fit the normalizer.
    pub min_samples: usize,
    pub prefilter: PrefilterTolerances,
    /// Pre-filter caps candidates at `n * prefilter_factor`.
    pub prefilter_factor: usize,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        Self {
            use_robust_normalization: true,
            percentile_range: (5., 95.),
            min_samples: 10,
            prefilter: PrefilterTolerances::default(),
            prefilter_factor: 10,
        }
    }
}

/// Pre-filter tolerances in original (non-normalized) scale.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrefilterTolerances {
    pub lufs: f64,
    pub crest_db: f64,
    pub bass_pct: f64,
    pub tempo_bpm: f64,
}

impl Default for PrefilterTolerances {
    fn default() -> Self {
        Self {
            lufs: 3.,
            crest_db: 2.,
            bass_pct: 8.,
            tempo_bpm: 15.,
        }
    }
}
