//! The engine facade: one constructed-once object wiring storage,
//! extraction, similarity, the graph and targets together. Call sites get
//! a shared reference instead of reaching for globals; tests build a
//! fresh one against an in-memory database.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use kindred_analysis::decoder::SymphoniaDecoder;
use kindred_storage::db::schemas::fingerprint::FingerprintRow;
use kindred_storage::db::schemas::graph::SimilarityEdge;
use kindred_storage::db::schemas::track::Track;
use kindred_storage::db::{init_database, init_test_database};
use log::{info, warn};
use surrealdb::engine::local::Db;
use surrealdb::Surreal;
use tokio::runtime::Handle;

use crate::config::Settings;
use crate::errors::CoreResult;
use crate::extractor::Extractor;
use crate::graph::{GraphStats, KnnGraphBuilder, DEFAULT_BATCH_SIZE};
use crate::monitor::ResourceMonitor;
use crate::pool::{PoolStats, ProgressEvent, WorkerPool};
use crate::similarity::{SimilarityEngine, SimilarityExplanation, SimilarityResult};
use crate::targets::{generate_targets, MasteringTarget};

/// The music library engine core.
pub struct Engine {
    db: Surreal<Db>,
    settings: Settings,
    handle: Handle,
    extractor: Arc<Extractor<Db>>,
    similarity: SimilarityEngine<Db>,
    graph: KnnGraphBuilder<Db>,
    pool: Mutex<Option<Arc<WorkerPool<Db>>>>,
    monitor: Mutex<Option<ResourceMonitor>>,
}

impl Engine {
    /// Open the on-disk database and bring the similarity system up
    /// (loading persisted normalizer stats, or fitting and saving them
    /// when the library is already big enough).
    ///
    /// Must be called from within a multi-threaded tokio runtime; the
    /// worker pool bridges onto it.
    ///
    /// # Errors
    ///
    /// Database and normalizer I/O errors.
    pub async fn open(settings: Settings) -> CoreResult<Self> {
        let db = init_database(&settings.db_path).await?;
        Self::with_database(db, settings).await
    }

    /// Open against an in-memory database (tests).
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn open_in_memory(settings: Settings) -> CoreResult<Self> {
        let db = init_test_database().await?;
        Self::with_database(db, settings).await
    }

    /// Build the engine around an already-initialized database.
    ///
    /// # Errors
    ///
    /// Normalizer fitting/persistence errors.
    pub async fn with_database(db: Surreal<Db>, settings: Settings) -> CoreResult<Self> {
        let handle = Handle::current();
        let extractor = Arc::new(Extractor::new(
            db.clone(),
            handle.clone(),
            Arc::new(SymphoniaDecoder::new()),
            &settings.extractor,
        ));

        let mut similarity = SimilarityEngine::new(db.clone(), settings.similarity.clone());
        let stats_path = &settings.normalizer_stats_path;
        if stats_path.exists() {
            if let Err(e) = similarity.load_normalizer(stats_path) {
                warn!(
                    "could not load normalizer stats from {}: {e}",
                    stats_path.display()
                );
            }
        }
        if !similarity.is_fitted() && similarity.fit().await? {
            if let Err(e) = similarity.save_normalizer(stats_path) {
                warn!("could not persist normalizer stats: {e}");
            }
        }

        Ok(Self {
            graph: KnnGraphBuilder::new(db.clone()),
            db,
            extractor,
            similarity,
            handle,
            settings,
            pool: Mutex::new(None),
            monitor: Mutex::new(None),
        })
    }

    /// Re-fit (and persist) the normalizer, e.g. after a large extraction
    /// pass changed the population.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub async fn refit_similarity(&mut self) -> CoreResult<bool> {
        let fitted = self.similarity.fit().await?;
        if fitted {
            if let Err(e) = self
                .similarity
                .save_normalizer(&self.settings.normalizer_stats_path)
            {
                warn!("could not persist normalizer stats: {e}");
            }
        }
        Ok(fitted)
    }

    /// The ingestion hook: a newly inserted track is immediately eligible
    /// for claiming.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub async fn insert_track(
        &self,
        track_id: i64,
        path: PathBuf,
        duration_secs: f64,
        sample_rate: u32,
    ) -> CoreResult<Option<Track>> {
        Ok(Track::create(&self.db, track_id, path, duration_secs, sample_rate).await?)
    }

    /// Start the extraction worker pool (and the resource monitor that
    /// retargets it). A no-op while a pool is already running.
    pub fn start_extraction(&self) {
        self.start_extraction_inner(None);
    }

    /// Like [`start_extraction`](Self::start_extraction), with a progress
    /// callback invoked after each track.
    pub fn start_extraction_with_progress(
        &self,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) {
        self.start_extraction_inner(Some(Box::new(callback)));
    }

    #[allow(clippy::type_complexity)]
    fn start_extraction_inner(
        &self,
        callback: Option<Box<dyn Fn(&ProgressEvent) + Send + Sync>>,
    ) {
        let mut pool_guard = lock(&self.pool);
        if pool_guard.is_some() {
            info!("extraction already running");
            return;
        }

        let pool = Arc::new(WorkerPool::new(
            self.db.clone(),
            Arc::clone(&self.extractor),
            self.handle.clone(),
            &self.settings.pool,
        ));
        if let Some(callback) = callback {
            pool.set_progress_callback(callback);
        }
        pool.start();

        let mut monitor = ResourceMonitor::new(self.settings.monitor)
            .on_worker_count_change({
                let pool = Arc::clone(&pool);
                move |target| pool.set_worker_target(target)
            })
            .on_semaphore_change({
                let pool = Arc::clone(&pool);
                move |target| pool.set_semaphore_target(target)
            });
        monitor.start();

        *pool_guard = Some(pool);
        *lock(&self.monitor) = Some(monitor);
    }

    /// Stop the monitor and drain the pool, bounded by the configured
    /// shutdown timeout. Returns `true` iff every worker joined in time.
    ///
    /// Blocking; call it off the async runtime (or via
    /// `tokio::task::block_in_place`).
    pub fn stop_extraction(&self) -> bool {
        if let Some(mut monitor) = lock(&self.monitor).take() {
            monitor.stop();
        }
        let Some(pool) = lock(&self.pool).take() else {
            return true;
        };
        pool.stop(Duration::from_secs(self.settings.pool.shutdown_timeout_secs))
    }

    /// Worker pool counters, when a pool is running.
    #[must_use]
    pub fn extraction_stats(&self) -> Option<PoolStats> {
        lock(&self.pool).as_ref().map(|pool| pool.stats())
    }

    /// The N most similar tracks to `track_id`.
    ///
    /// # Errors
    ///
    /// Unfitted normalizer or repository errors.
    pub async fn find_similar(
        &self,
        track_id: i64,
        n: usize,
        use_prefilter: bool,
    ) -> CoreResult<Vec<SimilarityResult>> {
        self.similarity.find_similar(track_id, n, use_prefilter).await
    }

    /// Why two tracks read as similar or different.
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
        self.similarity
            .similarity_explanation(track_id1, track_id2, top_n)
            .await
    }

    /// Build the full K-NN graph with `k` neighbors per track.
    ///
    /// # Errors
    ///
    /// Unfitted normalizer or repository errors.
    pub async fn build_graph(&self, k: usize) -> CoreResult<GraphStats> {
        self.graph
            .build_graph(&self.similarity, k, DEFAULT_BATCH_SIZE, true)
            .await
    }

    /// Rebuild the outgoing edges of specific tracks.
    ///
    /// # Errors
    ///
    /// Unfitted normalizer or repository errors.
    pub async fn update_graph(&self, track_ids: &[i64], k: usize) -> CoreResult<usize> {
        self.graph.update_graph(&self.similarity, track_ids, k).await
    }

    /// Pre-computed neighbors for one track, rank ascending.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub async fn get_neighbors(
        &self,
        track_id: i64,
        limit: Option<usize>,
    ) -> CoreResult<Vec<SimilarityEdge>> {
        self.graph.get_neighbors(track_id, limit).await
    }

    /// Remove all graph edges; returns how many there were.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub async fn clear_graph(&self) -> CoreResult<usize> {
        self.graph.clear_graph().await
    }

    /// Mastering targets for a fingerprinted track, `None` otherwise.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub async fn generate_targets(&self, track_id: i64) -> CoreResult<Option<MasteringTarget>> {
        Ok(FingerprintRow::get_by_track_id(&self.db, track_id)
            .await?
            .filter(FingerprintRow::is_complete)
            .map(|row| generate_targets(&row.fingerprint())))
    }

    /// The underlying database handle (for ingestion layers built on
    /// top).
    #[must_use]
    pub const fn database(&self) -> &Surreal<Db> {
        &self.db
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_storage::test_utils::arb_fingerprint;
    use pretty_assertions::assert_eq;

    /// Fingerprints jittered around one center, so the pre-filter used by
    /// the graph builder never empties the candidate set.
    fn clustered_fingerprint(id: i64) -> kindred_analysis::Fingerprint {
        let mut fingerprint = arb_fingerprint(0);
        let jitter = id as f64 / 10.;
        fingerprint.lufs += jitter * 0.1;
        fingerprint.crest_db += jitter * 0.05;
        fingerprint.tempo_bpm += jitter * 0.5;
        fingerprint.spectral_rolloff = (fingerprint.spectral_rolloff + jitter * 0.01).clamp(0., 1.);
        fingerprint
    }

    async fn engine_with_fingerprints(count: usize) -> anyhow::Result<Engine> {
        let db = init_test_database().await?;
        for id in 1..=count as i64 {
            Track::create(
                &db,
                id,
                PathBuf::from(format!("/music/{id}.flac")),
                120.,
                44_100,
            )
            .await?;
            FingerprintRow::upsert(&db, id, &clustered_fingerprint(id)).await?;
        }
        let dir = tempfile::tempdir()?;
        let settings = Settings {
            normalizer_stats_path: dir.path().join("stats.json"),
            ..Settings::default()
        };
        Ok(Engine::with_database(db, settings).await?)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_fits_when_library_is_big_enough() -> anyhow::Result<()> {
        let engine = engine_with_fingerprints(15).await?;
        let results = engine.find_similar(1, 3, false).await?;
        assert_eq!(results.len(), 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_track_makes_it_claimable() -> anyhow::Result<()> {
        let engine = engine_with_fingerprints(0).await?;
        engine
            .insert_track(1, PathBuf::from("/music/new.flac"), 200., 48_000)
            .await?;

        let missing =
            FingerprintRow::get_missing_fingerprints(engine.database(), None).await?;
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].key(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_graph_round_trip_through_facade() -> anyhow::Result<()> {
        let engine = engine_with_fingerprints(12).await?;

        let stats = engine.build_graph(3).await?;
        assert_eq!(stats.total_tracks, 12);

        let neighbors = engine.get_neighbors(1, Some(2)).await?;
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].rank, 1);

        engine.update_graph(&[1], 3).await?;
        assert_eq!(engine.get_neighbors(1, None).await?.len(), 3);

        let cleared = engine.clear_graph().await?;
        assert_eq!(cleared, stats.total_edges);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_targets_requires_fingerprint() -> anyhow::Result<()> {
        let engine = engine_with_fingerprints(12).await?;

        assert!(engine.generate_targets(1).await?.is_some());
        assert!(engine.generate_targets(999).await?.is_none());

        // Determinism through the facade.
        let a = engine.generate_targets(1).await?.unwrap();
        let b = engine.generate_targets(1).await?.unwrap();
        assert_eq!(a, b);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_normalizer_stats_persist_across_engines() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        for id in 1..=12i64 {
            Track::create(&db, id, PathBuf::from(format!("/m/{id}.flac")), 60., 44_100)
                .await?;
            FingerprintRow::upsert(&db, id, &arb_fingerprint(id as u64)).await?;
        }

        let dir = tempfile::tempdir()?;
        let settings = Settings {
            normalizer_stats_path: dir.path().join("stats.json"),
            ..Settings::default()
        };
        let _first = Engine::with_database(db.clone(), settings.clone()).await?;
        assert!(settings.normalizer_stats_path.exists());

        // A second engine loads the persisted stats instead of refitting.
        let second = Engine::with_database(db, settings).await?;
        let results = second.find_similar(1, 3, false).await?;
        assert_eq!(results.len(), 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_extraction_without_start_is_fine() -> anyhow::Result<()> {
        let engine = engine_with_fingerprints(0).await?;
        assert!(engine.stop_extraction());
        assert!(engine.extraction_stats().is_none());
        Ok(())
    }
}
