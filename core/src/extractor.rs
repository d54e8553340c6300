//! Fingerprint extraction with a three-tier cache hierarchy.
//!
//! Cheapest wins: a completed database row, then a valid `.25d` sidecar,
//! then the real thing (decode + analyze). Whatever tier produced the
//! descriptor, the database and sidecar both end up holding it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kindred_analysis::decoder::Decoder;
use kindred_analysis::{Fingerprint, FingerprintAnalyzer, FINGERPRINT_VERSION};
use kindred_storage::db::schemas::fingerprint::FingerprintRow;
use kindred_storage::sidecar::{SidecarPayload, SidecarStore};
use log::{debug, info, warn};
use surrealdb::{Connection, Surreal};
use tokio::runtime::Handle;

use crate::config::ExtractorSettings;
use crate::errors::{CoreResult, Error};

/// Which tier produced the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// A completed row already existed; nothing was touched.
    CachedInDb,
    /// Loaded from a valid sidecar and upserted into the database.
    FromSidecar,
    /// Decoded and analyzed from the audio itself.
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractResult {
    pub fingerprint: Fingerprint,
    pub outcome: ExtractOutcome,
}

/// Counters for a batch driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cached: usize,
}

/// Computes and persists fingerprints.
///
/// The public API is synchronous (it is called from worker OS threads);
/// repository access bridges onto the provided tokio [`Handle`]. Do not
/// call it from inside an async task.
pub struct Extractor<C: Connection> {
    db: Surreal<C>,
    handle: Handle,
    decoder: Arc<dyn Decoder + Send + Sync>,
    analyzer: FingerprintAnalyzer,
    sidecar: SidecarStore,
    use_sidecar: bool,
}

impl<C: Connection> Extractor<C> {
    #[must_use]
    pub fn new(
        db: Surreal<C>,
        handle: Handle,
        decoder: Arc<dyn Decoder + Send + Sync>,
        settings: &ExtractorSettings,
    ) -> Self {
        Self {
            db,
            handle,
            decoder,
            analyzer: FingerprintAnalyzer::new(settings.analysis_strategy()),
            sidecar: SidecarStore::new(),
            use_sidecar: settings.use_sidecar_files,
        }
    }

    /// Produce a fingerprint for the track and make sure both the
    /// database and (when enabled) the sidecar hold it.
    ///
    /// # Errors
    ///
    /// Loader and analyzer failures are terminal for this track; storage
    /// failures may be retried by the caller.
    pub fn extract_and_store(&self, track_id: i64, path: &Path) -> CoreResult<ExtractResult> {
        // Tier 1: a completed, current-version row in the database.
        if let Some(row) = self
            .handle
            .block_on(FingerprintRow::get_by_track_id(&self.db, track_id))?
        {
            if row.is_complete() && row.version >= FINGERPRINT_VERSION {
                debug!("fingerprint for track {track_id} already in database");
                return Ok(ExtractResult {
                    fingerprint: row.fingerprint(),
                    outcome: ExtractOutcome::CachedInDb,
                });
            }
            if row.is_complete() {
                debug!(
                    "fingerprint for track {track_id} is version {} (current {FINGERPRINT_VERSION}), re-extracting",
                    row.version
                );
            }
        }

        // Tier 2: a valid sidecar next to the audio file.
        if self.use_sidecar && self.sidecar.is_valid(path) {
            if let Some(fingerprint) = self.sidecar.get_fingerprint(path) {
                if fingerprint.is_finite() {
                    info!("loaded fingerprint from sidecar for track {track_id}");
                    self.upsert(track_id, &fingerprint)?;
                    return Ok(ExtractResult {
                        fingerprint,
                        outcome: ExtractOutcome::FromSidecar,
                    });
                }
            }
            warn!("invalid fingerprint in sidecar for track {track_id}, re-analyzing");
        }

        // Tier 3: decode and analyze. The PCM buffer dies at the end of
        // this block, before any storage write.
        let fingerprint = {
            debug!("loading audio for track {track_id}: {}", path.display());
            let audio = self.decoder.decode(path)?;
            self.analyzer.analyze(&audio)?
        };

        self.upsert(track_id, &fingerprint)?;
        if self.use_sidecar {
            // A sidecar failure only costs the next scan its fast path.
            if let Err(e) = self
                .sidecar
                .write(path, &SidecarPayload::with_fingerprint(fingerprint))
            {
                warn!("failed to write sidecar for track {track_id}: {e}");
            }
        }

        info!("fingerprint extracted and stored for track {track_id}");
        Ok(ExtractResult {
            fingerprint,
            outcome: ExtractOutcome::Computed,
        })
    }

    /// Extract fingerprints for many tracks, skipping ones that already
    /// have a row and stopping after `max_failures` consecutive failures.
    pub fn extract_batch(&self, pairs: &[(i64, PathBuf)], max_failures: usize) -> BatchStats {
        let mut stats = BatchStats::default();
        let mut consecutive_failures = 0usize;

        for (track_id, path) in pairs {
            match self
                .handle
                .block_on(FingerprintRow::exists(&self.db, *track_id))
            {
                Ok(true) => {
                    debug!("fingerprint already exists for track {track_id}, skipping");
                    stats.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("could not check fingerprint presence for track {track_id}: {e}");
                }
            }

            match self.extract_and_store(*track_id, path) {
                Ok(result) => {
                    stats.success += 1;
                    if result.outcome != ExtractOutcome::Computed {
                        stats.cached += 1;
                    }
                    consecutive_failures = 0;
                }
                Err(e) => {
                    log::error!("error extracting fingerprint for track {track_id}: {e}");
                    stats.failed += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= max_failures {
                        warn!(
                            "too many consecutive failures ({max_failures}), stopping batch extraction"
                        );
                        break;
                    }
                }
            }
        }

        info!("batch fingerprint extraction complete: {stats:?}");
        stats
    }

    /// Extract fingerprints for every track that has none yet.
    pub fn extract_missing_fingerprints(&self, limit: Option<usize>) -> BatchStats {
        let tracks = match self
            .handle
            .block_on(FingerprintRow::get_missing_fingerprints(&self.db, limit))
        {
            Ok(tracks) => tracks,
            Err(e) => {
                log::error!("could not list tracks missing fingerprints: {e}");
                return BatchStats::default();
            }
        };
        if tracks.is_empty() {
            info!("no tracks missing fingerprints");
            return BatchStats::default();
        }
        info!("found {} tracks without fingerprints", tracks.len());

        let pairs: Vec<(i64, PathBuf)> = tracks
            .into_iter()
            .map(|track| (track.key(), track.path.clone()))
            .collect();
        self.extract_batch(&pairs, 10)
    }

    fn upsert(&self, track_id: i64, fingerprint: &Fingerprint) -> CoreResult<()> {
        self.handle
            .block_on(FingerprintRow::upsert(&self.db, track_id, fingerprint))?
            .ok_or(Error::FingerprintNotStored(track_id))?;
        Ok(())
    }
}
