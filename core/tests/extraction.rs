//! End-to-end extraction scenarios against real (synthesized) audio
//! files: the three-tier cache, sidecar invalidation, and the concurrent
//! worker pool draining a library without duplicate work.

use std::f32::consts::TAU;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kindred_analysis::decoder::{DecodedAudio, Decoder, SymphoniaDecoder};
use kindred_analysis::errors::AnalysisResult;
use kindred_core::config::{ExtractorSettings, PoolSettings, Settings};
use kindred_core::extractor::{ExtractOutcome, Extractor};
use kindred_core::pool::WorkerPool;
use kindred_core::Engine;
use kindred_storage::db::schemas::fingerprint::FingerprintRow;
use kindred_storage::db::schemas::track::Track;
use kindred_storage::db::init_test_database;
use kindred_storage::sidecar::SidecarStore;
use tokio::runtime::Handle;

/// Write a 16-bit PCM WAV file.
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * u32::from(channels) * 2;

    let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        let value = (sample.clamp(-1., 1.) * f32::from(i16::MAX)) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
}

/// A mono tone with a touch of amplitude modulation so tracks differ.
fn tone_wav(path: &Path, freq: f32, secs: f32) {
    let sample_rate = 22_050u32;
    let n = (secs * sample_rate as f32) as usize;
    let samples: Vec<f32> = (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (TAU * freq * t).sin() * 0.5 * (1. + 0.2 * (TAU * 2. * t).sin())
        })
        .collect();
    write_wav(path, &samples, sample_rate, 1);
}

/// Wraps the real decoder and counts invocations, so tests can prove the
/// cache tiers skipped it.
struct CountingDecoder {
    inner: SymphoniaDecoder,
    calls: AtomicUsize,
}

impl CountingDecoder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SymphoniaDecoder::new(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Decoder for CountingDecoder {
    fn decode(&self, path: &Path) -> AnalysisResult<DecodedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(path)
    }
}

fn test_extractor(
    db: surrealdb::Surreal<surrealdb::engine::local::Db>,
    decoder: Arc<CountingDecoder>,
) -> Arc<Extractor<surrealdb::engine::local::Db>> {
    Arc::new(Extractor::new(
        db,
        Handle::current(),
        decoder,
        &ExtractorSettings::default(),
    ))
}

/// Scenario: fresh extract computes and persists everywhere; a second
/// extract is a database cache hit, never touching the decoder, with a
/// bit-exact fingerprint.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fresh_extract_then_cache_hit() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let audio = dir.path().join("t.wav");
    tone_wav(&audio, 440., 2.);

    let db = init_test_database().await?;
    Track::create(&db, 42, audio.clone(), 2., 22_050).await?;

    let decoder = CountingDecoder::new();
    let extractor = test_extractor(db.clone(), Arc::clone(&decoder));

    let first = {
        let extractor = Arc::clone(&extractor);
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor.extract_and_store(42, &audio)).await??
    };
    assert_eq!(first.outcome, ExtractOutcome::Computed);
    assert!(first.fingerprint.is_finite());
    assert_eq!(decoder.calls(), 1);

    // Persisted on both sides.
    let row = FingerprintRow::get_by_track_id(&db, 42).await?.unwrap();
    assert!(row.is_complete());
    assert_eq!(row.fingerprint(), first.fingerprint);
    assert!(SidecarStore::new().is_valid(&audio));

    // Second call: database tier, decoder untouched, bit-exact result.
    let second = {
        let extractor = Arc::clone(&extractor);
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor.extract_and_store(42, &audio)).await??
    };
    assert_eq!(second.outcome, ExtractOutcome::CachedInDb);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(decoder.calls(), 1);

    Ok(())
}

/// Scenario: a valid sidecar satisfies a fresh database without decoding.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sidecar_satisfies_fresh_database() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let audio = dir.path().join("t.wav");
    tone_wav(&audio, 330., 2.);

    // First pass on one database writes the sidecar.
    let db1 = init_test_database().await?;
    Track::create(&db1, 1, audio.clone(), 2., 22_050).await?;
    let decoder1 = CountingDecoder::new();
    let extractor1 = test_extractor(db1, Arc::clone(&decoder1));
    let first = {
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor1.extract_and_store(1, &audio)).await??
    };
    assert_eq!(decoder1.calls(), 1);

    // Second pass on a brand-new database: the sidecar is the fast path.
    let db2 = init_test_database().await?;
    Track::create(&db2, 1, audio.clone(), 2., 22_050).await?;
    let decoder2 = CountingDecoder::new();
    let extractor2 = test_extractor(db2.clone(), Arc::clone(&decoder2));
    let second = {
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor2.extract_and_store(1, &audio)).await??
    };
    assert_eq!(second.outcome, ExtractOutcome::FromSidecar);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(decoder2.calls(), 0);
    assert!(FingerprintRow::get_by_track_id(&db2, 1).await?.is_some());

    Ok(())
}

/// Scenario: touching the audio file's mtime invalidates the sidecar; a
/// re-extraction pass decodes again, rewrites the sidecar with the new
/// snapshot, and (same bytes) reproduces the identical fingerprint.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sidecar_invalidation_by_mtime() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let audio = dir.path().join("t.wav");
    tone_wav(&audio, 550., 2.);

    let db = init_test_database().await?;
    Track::create(&db, 42, audio.clone(), 2., 22_050).await?;

    let decoder = CountingDecoder::new();
    let extractor = test_extractor(db.clone(), Arc::clone(&decoder));
    let first = {
        let extractor = Arc::clone(&extractor);
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor.extract_and_store(42, &audio)).await??
    };

    // Bump the file's mtime without changing its bytes.
    let file = std::fs::File::options().write(true).open(&audio)?;
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(3600))?;
    drop(file);

    let sidecar = SidecarStore::new();
    assert!(!sidecar.is_valid(&audio));

    // Force a re-extraction pass for this track.
    FingerprintRow::delete(&db, 42).await?;
    let second = {
        let extractor = Arc::clone(&extractor);
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor.extract_and_store(42, &audio)).await??
    };
    assert_eq!(second.outcome, ExtractOutcome::Computed);
    assert_eq!(decoder.calls(), 2);
    assert_eq!(second.fingerprint, first.fingerprint);
    // The sidecar was re-written against the new mtime.
    assert!(sidecar.is_valid(&audio));

    Ok(())
}

/// Extraction is idempotent: a second pass leaves database and sidecar
/// content bit-exactly unchanged.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn extraction_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let audio = dir.path().join("t.wav");
    tone_wav(&audio, 660., 2.);

    let db = init_test_database().await?;
    Track::create(&db, 7, audio.clone(), 2., 22_050).await?;
    let extractor = test_extractor(db.clone(), CountingDecoder::new());

    for _ in 0..2 {
        let extractor = Arc::clone(&extractor);
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor.extract_and_store(7, &audio)).await??;
    }

    let row_after_first = FingerprintRow::get_by_track_id(&db, 7).await?.unwrap();
    let sidecar_bytes_first = std::fs::read(SidecarStore::new().path_for(&audio))?;

    let third = {
        let extractor = Arc::clone(&extractor);
        let audio = audio.clone();
        tokio::task::spawn_blocking(move || extractor.extract_and_store(7, &audio)).await??
    };
    assert_eq!(third.outcome, ExtractOutcome::CachedInDb);
    assert_eq!(
        FingerprintRow::get_by_track_id(&db, 7).await?.unwrap(),
        row_after_first
    );
    assert_eq!(
        std::fs::read(SidecarStore::new().path_for(&audio))?,
        sidecar_bytes_first
    );

    Ok(())
}

/// Scenario: many workers drain a library concurrently. Every track ends
/// up with exactly one completed fingerprint, nothing fails, and the
/// completion counters account for every track exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claim_drains_without_duplicates() -> anyhow::Result<()> {
    const TRACKS: usize = 24;
    const WORKERS: usize = 8;

    let dir = tempfile::tempdir()?;
    let db = init_test_database().await?;
    for id in 1..=TRACKS as i64 {
        let audio = dir.path().join(format!("{id}.wav"));
        tone_wav(&audio, 200. + id as f32 * 35., 1.);
        Track::create(&db, id, audio, 1., 22_050).await?;
    }

    let extractor = test_extractor(db.clone(), CountingDecoder::new());
    let pool = Arc::new(WorkerPool::new(
        db.clone(),
        extractor,
        Handle::current(),
        &PoolSettings {
            num_workers: Some(WORKERS),
            semaphore_size: 4,
            shutdown_timeout_secs: 30,
        },
    ));

    let progressed = Arc::new(AtomicUsize::new(0));
    {
        let progressed = Arc::clone(&progressed);
        pool.set_progress_callback(move |_event| {
            progressed.fetch_add(1, Ordering::SeqCst);
        });
    }

    pool.start();

    // Wait for the drain: no missing tracks and all workers idle.
    let deadline = std::time::Instant::now() + Duration::from_secs(120);
    loop {
        let missing = FingerprintRow::get_missing_fingerprints(&db, Some(1)).await?;
        let stats = pool.stats();
        if missing.is_empty() && stats.completed + stats.failed >= TRACKS {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "pool did not drain in time: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let stopped = {
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || pool.stop(Duration::from_secs(30))).await?
    };
    assert!(stopped, "workers did not stop within the timeout");

    let stats = pool.stats();
    assert_eq!(stats.completed, TRACKS);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(progressed.load(Ordering::SeqCst), TRACKS);

    // Exactly one completed row per track.
    assert_eq!(FingerprintRow::count(&db).await?, TRACKS);
    for id in 1..=TRACKS as i64 {
        let row = FingerprintRow::get_by_track_id(&db, id).await?.unwrap();
        assert!(row.is_complete(), "track {id} left pending");
        assert!(row.fingerprint().is_finite());
        let sum: f64 = row.fingerprint().frequency_percentages().iter().sum();
        assert!((sum - 100.).abs() < 0.5, "track {id} frequency sum {sum}");
    }

    Ok(())
}

/// The whole engine surface end to end: ingest, extract via the pool,
/// refit, query similarity, build the graph, derive targets.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_end_to_end() -> anyhow::Result<()> {
    const TRACKS: usize = 12;

    let dir = tempfile::tempdir()?;
    let settings = Settings {
        normalizer_stats_path: dir.path().join("stats.json"),
        pool: PoolSettings {
            num_workers: Some(4),
            ..PoolSettings::default()
        },
        ..Settings::default()
    };
    let mut engine = Engine::open_in_memory(settings).await?;

    // Frequencies close together so the coarse pre-filter used by the
    // graph builder keeps every track in every candidate set.
    for id in 1..=TRACKS as i64 {
        let audio = dir.path().join(format!("{id}.wav"));
        tone_wav(&audio, 150. + id as f32 * 6., 1.);
        engine.insert_track(id, audio, 1., 22_050).await?;
    }

    engine.start_extraction();
    let deadline = std::time::Instant::now() + Duration::from_secs(120);
    loop {
        let stats = engine.extraction_stats().unwrap();
        if stats.completed + stats.failed >= TRACKS {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "stuck: {stats:?}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let stopped = tokio::task::block_in_place(|| engine.stop_extraction());
    assert!(stopped);

    assert!(engine.refit_similarity().await?);

    let results = engine.find_similar(1, 3, false).await?;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.track_id != 1));

    let explanation = engine
        .similarity_explanation(1, results[0].track_id, 5)
        .await?
        .unwrap();
    assert_eq!(explanation.top_differences.len(), 5);

    let graph_stats = engine.build_graph(3).await?;
    assert_eq!(graph_stats.total_tracks, TRACKS);
    let neighbors = engine.get_neighbors(1, None).await?;
    assert!(!neighbors.is_empty());
    assert_eq!(neighbors[0].rank, 1);

    let targets = engine.generate_targets(1).await?.unwrap();
    assert_eq!(targets.target_lufs, -14.);
    assert!(targets.target_crest_db >= 10.);

    Ok(())
}

/// Failures are per-track, not fatal: a missing file marks one track
/// failed while the rest of the library still drains.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_file_fails_only_its_track() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = init_test_database().await?;

    for id in 1..=3i64 {
        let audio = dir.path().join(format!("{id}.wav"));
        tone_wav(&audio, 300. + id as f32 * 50., 1.);
        Track::create(&db, id, audio, 1., 22_050).await?;
    }
    Track::create(&db, 4, PathBuf::from(dir.path().join("gone.wav")), 1., 22_050).await?;

    let extractor = test_extractor(db.clone(), CountingDecoder::new());
    let pool = Arc::new(WorkerPool::new(
        db.clone(),
        extractor,
        Handle::current(),
        &PoolSettings {
            num_workers: Some(2),
            semaphore_size: 2,
            shutdown_timeout_secs: 30,
        },
    ));
    pool.start();

    let deadline = std::time::Instant::now() + Duration::from_secs(60);
    loop {
        let stats = pool.stats();
        if stats.completed + stats.failed >= 4 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "stuck: {stats:?}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let stopped = {
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || pool.stop(Duration::from_secs(30))).await?
    };
    assert!(stopped);

    let stats = pool.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 1);

    // The failed track keeps its claim placeholder; the others completed.
    let row = FingerprintRow::get_by_track_id(&db, 4).await?.unwrap();
    assert!(!row.is_complete());
    Ok(())
}
