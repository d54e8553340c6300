//! The fingerprint extraction worker pool.
//!
//! N OS threads pull claims straight from the repository: no job queue to
//! accumulate memory, no pre-loaded track list, and backpressure for free
//! because a worker only asks for work when it finished the last track.
//! Claiming is unthrottled; the processing semaphore bounds only how many
//! workers sit inside the load+analyze region at once, which is what
//! actually costs RAM.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use kindred_storage::db::schemas::fingerprint::FingerprintRow;
use kindred_storage::db::schemas::track::Track;
use log::{debug, error, info, warn};
use surrealdb::{Connection, Surreal};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolSettings;
use crate::extractor::{ExtractOutcome, Extractor};

/// Default bound on [`WorkerPool::stop`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Thread-safe pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers currently inside the load+analyze region.
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Completions that came from the database or sidecar tier.
    pub cached: usize,
    pub total_time: Duration,
}

#[derive(Debug, Clone)]
pub enum ProgressStatus {
    Complete,
    Failed(String),
}

/// Handed to the progress callback after each track finishes.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub track_id: i64,
    pub status: ProgressStatus,
    pub elapsed: Duration,
}

type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Auto-sized worker count: high-core hosts get 75 % of their cores, small
/// hosts get 4, clamped to [4, 32].
#[must_use]
pub fn default_worker_count() -> usize {
    let cores = thread::available_parallelism().map_or(8, std::num::NonZeroUsize::get);
    if cores >= 16 {
        (cores * 3 / 4).clamp(4, 32)
    } else {
        4
    }
}

/// A semaphore whose size can be adjusted while permits are out.
///
/// Growing adds permits immediately. Shrinking records a debt that is paid
/// as workers release: a released permit is forgotten instead of returned
/// until the debt clears.
pub(crate) struct ResizableSemaphore {
    inner: Arc<Semaphore>,
    size: AtomicUsize,
    shrink_debt: AtomicUsize,
}

impl ResizableSemaphore {
    pub(crate) fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            inner: Arc::new(Semaphore::new(size)),
            size: AtomicUsize::new(size),
            shrink_debt: AtomicUsize::new(0),
        }
    }

    /// Block the calling OS thread until a permit is available.
    pub(crate) fn acquire(&self, handle: &Handle) -> Option<OwnedSemaphorePermit> {
        handle.block_on(self.inner.clone().acquire_owned()).ok()
    }

    /// Return a permit, paying down any pending shrink first.
    pub(crate) fn release(&self, permit: Option<OwnedSemaphorePermit>) {
        let Some(permit) = permit else { return };
        loop {
            let debt = self.shrink_debt.load(Ordering::Acquire);
            if debt == 0 {
                drop(permit);
                return;
            }
            if self
                .shrink_debt
                .compare_exchange(debt, debt - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                permit.forget();
                return;
            }
        }
    }

    pub(crate) fn set_target(&self, target: usize) {
        let target = target.max(1);
        let current = self.size.swap(target, Ordering::AcqRel);
        if target > current {
            self.inner.add_permits(target - current);
        } else if target < current {
            self.shrink_debt
                .fetch_add(current - target, Ordering::AcqRel);
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }
}

struct PoolShared<C: Connection> {
    db: Surreal<C>,
    extractor: Arc<Extractor<C>>,
    handle: Handle,
    should_stop: AtomicBool,
    /// Desired number of live workers; workers above it retire themselves.
    target_workers: AtomicUsize,
    /// Number of currently live (or just-spawned) workers.
    alive_workers: AtomicUsize,
    semaphore: ResizableSemaphore,
    stats: Mutex<PoolStats>,
    progress: Mutex<Option<ProgressCallback>>,
}

/// The worker pool. `start` spawns the threads, `stop` drains them with a
/// bounded join; the resource monitor may retarget worker count and
/// semaphore size while it runs.
pub struct WorkerPool<C: Connection> {
    shared: Arc<PoolShared<C>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    next_worker_id: AtomicUsize,
    initial_workers: usize,
}

impl<C: Connection> WorkerPool<C> {
    #[must_use]
    pub fn new(
        db: Surreal<C>,
        extractor: Arc<Extractor<C>>,
        handle: Handle,
        settings: &PoolSettings,
    ) -> Self {
        let initial_workers = settings.num_workers.unwrap_or_else(default_worker_count);
        Self {
            shared: Arc::new(PoolShared {
                db,
                extractor,
                handle,
                should_stop: AtomicBool::new(false),
                target_workers: AtomicUsize::new(initial_workers),
                alive_workers: AtomicUsize::new(0),
                semaphore: ResizableSemaphore::new(settings.semaphore_size),
                stats: Mutex::new(PoolStats::default()),
                progress: Mutex::new(None),
            }),
            workers: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
            initial_workers,
        }
    }

    /// Install a progress callback. Panics inside it are caught and
    /// logged, never propagated into the worker.
    pub fn set_progress_callback(
        &self,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) {
        *lock(&self.shared.progress) = Some(Arc::new(callback));
    }

    /// Start the worker threads.
    pub fn start(&self) {
        info!("starting {} fingerprint extraction workers", self.initial_workers);
        for _ in 0..self.initial_workers {
            self.spawn_worker();
        }
        info!("all {} workers started", self.initial_workers);
    }

    /// Ask the workers to stop and join them, bounded by `timeout`.
    /// Returns `true` iff every worker exited in time.
    pub fn stop(&self, timeout: Duration) -> bool {
        info!("stopping fingerprint extraction workers");
        self.shared.should_stop.store(true, Ordering::Release);

        let deadline = Instant::now() + timeout;
        let mut workers = lock(&self.workers);
        for worker in workers.drain(..) {
            while !worker.is_finished() {
                if Instant::now() >= deadline {
                    warn!("worker shutdown timeout exceeded");
                    return false;
                }
                thread::sleep(Duration::from_millis(10));
            }
            if worker.join().is_err() {
                error!("a worker thread panicked");
            }
        }
        info!("all workers stopped. stats: {:?}", self.stats());
        true
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        *lock(&self.shared.stats)
    }

    /// Number of currently live workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.alive_workers.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn semaphore_size(&self) -> usize {
        self.shared.semaphore.size()
    }

    /// Scale the worker count: extra workers are spawned immediately,
    /// surplus ones retire at the top of their next iteration. Ignored
    /// once a stop was requested.
    pub fn set_worker_target(&self, target: usize) {
        if self.shared.should_stop.load(Ordering::Acquire) {
            return;
        }
        let target = target.max(1);
        self.shared.target_workers.store(target, Ordering::Release);
        while self.shared.alive_workers.load(Ordering::Acquire) < target {
            if self.shared.should_stop.load(Ordering::Acquire) {
                return;
            }
            self.spawn_worker();
        }
    }

    /// Resize the processing semaphore. Ignored once a stop was requested.
    pub fn set_semaphore_target(&self, target: usize) {
        if self.shared.should_stop.load(Ordering::Acquire) {
            return;
        }
        self.shared.semaphore.set_target(target);
    }

    fn spawn_worker(&self) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::AcqRel);
        let shared = Arc::clone(&self.shared);
        shared.alive_workers.fetch_add(1, Ordering::AcqRel);

        let spawned = thread::Builder::new()
            .name(format!("FingerprintWorker-{worker_id}"))
            .spawn(move || worker_loop(&shared, worker_id));
        match spawned {
            Ok(handle) => lock(&self.workers).push(handle),
            Err(e) => {
                error!("failed to spawn worker {worker_id}: {e}");
                self.shared.alive_workers.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

fn worker_loop<C: Connection>(shared: &PoolShared<C>, worker_id: usize) {
    info!("worker {worker_id} started");
    let mut retired = false;

    loop {
        if shared.should_stop.load(Ordering::Acquire) {
            break;
        }
        if try_retire(shared) {
            debug!("worker {worker_id} retiring (scaled down)");
            retired = true;
            break;
        }

        match shared
            .handle
            .block_on(FingerprintRow::claim_next_unfingerprinted_track(&shared.db))
        {
            Ok(Some(track)) => process_track(shared, &track, worker_id),
            Ok(None) => {
                // Either the library is drained or another worker won the
                // claim; only exit when nothing is actually left.
                match shared
                    .handle
                    .block_on(FingerprintRow::get_missing_fingerprints(&shared.db, Some(1)))
                {
                    Ok(remaining) if remaining.is_empty() => {
                        debug!("worker {worker_id}: no more unfingerprinted tracks");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("worker {worker_id} error checking for work: {e}");
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            Err(e) => {
                error!("worker {worker_id} error during claim: {e}");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    if !retired {
        shared.alive_workers.fetch_sub(1, Ordering::AcqRel);
    }
    info!("worker {worker_id} stopped");
}

/// Retire this worker if more workers are alive than targeted.
fn try_retire<C: Connection>(shared: &PoolShared<C>) -> bool {
    let target = shared.target_workers.load(Ordering::Acquire);
    loop {
        let alive = shared.alive_workers.load(Ordering::Acquire);
        if alive <= target {
            return false;
        }
        if shared
            .alive_workers
            .compare_exchange(alive, alive - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }
    }
}

fn process_track<C: Connection>(shared: &PoolShared<C>, track: &Track, worker_id: usize) {
    // Claiming stays unthrottled; only the expensive region is gated.
    let permit = shared.semaphore.acquire(&shared.handle);

    {
        let mut stats = lock(&shared.stats);
        stats.processing += 1;
    }
    let started = Instant::now();

    debug!(
        "worker {worker_id} extracting fingerprint for track {}",
        track.key()
    );
    let result = shared.extractor.extract_and_store(track.key(), &track.path);
    let elapsed = started.elapsed();

    let event = match result {
        Ok(extracted) => {
            let mut stats = lock(&shared.stats);
            stats.completed += 1;
            stats.total_time += elapsed;
            if extracted.outcome != ExtractOutcome::Computed {
                stats.cached += 1;
            }
            info!("fingerprint extracted for track {}", track.key());
            ProgressEvent {
                track_id: track.key(),
                status: ProgressStatus::Complete,
                elapsed,
            }
        }
        Err(e) => {
            error!(
                "error extracting fingerprint for track {}: {e}",
                track.key()
            );
            let mut stats = lock(&shared.stats);
            stats.failed += 1;
            ProgressEvent {
                track_id: track.key(),
                status: ProgressStatus::Failed(e.to_string()),
                elapsed,
            }
        }
    };

    {
        let mut stats = lock(&shared.stats);
        stats.processing = stats.processing.saturating_sub(1);
    }
    report_progress(shared, &event);
    shared.semaphore.release(permit);
}

fn report_progress<C: Connection>(shared: &PoolShared<C>, event: &ProgressEvent) {
    let callback = lock(&shared.progress).clone();
    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            error!("progress callback panicked for track {}", event.track_id);
        }
    }
}

/// Lock a mutex, recovering from poisoning (a panicked worker must not
/// wedge the whole pool).
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
