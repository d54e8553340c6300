//! Adaptive resource monitor.
//!
//! Samples system memory on a background thread and advises the worker
//! pool: plenty of headroom means one more worker, pressure means one
//! fewer. The pool owns the policy and is free to ignore the advice (it
//! does, during shutdown).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use serde::Deserialize;
use sysinfo::System;

/// Scaling bounds and thresholds.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceLimits {
    pub min_workers: usize,
    pub max_workers: usize,
    pub min_semaphore: usize,
    pub max_semaphore: usize,
    pub check_interval_secs: f64,
    /// Memory % below which we scale up.
    pub scale_up_threshold: f64,
    /// Memory % above which we scale down.
    pub scale_down_threshold: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            min_workers: 4,
            max_workers: 32,
            min_semaphore: 2,
            max_semaphore: 16,
            check_interval_secs: 2.,
            scale_up_threshold: 50.,
            scale_down_threshold: 80.,
        }
    }
}

/// Running statistics of the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonitorStats {
    pub samples_collected: u64,
    pub avg_memory_percent: f64,
    pub max_memory_percent: f64,
    pub scale_ups: u64,
    pub scale_downs: u64,
}

type AdviceCallback = Arc<dyn Fn(usize) + Send + Sync>;
type MemorySource = Arc<dyn Fn() -> f64 + Send + Sync>;

struct MonitorShared {
    stopping: Mutex<bool>,
    wakeup: Condvar,
    state: Mutex<MonitorState>,
}

struct MonitorState {
    stats: MonitorStats,
    current_workers: usize,
    current_semaphore: usize,
}

pub struct ResourceMonitor {
    limits: ResourceLimits,
    shared: Arc<MonitorShared>,
    memory_source: MemorySource,
    on_worker_count_change: Option<AdviceCallback>,
    on_semaphore_change: Option<AdviceCallback>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ResourceMonitor {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                stopping: Mutex::new(false),
                wakeup: Condvar::new(),
                state: Mutex::new(MonitorState {
                    stats: MonitorStats::default(),
                    current_workers: limits.min_workers,
                    // Start conservative; scale up as samples come in.
                    current_semaphore: limits.min_semaphore.max(4).min(limits.max_semaphore),
                }),
            }),
            limits,
            memory_source: Arc::new(system_memory_percent),
            on_worker_count_change: None,
            on_semaphore_change: None,
            thread: None,
        }
    }

    /// Callback invoked with the new target worker count.
    #[must_use]
    pub fn on_worker_count_change(
        mut self,
        callback: impl Fn(usize) + Send + Sync + 'static,
    ) -> Self {
        self.on_worker_count_change = Some(Arc::new(callback));
        self
    }

    /// Callback invoked with the new target semaphore size.
    #[must_use]
    pub fn on_semaphore_change(
        mut self,
        callback: impl Fn(usize) + Send + Sync + 'static,
    ) -> Self {
        self.on_semaphore_change = Some(Arc::new(callback));
        self
    }

    /// Override where memory readings come from (tests).
    #[must_use]
    pub fn with_memory_source(
        mut self,
        source: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.memory_source = Arc::new(source);
        self
    }

    /// Start sampling in a background thread. A second call is a no-op.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        *lock(&self.shared.stopping) = false;

        let shared = Arc::clone(&self.shared);
        let limits = self.limits;
        let memory_source = Arc::clone(&self.memory_source);
        let worker_cb = self.on_worker_count_change.clone();
        let semaphore_cb = self.on_semaphore_change.clone();

        let handle = thread::Builder::new()
            .name("ResourceMonitor".into())
            .spawn(move || {
                monitor_loop(&shared, &limits, &memory_source, worker_cb.as_ref(), semaphore_cb.as_ref());
            });
        match handle {
            Ok(handle) => {
                self.thread = Some(handle);
                info!("adaptive resource monitor started");
            }
            Err(e) => error!("failed to start resource monitor: {e}"),
        }
    }

    /// Stop the monitor thread and join it.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        *lock(&self.shared.stopping) = true;
        self.shared.wakeup.notify_all();
        if handle.join().is_err() {
            error!("resource monitor thread panicked");
        } else {
            info!("adaptive resource monitor stopped");
        }
    }

    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        lock(&self.shared.state).stats
    }

    #[must_use]
    pub fn current_worker_count(&self) -> usize {
        lock(&self.shared.state).current_workers
    }

    #[must_use]
    pub fn current_semaphore_size(&self) -> usize {
        lock(&self.shared.state).current_semaphore
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn monitor_loop(
    shared: &MonitorShared,
    limits: &ResourceLimits,
    memory_source: &MemorySource,
    worker_cb: Option<&AdviceCallback>,
    semaphore_cb: Option<&AdviceCallback>,
) {
    let interval = Duration::from_secs_f64(limits.check_interval_secs.max(0.01));
    loop {
        {
            // Interruptible sleep: stop() notifies the condvar.
            let guard = lock(&shared.stopping);
            if *guard {
                return;
            }
            let (guard, _) = shared
                .wakeup
                .wait_timeout(guard, interval)
                .unwrap_or_else(PoisonError::into_inner);
            if *guard {
                return;
            }
        }
        check_and_adjust(shared, limits, memory_source, worker_cb, semaphore_cb);
    }
}

fn check_and_adjust(
    shared: &MonitorShared,
    limits: &ResourceLimits,
    memory_source: &MemorySource,
    worker_cb: Option<&AdviceCallback>,
    semaphore_cb: Option<&AdviceCallback>,
) {
    let memory_percent = memory_source();

    let mut state = lock(&shared.state);

    state.stats.samples_collected += 1;
    let n = state.stats.samples_collected as f64;
    state.stats.avg_memory_percent =
        (state.stats.avg_memory_percent * (n - 1.) + memory_percent) / n;
    state.stats.max_memory_percent = state.stats.max_memory_percent.max(memory_percent);

    // Workers: one step at a time, with a dead zone between the
    // thresholds so we do not flap.
    let optimal_workers = if memory_percent < limits.scale_up_threshold {
        (state.current_workers + 1).min(limits.max_workers)
    } else if memory_percent > limits.scale_down_threshold {
        state.current_workers.saturating_sub(1).max(limits.min_workers)
    } else {
        state.current_workers
    };

    if optimal_workers != state.current_workers {
        let old = state.current_workers;
        state.current_workers = optimal_workers;
        if optimal_workers > old {
            state.stats.scale_ups += 1;
        } else {
            state.stats.scale_downs += 1;
        }
        invoke(worker_cb, optimal_workers, "worker count");
        info!(
            "adaptive scaling: {old} -> {optimal_workers} workers (RAM: {memory_percent:.1}%)"
        );
    }

    // The semaphore follows the same policy with its own bounds.
    let optimal_semaphore = if memory_percent < limits.scale_up_threshold {
        (state.current_semaphore + 1).min(limits.max_semaphore)
    } else if memory_percent > limits.scale_down_threshold {
        state
            .current_semaphore
            .saturating_sub(1)
            .max(limits.min_semaphore)
    } else {
        state.current_semaphore
    };

    if optimal_semaphore != state.current_semaphore {
        let old = state.current_semaphore;
        state.current_semaphore = optimal_semaphore;
        invoke(semaphore_cb, optimal_semaphore, "semaphore");
        debug!(
            "adaptive semaphore: {old} -> {optimal_semaphore} (RAM: {memory_percent:.1}%)"
        );
    }
}

/// Callbacks are isolated: a panic in one is logged and swallowed.
fn invoke(callback: Option<&AdviceCallback>, value: usize, what: &str) {
    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
            error!("error in {what} callback");
        }
    }
}

fn system_memory_percent() -> f64 {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return 0.;
    }
    system.used_memory() as f64 / total as f64 * 100.
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
