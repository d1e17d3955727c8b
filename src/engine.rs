//! Engine facade and analysis worker
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ PRODUCER (instrumented thread)                               │
//! │   on_open / on_read / on_write → Collector                   │
//! │   on_close → finalize IoInfo → queue.push()                  │
//! └──────────────────────────────────────────────────────────────┘
//!                          │
//!                          │ IngestionQueue (Mutex + Condvar)
//!                          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ANALYSIS WORKER (dedicated thread)                           │
//! │   loop {                                                     │
//! │     info = queue.take()?;                                    │
//! │     issues = detectors.run(env, info);                       │
//! │     if !issues.is_empty() { publish(&issues) }               │
//! │   }                                                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! No detector logic ever runs on the producer; the worst it pays is one
//! collector update and one queue push.
//!
//! # Example
//!
//! ```
//! use ioprobe::call_site::CallSite;
//! use ioprobe::config::Env;
//! use ioprobe::detector::DetectorKind;
//! use ioprobe::engine::Engine;
//! use std::time::Duration;
//!
//! let mut engine = Engine::new(Env::default())?;
//! engine.register_detector(DetectorKind::SmallBuffer)?;
//! engine.set_publish_callback(|issues| {
//!     for issue in issues {
//!         eprintln!("{}: {}", issue.name(), issue.description());
//!     }
//! })?;
//! engine.start()?;
//!
//! engine.on_open("/tmp/data", 0, 0, 3, CallSite::new(1, "main", ""));
//! for _ in 0..32 {
//!     engine.on_read(3, 64, 64, 10);
//! }
//! engine.on_close(3, 0);
//!
//! assert!(engine.wait_idle(Duration::from_secs(5)));
//! assert_eq!(engine.stats().batches_published, 1);
//! engine.shutdown();
//! # Ok::<(), ioprobe::Error>(())
//! ```

use crate::call_site::CallSite;
use crate::clock::{Clock, MonotonicClock};
use crate::collector::{Collector, OpenOutcome};
use crate::config::{ConfigKey, Env};
use crate::detector::{panic_message, DetectorKind, DetectorSet};
use crate::error::{Error, Result};
use crate::event::IoEvent;
use crate::io_info::IoInfo;
use crate::issue::Issue;
use crate::queue::{IngestionQueue, Take};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Host sink for issue batches, called on the analysis worker thread
pub type PublishCallback = Box<dyn FnMut(&[Issue]) + Send + 'static>;

const WORKER_THREAD_NAME: &str = "ioprobe-analysis";

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub opens_tracked: u64,
    pub duplicate_opens: u64,
    pub records_enqueued: u64,
    pub records_analyzed: u64,
    pub batches_published: u64,
    pub issues_published: u64,
    pub detector_failures: u64,
    pub callback_panics: u64,
    pub records_dropped: u64,
}

#[derive(Default)]
struct Counters {
    opens_tracked: AtomicU64,
    duplicate_opens: AtomicU64,
    records_enqueued: AtomicU64,
    batches_published: AtomicU64,
    issues_published: AtomicU64,
    detector_failures: AtomicU64,
    callback_panics: AtomicU64,
    records_dropped: AtomicU64,
}

/// State shared between the producer side and the worker
struct Shared {
    queue: IngestionQueue<IoInfo>,
    counters: Counters,
    /// Records fully analyzed; guarded so `wait_idle` can block on it
    analyzed: Mutex<u64>,
    progress: Condvar,
}

impl Shared {
    fn analyzed(&self) -> MutexGuard<'_, u64> {
        self.analyzed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_analyzed(&self) {
        *self.analyzed() += 1;
        self.progress.notify_all();
    }
}

/// Setup state handed to the worker by `start()`
struct Pending {
    detectors: DetectorSet,
    callback: Option<PublishCallback>,
}

/// Diagnostic engine: collector, queue, worker and detector registry
///
/// Hooks only need `&Engine`, so a started engine can be shared across the
/// instrumented threads.
pub struct Engine {
    env: Env,
    clock: Arc<dyn Clock>,
    collector: Mutex<Collector>,
    shared: Arc<Shared>,
    /// `None` once started
    pending: Option<Mutex<Pending>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("env", &self.env)
            .field("started", &self.is_started())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine on the monotonic system clock
    pub fn new(env: Env) -> Result<Self> {
        Self::with_clock(env, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(env: Env, clock: Arc<dyn Clock>) -> Result<Self> {
        env.validate()?;
        let collector = Collector::new(clock.clone(), env.continual_threshold_us);

        Ok(Self {
            env,
            clock,
            collector: Mutex::new(collector),
            shared: Arc::new(Shared {
                queue: IngestionQueue::new(),
                counters: Counters::default(),
                analyzed: Mutex::new(0),
                progress: Condvar::new(),
            }),
            pending: Some(Mutex::new(Pending {
                detectors: DetectorSet::new(),
                callback: None,
            })),
            worker: None,
        })
    }

    // =========================================================================
    // SETUP
    // =========================================================================

    /// Register a detector; evaluation follows registration order.
    /// Returns false if the kind was already registered.
    pub fn register_detector(&mut self, kind: DetectorKind) -> Result<bool> {
        let detector = kind.build(self.clock.clone());
        let pending = self.pending_mut("register_detector")?;
        Ok(pending.detectors.register(detector))
    }

    pub fn set_config(&mut self, key: ConfigKey, value: i64) -> Result<()> {
        if self.is_started() {
            return Err(Error::AlreadyStarted("set_config"));
        }
        self.env.set(key, value)?;
        if key == ConfigKey::ContinualThreshold {
            self.collector().set_continual_threshold(self.env.continual_threshold_us);
        }
        Ok(())
    }

    pub fn set_publish_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&[Issue]) + Send + 'static,
    {
        self.pending_mut("set_publish_callback")?.callback = Some(Box::new(callback));
        Ok(())
    }

    /// Spawn the analysis worker. Records closed before this call are
    /// already queued and get analyzed first.
    pub fn start(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Err(Error::AlreadyStarted("start"));
        };
        let Pending {
            detectors,
            callback,
        } = pending
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        if detectors.is_empty() {
            warn!("starting with no detectors registered; no issues will be produced");
        }
        debug!(?detectors, "starting analysis worker");

        let shared = self.shared.clone();
        let env = Arc::new(self.env.clone());

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(shared, env, detectors, callback))
            .map_err(Error::WorkerSpawn)?;

        self.worker = Some(handle);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.pending.is_none()
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    // =========================================================================
    // INGRESS
    // =========================================================================

    pub fn on_open(&self, path: &str, flags: i32, mode: u32, result: i32, call_site: CallSite) {
        let outcome = self.collector().on_open(path, flags, mode, result, call_site);
        match outcome {
            OpenOutcome::Tracked => bump(&self.shared.counters.opens_tracked),
            OpenOutcome::Duplicate => bump(&self.shared.counters.duplicate_opens),
            OpenOutcome::Failed => {}
        }
    }

    pub fn on_read(&self, fd: i32, size: usize, result: isize, cost_us: i64) {
        self.collector().on_read(fd, size, result, cost_us);
    }

    pub fn on_write(&self, fd: i32, size: usize, result: isize, cost_us: i64) {
        self.collector().on_write(fd, size, result, cost_us);
    }

    /// Finalize the descriptor's record and hand it to the worker.
    /// Returns true if a record was enqueued.
    pub fn on_close(&self, fd: i32, result: i32) -> bool {
        // Release the collector before touching the queue
        let Some(info) = self.collector().on_close(fd, result) else {
            return false;
        };

        let counters = &self.shared.counters;
        counters.records_enqueued.fetch_add(1, Ordering::SeqCst);
        if self.shared.queue.push(info) {
            true
        } else {
            counters.records_enqueued.fetch_sub(1, Ordering::SeqCst);
            bump(&counters.records_dropped);
            false
        }
    }

    /// Feed one recorded event through the matching ingress call
    pub fn dispatch(&self, event: &IoEvent) {
        match event {
            IoEvent::Open {
                path,
                flags,
                mode,
                result,
                call_site,
                ..
            } => self.on_open(path, *flags, *mode, *result, call_site.clone()),
            IoEvent::Read {
                fd,
                size,
                result,
                cost_us,
                ..
            } => self.on_read(*fd, *size, *result, *cost_us),
            IoEvent::Write {
                fd,
                size,
                result,
                cost_us,
                ..
            } => self.on_write(*fd, *size, *result, *cost_us),
            IoEvent::Close { fd, result, .. } => {
                self.on_close(*fd, *result);
            }
        }
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    pub fn live_descriptors(&self) -> usize {
        self.collector().live_count()
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.shared.counters;
        EngineStats {
            opens_tracked: c.opens_tracked.load(Ordering::Relaxed),
            duplicate_opens: c.duplicate_opens.load(Ordering::Relaxed),
            records_enqueued: c.records_enqueued.load(Ordering::SeqCst),
            records_analyzed: *self.shared.analyzed(),
            batches_published: c.batches_published.load(Ordering::Relaxed),
            issues_published: c.issues_published.load(Ordering::Relaxed),
            detector_failures: c.detector_failures.load(Ordering::Relaxed),
            callback_panics: c.callback_panics.load(Ordering::Relaxed),
            records_dropped: c.records_dropped.load(Ordering::Relaxed),
        }
    }

    /// Block until every enqueued record has been analyzed
    ///
    /// Returns false on timeout, or if the engine shut down first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let enqueued = || self.shared.counters.records_enqueued.load(Ordering::SeqCst);
        let shared = &self.shared;

        let guard = shared.analyzed();
        let (guard, _) = shared
            .progress
            .wait_timeout_while(guard, timeout, |analyzed| {
                *analyzed < enqueued() && !shared.queue.is_shutdown()
            })
            .unwrap_or_else(PoisonError::into_inner);

        *guard >= enqueued()
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Stop the worker. Records still queued are dropped unanalyzed; a
    /// record already being analyzed finishes and is published.
    pub fn shutdown(&mut self) {
        let dropped = self.shared.queue.shutdown();
        if dropped > 0 {
            debug!(dropped, "shutdown dropped queued records");
            self.shared
                .counters
                .records_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        // Wake any wait_idle callers
        self.shared.progress.notify_all();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("analysis worker terminated abnormally");
            }
        }
    }

    fn pending_mut(&mut self, operation: &'static str) -> Result<&mut Pending> {
        self.pending
            .as_mut()
            .map(|pending| pending.get_mut().unwrap_or_else(PoisonError::into_inner))
            .ok_or(Error::AlreadyStarted(operation))
    }

    fn collector(&self) -> MutexGuard<'_, Collector> {
        self.collector.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Worker loop: drain the queue until shutdown
fn run_worker(
    shared: Arc<Shared>,
    env: Arc<Env>,
    mut detectors: DetectorSet,
    mut callback: Option<PublishCallback>,
) {
    debug!("analysis worker running");

    loop {
        let info = match shared.queue.take() {
            Take::Item(info) => info,
            Take::Shutdown => break,
        };

        let outcome = detectors.run(&env, &info);
        if outcome.failures > 0 {
            shared
                .counters
                .detector_failures
                .fetch_add(outcome.failures as u64, Ordering::Relaxed);
        }

        if !outcome.issues.is_empty() {
            publish(&shared, callback.as_mut(), &outcome.issues, &info.path);
        }

        drop(info);
        shared.mark_analyzed();
    }

    debug!("analysis worker stopped");
}

fn publish(shared: &Shared, callback: Option<&mut PublishCallback>, issues: &[Issue], path: &str) {
    let Some(callback) = callback else {
        debug!(path, issues = issues.len(), "no publish callback; issues discarded");
        return;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| callback(issues))) {
        Ok(()) => {
            bump(&shared.counters.batches_published);
            shared
                .counters
                .issues_published
                .fetch_add(issues.len() as u64, Ordering::Relaxed);
        }
        Err(payload) => {
            warn!(path, panic = %panic_message(payload.as_ref()), "publish callback panicked");
            bump(&shared.counters.callback_panics);
        }
    }
}
