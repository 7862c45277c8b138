//! Periodically executed, identity-deduplicated fetch jobs
//!
//! A `Task` is the unit the scheduler polls. Many consumers share one task
//! per `TaskKey`; each completion fans out to every attached callback.

use crate::callback::{same_callback, SharedCallback};
use crate::error::ApiError;
use crate::sync::lock;
use fabric_monitor_types::TaskKey;
use log::{error, trace, warn};
use parking_lot::ReentrantMutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Fetch closure, closed over the management API and the source parameters
pub type FetchFn<T> = Arc<dyn Fn() -> Result<T, ApiError> + Send + Sync>;

/// Result of one execution cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fetch succeeded and the value went to this many callbacks
    Delivered(usize),
    /// The previous execution of this task was still outstanding
    Skipped,
    /// Fetch returned an error or panicked; nothing was delivered
    Failed,
    /// The execution was cancelled before delivery
    Cancelled,
}

/// Clears the running flag even if the fetch panics
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Task<T> {
    key: TaskKey,
    description: String,
    fetch: FetchFn<T>,
    callbacks: Mutex<Vec<SharedCallback<T>>>,
    /// Held for the duration of a delivery; detaching waits on it
    delivery: ReentrantMutex<()>,
    running: AtomicBool,
    /// Token of the one outstanding execution, if any
    execution: Mutex<Option<CancellationToken>>,
    completed_cycles: AtomicU64,
}

impl<T> Task<T> {
    pub(crate) fn new(key: TaskKey, description: String, fetch: FetchFn<T>) -> Self {
        Self {
            key,
            description,
            fetch,
            callbacks: Mutex::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
            running: AtomicBool::new(false),
            execution: Mutex::new(None),
            completed_cycles: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn callback_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn has_callback(&self, callback: &SharedCallback<T>) -> bool {
        lock(&self.callbacks)
            .iter()
            .any(|attached| same_callback(attached, callback))
    }

    /// Number of cycles that delivered a value
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::Relaxed)
    }

    /// Whether an execution handle is outstanding
    pub fn is_scheduled(&self) -> bool {
        lock(&self.execution)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Attach a callback; attaching the same instance twice is a no-op
    pub(crate) fn attach(&self, callback: SharedCallback<T>) -> bool {
        let mut callbacks = lock(&self.callbacks);
        if callbacks.iter().any(|attached| same_callback(attached, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// Remove a callback from the list. Call `quiesce` afterwards, outside any
    /// registry lock, to wait for a delivery that may already be running.
    pub(crate) fn detach(&self, callback: &SharedCallback<T>) -> bool {
        let mut callbacks = lock(&self.callbacks);
        let before = callbacks.len();
        callbacks.retain(|attached| !same_callback(attached, callback));
        callbacks.len() != before
    }

    pub(crate) fn detach_all(&self) -> Vec<SharedCallback<T>> {
        std::mem::take(&mut *lock(&self.callbacks))
    }

    /// Wait until no delivery is in progress on another thread.
    ///
    /// Reentrant: returns immediately when called from inside this task's own
    /// delivery.
    pub(crate) fn quiesce(&self) {
        drop(self.delivery.lock());
    }

    /// Install a new execution token, cancelling the previous one
    pub(crate) fn set_execution(&self, token: CancellationToken) {
        if let Some(previous) = lock(&self.execution).replace(token) {
            previous.cancel();
        }
    }

    /// Cancel the outstanding execution. Idempotent.
    pub(crate) fn cancel(&self) {
        if let Some(token) = lock(&self.execution).take() {
            token.cancel();
        }
    }

    /// Run one fetch-and-deliver cycle now, outside the periodic cadence.
    ///
    /// Skipped if another execution of this task is still outstanding.
    pub fn run_cycle(&self) -> CycleOutcome {
        self.execute(None)
    }

    pub(crate) fn execute(&self, token: Option<&CancellationToken>) -> CycleOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Skipping {}: previous execution still outstanding", self.key);
            return CycleOutcome::Skipped;
        }
        let _running = RunningGuard(&self.running);

        let start = Instant::now();
        let value = match catch_unwind(AssertUnwindSafe(|| (self.fetch)())) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("Fetch failed for {} ({}): {}", self.key, self.description, e);
                return CycleOutcome::Failed;
            }
            Err(_) => {
                error!("Fetch panicked for {} ({})", self.key, self.description);
                return CycleOutcome::Failed;
            }
        };

        if token.is_some_and(|t| t.is_cancelled()) {
            trace!("Dropping result for {}: execution cancelled", self.key);
            return CycleOutcome::Cancelled;
        }

        let delivered = self.deliver(&value);
        self.completed_cycles.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Cycle for {} took {:?}, delivered to {} callbacks",
            self.key,
            start.elapsed(),
            delivered
        );
        CycleOutcome::Delivered(delivered)
    }

    fn deliver(&self, value: &T) -> usize {
        let _delivery = self.delivery.lock();
        let snapshot = lock(&self.callbacks).clone();
        let mut delivered = 0;
        for callback in snapshot {
            // A callback may have been detached by an earlier callback in this loop
            if self.has_callback(&callback) {
                callback.on_complete(value);
                delivered += 1;
            }
        }
        delivered
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("callbacks", &self.callback_count())
            .finish()
    }
}
