//! Task registry and polling scheduler
//!
//! The scheduler owns the shared background pool and the global refresh rate.
//! Each telemetry kind keeps its tasks in a typed `TaskRegistry`; the scheduler
//! guarantees that at most one task per `TaskKey` lives in a registry, and that
//! each task has exactly one outstanding execution.
//!
//! # Lock ordering
//! Registry mutex, then a task's callback list. Waiting for an in-flight
//! delivery (`Task::quiesce`) only ever happens after the registry mutex has
//! been released.

use crate::callback::{BatchedCallback, SharedCallback};
use crate::constants::POOL_THREAD_NAME;
use crate::error::SchedulerError;
use crate::sync::lock;
use crate::task::{FetchFn, Task};
use fabric_monitor_types::{AttributeKind, EngineConfig, TaskKey, MIN_REFRESH_RATE_MS};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Tasks of one telemetry kind, keyed by identity
pub struct TaskRegistry<T> {
    kind: AttributeKind,
    tasks: Mutex<HashMap<TaskKey, Arc<Task<T>>>>,
}

impl<T> TaskRegistry<T> {
    fn new(kind: AttributeKind) -> Self {
        Self {
            kind,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    pub fn get(&self, key: &TaskKey) -> Option<Arc<Task<T>>> {
        lock(&self.tasks).get(key).cloned()
    }

    /// Snapshot of the live tasks
    pub fn tasks(&self) -> Vec<Arc<Task<T>>> {
        lock(&self.tasks).values().cloned().collect()
    }
}

/// Type-erased view of a registry used for global operations
trait ManagedRegistry: Send + Sync {
    fn restart_all(&self, scheduler: &Scheduler);
    fn cancel_all(&self);
}

impl<T: Send + Sync + 'static> ManagedRegistry for TaskRegistry<T> {
    fn restart_all(&self, scheduler: &Scheduler) {
        let tasks = lock(&self.tasks);
        for task in tasks.values() {
            // Detach first so the cancelled execution cannot reach anyone
            let callbacks = task.detach_all();
            task.cancel();
            for callback in callbacks {
                task.attach(callback);
            }
            scheduler.start(task);
        }
        if !tasks.is_empty() {
            debug!("Restarted {} {} tasks", tasks.len(), self.kind);
        }
    }

    fn cancel_all(&self) {
        let mut tasks = lock(&self.tasks);
        for task in tasks.values() {
            task.detach_all();
            task.cancel();
        }
        tasks.clear();
    }
}

/// Handle to a one-shot job on the background pool
pub struct BackgroundHandle {
    name: String,
    token: CancellationToken,
    join: Option<tokio::task::JoinHandle<()>>,
    runtime: Handle,
}

impl BackgroundHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("Cancelling background job {}", self.name);
            self.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Block until the job has finished. Returns false if it panicked or
    /// never ran. Must not be called from a pool thread.
    pub fn wait(mut self) -> bool {
        match self.join.take() {
            Some(join) => match self.runtime.block_on(join) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Background job {} did not complete: {}", self.name, e);
                    false
                }
            },
            None => false,
        }
    }
}

impl std::fmt::Debug for BackgroundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundHandle")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Shared scheduler of one session
pub struct Scheduler {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    refresh_rate_ms: AtomicU64,
    registries: Mutex<Vec<Weak<dyn ManagedRegistry>>>,
    /// Parent of every execution and background token
    root_token: CancellationToken,
    shut_down: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler with its own background pool
    pub fn new(config: &EngineConfig) -> Result<Self, SchedulerError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(POOL_THREAD_NAME)
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        info!(
            "Started background pool with {} workers, refresh rate {}ms",
            config.worker_threads.max(1),
            config.effective_refresh_rate_ms()
        );
        Ok(Self::build(handle, Some(runtime), config))
    }

    /// Create a scheduler on an existing runtime; the caller keeps ownership
    /// of the runtime's lifetime.
    pub fn with_handle(handle: Handle, config: &EngineConfig) -> Self {
        Self::build(handle, None, config)
    }

    fn build(handle: Handle, runtime: Option<Runtime>, config: &EngineConfig) -> Self {
        Self {
            handle,
            runtime: Mutex::new(runtime),
            refresh_rate_ms: AtomicU64::new(config.effective_refresh_rate_ms()),
            registries: Mutex::new(Vec::new()),
            root_token: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create a registry whose tasks follow this scheduler's refresh rate
    pub fn registry<T: Send + Sync + 'static>(&self, kind: AttributeKind) -> Arc<TaskRegistry<T>> {
        let registry = Arc::new(TaskRegistry::new(kind));
        let managed: Arc<dyn ManagedRegistry> = registry.clone();
        lock(&self.registries).push(Arc::downgrade(&managed));
        registry
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Schedule a task, or attach to the existing task with the same key.
    ///
    /// Returns the registered instance; two calls with equal keys always
    /// return the same `Arc`.
    pub fn schedule<T: Send + Sync + 'static>(
        &self,
        registry: &TaskRegistry<T>,
        key: TaskKey,
        description: impl Into<String>,
        fetch: FetchFn<T>,
        callback: SharedCallback<T>,
    ) -> Arc<Task<T>> {
        let mut tasks = lock(&registry.tasks);
        if let Some(task) = tasks.get(&key) {
            task.attach(callback);
            debug!(
                "Reusing task {} (callbacks: {})",
                key,
                task.callback_count()
            );
            return Arc::clone(task);
        }

        let task = Arc::new(Task::new(key.clone(), description.into(), fetch));
        task.attach(callback);
        self.start(&task);
        info!(
            "Created task {} ({}) every {}ms",
            key,
            task.description(),
            self.refresh_rate()
        );
        tasks.insert(key, Arc::clone(&task));
        task
    }

    /// Detach `callback` from the task with `task`'s key; the task is
    /// cancelled and removed once no callbacks remain. Unknown tasks or
    /// callbacks are ignored.
    ///
    /// After this returns the callback is never invoked again for this task.
    pub fn unschedule<T: Send + Sync + 'static>(
        &self,
        registry: &TaskRegistry<T>,
        task: &Task<T>,
        callback: &SharedCallback<T>,
    ) {
        let existing = {
            let mut tasks = lock(&registry.tasks);
            let Some(existing) = tasks.get(task.key()).cloned() else {
                debug!("Unschedule of unknown task {} ignored", task.key());
                return;
            };
            if !existing.detach(callback) {
                debug!("Callback was not attached to {}, ignored", task.key());
                return;
            }
            if existing.callback_count() == 0 {
                existing.cancel();
                tasks.remove(task.key());
                info!("Removed task {}", task.key());
            } else {
                debug!(
                    "Detached callback from {} (callbacks: {})",
                    task.key(),
                    existing.callback_count()
                );
            }
            existing
        };
        existing.quiesce();
    }

    /// Unschedule every task of a batch, detaching slot `i` from `tasks[i]`
    pub fn unschedule_batch<T: Clone + Send + Sync + 'static>(
        &self,
        registry: &TaskRegistry<T>,
        tasks: &[Arc<Task<T>>],
        batched: &BatchedCallback<T>,
    ) {
        for (index, task) in tasks.iter().enumerate().take(batched.size()) {
            self.unschedule(registry, task, &batched.slot(index));
        }
    }

    pub fn refresh_rate(&self) -> u64 {
        self.refresh_rate_ms.load(Ordering::Acquire)
    }

    /// Change the global refresh rate and restart every live task at it.
    ///
    /// Callbacks stay attached across the restart; at most one cycle per
    /// task is skipped.
    pub fn update_refresh_rate(&self, rate_ms: u64) {
        let rate_ms = rate_ms.max(MIN_REFRESH_RATE_MS);
        let previous = self.refresh_rate_ms.swap(rate_ms, Ordering::AcqRel);
        if previous == rate_ms {
            debug!("Refresh rate unchanged at {}ms", rate_ms);
            return;
        }
        info!("Refresh rate changed from {}ms to {}ms", previous, rate_ms);
        self.restart_registries();
    }

    /// Restart every live task at the current rate, e.g. after a reconnect,
    /// so no execution handle from a dead connection is reused.
    pub fn reschedule_all(&self) {
        info!("Rescheduling all tasks");
        self.restart_registries();
    }

    /// Restart the tasks of a single registry
    pub fn reschedule<T: Send + Sync + 'static>(&self, registry: &TaskRegistry<T>) {
        registry.restart_all(self);
    }

    fn live_registries(&self) -> Vec<Arc<dyn ManagedRegistry>> {
        let mut registries = lock(&self.registries);
        registries.retain(|weak| weak.strong_count() > 0);
        registries.iter().filter_map(Weak::upgrade).collect()
    }

    fn restart_registries(&self) {
        for registry in self.live_registries() {
            registry.restart_all(self);
        }
    }

    /// Start a periodic execution for `task` at the current refresh rate.
    ///
    /// The first cycle runs one period after start. Each cycle runs the fetch
    /// on the blocking pool and is awaited before the next tick, so a task
    /// never overlaps itself; late ticks are skipped.
    fn start<T: Send + Sync + 'static>(&self, task: &Arc<Task<T>>) {
        if self.is_shut_down() {
            warn!("Not starting {}: scheduler has been shut down", task.key());
            return;
        }
        let token = self.root_token.child_token();
        task.set_execution(token.clone());

        let period = Duration::from_millis(self.refresh_rate());
        let task = Arc::clone(task);
        self.handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let cycle_task = Arc::clone(&task);
                let cycle_token = token.clone();
                let cycle =
                    tokio::task::spawn_blocking(move || cycle_task.execute(Some(&cycle_token)));
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = cycle => {
                        if let Err(e) = result {
                            error!("Execution of {} failed: {}", task.key(), e);
                        }
                    }
                }
            }
            debug!("Execution of {} stopped", task.key());
        });
    }

    /// Run a one-shot job on the shared background pool.
    ///
    /// The job receives a token it should check between blocking steps.
    pub fn submit_background<F>(&self, name: impl Into<String>, job: F) -> BackgroundHandle
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        let name = name.into();
        let token = self.root_token.child_token();
        if self.is_shut_down() {
            warn!("Not submitting {}: scheduler has been shut down", name);
            token.cancel();
            return BackgroundHandle {
                name,
                token,
                join: None,
                runtime: self.handle.clone(),
            };
        }

        let job_token = token.clone();
        let join = self.handle.spawn_blocking(move || job(&job_token));
        debug!("Submitted background job {}", name);
        BackgroundHandle {
            name,
            token,
            join: Some(join),
            runtime: self.handle.clone(),
        }
    }

    /// Cancel every task and background job and stop the pool.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.root_token.cancel();
        for registry in self.live_registries() {
            registry.cancel_all();
        }
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
        info!("Scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
