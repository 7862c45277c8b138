//! Per-telemetry-kind subscribers
//!
//! A subscriber turns domain parameters (a source) into a task identity and a
//! fetch closure, and hands both to the scheduler. One generic `Subscriber`
//! serves every kind; the kind-specific parts live in `TelemetryKind`
//! implementations in `kinds`.

mod kinds;

pub use kinds::{
    FocusPortsKind, GroupInfoKind, ImageInfoKind, PortCountersKind, StateSummaryKind, VfInfoKind,
    VfPortCountersKind,
};

use crate::api::ManagementApi;
use crate::callback::{BatchedCallback, SharedCallback};
use crate::error::ApiError;
use crate::history::{HistoryQuery, HistoryQueryTask, ImageIdQuery};
use crate::scheduler::{BackgroundHandle, Scheduler, TaskRegistry};
use crate::task::{FetchFn, Task};
use fabric_monitor_types::{AttributeKind, HistoryType, ImageId, SourceKey, TaskKey};
use log::{debug, info, warn};
use std::marker::PhantomData;
use std::sync::Arc;

/// Kind-specific half of a subscriber
pub trait TelemetryKind: Send + Sync + Sized + 'static {
    type Source: SourceKey;
    type Value: Clone + Send + Sync + 'static;

    const ATTRIBUTE: AttributeKind;

    /// Whether the management API keeps history for this kind
    const HAS_HISTORY: bool = false;

    fn fetch(api: &dyn ManagementApi, source: &Self::Source) -> Result<Self::Value, ApiError>;

    /// Snapshot a fetched value was read from
    fn image_id(value: &Self::Value) -> ImageId;

    /// Value of `source` at `offset` snapshots before `image_id`; `None`
    /// when that snapshot is no longer retained
    fn fetch_history(
        _api: &dyn ManagementApi,
        _source: &Self::Source,
        _image_id: ImageId,
        _offset: i32,
    ) -> Result<Option<Self::Value>, ApiError> {
        Ok(None)
    }

    fn key(source: &Self::Source) -> TaskKey {
        TaskKey::new(Self::ATTRIBUTE, source.key())
    }

    fn describe(source: &Self::Source) -> String {
        format!("{} {}", Self::ATTRIBUTE, source.key())
    }

    /// This kind's subscriber within a session's set
    fn select(subscribers: &Subscribers) -> &Subscriber<Self>;
}

/// Tasks and the shared aggregator of a multi-source registration
pub struct BatchRegistration<V> {
    tasks: Vec<Arc<Task<V>>>,
    batched: BatchedCallback<V>,
}

impl<V: Clone + Send + Sync + 'static> BatchRegistration<V> {
    pub fn tasks(&self) -> &[Arc<Task<V>>] {
        &self.tasks
    }

    pub fn batched(&self) -> &BatchedCallback<V> {
        &self.batched
    }
}

pub struct Subscriber<K: TelemetryKind> {
    api: Arc<dyn ManagementApi>,
    scheduler: Arc<Scheduler>,
    registry: Arc<TaskRegistry<K::Value>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: TelemetryKind> Subscriber<K> {
    pub fn new(api: Arc<dyn ManagementApi>, scheduler: Arc<Scheduler>) -> Self {
        let registry = scheduler.registry::<K::Value>(K::ATTRIBUTE);
        Self {
            api,
            scheduler,
            registry,
            _kind: PhantomData,
        }
    }

    pub fn registry(&self) -> &TaskRegistry<K::Value> {
        &self.registry
    }

    pub fn task_count(&self) -> usize {
        self.registry.len()
    }

    fn fetch_fn(&self, source: &K::Source) -> FetchFn<K::Value> {
        let api = Arc::clone(&self.api);
        let params = source.clone();
        Arc::new(move || K::fetch(api.as_ref(), &params))
    }

    /// Register `callback` for `source`, sharing an existing task if one
    /// polls the same source already
    pub fn register(
        &self,
        source: &K::Source,
        callback: SharedCallback<K::Value>,
    ) -> Arc<Task<K::Value>> {
        self.scheduler.schedule(
            &self.registry,
            K::key(source),
            K::describe(source),
            self.fetch_fn(source),
            callback,
        )
    }

    pub fn deregister(&self, task: &Task<K::Value>, callback: &SharedCallback<K::Value>) {
        self.scheduler.unschedule(&self.registry, task, callback);
    }

    /// Register all `sources` behind one aggregated callback that receives
    /// the values in source order once every task has reported
    pub fn register_batch(
        &self,
        sources: &[K::Source],
        callback: SharedCallback<Vec<K::Value>>,
    ) -> BatchRegistration<K::Value> {
        let batched = BatchedCallback::new(sources.len(), callback);
        let tasks = sources
            .iter()
            .enumerate()
            .map(|(index, source)| self.register(source, batched.slot(index)))
            .collect();
        BatchRegistration { tasks, batched }
    }

    pub fn deregister_batch(&self, registration: &BatchRegistration<K::Value>) {
        self.scheduler
            .unschedule_batch(&self.registry, &registration.tasks, &registration.batched);
    }

    /// Fetch every source once, now, on the calling thread
    pub fn refresh(&self, sources: &[K::Source]) -> Result<Vec<K::Value>, ApiError> {
        sources
            .iter()
            .map(|source| K::fetch(self.api.as_ref(), source))
            .collect()
    }

    /// Start a historical backfill for `sources` on the background pool.
    ///
    /// Returns `None` when there is nothing to backfill: current history
    /// type, no sources, or a kind without history.
    pub fn init_history(
        &self,
        sources: &[K::Source],
        history_type: HistoryType,
        callback: SharedCallback<Vec<K::Value>>,
    ) -> Option<BackgroundHandle> {
        if history_type.is_current() || sources.is_empty() {
            return None;
        }
        if !K::HAS_HISTORY {
            debug!("{} has no history, skipping backfill", K::ATTRIBUTE);
            return None;
        }

        let api = Arc::clone(&self.api);
        let refresh_rate_ms = self.scheduler.refresh_rate();
        let sources = sources.to_vec();
        let name = format!("{} history x{}", K::ATTRIBUTE, sources.len());
        let job_name = name.clone();

        Some(self.scheduler.submit_background(name, move |token| {
            let sweep_interval_ms = match api.get_config() {
                Ok(config) => config.sweep_interval_ms,
                Err(e) => {
                    warn!("{}: failed to read sweep interval: {}", job_name, e);
                    return;
                }
            };

            let id_api = Arc::clone(&api);
            let id_sources = sources.clone();
            let query_image_ids: ImageIdQuery = Box::new(move || {
                id_sources
                    .iter()
                    .map(|source| K::fetch(id_api.as_ref(), source).map(|v| K::image_id(&v)))
                    .collect()
            });

            let query_history: HistoryQuery<K::Value> =
                Box::new(move |image_ids: &[ImageId], offset: i32| {
                    let mut samples = Vec::with_capacity(sources.len());
                    for (source, image_id) in sources.iter().zip(image_ids) {
                        match K::fetch_history(api.as_ref(), source, *image_id, offset)? {
                            Some(value) => samples.push(value),
                            None => return Ok(None),
                        }
                    }
                    Ok(Some(samples))
                });

            let task = HistoryQueryTask::new(
                job_name.clone(),
                sweep_interval_ms,
                refresh_rate_ms,
                history_type,
                query_image_ids,
                query_history,
                callback,
            );
            let outcome = task.run(token);
            debug!(
                "{} finished: {} samples, {:?}",
                job_name, outcome.delivered, outcome.end
            );
        }))
    }

    /// Restart every live task of this kind with a fresh execution handle
    pub fn reschedule_tasks(&self) {
        self.scheduler.reschedule(&self.registry);
    }
}

/// One subscriber per telemetry kind, sharing a session's scheduler
pub struct Subscribers {
    pub group_info: Subscriber<GroupInfoKind>,
    pub vf_info: Subscriber<VfInfoKind>,
    pub port_counters: Subscriber<PortCountersKind>,
    pub vf_port_counters: Subscriber<VfPortCountersKind>,
    pub focus_ports: Subscriber<FocusPortsKind>,
    pub image_info: Subscriber<ImageInfoKind>,
    pub state_summary: Subscriber<StateSummaryKind>,
}

impl Subscribers {
    pub fn new(api: Arc<dyn ManagementApi>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            group_info: Subscriber::new(Arc::clone(&api), Arc::clone(&scheduler)),
            vf_info: Subscriber::new(Arc::clone(&api), Arc::clone(&scheduler)),
            port_counters: Subscriber::new(Arc::clone(&api), Arc::clone(&scheduler)),
            vf_port_counters: Subscriber::new(Arc::clone(&api), Arc::clone(&scheduler)),
            focus_ports: Subscriber::new(Arc::clone(&api), Arc::clone(&scheduler)),
            image_info: Subscriber::new(Arc::clone(&api), Arc::clone(&scheduler)),
            state_summary: Subscriber::new(api, scheduler),
        }
    }

    pub fn get<K: TelemetryKind>(&self) -> &Subscriber<K> {
        K::select(self)
    }

    pub fn reschedule_tasks(&self) {
        self.group_info.reschedule_tasks();
        self.vf_info.reschedule_tasks();
        self.port_counters.reschedule_tasks();
        self.vf_port_counters.reschedule_tasks();
        self.focus_ports.reschedule_tasks();
        self.image_info.reschedule_tasks();
        self.state_summary.reschedule_tasks();
        info!("Rescheduled {} tasks", self.task_count());
    }

    /// Live tasks across all kinds
    pub fn task_count(&self) -> usize {
        self.group_info.task_count()
            + self.vf_info.task_count()
            + self.port_counters.task_count()
            + self.vf_port_counters.task_count()
            + self.focus_ports.task_count()
            + self.image_info.task_count()
            + self.state_summary.task_count()
    }
}
