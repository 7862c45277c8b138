//! How a provider registers, refreshes and backfills its sources

use crate::callback::{callback_fn, SharedCallback};
use crate::error::ApiError;
use crate::scheduler::BackgroundHandle;
use crate::session::Session;
use crate::subscriber::{BatchRegistration, TelemetryKind};
use crate::task::Task;
use fabric_monitor_types::{HistoryType, SourceKey};
use std::marker::PhantomData;
use std::sync::Arc;

/// Kind-specific half of a `DataProvider`
pub trait ProviderStrategy: Send + Sync + 'static {
    type Source: SourceKey;
    /// What observers receive per delivery
    type Data: Clone + Send + Sync + 'static;
    type Registration: Send + Sync + 'static;

    /// Fetch all sources once, returning the deliveries in observer order
    fn refresh(
        &self,
        session: &Session,
        sources: &[Self::Source],
    ) -> Result<Vec<Self::Data>, ApiError>;

    fn register_tasks(
        &self,
        session: &Session,
        sources: &[Self::Source],
        sink: SharedCallback<Self::Data>,
    ) -> Self::Registration;

    fn deregister_tasks(&self, session: &Session, registration: &Self::Registration);

    fn init_history(
        &self,
        session: &Session,
        sources: &[Self::Source],
        history_type: HistoryType,
        sink: SharedCallback<Self::Data>,
    ) -> Option<BackgroundHandle>;

    /// Drop any partially aggregated cycle
    fn reset(&self, _registration: &Self::Registration) {}
}

/// One task per source; observers receive every value on its own
pub struct SimpleStrategy<K>(PhantomData<fn() -> K>);

impl<K> Default for SimpleStrategy<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

pub struct SimpleRegistration<V> {
    tasks: Vec<Arc<Task<V>>>,
    sink: SharedCallback<V>,
}

impl<V> SimpleRegistration<V> {
    pub fn tasks(&self) -> &[Arc<Task<V>>] {
        &self.tasks
    }
}

impl<K: TelemetryKind> ProviderStrategy for SimpleStrategy<K> {
    type Source = K::Source;
    type Data = K::Value;
    type Registration = SimpleRegistration<K::Value>;

    fn refresh(&self, session: &Session, sources: &[K::Source]) -> Result<Vec<K::Value>, ApiError> {
        session.subscribers().get::<K>().refresh(sources)
    }

    fn register_tasks(
        &self,
        session: &Session,
        sources: &[K::Source],
        sink: SharedCallback<K::Value>,
    ) -> SimpleRegistration<K::Value> {
        let subscriber = session.subscribers().get::<K>();
        let tasks = sources
            .iter()
            .map(|source| subscriber.register(source, Arc::clone(&sink)))
            .collect();
        SimpleRegistration { tasks, sink }
    }

    fn deregister_tasks(&self, session: &Session, registration: &SimpleRegistration<K::Value>) {
        let subscriber = session.subscribers().get::<K>();
        for task in &registration.tasks {
            subscriber.deregister(task, &registration.sink);
        }
    }

    fn init_history(
        &self,
        session: &Session,
        sources: &[K::Source],
        history_type: HistoryType,
        sink: SharedCallback<K::Value>,
    ) -> Option<BackgroundHandle> {
        // Each offset yields one value per source; split them up
        let per_offset = callback_fn(move |values: &Vec<K::Value>| {
            for value in values {
                sink.on_complete(value);
            }
        });
        session
            .subscribers()
            .get::<K>()
            .init_history(sources, history_type, per_offset)
    }
}

/// One batched registration; observers receive all values of a cycle at once
pub struct CombinedStrategy<K>(PhantomData<fn() -> K>);

impl<K> Default for CombinedStrategy<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K: TelemetryKind> ProviderStrategy for CombinedStrategy<K> {
    type Source = K::Source;
    type Data = Vec<K::Value>;
    type Registration = BatchRegistration<K::Value>;

    fn refresh(
        &self,
        session: &Session,
        sources: &[K::Source],
    ) -> Result<Vec<Vec<K::Value>>, ApiError> {
        let values = session.subscribers().get::<K>().refresh(sources)?;
        Ok(vec![values])
    }

    fn register_tasks(
        &self,
        session: &Session,
        sources: &[K::Source],
        sink: SharedCallback<Vec<K::Value>>,
    ) -> BatchRegistration<K::Value> {
        session.subscribers().get::<K>().register_batch(sources, sink)
    }

    fn deregister_tasks(&self, session: &Session, registration: &BatchRegistration<K::Value>) {
        session
            .subscribers()
            .get::<K>()
            .deregister_batch(registration);
    }

    fn init_history(
        &self,
        session: &Session,
        sources: &[K::Source],
        history_type: HistoryType,
        sink: SharedCallback<Vec<K::Value>>,
    ) -> Option<BackgroundHandle> {
        session
            .subscribers()
            .get::<K>()
            .init_history(sources, history_type, sink)
    }

    fn reset(&self, registration: &BatchRegistration<K::Value>) {
        registration.batched().reset();
    }
}
