//! Session-scoped binding of a source set to subscriptions
//!
//! A `DataProvider` tracks the sources a consumer is currently interested in.
//! When the set changes it deregisters what it registered before, registers
//! the new sources, optionally starts a history backfill, and forwards every
//! result to its observers. The per-kind parts live in a `ProviderStrategy`.
//!
//! Observers run on pool threads. They must not call back into the provider
//! that notifies them, since a concurrent source change waits for in-flight
//! deliveries to finish.
//!
//! Refresh results and backfill samples are checked and delivered under one
//! delivery lock. Source and history type changes invalidate them under the
//! same lock, so nothing from a previous binding or backfill reaches an
//! observer after it was reset or told the sources were removed.

mod strategy;

pub use strategy::{CombinedStrategy, ProviderStrategy, SimpleRegistration, SimpleStrategy};

use crate::callback::{same_callback, Callback, SharedCallback};
use crate::scheduler::BackgroundHandle;
use crate::session::Session;
use crate::subscriber::TelemetryKind;
use crate::sync::lock;
use fabric_monitor_types::HistoryType;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Receives provider data
pub trait DataObserver<D>: Send + Sync {
    fn process_data(&self, data: &D);

    /// A sample replayed by a history backfill, oldest offsets last
    fn process_history(&self, data: &D) {
        self.process_data(data)
    }

    /// Drop accumulated samples; called when the history type or the
    /// source set changes
    fn reset(&self) {}
}

/// Notified around source set changes
pub trait SourceObserver<S>: Send + Sync {
    fn sources_to_add(&self, _sources: &[S]) {}
    fn sources_added(&self, _sources: &[S]) {}
    fn sources_to_remove(&self, _sources: &[S]) {}
    fn sources_removed(&self, _sources: &[S]) {}
}

/// Progress of an immediate refresh
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, _done: usize, _total: usize) {}
    fn on_finish(&self) {}
}

pub type SimpleDataProvider<K> = DataProvider<SimpleStrategy<K>>;
pub type CombinedDataProvider<K> = DataProvider<CombinedStrategy<K>>;

fn same_set<S: Eq + Hash>(a: &[S], b: &[S]) -> bool {
    a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

struct Binding<P: ProviderStrategy> {
    session: Arc<Session>,
    sources: Vec<P::Source>,
    registration: P::Registration,
}

struct ProviderState<P: ProviderStrategy> {
    binding: Option<Binding<P>>,
    history: Option<BackgroundHandle>,
    history_type: HistoryType,
}

/// Forwards live task results to the provider's observers
struct LiveSink<P: ProviderStrategy> {
    provider: Weak<DataProvider<P>>,
}

impl<P: ProviderStrategy> Callback<P::Data> for LiveSink<P> {
    fn on_complete(&self, data: &P::Data) {
        if let Some(provider) = self.provider.upgrade() {
            provider.notify_data(data);
        }
    }
}

/// Forwards backfill samples while its backfill is still the current one
struct HistorySink<P: ProviderStrategy> {
    provider: Weak<DataProvider<P>>,
    generation: u64,
}

impl<P: ProviderStrategy> Callback<P::Data> for HistorySink<P> {
    fn on_complete(&self, data: &P::Data) {
        let Some(provider) = self.provider.upgrade() else {
            return;
        };
        let _delivery = lock(&provider.delivery);
        if provider.history_generation.load(Ordering::Acquire) != self.generation {
            debug!("{}: dropping sample of a superseded backfill", provider.name);
            return;
        }
        for observer in provider.data_observers() {
            observer.process_history(data);
        }
    }
}

pub struct DataProvider<P: ProviderStrategy> {
    name: String,
    strategy: P,
    /// Serialises source and history type transitions
    transition: Mutex<()>,
    state: Mutex<ProviderState<P>>,
    /// Held while refresh results and backfill samples reach observers
    delivery: Mutex<()>,
    history_generation: AtomicU64,
    observers: Mutex<Vec<Arc<dyn DataObserver<P::Data>>>>,
    source_observers: Mutex<Vec<Arc<dyn SourceObserver<P::Source>>>>,
}

impl<K: TelemetryKind> DataProvider<SimpleStrategy<K>> {
    pub fn simple(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, SimpleStrategy::default())
    }
}

impl<K: TelemetryKind> DataProvider<CombinedStrategy<K>> {
    pub fn combined(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, CombinedStrategy::default())
    }
}

impl<P: ProviderStrategy> DataProvider<P> {
    pub fn new(name: impl Into<String>, strategy: P) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            strategy,
            transition: Mutex::new(()),
            state: Mutex::new(ProviderState {
                binding: None,
                history: None,
                history_type: HistoryType::Current,
            }),
            delivery: Mutex::new(()),
            history_generation: AtomicU64::new(0),
            observers: Mutex::new(Vec::new()),
            source_observers: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Currently bound sources, empty when idle
    pub fn sources(&self) -> Vec<P::Source> {
        lock(&self.state)
            .binding
            .as_ref()
            .map(|binding| binding.sources.clone())
            .unwrap_or_default()
    }

    pub fn history_type(&self) -> HistoryType {
        lock(&self.state).history_type
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.state).binding.is_some()
    }

    /// Id of the session the provider is bound to
    pub fn session_id(&self) -> Option<Uuid> {
        lock(&self.state)
            .binding
            .as_ref()
            .map(|binding| binding.session.id())
    }

    /// Whether a history backfill is still running
    pub fn is_backfilling(&self) -> bool {
        lock(&self.state)
            .history
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn add_observer(&self, observer: Arc<dyn DataObserver<P::Data>>) {
        let mut observers = lock(&self.observers);
        if !observers.iter().any(|o| same_callback(o, &observer)) {
            observers.push(observer);
        }
    }

    pub fn remove_observer(&self, observer: &Arc<dyn DataObserver<P::Data>>) {
        lock(&self.observers).retain(|o| !same_callback(o, observer));
    }

    pub fn add_source_observer(&self, observer: Arc<dyn SourceObserver<P::Source>>) {
        let mut observers = lock(&self.source_observers);
        if !observers.iter().any(|o| same_callback(o, &observer)) {
            observers.push(observer);
        }
    }

    pub fn remove_source_observer(&self, observer: &Arc<dyn SourceObserver<P::Source>>) {
        lock(&self.source_observers).retain(|o| !same_callback(o, observer));
    }

    fn data_observers(&self) -> Vec<Arc<dyn DataObserver<P::Data>>> {
        lock(&self.observers).clone()
    }

    fn reset_observers(&self) {
        for observer in self.data_observers() {
            observer.reset();
        }
    }

    fn notify_data(&self, data: &P::Data) {
        for observer in self.data_observers() {
            observer.process_data(data);
        }
    }

    fn notify_sources(&self, notify: impl Fn(&dyn SourceObserver<P::Source>)) {
        let observers = lock(&self.source_observers).clone();
        for observer in observers {
            notify(observer.as_ref());
        }
    }

    /// Bind to `sources` within `session`.
    ///
    /// An empty set clears the provider. A set equal to the bound one in the
    /// same session only triggers an immediate refresh. Anything else
    /// replaces the binding and then refreshes. Observers are reset whenever
    /// the set changes. Returns the refresh job, if one was started.
    pub fn set_context(
        self: &Arc<Self>,
        session: &Arc<Session>,
        sources: Vec<P::Source>,
        progress: Option<Arc<dyn ProgressObserver>>,
    ) -> Option<BackgroundHandle> {
        {
            let _transition = lock(&self.transition);
            if sources.is_empty() {
                self.clear_locked();
                self.reset_observers();
                if let Some(progress) = progress {
                    progress.on_finish();
                }
                return None;
            }

            let unchanged = lock(&self.state).binding.as_ref().is_some_and(|binding| {
                binding.session.id() == session.id() && same_set(&binding.sources, &sources)
            });
            if unchanged {
                debug!("{}: source set unchanged, refreshing only", self.name);
            } else {
                self.clear_locked();
                self.reset_observers();
                self.bind(session, sources);
            }
        }
        self.on_refresh(progress)
    }

    fn bind(self: &Arc<Self>, session: &Arc<Session>, sources: Vec<P::Source>) {
        self.notify_sources(|o| o.sources_to_add(&sources));

        let sink: SharedCallback<P::Data> = Arc::new(LiveSink {
            provider: Arc::downgrade(self),
        });
        let registration = self.strategy.register_tasks(session, &sources, sink);

        let history_type = self.history_type();
        let history = self.start_history(session, &sources, history_type);
        info!(
            "{}: bound {} sources in session {} ({})",
            self.name,
            sources.len(),
            session.id(),
            history_type
        );

        {
            let mut state = lock(&self.state);
            state.binding = Some(Binding {
                session: Arc::clone(session),
                sources: sources.clone(),
                registration,
            });
            state.history = history;
        }
        self.notify_sources(|o| o.sources_added(&sources));
    }

    fn start_history(
        self: &Arc<Self>,
        session: &Session,
        sources: &[P::Source],
        history_type: HistoryType,
    ) -> Option<BackgroundHandle> {
        if history_type.is_current() {
            return None;
        }
        let generation = self.history_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let sink: SharedCallback<P::Data> = Arc::new(HistorySink {
            provider: Arc::downgrade(self),
            generation,
        });
        self.strategy
            .init_history(session, sources, history_type, sink)
    }

    /// Change the history type. A no-op when unchanged unless `forced`;
    /// otherwise observers are reset, a running backfill is cancelled, and a
    /// new one starts for a non-current type with sources bound.
    pub fn set_history_type(self: &Arc<Self>, history_type: HistoryType, forced: bool) {
        let _transition = lock(&self.transition);
        let binding = {
            let _delivery = lock(&self.delivery);
            let (binding, previous) = {
                let mut state = lock(&self.state);
                if state.history_type == history_type && !forced {
                    return;
                }
                state.history_type = history_type;
                let binding = state
                    .binding
                    .as_ref()
                    .map(|b| (Arc::clone(&b.session), b.sources.clone()));
                (binding, state.history.take())
            };

            self.history_generation.fetch_add(1, Ordering::AcqRel);
            if let Some(previous) = previous {
                previous.cancel();
            }
            if let Some(bound) = lock(&self.state).binding.as_ref() {
                self.strategy.reset(&bound.registration);
            }
            self.reset_observers();
            binding
        };
        info!("{}: history type set to {}", self.name, history_type);

        if let Some((session, sources)) = binding {
            let history = self.start_history(&session, &sources, history_type);
            lock(&self.state).history = history;
        }
    }

    /// Fetch the bound sources once on the background pool and deliver the
    /// result, unless the binding changed while the fetch was running.
    pub fn on_refresh(
        self: &Arc<Self>,
        progress: Option<Arc<dyn ProgressObserver>>,
    ) -> Option<BackgroundHandle> {
        let bound = lock(&self.state)
            .binding
            .as_ref()
            .map(|b| (Arc::clone(&b.session), b.sources.clone()));
        let Some((session, sources)) = bound else {
            debug!("{}: refresh requested while idle", self.name);
            if let Some(progress) = progress {
                progress.on_finish();
            }
            return None;
        };

        let provider = Arc::downgrade(self);
        let job_session = Arc::clone(&session);
        let name = format!("{} refresh", self.name);
        Some(session.scheduler().submit_background(name, move |token| {
            if let Some(provider) = provider.upgrade() {
                provider.run_refresh(
                    &job_session,
                    &sources,
                    token.is_cancelled(),
                    progress.as_deref(),
                );
            }
            if let Some(progress) = progress.as_deref() {
                progress.on_finish();
            }
        }))
    }

    fn run_refresh(
        &self,
        session: &Session,
        sources: &[P::Source],
        cancelled: bool,
        progress: Option<&dyn ProgressObserver>,
    ) {
        if cancelled {
            return;
        }
        let items = match self.strategy.refresh(session, sources) {
            Ok(items) => items,
            Err(e) => {
                warn!("{}: refresh failed: {}", self.name, e);
                return;
            }
        };

        let _delivery = lock(&self.delivery);
        let still_bound = lock(&self.state).binding.as_ref().is_some_and(|binding| {
            binding.session.id() == session.id() && same_set(&binding.sources, sources)
        });
        if !still_bound {
            debug!("{}: dropping stale refresh result", self.name);
            return;
        }

        let total = items.len();
        for (index, item) in items.iter().enumerate() {
            self.notify_data(item);
            if let Some(progress) = progress {
                progress.on_progress(index + 1, total);
            }
        }
    }

    /// Deregister everything and go idle. Returns false when already idle.
    pub fn clear(&self) -> bool {
        let _transition = lock(&self.transition);
        self.clear_locked()
    }

    fn clear_locked(&self) -> bool {
        let (binding, history) = {
            let _delivery = lock(&self.delivery);
            self.history_generation.fetch_add(1, Ordering::AcqRel);
            let mut state = lock(&self.state);
            (state.binding.take(), state.history.take())
        };
        if let Some(history) = history {
            history.cancel();
        }
        let Some(binding) = binding else {
            return false;
        };

        self.notify_sources(|o| o.sources_to_remove(&binding.sources));
        self.strategy
            .deregister_tasks(&binding.session, &binding.registration);
        info!(
            "{}: released {} sources in session {}",
            self.name,
            binding.sources.len(),
            binding.session.id()
        );
        self.notify_sources(|o| o.sources_removed(&binding.sources));
        true
    }
}

impl<P: ProviderStrategy> Drop for DataProvider<P> {
    fn drop(&mut self) {
        self.clear_locked();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_set_ignores_order_and_duplicates() {
        assert!(same_set(&[1, 2, 3], &[3, 2, 1]));
        assert!(same_set(&[1, 1, 2], &[2, 1]));
        assert!(!same_set(&[1, 2], &[1, 2, 3]));
        assert!(same_set::<u8>(&[], &[]));
    }
}
