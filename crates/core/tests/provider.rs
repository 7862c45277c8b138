mod common;

use common::{session, wait_until, Gate, MockFabric, IDLE_RATE_MS};
use fabric_monitor_core::{
    CombinedDataProvider, DataObserver, ProgressObserver, SimpleDataProvider, SourceObserver,
    PortCountersKind,
};
use fabric_monitor_types::{
    AttributeKind, HistoryType, PortCounters, PortSource, SourceKey, TaskKey,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    live: Mutex<Vec<PortCounters>>,
    history: Mutex<Vec<PortCounters>>,
    resets: AtomicUsize,
}

impl Recorder {
    fn live_lids(&self) -> Vec<u32> {
        self.live.lock().unwrap().iter().map(|c| c.lid).collect()
    }
}

impl DataObserver<PortCounters> for Recorder {
    fn process_data(&self, data: &PortCounters) {
        self.live.lock().unwrap().push(data.clone());
    }

    fn process_history(&self, data: &PortCounters) {
        self.history.lock().unwrap().push(data.clone());
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct BatchRecorder {
    batches: Mutex<Vec<Vec<PortCounters>>>,
}

impl DataObserver<Vec<PortCounters>> for BatchRecorder {
    fn process_data(&self, data: &Vec<PortCounters>) {
        self.batches.lock().unwrap().push(data.clone());
    }
}

#[derive(Default)]
struct SourceLog {
    events: Mutex<Vec<String>>,
}

impl SourceLog {
    fn push(&self, event: &str, sources: &[PortSource]) {
        let keys: Vec<String> = sources.iter().map(|s| s.key()).collect();
        self.events
            .lock()
            .unwrap()
            .push(format!("{} {}", event, keys.join(",")));
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SourceObserver<PortSource> for SourceLog {
    fn sources_to_add(&self, sources: &[PortSource]) {
        self.push("to_add", sources);
    }
    fn sources_added(&self, sources: &[PortSource]) {
        self.push("added", sources);
    }
    fn sources_to_remove(&self, sources: &[PortSource]) {
        self.push("to_remove", sources);
    }
    fn sources_removed(&self, sources: &[PortSource]) {
        self.push("removed", sources);
    }
}

/// Holds its first live or history delivery until released
#[derive(Default)]
struct Blocker {
    on_history: bool,
    held: AtomicBool,
    entered: Gate,
    release: Gate,
}

impl Blocker {
    fn live() -> Self {
        Self::default()
    }

    fn history() -> Self {
        Self {
            on_history: true,
            ..Default::default()
        }
    }

    fn hold(&self) {
        if !self.held.swap(true, Ordering::SeqCst) {
            self.entered.open();
            self.release.wait();
        }
    }
}

impl DataObserver<PortCounters> for Blocker {
    fn process_data(&self, _data: &PortCounters) {
        if !self.on_history {
            self.hold();
        }
    }

    fn process_history(&self, _data: &PortCounters) {
        if self.on_history {
            self.hold();
        }
    }
}

/// Everything one observer saw, in arrival order
#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl DataObserver<PortCounters> for EventLog {
    fn process_data(&self, data: &PortCounters) {
        self.push(format!("live {}", data.lid));
    }

    fn process_history(&self, data: &PortCounters) {
        self.push(format!("hist {}", data.image_id.offset));
    }

    fn reset(&self) {
        self.push("reset".to_string());
    }
}

impl SourceObserver<PortSource> for EventLog {
    fn sources_removed(&self, _sources: &[PortSource]) {
        self.push("removed".to_string());
    }
}

#[derive(Default)]
struct Progress {
    steps: Mutex<Vec<(usize, usize)>>,
    finished: AtomicUsize,
}

impl ProgressObserver for Progress {
    fn on_progress(&self, done: usize, total: usize) {
        self.steps.lock().unwrap().push((done, total));
    }

    fn on_finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn port_key(lid: u32, port: u8) -> TaskKey {
    TaskKey::new(AttributeKind::PortCounters, PortSource::new(lid, port).key())
}

#[test]
fn test_set_context_registers_and_refreshes() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api.clone(), IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let recorder = Arc::new(Recorder::default());
    let sources = Arc::new(SourceLog::default());
    let progress = Arc::new(Progress::default());
    provider.add_observer(recorder.clone());
    provider.add_source_observer(sources.clone());

    let refresh = provider.set_context(
        &session,
        vec![PortSource::new(5, 1), PortSource::new(6, 2)],
        Some(progress.clone()),
    );
    assert!(refresh.unwrap().wait());

    assert!(provider.is_bound());
    assert_eq!(provider.session_id(), Some(session.id()));
    assert_eq!(session.subscribers().task_count(), 2);
    assert_eq!(recorder.live_lids(), vec![5, 6]);
    assert_eq!(*progress.steps.lock().unwrap(), vec![(1, 2), (2, 2)]);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
    assert_eq!(sources.events(), vec!["to_add 5:1,6:2", "added 5:1,6:2"]);
}

#[test]
fn test_clear_twice_is_idempotent() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let sources = Arc::new(SourceLog::default());
    provider.add_source_observer(sources.clone());

    provider.set_context(&session, vec![PortSource::new(5, 1)], None);
    assert_eq!(session.subscribers().task_count(), 1);

    assert!(provider.clear());
    assert!(!provider.clear());
    assert!(!provider.is_bound());
    assert!(provider.sources().is_empty());
    assert_eq!(session.subscribers().task_count(), 0);
    assert_eq!(
        sources.events(),
        vec!["to_add 5:1", "added 5:1", "to_remove 5:1", "removed 5:1"]
    );
}

#[test]
fn test_empty_context_clears() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let progress = Arc::new(Progress::default());

    provider.set_context(&session, vec![PortSource::new(5, 1)], None);
    assert!(provider
        .set_context(&session, Vec::new(), Some(progress.clone()))
        .is_none());
    assert!(!provider.is_bound());
    assert_eq!(session.subscribers().task_count(), 0);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_set_equal_sources_only_refresh() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let recorder = Arc::new(Recorder::default());
    let sources = Arc::new(SourceLog::default());
    provider.add_observer(recorder.clone());
    provider.add_source_observer(sources.clone());

    let first = provider.set_context(
        &session,
        vec![PortSource::new(5, 1), PortSource::new(6, 1)],
        None,
    );
    assert!(first.unwrap().wait());
    let task = session
        .subscribers()
        .port_counters
        .registry()
        .get(&port_key(5, 1))
        .unwrap();

    let second = provider.set_context(
        &session,
        vec![PortSource::new(6, 1), PortSource::new(5, 1)],
        None,
    );
    assert!(second.unwrap().wait());

    // Same task instance, no source notifications, two refreshes delivered
    let again = session
        .subscribers()
        .port_counters
        .registry()
        .get(&port_key(5, 1))
        .unwrap();
    assert!(Arc::ptr_eq(&task, &again));
    assert_eq!(sources.events().len(), 2);
    assert_eq!(recorder.live.lock().unwrap().len(), 4);
}

#[test]
fn test_changed_sources_rebind() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let sources = Arc::new(SourceLog::default());
    let recorder = Arc::new(Recorder::default());
    provider.add_source_observer(sources.clone());
    provider.add_observer(recorder.clone());

    provider.set_context(&session, vec![PortSource::new(5, 1)], None);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 1);
    provider.set_context(&session, vec![PortSource::new(7, 3)], None);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 2);

    assert_eq!(provider.sources(), vec![PortSource::new(7, 3)]);
    let registry = session.subscribers().port_counters.registry();
    assert!(registry.get(&port_key(5, 1)).is_none());
    assert!(registry.get(&port_key(7, 3)).is_some());
    assert_eq!(
        sources.events(),
        vec![
            "to_add 5:1",
            "added 5:1",
            "to_remove 5:1",
            "removed 5:1",
            "to_add 7:3",
            "added 7:3"
        ]
    );

    // The same set again keeps observer state, an empty set resets it
    provider.set_context(&session, vec![PortSource::new(7, 3)], None);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 2);
    provider.set_context(&session, Vec::new(), None);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 3);
    assert!(!provider.is_bound());
}

#[test]
fn test_live_cycle_reaches_observers() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let recorder = Arc::new(Recorder::default());
    provider.add_observer(recorder.clone());

    assert!(provider
        .set_context(&session, vec![PortSource::new(5, 1)], None)
        .unwrap()
        .wait());
    recorder.live.lock().unwrap().clear();

    let task = session
        .subscribers()
        .port_counters
        .registry()
        .get(&port_key(5, 1))
        .unwrap();
    task.run_cycle();
    assert_eq!(recorder.live_lids(), vec![5]);

    let observer: Arc<dyn DataObserver<PortCounters>> = recorder.clone();
    provider.remove_observer(&observer);
    task.run_cycle();
    assert_eq!(recorder.live_lids(), vec![5]);
}

#[test]
fn test_providers_share_one_task_per_source() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api.clone(), IDLE_RATE_MS);
    let first = SimpleDataProvider::<PortCountersKind>::simple("left");
    let second = SimpleDataProvider::<PortCountersKind>::simple("right");
    let left = Arc::new(Recorder::default());
    let right = Arc::new(Recorder::default());
    first.add_observer(left.clone());
    second.add_observer(right.clone());

    first.set_context(&session, vec![PortSource::new(5, 1)], None).unwrap().wait();
    second.set_context(&session, vec![PortSource::new(5, 1)], None).unwrap().wait();
    assert_eq!(session.subscribers().task_count(), 1);

    let task = session
        .subscribers()
        .port_counters
        .registry()
        .get(&port_key(5, 1))
        .unwrap();
    assert_eq!(task.callback_count(), 2);

    let before = api.port_calls();
    task.run_cycle();
    assert_eq!(api.port_calls(), before + 1);
    assert_eq!(left.live.lock().unwrap().len(), 2);
    assert_eq!(right.live.lock().unwrap().len(), 2);

    // Dropping one provider releases only its own callback
    drop(first);
    assert_eq!(task.callback_count(), 1);
    assert_eq!(session.subscribers().task_count(), 1);
}

#[test]
fn test_stale_refresh_is_dropped() {
    let api = Arc::new(MockFabric::new(1000, 10).gated(99));
    let session = session(api.clone(), IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let recorder = Arc::new(Recorder::default());
    provider.add_observer(recorder.clone());

    let slow = provider
        .set_context(&session, vec![PortSource::new(99, 1)], None)
        .unwrap();
    let fast = provider
        .set_context(&session, vec![PortSource::new(5, 1)], None)
        .unwrap();
    assert!(fast.wait());
    api.gate.open();
    assert!(slow.wait());

    assert_eq!(recorder.live_lids(), vec![5]);
}

#[test]
fn test_session_change_rebinds() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let old_session = session(api.clone(), IDLE_RATE_MS);
    let new_session = session(api, IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let sources = Arc::new(SourceLog::default());
    provider.add_source_observer(sources.clone());

    provider.set_context(&old_session, vec![PortSource::new(5, 1)], None);
    provider.set_context(&new_session, vec![PortSource::new(5, 1)], None);

    assert_eq!(provider.session_id(), Some(new_session.id()));
    assert_eq!(old_session.subscribers().task_count(), 0);
    assert_eq!(new_session.subscribers().task_count(), 1);
    assert_eq!(sources.events().len(), 6);
}

#[test]
fn test_history_backfill_and_type_changes() {
    let api = Arc::new(MockFabric::new(1000, 100));
    let session = session(api.clone(), 5000);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let recorder = Arc::new(Recorder::default());
    provider.add_observer(recorder.clone());

    provider.set_history_type(HistoryType::LastHour, false);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 1);
    assert!(!provider.is_backfilling());

    provider.set_context(&session, vec![PortSource::new(5, 1)], None);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 2);
    assert!(wait_until(Duration::from_secs(5), || {
        recorder.history.lock().unwrap().len() == 5
    }));
    assert!(wait_until(Duration::from_secs(5), || !provider.is_backfilling()));
    assert_eq!(*api.history_offsets.lock().unwrap(), vec![-1, -2, -3, -4, -5]);
    let offsets: Vec<i32> = recorder
        .history
        .lock()
        .unwrap()
        .iter()
        .map(|c| c.image_id.offset)
        .collect();
    assert_eq!(offsets, vec![-1, -2, -3, -4, -5]);

    // Unchanged type is a no-op, forcing resets again
    provider.set_history_type(HistoryType::LastHour, false);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 2);
    provider.set_history_type(HistoryType::Current, false);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 3);
    provider.set_history_type(HistoryType::Current, true);
    assert_eq!(recorder.resets.load(Ordering::SeqCst), 4);
    assert_eq!(provider.history_type(), HistoryType::Current);
    assert_eq!(recorder.history.lock().unwrap().len(), 5);
}

#[test]
fn test_history_stops_at_retention() {
    let api = Arc::new(MockFabric::new(1000, 2));
    let session = session(api.clone(), 5000);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let recorder = Arc::new(Recorder::default());
    provider.add_observer(recorder.clone());

    provider.set_history_type(HistoryType::LastDay, false);
    provider.set_context(&session, vec![PortSource::new(5, 1)], None);
    assert!(wait_until(Duration::from_secs(5), || {
        api.history_offsets.lock().unwrap().len() == 3
    }));
    assert!(wait_until(Duration::from_secs(5), || !provider.is_backfilling()));
    assert_eq!(recorder.history.lock().unwrap().len(), 2);
}

#[test]
fn test_combined_provider_delivers_whole_cycles() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = CombinedDataProvider::<PortCountersKind>::combined("fabric ports");
    let recorder = Arc::new(BatchRecorder::default());
    provider.add_observer(recorder.clone());

    let ports = vec![
        PortSource::new(3, 1),
        PortSource::new(1, 1),
        PortSource::new(2, 1),
    ];
    assert!(provider
        .set_context(&session, ports.clone(), None)
        .unwrap()
        .wait());
    assert_eq!(recorder.batches.lock().unwrap().len(), 1);

    let registry = session.subscribers().port_counters.registry();
    let tasks: Vec<_> = ports
        .iter()
        .map(|p| registry.get(&port_key(p.lid, p.port)).unwrap())
        .collect();

    tasks[0].run_cycle();
    tasks[1].run_cycle();
    assert_eq!(recorder.batches.lock().unwrap().len(), 1);
    tasks[2].run_cycle();

    let batches = recorder.batches.lock().unwrap();
    assert_eq!(batches.len(), 2);
    let lids: Vec<u32> = batches[1].iter().map(|c| c.lid).collect();
    assert_eq!(lids, vec![3, 1, 2]);
}

#[test]
fn test_combined_provider_clear_releases_batch() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = CombinedDataProvider::<PortCountersKind>::combined("fabric ports");

    provider.set_context(
        &session,
        vec![PortSource::new(1, 1), PortSource::new(2, 1)],
        None,
    );
    assert_eq!(session.subscribers().task_count(), 2);
    assert!(provider.clear());
    assert_eq!(session.subscribers().task_count(), 0);
}

#[test]
fn test_refresh_while_idle_finishes_immediately() {
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let progress = Arc::new(Progress::default());
    assert!(provider.on_refresh(Some(progress.clone())).is_none());
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_history_type_change_drops_in_flight_backfill() {
    let api = Arc::new(MockFabric::new(1000, 100));
    let session = session(api, 5000);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let blocker = Arc::new(Blocker::history());
    let log = Arc::new(EventLog::default());
    provider.add_observer(blocker.clone());
    provider.add_observer(log.clone());

    provider.set_history_type(HistoryType::LastHour, false);
    provider.set_context(&session, vec![PortSource::new(5, 1)], None);
    blocker.entered.wait();

    let changer = {
        let provider = Arc::clone(&provider);
        thread::spawn(move || provider.set_history_type(HistoryType::Current, false))
    };
    // The change waits for the sample that is already being delivered
    thread::sleep(Duration::from_millis(100));
    assert!(!changer.is_finished());

    blocker.release.open();
    changer.join().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !provider.is_backfilling()));
    thread::sleep(Duration::from_millis(100));

    let events = log.events();
    let last_reset = events.iter().rposition(|e| e == "reset").unwrap();
    assert!(events[..last_reset].contains(&"hist -1".to_string()));
    assert!(events[last_reset + 1..].iter().all(|e| !e.starts_with("hist")));
}

#[test]
fn test_clear_waits_for_in_flight_refresh() {
    let api = Arc::new(MockFabric::new(1000, 10));
    let session = session(api, IDLE_RATE_MS);
    let provider = SimpleDataProvider::<PortCountersKind>::simple("ports");
    let blocker = Arc::new(Blocker::live());
    let log = Arc::new(EventLog::default());
    provider.add_observer(blocker.clone());
    provider.add_observer(log.clone());
    provider.add_source_observer(log.clone());

    let refresh = provider
        .set_context(
            &session,
            vec![PortSource::new(5, 1), PortSource::new(6, 1)],
            None,
        )
        .unwrap();
    blocker.entered.wait();

    let clearer = {
        let provider = Arc::clone(&provider);
        thread::spawn(move || provider.clear())
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!clearer.is_finished());
    assert!(provider.is_bound());

    blocker.release.open();
    assert!(clearer.join().unwrap());
    assert!(refresh.wait());

    let events = log.events();
    let removed = events.iter().position(|e| e == "removed").unwrap();
    assert_eq!(&events[..removed], &["reset", "live 5", "live 6"]);
    assert_eq!(events.len(), removed + 1);
}
