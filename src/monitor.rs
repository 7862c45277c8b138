//! Console monitor
//!
//! Wires a simulated fabric to one session and three providers (group
//! summaries, port counters and the fabric state summary) and turns
//! everything the providers deliver into [`MonitorEvent`]s on a channel.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use fabric_monitor_core::{
    CombinedDataProvider, DataObserver, GroupInfoKind, PortCountersKind, ProgressObserver,
    Session, SimpleDataProvider, SourceObserver, StateSummaryKind,
};
use fabric_monitor_sources::{spawn_sweeper, SimulatedFabric, Sweeper, ALL_GROUP};
use fabric_monitor_types::{
    FabricSource, GroupInfo, GroupSource, HistoryType, PortCounters, SourceKey, StateSummary,
};
use log::{debug, info, trace};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage of a source set change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChange {
    ToAdd,
    Added,
    ToRemove,
    Removed,
}

impl fmt::Display for SourceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceChange::ToAdd => "adding",
            SourceChange::Added => "added",
            SourceChange::ToRemove => "removing",
            SourceChange::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Something a provider delivered
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Groups {
        history: bool,
        infos: Vec<GroupInfo>,
    },
    Port {
        history: bool,
        counters: PortCounters,
    },
    Summary(StateSummary),
    Reset {
        provider: &'static str,
    },
    Sources {
        provider: &'static str,
        change: SourceChange,
        keys: Vec<String>,
    },
}

impl MonitorEvent {
    pub fn is_history(&self) -> bool {
        matches!(
            self,
            MonitorEvent::Groups { history: true, .. } | MonitorEvent::Port { history: true, .. }
        )
    }
}

fn tag(history: bool) -> &'static str {
    if history {
        "hist"
    } else {
        "live"
    }
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorEvent::Groups { history, infos } => {
                write!(f, "[{}] groups", tag(*history))?;
                for info in infos {
                    write!(
                        f,
                        " | {} img {}{:+}: {} ports {} MB/s {} kpps {} errors",
                        info.group,
                        info.image_id.id,
                        info.image_id.offset,
                        info.num_ports,
                        info.total_mbps,
                        info.total_kpps,
                        info.error_count
                    )?;
                }
                Ok(())
            }
            MonitorEvent::Port { history, counters } => write!(
                f,
                "[{}] port {}:{} img {}{:+}: xmit {} rcv {} errors {}",
                tag(*history),
                counters.lid,
                counters.port,
                counters.image_id.id,
                counters.image_id.offset,
                counters.xmit_data,
                counters.rcv_data,
                counters.errors
            ),
            MonitorEvent::Summary(summary) => write!(
                f,
                "[live] fabric img {}: {} nodes {} ports {} failed health {:.1}%",
                summary.image_id.id,
                summary.num_nodes,
                summary.num_ports,
                summary.num_failed_ports,
                summary.health_score * 100.0
            ),
            MonitorEvent::Reset { provider } => write!(f, "[{}] reset", provider),
            MonitorEvent::Sources {
                provider,
                change,
                keys,
            } => write!(f, "[{}] {} {}", provider, change, keys.join(", ")),
        }
    }
}

/// Observer that forwards every delivery onto a channel
pub struct ChannelObserver {
    provider: &'static str,
    tx: Sender<MonitorEvent>,
}

impl ChannelObserver {
    pub fn new(provider: &'static str, tx: Sender<MonitorEvent>) -> Arc<Self> {
        Arc::new(Self { provider, tx })
    }

    fn send(&self, event: MonitorEvent) {
        if self.tx.send(event).is_err() {
            trace!("{}: monitor channel closed", self.provider);
        }
    }

    fn sources<S: SourceKey>(&self, change: SourceChange, sources: &[S]) {
        self.send(MonitorEvent::Sources {
            provider: self.provider,
            change,
            keys: sources.iter().map(SourceKey::key).collect(),
        });
    }
}

impl DataObserver<Vec<GroupInfo>> for ChannelObserver {
    fn process_data(&self, data: &Vec<GroupInfo>) {
        self.send(MonitorEvent::Groups {
            history: false,
            infos: data.clone(),
        });
    }

    fn process_history(&self, data: &Vec<GroupInfo>) {
        self.send(MonitorEvent::Groups {
            history: true,
            infos: data.clone(),
        });
    }

    fn reset(&self) {
        self.send(MonitorEvent::Reset {
            provider: self.provider,
        });
    }
}

impl DataObserver<PortCounters> for ChannelObserver {
    fn process_data(&self, data: &PortCounters) {
        self.send(MonitorEvent::Port {
            history: false,
            counters: data.clone(),
        });
    }

    fn process_history(&self, data: &PortCounters) {
        self.send(MonitorEvent::Port {
            history: true,
            counters: data.clone(),
        });
    }

    fn reset(&self) {
        self.send(MonitorEvent::Reset {
            provider: self.provider,
        });
    }
}

impl DataObserver<StateSummary> for ChannelObserver {
    fn process_data(&self, data: &StateSummary) {
        self.send(MonitorEvent::Summary(data.clone()));
    }
}

impl<S: SourceKey> SourceObserver<S> for ChannelObserver {
    fn sources_to_add(&self, sources: &[S]) {
        self.sources(SourceChange::ToAdd, sources);
    }

    fn sources_added(&self, sources: &[S]) {
        self.sources(SourceChange::Added, sources);
    }

    fn sources_to_remove(&self, sources: &[S]) {
        self.sources(SourceChange::ToRemove, sources);
    }

    fn sources_removed(&self, sources: &[S]) {
        self.sources(SourceChange::Removed, sources);
    }
}

struct LogProgress(&'static str);

impl ProgressObserver for LogProgress {
    fn on_progress(&self, done: usize, total: usize) {
        debug!("{}: refresh {}/{}", self.0, done, total);
    }

    fn on_finish(&self) {
        debug!("{}: refresh finished", self.0);
    }
}

/// Counters reported when the monitor shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
    pub sweeps: u64,
    pub api_calls: u64,
    pub tasks_left: usize,
}

impl fmt::Display for MonitorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sweeps, {} management API calls, {} tasks left",
            self.sweeps, self.api_calls, self.tasks_left
        )
    }
}

/// A running monitor
pub struct Monitor {
    fabric: Arc<SimulatedFabric>,
    session: Arc<Session>,
    sweeper: Option<Sweeper>,
    groups: Arc<CombinedDataProvider<GroupInfoKind>>,
    ports: Arc<SimpleDataProvider<PortCountersKind>>,
    summary: Arc<SimpleDataProvider<StateSummaryKind>>,
    events: Receiver<MonitorEvent>,
}

impl Monitor {
    /// Start the fabric, its sweeper and the providers described by `config`.
    ///
    /// With no groups configured the "All" group is watched.
    pub fn start(config: &AppConfig) -> Result<Self> {
        let fabric = Arc::new(SimulatedFabric::new(config.simulation.clone()));
        let sweeper = spawn_sweeper(Arc::clone(&fabric)).context("Failed to start sweeper")?;
        let session = Session::connect(fabric.clone(), &config.engine)
            .context("Failed to start scheduler")?;

        let (tx, events) = unbounded();
        let groups = CombinedDataProvider::<GroupInfoKind>::combined("groups");
        let ports = SimpleDataProvider::<PortCountersKind>::simple("ports");
        let summary = SimpleDataProvider::<StateSummaryKind>::simple("summary");

        let observer = ChannelObserver::new("groups", tx.clone());
        groups.add_observer(observer.clone());
        groups.add_source_observer(observer);
        let observer = ChannelObserver::new("ports", tx.clone());
        ports.add_observer(observer.clone());
        ports.add_source_observer(observer);
        summary.add_observer(ChannelObserver::new("summary", tx));

        let monitor = Self {
            fabric,
            session,
            sweeper: Some(sweeper),
            groups,
            ports,
            summary,
            events,
        };
        monitor.set_history_type(config.engine.history_type);

        let group_sources = if config.watch.groups.is_empty() {
            vec![GroupSource::new(ALL_GROUP)]
        } else {
            config.watch.groups.clone()
        };
        monitor.groups.set_context(
            &monitor.session,
            group_sources,
            Some(Arc::new(LogProgress("groups"))),
        );
        monitor.ports.set_context(
            &monitor.session,
            config.watch.ports.clone(),
            Some(Arc::new(LogProgress("ports"))),
        );
        monitor
            .summary
            .set_context(&monitor.session, vec![FabricSource], None);

        info!(
            "Monitor started: {} groups, {} ports, refresh every {} ms",
            monitor.groups.sources().len(),
            monitor.ports.sources().len(),
            monitor.session.scheduler().refresh_rate()
        );
        Ok(monitor)
    }

    pub fn fabric(&self) -> &Arc<SimulatedFabric> {
        &self.fabric
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Switch every history-capable provider to `history_type`
    pub fn set_history_type(&self, history_type: HistoryType) {
        self.groups.set_history_type(history_type, false);
        self.ports.set_history_type(history_type, false);
    }

    pub fn set_refresh_rate(&self, rate_ms: u64) {
        self.session.scheduler().update_refresh_rate(rate_ms);
    }

    /// Hand events to `sink` until `duration` elapses. Returns how many
    /// events were handled.
    pub fn run_for(&self, duration: Duration, mut sink: impl FnMut(&MonitorEvent)) -> usize {
        let deadline = Instant::now() + duration;
        let mut handled = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    sink(&event);
                    handled += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        handled
    }

    /// Release every provider, disconnect and stop the sweeper
    pub fn shutdown(mut self) -> MonitorReport {
        self.groups.clear();
        self.ports.clear();
        self.summary.clear();
        let tasks_left = self.session.subscribers().task_count();
        self.session.disconnect();
        let sweeps = self.sweeper.take().map(Sweeper::stop).unwrap_or(0);

        let report = MonitorReport {
            sweeps,
            api_calls: self.fabric.total_calls(),
            tasks_left,
        };
        info!("Monitor stopped: {}", report);
        report
    }
}
