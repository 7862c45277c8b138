//! In-memory fabric implementing the management API
//!
//! Every sweep takes a snapshot of all port counters. Counters grow by seeded
//! pseudo-random traffic, so two fabrics built from the same configuration
//! produce identical telemetry. Snapshots beyond the retention limit are
//! dropped, and history queries that reach past them report `None`.

use crate::config::{SimulationConfig, ALL_GROUP};
use chrono::{DateTime, Utc};
use fabric_monitor_core::{ApiError, ApiResult, ManagementApi};
use fabric_monitor_types::{
    FocusPortEntry, FocusPorts, FocusSelector, GroupInfo, ImageId, ImageInfo, PmConfig,
    PortCounters, StateSummary, VfInfo, VfPortCounters,
};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Peak per-port throughput of the simulated links
const LINK_BYTES_PER_SEC: u64 = 1_250_000_000;

/// Chance that a port logs an error during one sweep
const ERROR_PROBABILITY: f64 = 0.02;

/// Management API methods, for call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    Config,
    GroupInfo,
    VfInfo,
    PortCounters,
    VfPortCounters,
    FocusPorts,
    ImageInfo,
    StateSummary,
    /// Any of the `*_history` methods
    History,
}

const METHOD_COUNT: usize = 9;

impl ApiMethod {
    pub const ALL: [ApiMethod; METHOD_COUNT] = [
        ApiMethod::Config,
        ApiMethod::GroupInfo,
        ApiMethod::VfInfo,
        ApiMethod::PortCounters,
        ApiMethod::VfPortCounters,
        ApiMethod::FocusPorts,
        ApiMethod::ImageInfo,
        ApiMethod::StateSummary,
        ApiMethod::History,
    ];
}

#[derive(Debug, Clone, Default)]
struct PortSample {
    lid: u32,
    port: u8,
    group: usize,
    xmit_data: u64,
    rcv_data: u64,
    xmit_pkts: u64,
    rcv_pkts: u64,
    errors: u64,
    xmit_wait: u64,
    // Growth since the previous sweep
    delta_data: u64,
    delta_pkts: u64,
    delta_errors: u64,
    delta_wait: u64,
}

impl PortSample {
    fn metric(&self, selector: FocusSelector) -> u64 {
        match selector {
            FocusSelector::Utilization => self.delta_data,
            FocusSelector::PacketRate => self.delta_pkts,
            FocusSelector::Errors => self.delta_errors,
            FocusSelector::Congestion => self.delta_wait,
        }
    }
}

struct Snapshot {
    image_id: u64,
    sweep_start: DateTime<Utc>,
    sweep_duration_ms: u64,
    ports: Vec<PortSample>,
}

struct FabricState {
    rng: StdRng,
    next_image: u64,
    /// Oldest first
    snapshots: VecDeque<Snapshot>,
}

impl FabricState {
    fn newest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    /// Snapshot `offset` sweeps away from the one with id `anchor`
    fn relative(&self, anchor: u64, offset: i32) -> Option<&Snapshot> {
        let base = self.snapshots.iter().position(|s| s.image_id == anchor)?;
        let index = base as i64 + offset as i64;
        if index < 0 {
            return None;
        }
        self.snapshots.get(index as usize)
    }

    /// Snapshot `offset` sweeps before the newest one
    fn from_newest(&self, offset: i32) -> Option<&Snapshot> {
        let newest = self.newest()?;
        self.relative(newest.image_id, offset)
    }
}

pub struct SimulatedFabric {
    config: SimulationConfig,
    state: Mutex<FabricState>,
    connected: AtomicBool,
    calls: [AtomicU64; METHOD_COUNT],
}

impl SimulatedFabric {
    /// Build a fabric and take its first sweep
    pub fn new(config: SimulationConfig) -> Self {
        let fabric = Self {
            state: Mutex::new(FabricState {
                rng: StdRng::seed_from_u64(config.seed),
                next_image: 1,
                snapshots: VecDeque::new(),
            }),
            config,
            connected: AtomicBool::new(true),
            calls: Default::default(),
        };
        fabric.advance_sweep();
        fabric
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, FabricState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a new snapshot; returns its image id
    pub fn advance_sweep(&self) -> u64 {
        let mut state = self.state();
        let started = Utc::now();
        let interval_ms = self.config.sweep_interval_ms.max(1);
        let previous = state.newest().map(|s| s.ports.clone());

        let mut ports = Vec::with_capacity(self.config.port_count() as usize);
        for group in 0..self.config.groups.len() {
            for port in 1..=self.config.ports_per_group {
                let lid = group as u32 + 1;
                let mut sample = previous
                    .as_ref()
                    .and_then(|p| p.iter().find(|s| s.lid == lid && s.port == port).cloned())
                    .unwrap_or(PortSample {
                        lid,
                        port,
                        group,
                        ..Default::default()
                    });

                let rng = &mut state.rng;
                let delta_data = rng.gen_range(0..=LINK_BYTES_PER_SEC) * interval_ms / 1000;
                let delta_pkts = delta_data / rng.gen_range(64..=4096);
                let delta_errors = u64::from(rng.gen_bool(ERROR_PROBABILITY));
                let delta_wait = rng.gen_range(0..=1000);
                let rcv_share = rng.gen_range(0..=delta_data);

                sample.xmit_data += delta_data;
                sample.rcv_data += rcv_share;
                sample.xmit_pkts += delta_pkts;
                sample.rcv_pkts += delta_pkts / 2;
                sample.errors += delta_errors;
                sample.xmit_wait += delta_wait;
                sample.delta_data = delta_data;
                sample.delta_pkts = delta_pkts;
                sample.delta_errors = delta_errors;
                sample.delta_wait = delta_wait;
                ports.push(sample);
            }
        }

        let image_id = state.next_image;
        state.next_image += 1;
        let sweep_duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
        state.snapshots.push_back(Snapshot {
            image_id,
            sweep_start: started,
            sweep_duration_ms,
            ports,
        });

        let retained = self.config.retained_snapshots.max(1) as usize;
        while state.snapshots.len() > retained {
            state.snapshots.pop_front();
        }
        trace!(
            "Sweep {} done, {} snapshots retained",
            image_id,
            state.snapshots.len()
        );
        image_id
    }

    pub fn latest_image_id(&self) -> u64 {
        self.state().newest().map_or(0, |s| s.image_id)
    }

    pub fn snapshot_count(&self) -> usize {
        self.state().snapshots.len()
    }

    /// Simulate losing or regaining the connection to the manager
    pub fn set_connected(&self, connected: bool) {
        debug!(
            "Simulated fabric {}",
            if connected { "connected" } else { "disconnected" }
        );
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn call_count(&self, method: ApiMethod) -> u64 {
        self.calls[method as usize].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u64 {
        ApiMethod::ALL.iter().map(|m| self.call_count(*m)).sum()
    }

    pub fn reset_calls(&self) {
        for counter in &self.calls {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Count the call and apply the connection and failure settings
    fn enter(&self, method: ApiMethod) -> ApiResult<MutexGuard<'_, FabricState>> {
        self.calls[method as usize].fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(ApiError::NotConnected);
        }
        let mut state = self.state();
        let rate = self.config.failure_rate.clamp(0.0, 1.0);
        if rate > 0.0 && state.rng.gen_bool(rate) {
            return Err(ApiError::Timeout(self.config.sweep_interval_ms));
        }
        Ok(state)
    }

    fn group_index(&self, group: &str) -> ApiResult<Option<usize>> {
        if group == ALL_GROUP {
            return Ok(None);
        }
        self.config
            .groups
            .iter()
            .position(|g| g == group)
            .map(Some)
            .ok_or_else(|| ApiError::NotFound(format!("group {}", group)))
    }

    fn check_vf(&self, vf: &str) -> ApiResult<()> {
        if self.config.virtual_fabrics.iter().any(|v| v == vf) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("virtual fabric {}", vf)))
        }
    }

    fn sweep_secs(&self) -> f64 {
        self.config.sweep_interval_ms.max(1) as f64 / 1000.0
    }

    fn group_info_at(
        &self,
        snapshot: &Snapshot,
        group: &str,
        index: Option<usize>,
        image_id: ImageId,
    ) -> GroupInfo {
        let ports: Vec<&PortSample> = snapshot
            .ports
            .iter()
            .filter(|s| index.map_or(true, |i| s.group == i))
            .collect();
        let bytes: u64 = ports.iter().map(|s| s.delta_data).sum();
        let pkts: u64 = ports.iter().map(|s| s.delta_pkts).sum();
        GroupInfo {
            image_id,
            group: group.to_string(),
            num_ports: ports.len() as u32,
            total_mbps: (bytes as f64 * 8.0 / self.sweep_secs() / 1_000_000.0) as u64,
            total_kpps: (pkts as f64 / self.sweep_secs() / 1000.0) as u64,
            error_count: ports.iter().map(|s| s.errors).sum(),
        }
    }

    fn vf_info_at(&self, snapshot: &Snapshot, vf: &str, image_id: ImageId) -> VfInfo {
        let all = self.group_info_at(snapshot, ALL_GROUP, None, image_id);
        VfInfo {
            image_id,
            vf: vf.to_string(),
            num_ports: all.num_ports,
            total_mbps: all.total_mbps,
            total_kpps: all.total_kpps,
        }
    }

    fn port_at(snapshot: &Snapshot, lid: u32, port: u8) -> ApiResult<&PortSample> {
        snapshot
            .ports
            .iter()
            .find(|s| s.lid == lid && s.port == port)
            .ok_or_else(|| ApiError::NotFound(format!("port {}:{}", lid, port)))
    }

    fn counters(sample: &PortSample, image_id: ImageId) -> PortCounters {
        PortCounters {
            image_id,
            lid: sample.lid,
            port: sample.port,
            xmit_data: sample.xmit_data,
            rcv_data: sample.rcv_data,
            xmit_pkts: sample.xmit_pkts,
            rcv_pkts: sample.rcv_pkts,
            errors: sample.errors,
        }
    }

    fn vf_counters(vf: &str, sample: &PortSample, image_id: ImageId) -> VfPortCounters {
        VfPortCounters {
            image_id,
            vf: vf.to_string(),
            lid: sample.lid,
            port: sample.port,
            xmit_data: sample.xmit_data,
            rcv_data: sample.rcv_data,
            xmit_pkts: sample.xmit_pkts,
            rcv_pkts: sample.rcv_pkts,
        }
    }
}

fn newest(state: &FabricState) -> ApiResult<&Snapshot> {
    state
        .newest()
        .ok_or_else(|| ApiError::Remote("no sweep has completed".to_string()))
}

fn anchored(anchor: ImageId, offset: i32) -> ImageId {
    ImageId {
        id: anchor.id,
        offset,
    }
}

impl ManagementApi for SimulatedFabric {
    fn get_config(&self) -> ApiResult<PmConfig> {
        let _state = self.enter(ApiMethod::Config)?;
        Ok(PmConfig {
            sweep_interval_ms: self.config.sweep_interval_ms,
            total_images: self.config.retained_snapshots,
        })
    }

    fn get_group_info(&self, group: &str) -> ApiResult<GroupInfo> {
        let state = self.enter(ApiMethod::GroupInfo)?;
        let index = self.group_index(group)?;
        let snapshot = newest(&state)?;
        Ok(self.group_info_at(snapshot, group, index, ImageId::new(snapshot.image_id)))
    }

    fn get_group_info_history(
        &self,
        group: &str,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<GroupInfo>> {
        let state = self.enter(ApiMethod::History)?;
        let index = self.group_index(group)?;
        Ok(state
            .relative(image_id.id, offset)
            .map(|s| self.group_info_at(s, group, index, anchored(image_id, offset))))
    }

    fn get_vf_info(&self, vf: &str) -> ApiResult<VfInfo> {
        let state = self.enter(ApiMethod::VfInfo)?;
        self.check_vf(vf)?;
        let snapshot = newest(&state)?;
        Ok(self.vf_info_at(snapshot, vf, ImageId::new(snapshot.image_id)))
    }

    fn get_vf_info_history(
        &self,
        vf: &str,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<VfInfo>> {
        let state = self.enter(ApiMethod::History)?;
        self.check_vf(vf)?;
        Ok(state
            .relative(image_id.id, offset)
            .map(|s| self.vf_info_at(s, vf, anchored(image_id, offset))))
    }

    fn get_port_counters(&self, lid: u32, port: u8) -> ApiResult<PortCounters> {
        let state = self.enter(ApiMethod::PortCounters)?;
        let snapshot = newest(&state)?;
        let sample = Self::port_at(snapshot, lid, port)?;
        Ok(Self::counters(sample, ImageId::new(snapshot.image_id)))
    }

    fn get_port_counters_history(
        &self,
        lid: u32,
        port: u8,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<PortCounters>> {
        let state = self.enter(ApiMethod::History)?;
        let Some(snapshot) = state.relative(image_id.id, offset) else {
            return Ok(None);
        };
        let sample = Self::port_at(snapshot, lid, port)?;
        Ok(Some(Self::counters(sample, anchored(image_id, offset))))
    }

    fn get_vf_port_counters(&self, vf: &str, lid: u32, port: u8) -> ApiResult<VfPortCounters> {
        let state = self.enter(ApiMethod::VfPortCounters)?;
        self.check_vf(vf)?;
        let snapshot = newest(&state)?;
        let sample = Self::port_at(snapshot, lid, port)?;
        Ok(Self::vf_counters(vf, sample, ImageId::new(snapshot.image_id)))
    }

    fn get_vf_port_counters_history(
        &self,
        vf: &str,
        lid: u32,
        port: u8,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<VfPortCounters>> {
        let state = self.enter(ApiMethod::History)?;
        self.check_vf(vf)?;
        let Some(snapshot) = state.relative(image_id.id, offset) else {
            return Ok(None);
        };
        let sample = Self::port_at(snapshot, lid, port)?;
        Ok(Some(Self::vf_counters(vf, sample, anchored(image_id, offset))))
    }

    fn get_focus_ports(
        &self,
        group: &str,
        selector: FocusSelector,
        range: u32,
    ) -> ApiResult<FocusPorts> {
        let state = self.enter(ApiMethod::FocusPorts)?;
        let index = self.group_index(group)?;
        let snapshot = newest(&state)?;

        let mut ranked: Vec<&PortSample> = snapshot
            .ports
            .iter()
            .filter(|s| index.map_or(true, |i| s.group == i))
            .collect();
        ranked.sort_by(|a, b| b.metric(selector).cmp(&a.metric(selector)));
        let entries = ranked
            .into_iter()
            .take(range as usize)
            .map(|s| FocusPortEntry {
                lid: s.lid,
                port: s.port,
                value: s.metric(selector),
            })
            .collect();

        Ok(FocusPorts {
            image_id: ImageId::new(snapshot.image_id),
            group: group.to_string(),
            entries,
        })
    }

    fn get_image_info(&self, offset: i32) -> ApiResult<Option<ImageInfo>> {
        let state = self.enter(ApiMethod::ImageInfo)?;
        if offset > 0 {
            return Ok(None);
        }
        Ok(state.from_newest(offset).map(|snapshot| ImageInfo {
            image_id: ImageId {
                id: snapshot.image_id,
                offset,
            },
            sweep_start: snapshot.sweep_start,
            sweep_duration_ms: snapshot.sweep_duration_ms,
            num_nodes: self.config.node_count(),
            num_ports: snapshot.ports.len() as u32,
        }))
    }

    fn get_state_summary(&self) -> ApiResult<StateSummary> {
        let state = self.enter(ApiMethod::StateSummary)?;
        let snapshot = newest(&state)?;
        let num_ports = snapshot.ports.len() as u32;
        let failed = snapshot.ports.iter().filter(|s| s.delta_errors > 0).count() as u32;
        let health_score = if num_ports == 0 {
            100.0
        } else {
            100.0 * (1.0 - failed as f64 / num_ports as f64)
        };
        Ok(StateSummary {
            image_id: ImageId::new(snapshot.image_id),
            num_nodes: self.config.node_count(),
            num_ports,
            num_failed_ports: failed,
            health_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabric(retained: u32) -> SimulatedFabric {
        SimulatedFabric::new(SimulationConfig {
            retained_snapshots: retained,
            seed: 42,
            ..Default::default()
        })
    }

    #[test]
    fn test_same_seed_same_traffic() {
        let a = fabric(10);
        let b = fabric(10);
        a.advance_sweep();
        b.advance_sweep();
        assert_eq!(
            a.get_port_counters(1, 2).unwrap(),
            b.get_port_counters(1, 2).unwrap()
        );
    }

    #[test]
    fn test_counters_grow_monotonically() {
        let fabric = fabric(10);
        let first = fabric.get_port_counters(2, 1).unwrap();
        fabric.advance_sweep();
        let second = fabric.get_port_counters(2, 1).unwrap();
        assert!(second.xmit_data >= first.xmit_data);
        assert!(second.image_id.id > first.image_id.id);
    }

    #[test]
    fn test_retention_bounds_history() {
        let fabric = fabric(3);
        for _ in 0..5 {
            fabric.advance_sweep();
        }
        assert_eq!(fabric.snapshot_count(), 3);
        assert_eq!(fabric.latest_image_id(), 6);

        assert!(fabric.get_image_info(0).unwrap().is_some());
        assert!(fabric.get_image_info(-2).unwrap().is_some());
        assert!(fabric.get_image_info(-3).unwrap().is_none());
        assert!(fabric.get_image_info(1).unwrap().is_none());

        let anchor = fabric.get_port_counters(1, 1).unwrap().image_id;
        let older = fabric
            .get_port_counters_history(1, 1, anchor, -2)
            .unwrap()
            .unwrap();
        assert_eq!(older.image_id.offset, -2);
        assert!(fabric
            .get_port_counters_history(1, 1, anchor, -3)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_history_of_dropped_anchor_is_unavailable() {
        let fabric = fabric(2);
        let anchor = fabric.get_port_counters(1, 1).unwrap().image_id;
        fabric.advance_sweep();
        fabric.advance_sweep();
        assert!(fabric
            .get_port_counters_history(1, 1, anchor, -1)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_groups_and_virtual_fabrics() {
        let fabric = fabric(10);
        assert_eq!(fabric.get_group_info(ALL_GROUP).unwrap().num_ports, 8);
        assert_eq!(fabric.get_group_info("HFIs").unwrap().num_ports, 4);
        assert!(matches!(
            fabric.get_group_info("Nope"),
            Err(ApiError::NotFound(_))
        ));
        assert_eq!(fabric.get_vf_info("Default").unwrap().num_ports, 8);
        assert!(fabric.get_vf_info("Storage").is_err());
        assert!(matches!(
            fabric.get_port_counters(9, 1),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_focus_ports_are_ranked_and_truncated() {
        let fabric = fabric(10);
        let focus = fabric
            .get_focus_ports(ALL_GROUP, FocusSelector::Utilization, 3)
            .unwrap();
        assert_eq!(focus.entries.len(), 3);
        assert!(focus
            .entries
            .windows(2)
            .all(|pair| pair[0].value >= pair[1].value));
    }

    #[test]
    fn test_disconnect_and_call_accounting() {
        let fabric = fabric(10);
        fabric.get_state_summary().unwrap();
        fabric.set_connected(false);
        assert_eq!(fabric.get_state_summary(), Err(ApiError::NotConnected));
        assert_eq!(fabric.call_count(ApiMethod::StateSummary), 2);
        assert_eq!(fabric.total_calls(), 2);

        fabric.set_connected(true);
        fabric.reset_calls();
        assert_eq!(fabric.total_calls(), 0);
    }

    #[test]
    fn test_failure_rate_one_always_times_out() {
        let fabric = SimulatedFabric::new(SimulationConfig {
            failure_rate: 1.0,
            ..Default::default()
        });
        assert_eq!(fabric.get_config(), Err(ApiError::Timeout(1000)));
    }

    #[test]
    fn test_state_summary_health() {
        let fabric = fabric(10);
        let summary = fabric.get_state_summary().unwrap();
        assert_eq!(summary.num_ports, 8);
        assert_eq!(summary.num_nodes, 2);
        assert!(summary.health_score <= 100.0 && summary.health_score >= 0.0);
    }
}
