#![allow(dead_code)]

use chrono::Utc;
use fabric_monitor_core::{ApiError, ApiResult, ManagementApi, Session};
use fabric_monitor_types::{
    EngineConfig, FocusPortEntry, FocusPorts, FocusSelector, GroupInfo, ImageId, ImageInfo,
    PmConfig, PortCounters, StateSummary, VfInfo, VfPortCounters,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Long enough that no periodic tick fires during a test
pub const IDLE_RATE_MS: u64 = 3_600_000;

pub const CURRENT_IMAGE: u64 = 1000;

/// Blocks callers until opened
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
    }
}

/// In-memory management API with call accounting
pub struct MockFabric {
    pub sweep_interval_ms: u64,
    /// Snapshots available behind the current one
    pub retained: i32,
    pub port_calls: AtomicUsize,
    pub history_offsets: Mutex<Vec<i32>>,
    pub failing: AtomicBool,
    /// Port counter reads for this LID wait on `gate`
    pub gated_lid: Option<u32>,
    pub gate: Gate,
}

impl MockFabric {
    pub fn new(sweep_interval_ms: u64, retained: i32) -> Self {
        Self {
            sweep_interval_ms,
            retained,
            port_calls: AtomicUsize::new(0),
            history_offsets: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            gated_lid: None,
            gate: Gate::default(),
        }
    }

    pub fn gated(mut self, lid: u32) -> Self {
        self.gated_lid = Some(lid);
        self
    }

    pub fn port_calls(&self) -> usize {
        self.port_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> ApiResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ApiError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn retained(&self, offset: i32) -> bool {
        -offset <= self.retained
    }

    fn anchored(image_id: ImageId, offset: i32) -> ImageId {
        ImageId {
            id: image_id.id,
            offset,
        }
    }

    fn counters(lid: u32, port: u8, image_id: ImageId) -> PortCounters {
        let base = lid as u64 * 1000 + port as u64;
        PortCounters {
            image_id,
            lid,
            port,
            xmit_data: base,
            rcv_data: base,
            xmit_pkts: base / 2,
            rcv_pkts: base / 2,
            errors: 0,
        }
    }
}

impl ManagementApi for MockFabric {
    fn get_config(&self) -> ApiResult<PmConfig> {
        self.check()?;
        Ok(PmConfig {
            sweep_interval_ms: self.sweep_interval_ms,
            total_images: self.retained as u32 + 1,
        })
    }

    fn get_group_info(&self, group: &str) -> ApiResult<GroupInfo> {
        self.check()?;
        Ok(GroupInfo {
            image_id: ImageId::new(CURRENT_IMAGE),
            group: group.to_string(),
            num_ports: 8,
            total_mbps: 100,
            total_kpps: 10,
            error_count: 0,
        })
    }

    fn get_group_info_history(
        &self,
        group: &str,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<GroupInfo>> {
        self.check()?;
        if !self.retained(offset) {
            return Ok(None);
        }
        let mut info = self.get_group_info(group)?;
        info.image_id = Self::anchored(image_id, offset);
        Ok(Some(info))
    }

    fn get_vf_info(&self, vf: &str) -> ApiResult<VfInfo> {
        self.check()?;
        Ok(VfInfo {
            image_id: ImageId::new(CURRENT_IMAGE),
            vf: vf.to_string(),
            num_ports: 4,
            total_mbps: 50,
            total_kpps: 5,
        })
    }

    fn get_vf_info_history(
        &self,
        vf: &str,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<VfInfo>> {
        self.check()?;
        if !self.retained(offset) {
            return Ok(None);
        }
        let mut info = self.get_vf_info(vf)?;
        info.image_id = Self::anchored(image_id, offset);
        Ok(Some(info))
    }

    fn get_port_counters(&self, lid: u32, port: u8) -> ApiResult<PortCounters> {
        self.port_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated_lid == Some(lid) {
            self.gate.wait();
        }
        self.check()?;
        Ok(Self::counters(lid, port, ImageId::new(CURRENT_IMAGE)))
    }

    fn get_port_counters_history(
        &self,
        lid: u32,
        port: u8,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<PortCounters>> {
        self.check()?;
        self.history_offsets.lock().unwrap().push(offset);
        if !self.retained(offset) {
            return Ok(None);
        }
        Ok(Some(Self::counters(
            lid,
            port,
            Self::anchored(image_id, offset),
        )))
    }

    fn get_vf_port_counters(&self, vf: &str, lid: u32, port: u8) -> ApiResult<VfPortCounters> {
        self.check()?;
        let counters = Self::counters(lid, port, ImageId::new(CURRENT_IMAGE));
        Ok(VfPortCounters {
            image_id: counters.image_id,
            vf: vf.to_string(),
            lid,
            port,
            xmit_data: counters.xmit_data,
            rcv_data: counters.rcv_data,
            xmit_pkts: counters.xmit_pkts,
            rcv_pkts: counters.rcv_pkts,
        })
    }

    fn get_vf_port_counters_history(
        &self,
        vf: &str,
        lid: u32,
        port: u8,
        image_id: ImageId,
        offset: i32,
    ) -> ApiResult<Option<VfPortCounters>> {
        self.check()?;
        if !self.retained(offset) {
            return Ok(None);
        }
        let mut counters = self.get_vf_port_counters(vf, lid, port)?;
        counters.image_id = Self::anchored(image_id, offset);
        Ok(Some(counters))
    }

    fn get_focus_ports(
        &self,
        group: &str,
        _selector: FocusSelector,
        range: u32,
    ) -> ApiResult<FocusPorts> {
        self.check()?;
        Ok(FocusPorts {
            image_id: ImageId::new(CURRENT_IMAGE),
            group: group.to_string(),
            entries: (0..range)
                .map(|i| FocusPortEntry {
                    lid: i + 1,
                    port: 1,
                    value: (range - i) as u64,
                })
                .collect(),
        })
    }

    fn get_image_info(&self, offset: i32) -> ApiResult<Option<ImageInfo>> {
        self.check()?;
        if offset > 0 || !self.retained(offset) {
            return Ok(None);
        }
        Ok(Some(ImageInfo {
            image_id: ImageId {
                id: CURRENT_IMAGE,
                offset,
            },
            sweep_start: Utc::now(),
            sweep_duration_ms: 20,
            num_nodes: 4,
            num_ports: 16,
        }))
    }

    fn get_state_summary(&self) -> ApiResult<StateSummary> {
        self.check()?;
        Ok(StateSummary {
            image_id: ImageId::new(CURRENT_IMAGE),
            num_nodes: 4,
            num_ports: 16,
            num_failed_ports: 0,
            health_score: 100.0,
        })
    }
}

pub fn engine_config(refresh_rate_ms: u64) -> EngineConfig {
    EngineConfig {
        refresh_rate_ms,
        worker_threads: 2,
        ..Default::default()
    }
}

pub fn session(api: Arc<MockFabric>, refresh_rate_ms: u64) -> Arc<Session> {
    Session::connect(api, &engine_config(refresh_rate_ms)).unwrap()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
