//! Telemetry values returned by the management API.
//!
//! Every value records the snapshot (image) it was read from so that a
//! history backfill can anchor its offset queries on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a stored telemetry snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ImageId {
    /// Server-assigned snapshot number
    pub id: u64,
    /// Offset relative to the snapshot the query was anchored on
    pub offset: i32,
}

impl ImageId {
    pub fn new(id: u64) -> Self {
        Self { id, offset: 0 }
    }
}

/// Performance manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmConfig {
    /// Server-side sampling period for stored snapshots
    pub sweep_interval_ms: u64,
    /// Number of snapshots the server retains
    pub total_images: u32,
}

/// Utilisation and error summary of a device group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub image_id: ImageId,
    pub group: String,
    pub num_ports: u32,
    /// Aggregate utilisation in MB/s
    pub total_mbps: u64,
    pub total_kpps: u64,
    pub error_count: u64,
}

/// Utilisation summary of a virtual fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VfInfo {
    pub image_id: ImageId,
    pub vf: String,
    pub num_ports: u32,
    pub total_mbps: u64,
    pub total_kpps: u64,
}

/// Cumulative counters of one port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCounters {
    pub image_id: ImageId,
    pub lid: u32,
    pub port: u8,
    pub xmit_data: u64,
    pub rcv_data: u64,
    pub xmit_pkts: u64,
    pub rcv_pkts: u64,
    pub errors: u64,
}

/// Counters of one port restricted to a virtual fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VfPortCounters {
    pub image_id: ImageId,
    pub vf: String,
    pub lid: u32,
    pub port: u8,
    pub xmit_data: u64,
    pub rcv_data: u64,
    pub xmit_pkts: u64,
    pub rcv_pkts: u64,
}

/// One ranked port in a focus result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusPortEntry {
    pub lid: u32,
    pub port: u8,
    pub value: u64,
}

/// Top-N ports of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusPorts {
    pub image_id: ImageId,
    pub group: String,
    pub entries: Vec<FocusPortEntry>,
}

/// Metadata about one stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image_id: ImageId,
    pub sweep_start: DateTime<Utc>,
    pub sweep_duration_ms: u64,
    pub num_nodes: u32,
    pub num_ports: u32,
}

/// Aggregate health of the fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    pub image_id: ImageId,
    pub num_nodes: u32,
    pub num_ports: u32,
    pub num_failed_ports: u32,
    pub health_score: f64,
}
