//! Source keys: value-equality identifiers for what is being watched.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// A value-equality key naming what is being observed.
///
/// `key()` must be stable: it becomes part of a task identity, and two
/// equal sources must always produce the same key.
pub trait SourceKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    fn key(&self) -> String;
}

/// A device group, e.g. "All" or "HFIs"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupSource {
    pub group: String,
}

impl GroupSource {
    pub fn new(group: impl Into<String>) -> Self {
        Self { group: group.into() }
    }
}

impl SourceKey for GroupSource {
    fn key(&self) -> String {
        self.group.clone()
    }
}

/// A virtual fabric
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VfSource {
    pub vf: String,
}

impl VfSource {
    pub fn new(vf: impl Into<String>) -> Self {
        Self { vf: vf.into() }
    }
}

impl SourceKey for VfSource {
    fn key(&self) -> String {
        self.vf.clone()
    }
}

/// A single port, addressed by node LID and port number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSource {
    pub lid: u32,
    pub port: u8,
}

impl PortSource {
    pub fn new(lid: u32, port: u8) -> Self {
        Self { lid, port }
    }
}

impl SourceKey for PortSource {
    fn key(&self) -> String {
        format!("{}:{}", self.lid, self.port)
    }
}

impl std::str::FromStr for PortSource {
    type Err = String;

    /// Parse "LID:PORT", e.g. "5:1"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lid, port) = s
            .split_once(':')
            .ok_or_else(|| format!("Expected format LID:PORT (e.g., 5:1), got: {}", s))?;
        let lid = lid
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("Invalid LID: {}", e))?;
        let port = port
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("Invalid port number: {}", e))?;
        Ok(Self { lid, port })
    }
}

/// A port seen through a virtual fabric
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VfPortSource {
    pub vf: String,
    pub lid: u32,
    pub port: u8,
}

impl VfPortSource {
    pub fn new(vf: impl Into<String>, lid: u32, port: u8) -> Self {
        Self {
            vf: vf.into(),
            lid,
            port,
        }
    }
}

impl SourceKey for VfPortSource {
    fn key(&self) -> String {
        format!("{}:{}:{}", self.vf, self.lid, self.port)
    }
}

/// Metric used to rank ports in a focus query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusSelector {
    Utilization,
    PacketRate,
    Errors,
    Congestion,
}

impl FocusSelector {
    pub fn id(&self) -> &'static str {
        match self {
            FocusSelector::Utilization => "util",
            FocusSelector::PacketRate => "pkts",
            FocusSelector::Errors => "errors",
            FocusSelector::Congestion => "cong",
        }
    }
}

/// Top-N ports of a group ranked by a selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FocusSource {
    pub group: String,
    pub selector: FocusSelector,
    pub range: u32,
}

impl SourceKey for FocusSource {
    fn key(&self) -> String {
        format!("{}:{}:{}", self.group, self.selector.id(), self.range)
    }
}

/// Image info relative to the newest snapshot (0 = newest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ImageSource {
    pub offset: i32,
}

impl SourceKey for ImageSource {
    fn key(&self) -> String {
        self.offset.to_string()
    }
}

/// The whole fabric, used for the aggregate state summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct FabricSource;

impl SourceKey for FabricSource {
    fn key(&self) -> String {
        "fabric".to_string()
    }
}
