//! Configuration of the simulated fabric

use serde::{Deserialize, Serialize};

/// Group name that always aggregates every port of the fabric
pub const ALL_GROUP: &str = "All";

fn default_groups() -> Vec<String> {
    vec!["HFIs".to_string(), "SWs".to_string()]
}

fn default_virtual_fabrics() -> Vec<String> {
    vec!["Default".to_string()]
}

fn default_ports_per_group() -> u8 {
    4
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_retained_snapshots() -> u32 {
    600
}

/// Shape and behaviour of a `SimulatedFabric`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Device groups; group `i` is node LID `i + 1`
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,
    /// Virtual fabrics, each spanning every port
    #[serde(default = "default_virtual_fabrics")]
    pub virtual_fabrics: Vec<String>,
    #[serde(default = "default_ports_per_group")]
    pub ports_per_group: u8,
    /// Interval between simulated sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    /// Snapshots kept for history queries, newest included
    #[serde(default = "default_retained_snapshots")]
    pub retained_snapshots: u32,
    /// Probability (0.0 - 1.0) that a call fails with a timeout
    #[serde(default)]
    pub failure_rate: f64,
    /// Seed for reproducible traffic
    #[serde(default)]
    pub seed: u64,
}

impl SimulationConfig {
    pub fn node_count(&self) -> u32 {
        self.groups.len() as u32
    }

    pub fn port_count(&self) -> u32 {
        self.node_count() * self.ports_per_group as u32
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
            virtual_fabrics: default_virtual_fabrics(),
            ports_per_group: default_ports_per_group(),
            sweep_interval_ms: default_sweep_interval(),
            retained_snapshots: default_retained_snapshots(),
            failure_rate: 0.0,
            seed: 0,
        }
    }
}
