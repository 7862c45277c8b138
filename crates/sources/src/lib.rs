//! fabric-monitor-sources: Management API implementations for fabric-monitor.
//!
//! Currently a simulated fabric with seeded traffic, bounded snapshot
//! retention and an injectable connection failure, plus a sweeper thread
//! that advances it in real time.

mod config;
mod fabric;
mod sweeper;

pub use config::{SimulationConfig, ALL_GROUP};
pub use fabric::{ApiMethod, SimulatedFabric};
pub use sweeper::{spawn_sweeper, Sweeper};
