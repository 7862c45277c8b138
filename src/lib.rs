//! fabric-monitor: live and historical fabric telemetry on a shared poller
//!
//! This library ties the workspace crates together:
//! - Configuration management
//! - A console monitor that binds providers to a simulated fabric

pub mod config;
pub mod monitor;

// Re-export the workspace crates and commonly used types
pub use fabric_monitor_core as core;
pub use fabric_monitor_sources as sources;
pub use fabric_monitor_types as types;

pub use config::AppConfig;
pub use monitor::{Monitor, MonitorEvent, MonitorReport};
