//! fabric-monitor-types: Shared data types for the fabric telemetry engine.
//!
//! This crate contains pure data types (sources, telemetry values, attribute
//! kinds, history types and engine configuration) that are shared across all
//! fabric-monitor crates. It depends only on serde and chrono, making it suitable
//! as a foundation layer.

pub mod attribute;
pub mod config;
pub mod history;
pub mod source;
pub mod telemetry;

// Re-export commonly used types at the crate root for convenience
pub use attribute::{AttributeKind, TaskKey};
pub use config::{EngineConfig, MIN_REFRESH_RATE_MS};
pub use history::HistoryType;
pub use source::{
    FabricSource, FocusSelector, FocusSource, GroupSource, ImageSource, PortSource, SourceKey,
    VfPortSource, VfSource,
};
pub use telemetry::{
    FocusPortEntry, FocusPorts, GroupInfo, ImageId, ImageInfo, PmConfig, PortCounters,
    StateSummary, VfInfo, VfPortCounters,
};
