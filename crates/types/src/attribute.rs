//! Attribute kinds and task identity keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The telemetry attribute a task polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    GroupInfo,
    VfInfo,
    PortCounters,
    VfPortCounters,
    FocusPorts,
    ImageInfo,
    StateSummary,
}

impl AttributeKind {
    /// Stable identifier used in logs and keys
    pub fn id(&self) -> &'static str {
        match self {
            AttributeKind::GroupInfo => "group_info",
            AttributeKind::VfInfo => "vf_info",
            AttributeKind::PortCounters => "port_counters",
            AttributeKind::VfPortCounters => "vf_port_counters",
            AttributeKind::FocusPorts => "focus_ports",
            AttributeKind::ImageInfo => "image_info",
            AttributeKind::StateSummary => "state_summary",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Structural identity of a scheduled task.
///
/// Two registrations for the same attribute and source key resolve to the
/// same task. The update interval is deliberately not part of the key: all
/// tasks run at the global refresh rate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub kind: AttributeKind,
    pub source: String,
}

impl TaskKey {
    pub fn new(kind: AttributeKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_equality_is_structural() {
        let a = TaskKey::new(AttributeKind::PortCounters, "5:1");
        let b = TaskKey::new(AttributeKind::PortCounters, String::from("5:1"));
        let c = TaskKey::new(AttributeKind::VfPortCounters, "5:1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "port_counters:5:1");
    }
}
