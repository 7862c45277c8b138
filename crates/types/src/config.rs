//! Engine configuration types.

use crate::history::HistoryType;
use serde::{Deserialize, Serialize};

/// Lower bound for the global refresh rate
pub const MIN_REFRESH_RATE_MS: u64 = 100;

fn default_refresh_rate() -> u64 {
    10_000
}

fn default_worker_threads() -> usize {
    4
}

/// Configuration for the polling scheduler of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global polling cadence for every live task
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate_ms: u64,
    /// Size of the shared background pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// History type providers start with
    #[serde(default)]
    pub history_type: HistoryType,
}

impl EngineConfig {
    /// Refresh rate clamped to the supported minimum
    pub fn effective_refresh_rate_ms(&self) -> u64 {
        self.refresh_rate_ms.max(MIN_REFRESH_RATE_MS)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: default_refresh_rate(),
            worker_threads: default_worker_threads(),
            history_type: HistoryType::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults_fill_missing_fields() {
        let config: EngineConfig = serde_json::from_str("{\"refresh_rate_ms\": 5000}").unwrap();
        assert_eq!(config.refresh_rate_ms, 5000);
        assert_eq!(config.worker_threads, 4);
        assert!(config.history_type.is_current());
    }

    #[test]
    fn test_refresh_rate_is_clamped() {
        let config = EngineConfig {
            refresh_rate_ms: 1,
            ..Default::default()
        };
        assert_eq!(config.effective_refresh_rate_ms(), MIN_REFRESH_RATE_MS);
    }
}
