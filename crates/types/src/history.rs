//! History types selectable by consumers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How far back a consumer wants to see.
///
/// `Current` means live polling only. Every other variant additionally
/// starts a one-shot historical backfill when sources are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryType {
    #[default]
    Current,
    Last15Minutes,
    LastHour,
    Last6Hours,
    LastDay,
}

impl HistoryType {
    pub fn is_current(&self) -> bool {
        matches!(self, HistoryType::Current)
    }

    /// Time span covered by the chart for this history type, in seconds
    pub fn span_secs(&self) -> u64 {
        match self {
            HistoryType::Current => 0,
            HistoryType::Last15Minutes => 15 * 60,
            HistoryType::LastHour => 60 * 60,
            HistoryType::Last6Hours => 6 * 60 * 60,
            HistoryType::LastDay => 24 * 60 * 60,
        }
    }

    pub fn all() -> [HistoryType; 5] {
        [
            HistoryType::Current,
            HistoryType::Last15Minutes,
            HistoryType::LastHour,
            HistoryType::Last6Hours,
            HistoryType::LastDay,
        ]
    }
}

impl fmt::Display for HistoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HistoryType::Current => "current",
            HistoryType::Last15Minutes => "15m",
            HistoryType::LastHour => "1h",
            HistoryType::Last6Hours => "6h",
            HistoryType::LastDay => "24h",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for HistoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HistoryType::all()
            .into_iter()
            .find(|h| h.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown history type: {} (expected current, 15m, 1h, 6h or 24h)", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_type_parse() {
        assert_eq!("1h".parse::<HistoryType>().unwrap(), HistoryType::LastHour);
        assert_eq!("Current".parse::<HistoryType>().unwrap(), HistoryType::Current);
        assert!("2h".parse::<HistoryType>().is_err());
    }

    #[test]
    fn test_history_type_serialization() {
        let json = serde_json::to_string(&HistoryType::Last6Hours).unwrap();
        assert_eq!(json, "\"last6_hours\"");
        assert!(HistoryType::default().is_current());
    }
}
