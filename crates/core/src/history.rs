//! One-shot historical backfill
//!
//! Replays a bounded sequence of past snapshots through a callback. The number
//! of samples follows from two independent time constants: the server sweep
//! interval and the consumer refresh rate.

use crate::callback::SharedCallback;
use crate::constants::MAX_HISTORY_OFFSETS;
use crate::error::ApiError;
use fabric_monitor_types::{HistoryType, ImageId};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

/// Resolves one reference snapshot id per source
pub type ImageIdQuery = Box<dyn FnOnce() -> Result<Vec<ImageId>, ApiError> + Send>;

/// Fetches every source at an offset; `None` means past the oldest snapshot
pub type HistoryQuery<T> =
    Box<dyn Fn(&[ImageId], i32) -> Result<Option<Vec<T>>, ApiError> + Send>;

/// Number of past snapshots to replay: `max(1, refresh_rate / sweep_interval)`
pub fn offset_count(refresh_rate_ms: u64, sweep_interval_ms: u64) -> u32 {
    let count = refresh_rate_ms / sweep_interval_ms.max(1);
    count.clamp(1, MAX_HISTORY_OFFSETS as u64) as u32
}

/// Why a backfill stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEnd {
    /// Every offset was delivered
    Exhausted,
    /// A query reported the snapshot as no longer retained
    Unavailable,
    Cancelled,
    /// A query failed; the error was logged
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryOutcome {
    pub delivered: u32,
    pub end: HistoryEnd,
}

pub struct HistoryQueryTask<T> {
    name: String,
    sweep_interval_ms: u64,
    refresh_rate_ms: u64,
    history_type: HistoryType,
    query_image_ids: ImageIdQuery,
    query_history: HistoryQuery<T>,
    callback: SharedCallback<Vec<T>>,
}

impl<T> HistoryQueryTask<T> {
    pub fn new(
        name: impl Into<String>,
        sweep_interval_ms: u64,
        refresh_rate_ms: u64,
        history_type: HistoryType,
        query_image_ids: ImageIdQuery,
        query_history: HistoryQuery<T>,
        callback: SharedCallback<Vec<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            sweep_interval_ms,
            refresh_rate_ms,
            history_type,
            query_image_ids,
            query_history,
            callback,
        }
    }

    pub fn offset_count(&self) -> u32 {
        offset_count(self.refresh_rate_ms, self.sweep_interval_ms)
    }

    /// Offsets queried, newest first: -1, -2, ..., -offset_count
    pub fn offsets(&self) -> impl Iterator<Item = i32> {
        (1..=self.offset_count()).map(|i| -(i as i32))
    }

    /// Run the backfill to completion, checking `token` between every step.
    pub fn run(self, token: &CancellationToken) -> HistoryOutcome {
        let mut delivered = 0;

        if self.history_type.is_current() {
            debug!("History {}: current type has nothing to backfill", self.name);
            return HistoryOutcome {
                delivered,
                end: HistoryEnd::Exhausted,
            };
        }
        if token.is_cancelled() {
            return HistoryOutcome {
                delivered,
                end: HistoryEnd::Cancelled,
            };
        }

        let offsets: Vec<i32> = self.offsets().collect();
        debug!(
            "History {} ({}): {} offsets, sweep {}ms, refresh {}ms",
            self.name,
            self.history_type,
            offsets.len(),
            self.sweep_interval_ms,
            self.refresh_rate_ms
        );

        let image_ids = match (self.query_image_ids)() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("History {}: failed to resolve image ids: {}", self.name, e);
                return HistoryOutcome {
                    delivered,
                    end: HistoryEnd::Failed,
                };
            }
        };

        for offset in offsets {
            if token.is_cancelled() {
                return HistoryOutcome {
                    delivered,
                    end: HistoryEnd::Cancelled,
                };
            }
            let samples = match (self.query_history)(&image_ids, offset) {
                Ok(Some(samples)) => samples,
                Ok(None) => {
                    debug!(
                        "History {}: no snapshot at offset {}, stopping after {} samples",
                        self.name, offset, delivered
                    );
                    return HistoryOutcome {
                        delivered,
                        end: HistoryEnd::Unavailable,
                    };
                }
                Err(e) => {
                    warn!("History {}: query at offset {} failed: {}", self.name, offset, e);
                    return HistoryOutcome {
                        delivered,
                        end: HistoryEnd::Failed,
                    };
                }
            };
            // The remote call may have outlived a cancel request
            if token.is_cancelled() {
                return HistoryOutcome {
                    delivered,
                    end: HistoryEnd::Cancelled,
                };
            }
            self.callback.on_complete(&samples);
            delivered += 1;
        }

        debug!("History {}: delivered {} samples", self.name, delivered);
        HistoryOutcome {
            delivered,
            end: HistoryEnd::Exhausted,
        }
    }
}
