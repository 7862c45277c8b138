//! Shared constants for the engine

/// Thread name prefix of the shared background pool
pub const POOL_THREAD_NAME: &str = "fabric-monitor-pool";

/// Upper bound on the number of offsets a single backfill may walk
pub const MAX_HISTORY_OFFSETS: u32 = 100_000;
