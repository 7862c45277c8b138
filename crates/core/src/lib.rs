//! fabric-monitor-core: telemetry subscription and polling scheduler.
//!
//! Many consumers share a bounded set of periodic fetch tasks against a
//! fabric management API. Tasks are deduplicated by identity, each result
//! fans out to every attached callback, multi-source registrations fan in
//! through a `BatchedCallback`, and history backfills replay past snapshots
//! on the same background pool.

pub mod api;
pub mod callback;
pub mod constants;
pub mod error;
pub mod history;
pub mod provider;
pub mod scheduler;
pub mod session;
pub mod subscriber;
mod sync;
pub mod task;

pub use api::{ApiResult, ManagementApi};
pub use callback::{callback_fn, BatchedCallback, Callback, SharedCallback};
pub use error::{ApiError, SchedulerError};
pub use history::{offset_count, HistoryEnd, HistoryOutcome, HistoryQueryTask};
pub use provider::{
    CombinedDataProvider, DataObserver, DataProvider, ProgressObserver, ProviderStrategy,
    SimpleDataProvider, SourceObserver,
};
pub use scheduler::{BackgroundHandle, Scheduler, TaskRegistry};
pub use session::Session;
pub use subscriber::{
    BatchRegistration, FocusPortsKind, GroupInfoKind, ImageInfoKind, PortCountersKind,
    StateSummaryKind, Subscriber, Subscribers, TelemetryKind, VfInfoKind, VfPortCountersKind,
};
pub use task::{CycleOutcome, Task};
