//! Small locking helpers shared by the engine

use log::warn;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Poisoning only happens when a callback or fetch panicked while the lock
/// was held; the guarded collections stay structurally valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<MutexGuard<'_, T>>| {
        warn!("Engine mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}
