//! Completion callbacks and the N-to-1 batched aggregator

use crate::sync::lock;
use log::trace;
use std::sync::{Arc, Mutex};

/// Receiver of task completions.
///
/// Callbacks run on a pool thread and must be cheap: they typically just
/// hand data on toward the presentation layer. Identity is `Arc` identity,
/// so attach and detach the same `Arc` instance.
pub trait Callback<T>: Send + Sync {
    fn on_complete(&self, value: &T);

    /// Clear any accumulated state
    fn reset(&self) {}
}

/// Shared, type-erased callback
pub type SharedCallback<T> = Arc<dyn Callback<T>>;

/// Adapter turning a closure into a callback
pub struct FnCallback<F>(F);

impl<T, F> Callback<T> for FnCallback<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn on_complete(&self, value: &T) {
        (self.0)(value)
    }
}

/// Wrap a closure as a shared callback
pub fn callback_fn<T, F>(f: F) -> SharedCallback<T>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(FnCallback(f))
}

/// Compare two callbacks by identity
pub fn same_callback<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    // Compare data pointers only; vtable pointers of the same object may differ
    // across codegen units.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct BatchState<T> {
    results: Vec<Option<T>>,
    received: usize,
}

impl<T> BatchState<T> {
    fn new(size: usize) -> Self {
        Self {
            results: (0..size).map(|_| None).collect(),
            received: 0,
        }
    }

    fn clear(&mut self) {
        self.results.iter_mut().for_each(|slot| *slot = None);
        self.received = 0;
    }
}

struct BatchInner<T> {
    state: Mutex<BatchState<T>>,
    downstream: SharedCallback<Vec<T>>,
}

impl<T: Clone> BatchInner<T> {
    fn complete_slot(&self, index: usize, value: &T) {
        let ready = {
            let mut state = lock(&self.state);
            let size = state.results.len();
            let Some(slot) = state.results.get_mut(index) else {
                return;
            };
            let first = slot.is_none();
            *slot = Some(value.clone());
            if first {
                state.received += 1;
            }
            trace!("Batch slot {} reported ({}/{})", index, state.received, size);

            if state.received == size {
                let results: Vec<T> = state.results.iter_mut().filter_map(Option::take).collect();
                state.received = 0;
                Some(results)
            } else {
                None
            }
        };
        // Deliver outside the lock so a slow downstream never blocks other slots
        if let Some(results) = ready {
            self.downstream.on_complete(&results);
        }
    }
}

/// Per-index adapter handed to a single task
struct BatchSlot<T> {
    index: usize,
    inner: Arc<BatchInner<T>>,
}

impl<T: Clone + Send + Sync> Callback<T> for BatchSlot<T> {
    fn on_complete(&self, value: &T) {
        self.inner.complete_slot(self.index, value);
    }
}

/// N-to-1 completion aggregator.
///
/// Each of the N slots is attached to one task. The downstream callback fires
/// once per cycle, only after every slot has reported, with results in slot
/// order. The aggregator then re-arms for the next cycle. A slot that never
/// reports stalls its cycle; the next polling cycle repairs it.
pub struct BatchedCallback<T> {
    inner: Arc<BatchInner<T>>,
    slots: Vec<SharedCallback<T>>,
}

impl<T: Clone + Send + Sync + 'static> BatchedCallback<T> {
    pub fn new(size: usize, downstream: SharedCallback<Vec<T>>) -> Self {
        let inner = Arc::new(BatchInner {
            state: Mutex::new(BatchState::new(size)),
            downstream,
        });
        let slots = (0..size)
            .map(|index| {
                Arc::new(BatchSlot {
                    index,
                    inner: Arc::clone(&inner),
                }) as SharedCallback<T>
            })
            .collect();
        Self { inner, slots }
    }

    /// Callback for slot `index`; the same instance is returned on every call
    ///
    /// # Panics
    /// Panics if `index >= self.size()`.
    pub fn slot(&self, index: usize) -> SharedCallback<T> {
        Arc::clone(&self.slots[index])
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots that have reported in the current cycle
    pub fn received(&self) -> usize {
        lock(&self.inner.state).received
    }

    /// Drop any partial accumulation and reset the downstream callback
    pub fn reset(&self) {
        lock(&self.inner.state).clear();
        self.inner.downstream.reset();
    }
}
