//! Trailing-edge debounce on top of tokio timers.
//!
//! Each `push` cancels the pending emission and schedules a new one `delay`
//! later, so only the last value of a burst reaches the sink. Cancelling or
//! dropping the debouncer guarantees no later emission.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Default quiet period for search input.
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(200);

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Pending<T> {
    value: Option<T>,
    task: Option<JoinHandle<()>>,
    generation: u64,
    closed: bool,
}

impl<T> Pending<T> {
    fn invalidate(&mut self) -> Option<T> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        self.value.take()
    }
}

pub struct Debouncer<T> {
    delay: Duration,
    pending: Arc<Mutex<Pending<T>>>,
    sink: Sink<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, sink: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(Pending {
                value: None,
                task: None,
                generation: 0,
                closed: false,
            })),
            sink: Arc::new(sink),
        }
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending value and restart the quiet period.
    pub fn push(&self, value: T) {
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!("No async runtime; emitting debounced value immediately");
            let mut pending = lock(&self.pending);
            if pending.closed {
                return;
            }
            pending.invalidate();
            drop(pending);
            (self.sink)(value);
            return;
        };

        let mut pending = lock(&self.pending);
        if pending.closed {
            return;
        }
        pending.invalidate();
        pending.value = Some(value);
        let generation = pending.generation;

        let delay = self.delay;
        let shared = Arc::clone(&self.pending);
        let sink = Arc::clone(&self.sink);
        pending.task = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let value = {
                let mut pending = lock(&shared);
                if pending.closed || pending.generation != generation {
                    return;
                }
                pending.task = None;
                pending.value.take()
            };
            if let Some(value) = value {
                sink(value);
            }
        }));
    }

    /// Emit the pending value now instead of waiting for the quiet period.
    pub fn flush(&self) {
        let value = {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return;
            }
            pending.invalidate()
        };
        if let Some(value) = value {
            (self.sink)(value);
        }
    }

    /// Drop the pending value without emitting it.
    pub fn cancel(&self) {
        lock(&self.pending).invalidate();
    }

    /// Cancel and refuse all further input.
    pub fn close(&self) {
        let mut pending = lock(&self.pending);
        pending.invalidate();
        pending.closed = true;
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).value.is_some()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let mut pending = lock(&self.pending);
        pending.invalidate();
        pending.closed = true;
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Debouncer")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

// A poisoned lock only means a sink panicked; the pending slot is still usable.
fn lock<T>(pending: &Mutex<Pending<T>>) -> MutexGuard<'_, Pending<T>> {
    pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
