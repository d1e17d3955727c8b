//! Ingestion queue between the producer and the analysis worker
//!
//! A mutex-guarded `VecDeque` plus a `Condvar`. `push` never blocks beyond
//! the lock; `take` parks the consumer until an item arrives or shutdown is
//! signaled. Once shut down, `take` reports [`Take::Shutdown`] even if items
//! remain; they are dropped with the queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Result of a blocking [`IngestionQueue::take`]
#[derive(Debug, PartialEq, Eq)]
pub enum Take<T> {
    Item(T),
    Shutdown,
}

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Unbounded FIFO with blocking take and explicit shutdown
pub struct IngestionQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> std::fmt::Debug for IngestionQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("IngestionQueue")
            .field("len", &state.items.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl<T> Default for IngestionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IngestionQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append and wake one waiting consumer
    ///
    /// Returns false if the queue was already shut down, in which case the
    /// item is dropped.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.lock();
        if state.shutdown {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Block until an item is available or the queue is shut down
    pub fn take(&self) -> Take<T> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return Take::Shutdown;
            }
            if let Some(item) = state.items.pop_front() {
                return Take::Item(item);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Signal shutdown and wake every waiter. Returns the number of items
    /// left unprocessed.
    pub fn shutdown(&self) -> usize {
        let mut state = self.lock();
        state.shutdown = true;
        let dropped = state.items.len();
        state.items.clear();
        drop(state);
        self.available.notify_all();
        dropped
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The queue holds plain data; a panic while locked cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
