//! Fixed-capacity blocking FIFO with drop-oldest overflow.
//!
//! Items live in a `HeapRb` guarded by a mutex; a condition variable wakes
//! consumers on push and on every state transition.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use contracts::{ContractError, Wait, WaitError};
use ringbuf::{traits::*, HeapRb};
use tracing::trace;

/// Operational mode of a [`BoundedQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Initial and terminal mode; rejects pushes and fails pops
    Stopped,
    /// Accepting pushes, pops block for data
    Enabled,
    /// Temporarily off; rejects pushes and fails pops
    Disabled,
}

struct Inner<T> {
    ring: HeapRb<T>,
    state: QueueState,
    /// No more pushes; pops drain what is left, then report end of stream
    finished: bool,
    dropped: u64,
}

/// Thread-safe bounded FIFO.
///
/// Pushing into a full queue evicts the oldest item. Leaving the `Enabled` state
/// purges every queued item and wakes all blocked consumers with
/// [`WaitError::Failed`].
pub struct BoundedQueue<T> {
    name: String,
    capacity: usize,
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("len", &inner.ring.occupied_len())
            .field("capacity", &self.capacity)
            .field("state", &inner.state)
            .field("dropped", &inner.dropped)
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a stopped queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Result<Self, ContractError> {
        Self::with_name("queue", capacity)
    }

    /// Create a stopped queue with a name used in traces and metrics
    pub fn with_name(name: impl Into<String>, capacity: usize) -> Result<Self, ContractError> {
        if capacity == 0 {
            return Err(ContractError::config_validation(
                "capacity",
                "queue capacity must be at least 1",
            ));
        }

        Ok(Self {
            name: name.into(),
            capacity,
            inner: Mutex::new(Inner {
                ring: HeapRb::new(capacity),
                state: QueueState::Stopped,
                finished: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ring.is_empty()
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Items evicted by overflow since construction
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    /// Accept pushes and serve pops. Idempotent.
    pub fn enable(&self) {
        let mut inner = self.lock();
        if inner.state != QueueState::Enabled {
            trace!(queue = %self.name, from = ?inner.state, "queue enabled");
            inner.state = QueueState::Enabled;
            inner.finished = false;
        }
    }

    /// Mark the producer side exhausted. Queued items stay poppable; once they
    /// are drained every pop returns [`WaitError::Eof`]. Idempotent.
    pub fn finish(&self) {
        {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
        }
        self.ready.notify_all();
        trace!(queue = %self.name, "queue finished");
    }

    /// Purge all items and fail pops until re-enabled. Idempotent.
    pub fn disable(&self) {
        self.shut(QueueState::Disabled);
    }

    /// Purge all items and fail pops; the pre-destroy state. Idempotent.
    pub fn stop(&self) {
        self.shut(QueueState::Stopped);
    }

    fn shut(&self, state: QueueState) {
        // purged items are released after the lock is dropped
        let purged: Vec<T> = {
            let mut inner = self.lock();
            inner.state = state;
            inner.ring.pop_iter().collect()
        };
        self.ready.notify_all();

        if !purged.is_empty() {
            trace!(queue = %self.name, purged = purged.len(), ?state, "queue purged");
        }
    }

    /// Insert at the tail, discarding the oldest item when full.
    ///
    /// While disabled or stopped the item is released immediately.
    pub fn push(&self, item: T) {
        drop(self.push_returning(item));
    }

    /// Insert at the tail and hand any rejected or evicted item back to the caller.
    ///
    /// Returns the evicted oldest item when full, or `item` itself when the queue
    /// is not enabled.
    pub fn push_returning(&self, item: T) -> Option<T> {
        let evicted = {
            let mut inner = self.lock();
            if inner.state != QueueState::Enabled || inner.finished {
                trace!(queue = %self.name, state = ?inner.state, "push rejected");
                return Some(item);
            }

            let evicted = inner.ring.push_overwrite(item);
            if evicted.is_some() {
                inner.dropped += 1;
            }
            evicted
        };
        self.ready.notify_one();

        if evicted.is_some() {
            trace!(queue = %self.name, "queue full, oldest item dropped");
            metrics::counter!("capsync_queue_dropped_total", "queue" => self.name.clone())
                .increment(1);
        }
        evicted
    }

    /// Remove the head item, waiting as allowed by `wait`.
    ///
    /// Fails immediately while disabled or stopped. A state change during the
    /// wait wakes the caller with [`WaitError::Failed`]; an empty finished queue
    /// returns [`WaitError::Eof`].
    pub fn pop(&self, wait: Wait) -> Result<T, WaitError> {
        let deadline = wait.deadline_from(Instant::now());
        let mut inner = self.lock();

        loop {
            if inner.state != QueueState::Enabled {
                return Err(WaitError::Failed);
            }
            if let Some(item) = inner.ring.try_pop() {
                return Ok(item);
            }
            if inner.finished {
                return Err(WaitError::Eof);
            }

            inner = match (wait, deadline) {
                (Wait::For(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::Timeout);
                    }
                    self.ready
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                _ => self
                    .ready
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}
