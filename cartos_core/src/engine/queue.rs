// cartos_core/src/engine/queue.rs

use crate::messages::ObservationHandle;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<ObservationHandle>,
    /// Set by `interrupt`; every wait returns immediately until `resume`.
    interrupted: bool,
    /// One-shot wake request consumed by the next waiter.
    wake_pending: bool,
}

/// Unbounded FIFO of accepted observations shared between the producer
/// callbacks and one consumer. One mutex, one condition variable.
#[derive(Debug, Default)]
pub struct ObservationQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl ObservationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` and wakes at most one waiting consumer. Never blocks
    /// beyond the short critical section.
    pub fn push(&self, item: ObservationHandle) {
        self.state.lock().items.push_back(item);
        self.available.notify_one();
    }

    pub fn try_pop(&self) -> Option<ObservationHandle> {
        self.state.lock().items.pop_front()
    }

    /// Returns the oldest item, waiting up to `timeout` for one to arrive.
    /// Returns `None` on timeout, when interrupted, or when woken by `wake`.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<ObservationHandle> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return None;
            }
            if state.wake_pending {
                state.wake_pending = false;
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            let timed_out = match deadline {
                Some(deadline) => self.available.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.available.wait(&mut state);
                    false
                }
            };
            if timed_out {
                // An item may have raced in with the timeout.
                return if state.interrupted {
                    None
                } else {
                    state.items.pop_front()
                };
            }
        }
    }

    pub fn has_elements(&self) -> bool {
        !self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_elements()
    }

    /// Discards every queued item and returns how many were dropped.
    pub fn drain_discard(&self) -> usize {
        let drained: Vec<ObservationHandle> = self.state.lock().items.drain(..).collect();
        // Handles are released outside the lock.
        drained.len()
    }

    /// Makes every current and future wait return `None` until `resume`.
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.available.notify_all();
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.interrupted = false;
        state.wake_pending = false;
    }

    /// Wakes the consumer once without delivering an item.
    pub fn wake(&self) {
        self.state.lock().wake_pending = true;
        self.available.notify_all();
    }
}
