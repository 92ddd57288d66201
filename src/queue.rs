//! Bounded delayed-publish queue.
use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::{Result, SecureSyncError};

/// Queueing capacity: `EXMG_MESSAGE_QUEUE_SIZE` (0xFFF) in the original source.
pub const QUEUE_CAPACITY: usize = 4095;

/// A pending key-message, owned by the queue until popped by the worker.
pub struct ScopeDescriptor {
    pub message_bytes: Vec<u8>,
    pub media_time: i64,
}

/// FIFO of `ScopeDescriptor`s guarded by a single lock. `peek` does not
/// transfer ownership; `pop` does. Callers that need peek-then-pop atomicity
/// hold `lock()` across both calls (see `Session::poll_once`).
pub struct DelayQueue {
    inner: Mutex<VecDeque<ScopeDescriptor>>,
}

impl DelayQueue {
    pub fn new() -> Self {
        DelayQueue { inner: Mutex::new(VecDeque::new()) }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().len() >= QUEUE_CAPACITY
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Push a new item. Fatal (resource exhaustion) when at capacity — this
    /// indicates the configured publish delay is too high relative to queue
    /// drain rate.
    pub fn push(&self, item: ScopeDescriptor) -> Result<()> {
        let mut guard = self.inner.lock();
        if guard.len() >= QUEUE_CAPACITY {
            return Err(SecureSyncError::ResourceExhausted(
                "secure-sync queue full, publish delay is probably too high".into(),
            ));
        }
        guard.push_back(item);
        Ok(())
    }

    /// Peek-then-pop the head atomically if `should_pop` (given the peeked
    /// item's `media_time`) returns true. Returns `None` if the queue was
    /// empty or `should_pop` declined.
    pub fn pop_if(&self, should_pop: impl FnOnce(&ScopeDescriptor) -> bool) -> Option<ScopeDescriptor> {
        let mut guard = self.inner.lock();
        let head = guard.front()?;
        if should_pop(head) {
            guard.pop_front()
        } else {
            None
        }
    }

    /// Drain all items, invoking `on_drop` for each (used at shutdown).
    pub fn drain(&self, mut on_drop: impl FnMut(ScopeDescriptor)) {
        let mut guard = self.inner.lock();
        while let Some(item) = guard.pop_front() {
            on_drop(item);
        }
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(media_time: i64) -> ScopeDescriptor {
        ScopeDescriptor { message_bytes: vec![0u8], media_time }
    }

    #[test]
    fn fifo_order_preserved() {
        let q = DelayQueue::new();
        q.push(item(0)).unwrap();
        q.push(item(1)).unwrap();
        let popped = q.pop_if(|_| true).unwrap();
        assert_eq!(popped.media_time, 0);
        let popped = q.pop_if(|_| true).unwrap();
        assert_eq!(popped.media_time, 1);
    }

    #[test]
    fn pop_if_false_leaves_item_queued() {
        let q = DelayQueue::new();
        q.push(item(5)).unwrap();
        assert!(q.pop_if(|_| false).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn accepts_up_to_capacity_minus_one_then_one_more() {
        let q = DelayQueue::new();
        for i in 0..(QUEUE_CAPACITY - 1) {
            q.push(item(i as i64)).unwrap();
        }
        assert!(q.push(item(9999)).is_ok());
        assert!(q.is_full());
    }

    #[test]
    fn push_past_capacity_is_fatal() {
        let q = DelayQueue::new();
        for i in 0..QUEUE_CAPACITY {
            q.push(item(i as i64)).unwrap();
        }
        assert!(q.push(item(-1)).is_err());
    }
}
