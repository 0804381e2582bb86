//! The event queue: an ordered, priority-tagged inbox.
//!
//! Ordering is strictly `(priority asc, id asc)`; within a priority band,
//! insertion order is preserved because `id` is assigned monotonically at
//! push time. `push` never blocks and never drops. `pop_blocking` parks
//! the calling thread until an event is available or the queue has been
//! told to quit and has drained.

use crate::event::Event;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};

struct QueueEntry(Event);

impl QueueEntry {
    fn key(&self) -> (i32, u64) {
        (self.0.priority.0, self.0.id.get())
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest (priority, id)
        // pair — the next event per spec ordering — pops first.
        other.key().cmp(&self.key())
    }
}

struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    quitting: bool,
}

/// Configuration hints for constructing an event queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventQueueConfig {
    pub capacity_hint: usize,
}

/// A thread-safe priority event queue. The default backend is a binary
/// heap guarded by a mutex and condvar; alternative backends (io_uring,
/// sd-event) would implement the same push/pop_blocking contract.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    condvar: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_config(EventQueueConfig::default())
    }

    pub fn with_config(config: EventQueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::with_capacity(config.capacity_hint),
                quitting: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Enqueue an event. Never blocks, never drops.
    pub fn push(&self, event: Event) {
        #[cfg(feature = "logging")]
        tracing::trace!(target: "dependency_manager", event_id = event.id.get(), priority = event.priority.0, "push");
        let mut inner = self.inner.lock().expect("event queue mutex poisoned");
        inner.heap.push(QueueEntry(event));
        self.condvar.notify_all();
    }

    /// Block until the next event is available, or return `None` once
    /// `quit()` has been called and the queue has fully drained.
    pub fn pop_blocking(&self) -> Option<Event> {
        let mut inner = self.inner.lock().expect("event queue mutex poisoned");
        loop {
            if let Some(entry) = inner.heap.pop() {
                return Some(entry.0);
            }
            if inner.quitting {
                return None;
            }
            inner = self.condvar.wait(inner).expect("event queue mutex poisoned");
        }
    }

    /// Non-blocking pop, for drain loops that must not park.
    pub fn try_pop(&self) -> Option<Event> {
        let mut inner = self.inner.lock().expect("event queue mutex poisoned");
        inner.heap.pop().map(|e| e.0)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().expect("event queue mutex poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Signal that no more events will be pushed once the current backlog
    /// drains; wakes any thread parked in `pop_blocking`.
    pub fn quit(&self) {
        let mut inner = self.inner.lock().expect("event queue mutex poisoned");
        inner.quitting = true;
        self.condvar.notify_all();
    }

    pub fn is_quitting(&self) -> bool {
        self.inner.lock().expect("event queue mutex poisoned").quitting
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Priority};
    use crate::id::ServiceId;

    fn ev(priority: i32) -> Event {
        Event::new(ServiceId::NONE, Priority(priority), EventKind::Quit)
    }

    #[test]
    fn orders_by_priority_then_insertion() {
        let queue = EventQueue::new();
        queue.push(ev(5));
        queue.push(ev(1));
        queue.push(ev(1));
        queue.push(ev(3));

        let first = queue.try_pop().unwrap();
        let second = queue.try_pop().unwrap();
        let third = queue.try_pop().unwrap();
        let fourth = queue.try_pop().unwrap();

        assert_eq!(first.priority.0, 1);
        assert_eq!(second.priority.0, 1);
        assert!(first.id.get() < second.id.get(), "same-priority events keep insertion order");
        assert_eq!(third.priority.0, 3);
        assert_eq!(fourth.priority.0, 5);
    }

    #[test]
    fn pop_blocking_returns_none_after_quit_drains() {
        let queue = EventQueue::new();
        queue.push(ev(0));
        queue.quit();
        assert!(queue.pop_blocking().is_some());
        assert!(queue.pop_blocking().is_none());
    }

    #[test]
    fn push_never_blocks_even_while_quitting() {
        let queue = EventQueue::new();
        queue.quit();
        queue.push(ev(0));
        assert_eq!(queue.size(), 1);
    }
}
