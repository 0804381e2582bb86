//! The Communication Channel: lets independent, single-threaded managers
//! forward events to one another by id (spec.md §5).
//!
//! Each `DependencyManager` is pinned to one OS thread; a process may run
//! several in parallel. The channel is the one piece of genuinely shared
//! state between them — a mutex-guarded roster plus a thread-safe push
//! into the target manager's own queue.

use crate::event::Event;
use crate::queue::EventQueue;
use std::sync::{Arc, Mutex};

/// A numeric handle identifying a manager registered with a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

impl ManagerId {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }
}

impl Default for ManagerId {
    fn default() -> Self {
        Self::new()
    }
}

struct Roster {
    managers: Vec<(ManagerId, Arc<EventQueue>)>,
}

/// A shared roster of managers' queues, guarded by a single mutex, used to
/// forward events between independent managers by id.
#[derive(Clone)]
pub struct CommunicationChannel {
    roster: Arc<Mutex<Roster>>,
}

impl CommunicationChannel {
    pub fn new() -> Self {
        Self {
            roster: Arc::new(Mutex::new(Roster { managers: Vec::new() })),
        }
    }

    /// Register a manager's queue with this channel, returning the handle
    /// other managers use to address it.
    pub fn register(&self, queue: Arc<EventQueue>) -> ManagerId {
        let id = ManagerId::new();
        self.roster.lock().expect("channel roster poisoned").managers.push((id, queue));
        id
    }

    pub fn unregister(&self, id: ManagerId) {
        self.roster.lock().expect("channel roster poisoned").managers.retain(|(mid, _)| *mid != id);
    }

    /// Forward `event` onto the queue of the manager identified by
    /// `target`. Returns `false` if `target` is not (or no longer)
    /// registered.
    pub fn forward(&self, target: ManagerId, event: Event) -> bool {
        let roster = self.roster.lock().expect("channel roster poisoned");
        match roster.managers.iter().find(|(mid, _)| *mid == target) {
            Some((_, queue)) => {
                queue.push(event);
                true
            }
            None => false,
        }
    }

    pub fn registered_count(&self) -> usize {
        self.roster.lock().expect("channel roster poisoned").managers.len()
    }
}

impl Default for CommunicationChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Priority};
    use crate::id::ServiceId;

    #[test]
    fn forward_delivers_to_the_right_queue() {
        let channel = CommunicationChannel::new();
        let queue_a = Arc::new(EventQueue::new());
        let queue_b = Arc::new(EventQueue::new());
        let a = channel.register(Arc::clone(&queue_a));
        let _b = channel.register(Arc::clone(&queue_b));

        let event = Event::new(ServiceId::NONE, Priority::NORMAL, EventKind::Quit);
        assert!(channel.forward(a, event));
        assert_eq!(queue_a.size(), 1);
        assert_eq!(queue_b.size(), 0);
    }

    #[test]
    fn forward_to_unregistered_manager_fails() {
        let channel = CommunicationChannel::new();
        let bogus = ManagerId::new();
        let event = Event::new(ServiceId::NONE, Priority::NORMAL, EventKind::Quit);
        assert!(!channel.forward(bogus, event));
    }

    #[test]
    fn unregister_stops_delivery() {
        let channel = CommunicationChannel::new();
        let queue = Arc::new(EventQueue::new());
        let id = channel.register(Arc::clone(&queue));
        channel.unregister(id);
        let event = Event::new(ServiceId::NONE, Priority::NORMAL, EventKind::Quit);
        assert!(!channel.forward(id, event));
    }
}
