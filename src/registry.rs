//! The generic event handler table and the dependency tracker table.
//!
//! Both are keyed-list registries snapshotted before each dispatch, the
//! same shape as `interceptor::InterceptorRegistry`, so a handler that
//! registers or removes another handler mid-dispatch never perturbs the
//! pass currently running.

use crate::event::Event;
use crate::id::{InterfaceHash, ServiceId};
use ahash::RandomState;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::any::TypeId;
use std::sync::Arc;

/// A generic handler's reaction to an event. Handlers run as coroutines;
/// a handler with no suspension point simply returns a future that
/// resolves immediately.
pub type HandlerFuture = BoxFuture<'static, ()>;
pub type HandlerFn = dyn Fn(Arc<Event>) -> HandlerFuture + Send + Sync;

#[derive(Clone)]
pub struct HandlerEntry {
    pub listening_service: ServiceId,
    pub handler: Arc<HandlerFn>,
}

/// Handlers registered via `register_event_handler`, keyed by the event
/// type they listen for.
#[derive(Default)]
pub struct HandlerRegistry {
    by_type: DashMap<TypeId, Vec<HandlerEntry>, RandomState>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            by_type: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn add(&self, event_type: TypeId, listening_service: ServiceId, handler: Arc<HandlerFn>) {
        self.by_type.entry(event_type).or_default().push(HandlerEntry { listening_service, handler });
    }

    pub fn remove(&self, event_type: TypeId, listening_service: ServiceId) {
        if let Some(mut list) = self.by_type.get_mut(&event_type) {
            list.retain(|e| e.listening_service != listening_service);
        }
    }

    /// Snapshot of handlers registered for `event_type`. The caller is
    /// responsible for filtering to services whose state permits handling
    /// (ACTIVE, or INJECTING so a service may react to events fired
    /// during its own start, per spec.md §4.5 step 3).
    pub fn handlers_for(&self, event_type: TypeId) -> Vec<HandlerEntry> {
        self.by_type.get(&event_type).map(|l| l.clone()).unwrap_or_default()
    }
}

/// A tracker's reaction to an unsatisfied dependency request.
pub type TrackerFuture = BoxFuture<'static, ()>;
pub type TrackerFn = dyn Fn(ServiceId, InterfaceHash) -> TrackerFuture + Send + Sync;

#[derive(Clone)]
pub struct TrackerEntry {
    pub tracking_service: ServiceId,
    pub tracker: Arc<TrackerFn>,
}

/// Observers of unsatisfied dependency requests (`AddTracker`/
/// `RemoveTracker`), keyed by the interface hash they watch. On add, the
/// manager replays every current unsatisfied request targeting that
/// interface so the tracker can create providers on demand (spec.md
/// §4.5 table, `AddTracker` row).
#[derive(Default)]
pub struct TrackerRegistry {
    by_interface: DashMap<InterfaceHash, Vec<TrackerEntry>, RandomState>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            by_interface: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn add(&self, interface: InterfaceHash, tracking_service: ServiceId, tracker: Arc<TrackerFn>) {
        self.by_interface.entry(interface).or_default().push(TrackerEntry { tracking_service, tracker });
    }

    pub fn remove(&self, interface: InterfaceHash, tracking_service: ServiceId) {
        if let Some(mut list) = self.by_interface.get_mut(&interface) {
            list.retain(|e| e.tracking_service != tracking_service);
        }
    }

    pub fn trackers_for(&self, interface: InterfaceHash) -> Vec<TrackerEntry> {
        self.by_interface.get(&interface).map(|l| l.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Priority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handler_registry_snapshots_by_event_type() {
        struct Marker;
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        registry.add(
            TypeId::of::<Marker>(),
            ServiceId::NONE,
            Arc::new(move |_event| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {})
            }),
        );
        let entries = registry.handlers_for(TypeId::of::<Marker>());
        assert_eq!(entries.len(), 1);
        let event = Arc::new(Event::new(ServiceId::NONE, Priority::NORMAL, EventKind::Quit));
        futures::executor::block_on((entries[0].handler)(event));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_handler_is_not_returned() {
        struct Marker;
        let registry = HandlerRegistry::new();
        let service = ServiceId::new();
        registry.add(TypeId::of::<Marker>(), service, Arc::new(|_| Box::pin(async {})));
        registry.remove(TypeId::of::<Marker>(), service);
        assert!(registry.handlers_for(TypeId::of::<Marker>()).is_empty());
    }

    #[test]
    fn tracker_registry_keys_by_interface() {
        let registry = TrackerRegistry::new();
        let iface = InterfaceHash::from_name("IUseless");
        registry.add(iface, ServiceId::NONE, Arc::new(|_service, _iface| Box::pin(async {})));
        assert_eq!(registry.trackers_for(iface).len(), 1);
        assert!(registry.trackers_for(InterfaceHash::from_name("IOther")).is_empty());
    }
}
