//! Event interceptors: observers with pre/post hooks around dispatch.

use crate::event::Event;
use crate::id::ServiceId;
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::{Arc, RwLock};

/// Result of an interceptor's pre-hook. `Prevent` skips the payload
/// dispatch step for this event, though post-hooks still run
/// (spec.md §4.5 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorOutcome {
    Allow,
    Prevent,
}

/// An observer registered around event dispatch, either for one event
/// type or, via the catch-all registration, for every event.
pub trait Interceptor: Send + Sync {
    fn pre(&self, _event: &Event) -> InterceptorOutcome {
        InterceptorOutcome::Allow
    }

    fn post(&self, _event: &Event, _processed: bool) {}
}

#[derive(Clone)]
struct Entry {
    listening_service: ServiceId,
    interceptor: Arc<dyn Interceptor>,
}

/// Per-event-type and catch-all interceptor lists, snapshotted before each
/// dispatch so registration changes made by a running interceptor never
/// affect the in-flight pass.
#[derive(Default)]
pub struct InterceptorRegistry {
    by_type: DashMap<TypeId, Vec<Entry>, RandomState>,
    catch_all: RwLock<Vec<Entry>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self {
            by_type: DashMap::with_hasher(RandomState::new()),
            catch_all: RwLock::new(Vec::new()),
        }
    }

    /// `event_type = None` registers a catch-all interceptor (the
    /// source's "hash 0").
    pub fn add(&self, event_type: Option<TypeId>, listening_service: ServiceId, interceptor: Arc<dyn Interceptor>) {
        let entry = Entry { listening_service, interceptor };
        match event_type {
            Some(ty) => self.by_type.entry(ty).or_default().push(entry),
            None => self.catch_all.write().expect("interceptor lock poisoned").push(entry),
        }
    }

    pub fn remove(&self, event_type: Option<TypeId>, listening_service: ServiceId) {
        match event_type {
            Some(ty) => {
                if let Some(mut list) = self.by_type.get_mut(&ty) {
                    list.retain(|e| e.listening_service != listening_service);
                }
            }
            None => {
                self.catch_all
                    .write()
                    .expect("interceptor lock poisoned")
                    .retain(|e| e.listening_service != listening_service);
            }
        }
    }

    fn snapshot(&self, event_type: TypeId) -> Vec<Entry> {
        let mut entries = self.catch_all.read().expect("interceptor lock poisoned").clone();
        if let Some(list) = self.by_type.get(&event_type) {
            entries.extend(list.clone());
        }
        entries
    }

    /// Run every pre-hook (catch-all first, then type-specific) in
    /// registration order. All hooks run regardless of outcome; the
    /// payload step is skipped only if at least one returned `Prevent`.
    pub fn run_pre(&self, event: &Event) -> InterceptorOutcome {
        let mut outcome = InterceptorOutcome::Allow;
        for entry in self.snapshot(event.type_tag()) {
            if entry.interceptor.pre(event) == InterceptorOutcome::Prevent {
                outcome = InterceptorOutcome::Prevent;
            }
        }
        outcome
    }

    pub fn run_post(&self, event: &Event, processed: bool) {
        for entry in self.snapshot(event.type_tag()) {
            entry.interceptor.post(event, processed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Priority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingInterceptor {
        pre_calls: Arc<AtomicUsize>,
        post_calls: Arc<AtomicUsize>,
        prevent: bool,
    }

    impl Interceptor for CountingInterceptor {
        fn pre(&self, _event: &Event) -> InterceptorOutcome {
            self.pre_calls.fetch_add(1, Ordering::SeqCst);
            if self.prevent {
                InterceptorOutcome::Prevent
            } else {
                InterceptorOutcome::Allow
            }
        }
        fn post(&self, _event: &Event, _processed: bool) {
            self.post_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn catch_all_interceptor_observes_every_event() {
        let registry = InterceptorRegistry::new();
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        registry.add(
            None,
            ServiceId::NONE,
            Arc::new(CountingInterceptor {
                pre_calls: Arc::clone(&pre),
                post_calls: Arc::clone(&post),
                prevent: false,
            }),
        );
        let event = Event::new(ServiceId::NONE, Priority::NORMAL, EventKind::Quit);
        assert_eq!(registry.run_pre(&event), InterceptorOutcome::Allow);
        registry.run_post(&event, true);
        assert_eq!(pre.load(Ordering::SeqCst), 1);
        assert_eq!(post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn any_prevent_skips_payload() {
        let registry = InterceptorRegistry::new();
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        registry.add(
            None,
            ServiceId::NONE,
            Arc::new(CountingInterceptor {
                pre_calls: Arc::clone(&pre),
                post_calls: Arc::clone(&post),
                prevent: true,
            }),
        );
        let event = Event::new(ServiceId::NONE, Priority::NORMAL, EventKind::Quit);
        assert_eq!(registry.run_pre(&event), InterceptorOutcome::Prevent);
    }

    #[test]
    fn removed_interceptor_stops_observing() {
        let registry = InterceptorRegistry::new();
        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        registry.add(
            None,
            ServiceId::NONE,
            Arc::new(CountingInterceptor {
                pre_calls: Arc::clone(&pre),
                post_calls: Arc::clone(&post),
                prevent: false,
            }),
        );
        registry.remove(None, ServiceId::NONE);
        let event = Event::new(ServiceId::NONE, Priority::NORMAL, EventKind::Quit);
        registry.run_pre(&event);
        assert_eq!(pre.load(Ordering::SeqCst), 0);
    }
}
