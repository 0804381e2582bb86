//! The Coroutine Scheduler: tracks suspended handler/lifecycle futures
//! keyed by promise id, and resumes them when a `Continuable` event
//! fires.
//!
//! Every suspendable handler (`start`, `stop`, event callback, tracker
//! callback) is represented here as a boxed `Future`. Polling a future
//! that returns `Poll::Pending` parks it in `scoped_generators`, paired in
//! `scoped_events` with the event that caused it to run. The waker handed
//! to the future on each poll, when invoked, pushes a `Continuable` (or
//! `ContinuableStart`, for lifecycle coroutines) event back onto the
//! queue so the dispatch loop resumes it on its next turn.

use crate::event::{Event, EventKind, Priority};
use crate::id::{PromiseId, ServiceId};
use crate::queue::EventQueue;
use ahash::RandomState;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Distinguishes a generic handler coroutine from a lifecycle (start/stop)
/// coroutine, since each resumes via a different `Continuable*` event kind
/// (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineKind {
    Handler,
    Start,
}

struct Suspended {
    future: BoxFuture<'static, Box<dyn Any + Send>>,
    kind: CoroutineKind,
    /// The chain of service scopes active when the coroutine started,
    /// used to replay deferred stop requests on completion (spec.md
    /// §4.4 "pending_stops").
    scope_stack: Vec<ServiceId>,
}

/// Outcome of spawning or resuming a coroutine.
pub enum CoroutineStep<T> {
    /// Completed synchronously (or this resume finished it); carries the
    /// final value and the scope stack to replay pending stops against.
    Finished { value: T, scope_stack: Vec<ServiceId> },
    /// Still running; callers should wait for the `Continuable*` event
    /// this promise's waker will eventually push.
    Suspended(PromiseId),
}

/// Tracks suspended generators and the events that are pinned alive while
/// they remain suspended (spec.md §8 property 3: the two key sets stay
/// equal).
pub struct CoroutineScheduler {
    queue: Arc<EventQueue>,
    generators: DashMap<PromiseId, Suspended, RandomState>,
    events: DashMap<PromiseId, Arc<Event>, RandomState>,
}

impl CoroutineScheduler {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self {
            queue,
            generators: DashMap::with_hasher(RandomState::new()),
            events: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Start a new coroutine. Polls it once immediately; if it completes
    /// synchronously no promise is ever allocated.
    pub fn spawn<F, T>(
        &self,
        future: F,
        kind: CoroutineKind,
        scope_stack: Vec<ServiceId>,
        originating_event: Arc<Event>,
    ) -> CoroutineStep<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let boxed: BoxFuture<'static, Box<dyn Any + Send>> =
            Box::pin(async move { Box::new(future.await) as Box<dyn Any + Send> });
        self.poll_or_park(boxed, kind, scope_stack, originating_event)
    }

    fn poll_or_park<T: 'static>(
        &self,
        mut future: BoxFuture<'static, Box<dyn Any + Send>>,
        kind: CoroutineKind,
        scope_stack: Vec<ServiceId>,
        originating_event: Arc<Event>,
    ) -> CoroutineStep<T> {
        let promise = PromiseId::new();
        let waker = self.make_waker(promise, kind);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => CoroutineStep::Finished {
                value: *value.downcast::<T>().expect("coroutine output type mismatch"),
                scope_stack,
            },
            Poll::Pending => {
                #[cfg(feature = "logging")]
                tracing::debug!(target: "dependency_manager", %promise, ?kind, "coroutine suspended");
                self.generators.insert(
                    promise,
                    Suspended {
                        future,
                        kind,
                        scope_stack,
                    },
                );
                self.events.insert(promise, originating_event);
                CoroutineStep::Suspended(promise)
            }
        }
    }

    /// Resume a suspended coroutine after its `Continuable*` event fires.
    /// Returns `None` if `promise` is not (or no longer) suspended here —
    /// a bug in the caller, since every `Continuable*` event is only ever
    /// pushed by a waker this scheduler itself handed out.
    pub fn resume<T: 'static>(&self, promise: PromiseId) -> Option<CoroutineStep<T>> {
        let (mut future, kind, scope_stack) = {
            let (_, suspended) = self.generators.remove(&promise)?;
            (suspended.future, suspended.kind, suspended.scope_stack)
        };
        let waker = self.make_waker(promise, kind);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => {
                self.events.remove(&promise);
                Some(CoroutineStep::Finished {
                    value: *value.downcast::<T>().expect("coroutine output type mismatch"),
                    scope_stack,
                })
            }
            Poll::Pending => {
                self.generators.insert(
                    promise,
                    Suspended {
                        future,
                        kind,
                        scope_stack,
                    },
                );
                Some(CoroutineStep::Suspended(promise))
            }
        }
    }

    fn make_waker(&self, promise: PromiseId, kind: CoroutineKind) -> std::task::Waker {
        let queue = Arc::clone(&self.queue);
        futures::task::waker(Arc::new(PromiseWaker { queue, promise, kind }))
    }

    pub fn is_suspended(&self, promise: PromiseId) -> bool {
        self.generators.contains_key(&promise)
    }

    /// The scope stack a suspended promise was spawned/last resumed with,
    /// without disturbing its parked state. Used to push the right
    /// execution scope before resuming it (spec.md §5 "scoped
    /// acquisition").
    pub fn peek_scope_stack(&self, promise: PromiseId) -> Option<Vec<ServiceId>> {
        self.generators.get(&promise).map(|s| s.scope_stack.clone())
    }

    pub fn has_pending(&self) -> bool {
        !self.generators.is_empty()
    }

    /// spec.md §8 property 3: the keys of `scoped_generators` and
    /// `scoped_events` must always coincide.
    #[cfg(test)]
    fn keys_match(&self) -> bool {
        self.generators.len() == self.events.len()
            && self.generators.iter().all(|e| self.events.contains_key(e.key()))
    }
}

struct PromiseWaker {
    queue: Arc<EventQueue>,
    promise: PromiseId,
    kind: CoroutineKind,
}

impl futures::task::ArcWake for PromiseWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let kind = match arc_self.kind {
            CoroutineKind::Handler => EventKind::Continuable { promise: arc_self.promise },
            CoroutineKind::Start => EventKind::ContinuableStart { promise: arc_self.promise },
        };
        arc_self.queue.push(Event::new(ServiceId::NONE, Priority::INTERNAL, kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind as Ek;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::Poll as StdPoll;

    fn dummy_event() -> Arc<Event> {
        Arc::new(Event::new(ServiceId::NONE, Priority::NORMAL, Ek::Quit))
    }

    #[test]
    fn synchronous_future_completes_without_suspending() {
        let queue = Arc::new(EventQueue::new());
        let scheduler = CoroutineScheduler::new(queue);
        let step = scheduler.spawn(async { 42i32 }, CoroutineKind::Handler, vec![], dummy_event());
        match step {
            CoroutineStep::Finished { value, .. } => assert_eq!(value, 42),
            CoroutineStep::Suspended(_) => panic!("expected synchronous completion"),
        }
    }

    struct YieldOnce {
        yielded: bool,
    }
    impl Future for YieldOnce {
        type Output = &'static str;
        fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> StdPoll<Self::Output> {
            if self.yielded {
                StdPoll::Ready("done")
            } else {
                self.yielded = true;
                cx.waker().wake_by_ref();
                StdPoll::Pending
            }
        }
    }

    #[test]
    fn suspended_future_parks_and_resumes() {
        let queue = Arc::new(EventQueue::new());
        let scheduler = CoroutineScheduler::new(Arc::clone(&queue));
        let step = scheduler.spawn(
            YieldOnce { yielded: false },
            CoroutineKind::Handler,
            vec![],
            dummy_event(),
        );
        let promise = match step {
            CoroutineStep::Suspended(p) => p,
            CoroutineStep::Finished { .. } => panic!("expected suspension"),
        };
        assert!(scheduler.is_suspended(promise));
        assert!(scheduler.keys_match());

        // waking immediately re-queued a Continuable event for this promise
        let requeued = queue.try_pop().expect("waker should have pushed a Continuable event");
        assert!(matches!(requeued.kind, Ek::Continuable { promise: p } if p == promise));

        let resumed: CoroutineStep<&'static str> = scheduler.resume(promise).expect("promise should exist");
        match resumed {
            CoroutineStep::Finished { value, .. } => assert_eq!(value, "done"),
            CoroutineStep::Suspended(_) => panic!("expected completion on resume"),
        }
        assert!(!scheduler.is_suspended(promise));
        assert!(scheduler.keys_match());
    }

    #[test]
    fn scope_stack_round_trips_through_suspension() {
        let queue = Arc::new(EventQueue::new());
        let scheduler = CoroutineScheduler::new(queue);
        let scope = vec![ServiceId::new(), ServiceId::new()];
        let woke = Arc::new(AtomicBool::new(false));
        let woke2 = Arc::clone(&woke);
        let step = scheduler.spawn(
            async move {
                woke2.store(true, Ordering::SeqCst);
                "ok"
            },
            CoroutineKind::Start,
            scope.clone(),
            dummy_event(),
        );
        if let CoroutineStep::Finished { scope_stack, .. } = step {
            assert_eq!(scope_stack, scope);
        } else {
            panic!("expected synchronous completion");
        }
    }
}
