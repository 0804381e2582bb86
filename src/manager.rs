//! The Dependency Manager: the single-threaded dispatch loop that owns the
//! service arena, drives the lifecycle state machine, runs the dependency
//! resolver's cascades, and bridges suspended coroutines back onto the
//! event queue.
//!
//! This is the entry point user code and services talk to: creating
//! services, pushing events, registering handlers/interceptors/trackers,
//! and waiting on events or service transitions.

use crate::builder::{ServiceBehavior, ServiceBuilder, ServiceHandle};
use crate::coroutine::{CoroutineKind, CoroutineScheduler, CoroutineStep};
use crate::error::{fatal, StartError, WaitError};
use crate::event::{Event, EventKind, Priority};
use crate::id::{EventId, InterfaceHash, PromiseId, ServiceId};
use crate::interceptor::{Interceptor, InterceptorOutcome, InterceptorRegistry};
use crate::lifecycle::ServiceState;
use crate::queue::{EventQueue, EventQueueConfig};
use crate::registry::{HandlerFn, HandlerFuture, HandlerRegistry, TrackerFn, TrackerFuture, TrackerRegistry};
use crate::resolver::{self, ServiceArena};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Waker};

/// Construction-time hints for a `DependencyManager`, mirroring the
/// teacher's `Container::with_capacity`.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub queue: EventQueueConfig,
}

/// What a suspended lifecycle coroutine will do when it finishes, and for
/// which service (spec.md §4.4).
#[derive(Clone, Copy)]
enum LifecycleOp {
    Start(ServiceId),
    Stop(ServiceId, bool),
}

/// Tracks which of a going-offline service's dependees have finished
/// reacting to its departure (spec.md §4.3 offline cascade).
struct PendingOfflineWait {
    remove_after: bool,
    waiting_on: HashSet<ServiceId, RandomState>,
}

enum EventWaitState {
    Waiting(Vec<Waker>),
    Done,
}

#[derive(Default)]
struct ServiceWaiterLists {
    active: Vec<Waker>,
    offline: Vec<Waker>,
}

struct ManagerInner {
    queue: Arc<EventQueue>,
    arena: ServiceArena,
    handles: DashMap<ServiceId, ServiceHandle, RandomState>,
    pending_inserts: DashMap<ServiceId, crate::lifecycle::ServiceRecord, RandomState>,
    handlers: HandlerRegistry,
    interceptors: InterceptorRegistry,
    trackers: TrackerRegistry,
    scheduler: CoroutineScheduler,
    lifecycle_ops: DashMap<PromiseId, LifecycleOp, RandomState>,
    pending_stops: DashMap<ServiceId, bool, RandomState>,
    offline_waits: DashMap<ServiceId, PendingOfflineWait, RandomState>,
    event_waiters: Mutex<HashMap<EventId, EventWaitState>>,
    service_waiters: Mutex<HashMap<ServiceId, ServiceWaiterLists>>,
    quit_requested: AtomicBool,
    scope_stack: RefCell<Vec<ServiceId>>,
}

thread_local! {
    static CURRENT: RefCell<Vec<DependencyManager>> = const { RefCell::new(Vec::new()) };
}

struct EnterGuard;

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
    }
}

/// The per-thread runtime host of services and the event loop (spec.md
/// §2 component 5). Cheaply `Clone`-able; every clone shares the same
/// underlying state.
#[derive(Clone)]
pub struct DependencyManager {
    inner: Arc<ManagerInner>,
}

impl Default for DependencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyManager {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let queue = Arc::new(EventQueue::with_config(config.queue));
        let inner = Arc::new(ManagerInner {
            queue: Arc::clone(&queue),
            arena: ServiceArena::new(),
            handles: DashMap::with_hasher(RandomState::new()),
            pending_inserts: DashMap::with_hasher(RandomState::new()),
            handlers: HandlerRegistry::new(),
            interceptors: InterceptorRegistry::new(),
            trackers: TrackerRegistry::new(),
            scheduler: CoroutineScheduler::new(queue),
            lifecycle_ops: DashMap::with_hasher(RandomState::new()),
            pending_stops: DashMap::with_hasher(RandomState::new()),
            offline_waits: DashMap::with_hasher(RandomState::new()),
            event_waiters: Mutex::new(HashMap::new()),
            service_waiters: Mutex::new(HashMap::new()),
            quit_requested: AtomicBool::new(false),
            scope_stack: RefCell::new(Vec::new()),
        });
        Self { inner }
    }

    /// The manager currently executing on this thread, if any. Accessible
    /// from any service method, including coroutine resumption contexts
    /// (spec.md §5, "the only global").
    pub fn current() -> Option<DependencyManager> {
        CURRENT.with(|c| c.borrow().last().cloned())
    }

    fn enter(&self) -> EnterGuard {
        CURRENT.with(|c| c.borrow_mut().push(self.clone()));
        EnterGuard
    }

    // ---- scope stack (spec.md §5 "scoped acquisition") -----------------

    fn push_scope(&self, id: ServiceId) {
        self.inner.scope_stack.borrow_mut().push(id);
    }

    fn pop_scope(&self) {
        self.inner.scope_stack.borrow_mut().pop();
    }

    fn push_scope_stack(&self, ids: &[ServiceId]) {
        for &id in ids {
            self.push_scope(id);
        }
    }

    fn pop_scope_stack(&self, ids: &[ServiceId]) {
        for _ in ids {
            self.pop_scope();
        }
    }

    fn current_scope_stack(&self) -> Vec<ServiceId> {
        self.inner.scope_stack.borrow().clone()
    }

    fn scope_stack_with(&self, id: ServiceId) -> Vec<ServiceId> {
        let mut stack = self.current_scope_stack();
        stack.push(id);
        stack
    }

    /// The service whose scope is currently executing on this thread, if
    /// any.
    pub fn current_scope(&self) -> Option<ServiceId> {
        self.inner.scope_stack.borrow().last().copied()
    }

    // ---- event plumbing --------------------------------------------------

    fn push(&self, event: Event) -> EventId {
        let id = event.id;
        self.inner.queue.push(event);
        id
    }

    fn push_internal(&self, kind: EventKind) -> EventId {
        self.push(Event::new(ServiceId::NONE, Priority::INTERNAL, kind))
    }

    /// Push a user-originated event at normal priority.
    pub fn push_event(&self, originating: ServiceId, kind: EventKind) -> EventId {
        self.push(Event::new(originating, Priority::NORMAL, kind))
    }

    /// Push a user-originated event at an explicit priority.
    pub fn push_prioritised_event(&self, originating: ServiceId, priority: Priority, kind: EventKind) -> EventId {
        self.push(Event::new(originating, priority, kind))
    }

    /// Begin shutdown. Idempotent (spec.md §8 "Quit applied twice is
    /// equivalent to applied once").
    pub fn quit(&self) {
        self.push_event(ServiceId::NONE, EventKind::Quit);
    }

    pub fn is_quitting(&self) -> bool {
        self.inner.quit_requested.load(Ordering::SeqCst)
    }

    pub fn service_count(&self) -> usize {
        self.inner.arena.len()
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue.size()
    }

    // ---- service creation --------------------------------------------------

    /// Build a lifecycle record from `builder`, bind it to `instance` and
    /// `behavior`, and push `InsertService` at internal priority
    /// (spec.md §6 `create_service_manager`).
    pub fn create_service(
        &self,
        builder: ServiceBuilder,
        instance: Arc<dyn Any + Send + Sync>,
        behavior: Arc<dyn ServiceBehavior>,
    ) -> ServiceId {
        let record = builder.build();
        let id = record.id;
        self.inner.pending_inserts.insert(id, record);
        self.inner.handles.insert(id, ServiceHandle { instance, behavior });
        self.push_internal(EventKind::InsertService { service: id });
        id
    }

    /// The `Arc<dyn Any + Send + Sync>` instance bound to `id`, if it still
    /// exists.
    pub fn instance(&self, id: ServiceId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.handles.get(&id).map(|h| Arc::clone(&h.instance))
    }

    // ---- observation registration --------------------------------------

    /// Register a generic event handler for `event_type`, owned by
    /// `service`. Returns an RAII `Registration`; dropping it emits
    /// `RemoveEventHandler` (spec.md §6).
    pub fn register_event_handler<F>(&self, service: ServiceId, event_type: TypeId, handler: F) -> Registration
    where
        F: Fn(Arc<Event>) -> HandlerFuture + Send + Sync + 'static,
    {
        let handler: Arc<HandlerFn> = Arc::new(handler);
        self.push_internal(EventKind::AddEventHandler {
            event_type,
            listening_service: service,
            handler,
        });
        Registration {
            manager: Arc::downgrade(&self.inner),
            kind: RegistrationKind::Handler { event_type, service },
        }
    }

    /// Register an interceptor. `event_type = None` registers it against
    /// every event (the catch-all / "hash 0" registration).
    pub fn register_event_interceptor(
        &self,
        service: ServiceId,
        event_type: Option<TypeId>,
        interceptor: Arc<dyn Interceptor>,
    ) -> Registration {
        self.push_internal(EventKind::AddEventInterceptor {
            event_type,
            listening_service: service,
            interceptor,
        });
        Registration {
            manager: Arc::downgrade(&self.inner),
            kind: RegistrationKind::Interceptor { event_type, service },
        }
    }

    /// Register a dependency tracker for `interface`. On add, every
    /// currently unsatisfied request against `interface` is replayed to
    /// it (spec.md §4.5 `AddTracker` row).
    pub fn register_dependency_tracker<F>(&self, service: ServiceId, interface: InterfaceHash, tracker: F) -> Registration
    where
        F: Fn(ServiceId, InterfaceHash) -> TrackerFuture + Send + Sync + 'static,
    {
        let tracker: Arc<TrackerFn> = Arc::new(tracker);
        self.push_internal(EventKind::AddTracker {
            interface,
            tracking_service: service,
            tracker,
        });
        Registration {
            manager: Arc::downgrade(&self.inner),
            kind: RegistrationKind::Tracker { interface, service },
        }
    }

    /// An awaitable that resolves once `event_id` has been fully
    /// dispatched (spec.md §6 `wait_for_event`).
    pub fn wait_for_event(&self, event_id: EventId) -> EventWaiter {
        EventWaiter {
            manager: Arc::downgrade(&self.inner),
            id: event_id,
        }
    }

    /// An awaitable that resolves once `service` reaches ACTIVE
    /// (`until_active = true`) or leaves ACTIVE / is removed
    /// (`until_active = false`) (spec.md §6 `wait_for_service`).
    pub fn wait_for_service(&self, service: ServiceId, until_active: bool) -> ServiceWaiter {
        ServiceWaiter {
            manager: Arc::downgrade(&self.inner),
            service,
            until_active,
        }
    }

    // ---- the dispatch loop ----------------------------------------------

    /// Run the dispatch loop until the queue signals quit. `capture_interrupt`
    /// is advisory: callers that want Ctrl-C to trigger a clean shutdown
    /// should install their own OS signal handler that calls `quit()` on
    /// this manager; the core has no OS-level dependency of its own.
    pub fn run(&self, capture_interrupt: bool) {
        let _guard = self.enter();
        #[cfg(feature = "logging")]
        if capture_interrupt {
            tracing::debug!(target: "dependency_manager", "run() expects an external interrupt handler to call quit()");
        }
        #[cfg(not(feature = "logging"))]
        let _ = capture_interrupt;
        while let Some(event) = self.inner.queue.pop_blocking() {
            self.dispatch_one(Arc::new(event));
        }
    }

    /// Dispatch every event currently queued without blocking, for tests
    /// and embedding scenarios that drive the loop manually.
    pub fn drain(&self) {
        let _guard = self.enter();
        while let Some(event) = self.inner.queue.try_pop() {
            self.dispatch_one(Arc::new(event));
        }
    }

    fn dispatch_one(&self, event: Arc<Event>) {
        let outcome = self.inner.interceptors.run_pre(&event);
        let processed = if outcome == InterceptorOutcome::Allow {
            self.dispatch_payload(Arc::clone(&event))
        } else {
            false
        };
        self.inner.interceptors.run_post(&event, processed);
        self.complete_event(event.id);
        self.maybe_finish_quit();
    }

    fn dispatch_payload(&self, event: Arc<Event>) -> bool {
        match &event.kind {
            EventKind::InsertService { service } => {
                self.handle_insert_service(*service);
                true
            }
            EventKind::StartService { service } => {
                self.handle_start_service(*service, Arc::clone(&event));
                true
            }
            EventKind::DependencyOnline { service } => {
                self.handle_dependency_online(*service);
                true
            }
            EventKind::DependencyOffline { service, remove_after } => {
                self.handle_dependency_offline(*service, *remove_after);
                true
            }
            EventKind::StopService { service, remove_after } => {
                self.handle_stop_service(*service, *remove_after, Arc::clone(&event));
                true
            }
            EventKind::RemoveService { service } => {
                self.handle_remove_service(*service);
                true
            }
            EventKind::DependencyRequest { interface, requester } => {
                self.handle_dependency_request(*interface, *requester, Arc::clone(&event));
                true
            }
            EventKind::AddEventHandler { event_type, listening_service, handler } => {
                self.inner.handlers.add(*event_type, *listening_service, Arc::clone(handler));
                true
            }
            EventKind::RemoveEventHandler { event_type, listening_service } => {
                self.inner.handlers.remove(*event_type, *listening_service);
                true
            }
            EventKind::AddEventInterceptor { event_type, listening_service, interceptor } => {
                self.inner.interceptors.add(*event_type, *listening_service, Arc::clone(interceptor));
                true
            }
            EventKind::RemoveEventInterceptor { event_type, listening_service } => {
                self.inner.interceptors.remove(*event_type, *listening_service);
                true
            }
            EventKind::AddTracker { interface, tracking_service, tracker } => {
                self.inner.trackers.add(*interface, *tracking_service, Arc::clone(tracker));
                self.replay_tracker(*interface, Arc::clone(tracker));
                true
            }
            EventKind::RemoveTracker { interface, tracking_service } => {
                self.inner.trackers.remove(*interface, *tracking_service);
                true
            }
            EventKind::DependencyUndoRequest { interface, requester } => {
                #[cfg(feature = "logging")]
                tracing::debug!(target: "dependency_manager", %interface, %requester, "dependency registration withdrawn");
                #[cfg(not(feature = "logging"))]
                let _ = (interface, requester);
                true
            }
            EventKind::RunFunction { func } => {
                if let Some(f) = func.lock().expect("run-function mutex poisoned").take() {
                    f();
                }
                true
            }
            EventKind::RunFunctionAsync { func } => {
                if let Some(f) = func.lock().expect("run-function mutex poisoned").take() {
                    let future = f();
                    self.spawn_handler(event.originating_service, future);
                }
                true
            }
            EventKind::Continuable { promise } => {
                self.handle_continuable(*promise);
                true
            }
            EventKind::ContinuableStart { promise } => {
                self.handle_continuable_start(*promise);
                true
            }
            EventKind::Quit => {
                self.handle_quit();
                true
            }
            EventKind::Custom { .. } => self.dispatch_generic(Arc::clone(&event)),
        }
    }

    fn dispatch_generic(&self, event: Arc<Event>) -> bool {
        let handlers = self.inner.handlers.handlers_for(event.type_tag());
        let mut ran_any = false;
        for entry in handlers {
            let eligible = self
                .inner
                .arena
                .get(entry.listening_service)
                .map(|r| matches!(r.state, ServiceState::Active | ServiceState::Injecting))
                .unwrap_or(false);
            if !eligible {
                continue;
            }
            ran_any = true;
            let future = (entry.handler)(Arc::clone(&event));
            self.spawn_handler(entry.listening_service, future);
        }
        ran_any
    }

    // ---- lifecycle transitions (spec.md §4.5) ---------------------------

    fn handle_insert_service(&self, id: ServiceId) {
        let Some((_, record)) = self.inner.pending_inserts.remove(&id) else {
            fatal(format!("InsertService for a service {id} not staged in pending_inserts"));
        };
        self.inner.arena.insert(record);
        resolver::inject_self_provider(&self.inner.arena, id);
        let satisfied = resolver::match_against_active(&self.inner.arena, id);
        if satisfied {
            self.push_internal(EventKind::StartService { service: id });
        }
    }

    fn handle_start_service(&self, id: ServiceId, event: Arc<Event>) {
        let should_start = match self.inner.arena.get(id) {
            Some(record) => {
                matches!(record.state, ServiceState::Installed | ServiceState::Injecting) && record.required_satisfied()
            }
            None => false,
        };
        if !should_start {
            return;
        }
        self.run_start_coroutine(id, event);
    }

    fn run_start_coroutine(&self, id: ServiceId, event: Arc<Event>) {
        match self.inner.arena.get_mut(id) {
            Some(mut record) => record.state = ServiceState::Starting,
            None => return,
        }
        let behavior = match self.inner.handles.get(&id) {
            Some(handle) => Arc::clone(&handle.behavior),
            None => fatal(format!("no ServiceHandle bound to {id}")),
        };
        let chain = self.scope_stack_with(id);
        self.push_scope(id);
        let step: CoroutineStep<Result<(), StartError>> =
            self.inner.scheduler.spawn(behavior.start(), CoroutineKind::Start, chain, event);
        self.pop_scope();
        self.handle_start_step(id, step);
    }

    fn handle_start_step(&self, id: ServiceId, step: CoroutineStep<Result<(), StartError>>) {
        match step {
            CoroutineStep::Finished { value, scope_stack } => {
                match value {
                    Ok(()) => {
                        self.push_internal(EventKind::DependencyOnline { service: id });
                    }
                    Err(err) => {
                        #[cfg(feature = "logging")]
                        tracing::error!(target: "dependency_manager", service = %id, error = %err, "service failed to start");
                        #[cfg(not(feature = "logging"))]
                        let _ = &err;
                        if let Some(mut record) = self.inner.arena.get_mut(id) {
                            record.state = ServiceState::Installed;
                        }
                    }
                }
                self.replay_pending_stops(&scope_stack);
            }
            CoroutineStep::Suspended(promise) => {
                self.inner.lifecycle_ops.insert(promise, LifecycleOp::Start(id));
            }
        }
    }

    fn handle_dependency_online(&self, id: ServiceId) {
        match self.inner.arena.get_mut(id) {
            Some(mut record) => record.state = ServiceState::Active,
            None => return,
        }
        self.wake_service_waiters(id, true);
        let to_start = resolver::online_cascade(&self.inner.arena, id);
        for consumer in to_start {
            self.push_internal(EventKind::StartService { service: consumer });
        }
        if self.inner.quit_requested.load(Ordering::SeqCst) {
            self.push_internal(EventKind::StopService { service: id, remove_after: true });
        }
    }

    fn handle_dependency_offline(&self, id: ServiceId, remove_after: bool) {
        let dependees = resolver::dependees_requiring_offline(&self.inner.arena, id);
        match self.inner.arena.get_mut(id) {
            Some(mut record) => record.state = ServiceState::Uninjecting,
            None => return,
        }

        let mut waiting: HashSet<ServiceId, RandomState> = HashSet::default();
        for dependee in dependees {
            let lost_required = resolver::uninject(&self.inner.arena, dependee, id);
            if !lost_required {
                continue;
            }
            let already_leaving = self
                .inner
                .arena
                .get(dependee)
                .map(|r| matches!(r.state, ServiceState::Uninjecting | ServiceState::Stopping))
                .unwrap_or(true);
            if !already_leaving {
                waiting.insert(dependee);
                self.push_internal(EventKind::DependencyOffline { service: dependee, remove_after: false });
            }
        }

        if waiting.is_empty() {
            self.push_internal(EventKind::StopService { service: id, remove_after });
        } else {
            self.inner.offline_waits.insert(id, PendingOfflineWait { remove_after, waiting_on: waiting });
        }
    }

    fn handle_stop_service(&self, id: ServiceId, remove_after: bool, event: Arc<Event>) {
        let state = match self.inner.arena.get(id) {
            Some(record) => record.state,
            None => return,
        };
        match state {
            ServiceState::Installed => {}
            ServiceState::Starting | ServiceState::Stopping => {
                self.inner
                    .pending_stops
                    .entry(id)
                    .and_modify(|flag| *flag = *flag || remove_after)
                    .or_insert(remove_after);
            }
            ServiceState::Uninjecting => {
                if let Some(mut wait) = self.inner.offline_waits.get_mut(&id) {
                    wait.remove_after = wait.remove_after || remove_after;
                } else {
                    self.begin_stop_coroutine(id, remove_after, event);
                }
            }
            ServiceState::Active => {
                let has_dependees = self.inner.arena.get(id).map(|r| !r.dependees.is_empty()).unwrap_or(false);
                if has_dependees {
                    self.push_internal(EventKind::DependencyOffline { service: id, remove_after });
                } else {
                    self.begin_stop_coroutine(id, remove_after, event);
                }
            }
            ServiceState::Injecting => {
                if let Some(mut record) = self.inner.arena.get_mut(id) {
                    record.state = ServiceState::Installed;
                }
                resolver::clear_dependencies(&self.inner.arena, id);
                if remove_after {
                    self.push_internal(EventKind::RemoveService { service: id });
                }
            }
        }
    }

    fn begin_stop_coroutine(&self, id: ServiceId, remove_after: bool, event: Arc<Event>) {
        match self.inner.arena.get_mut(id) {
            Some(mut record) => record.state = ServiceState::Stopping,
            None => return,
        }
        let behavior = match self.inner.handles.get(&id) {
            Some(handle) => Arc::clone(&handle.behavior),
            None => fatal(format!("no ServiceHandle bound to {id}")),
        };
        let chain = self.scope_stack_with(id);
        self.push_scope(id);
        let step: CoroutineStep<()> = self.inner.scheduler.spawn(behavior.stop(), CoroutineKind::Start, chain, event);
        self.pop_scope();
        self.handle_stop_step(id, remove_after, step);
    }

    fn handle_stop_step(&self, id: ServiceId, remove_after: bool, step: CoroutineStep<()>) {
        match step {
            CoroutineStep::Finished { scope_stack, .. } => {
                self.finalize_stop(id, remove_after);
                self.replay_pending_stops(&scope_stack);
            }
            CoroutineStep::Suspended(promise) => {
                self.inner.lifecycle_ops.insert(promise, LifecycleOp::Stop(id, remove_after));
            }
        }
    }

    fn finalize_stop(&self, id: ServiceId, remove_after: bool) {
        resolver::clear_dependencies(&self.inner.arena, id);
        match self.inner.arena.get_mut(id) {
            Some(mut record) => record.state = ServiceState::Installed,
            None => return,
        }
        self.wake_service_waiters(id, false);

        let mut ready = Vec::new();
        for mut entry in self.inner.offline_waits.iter_mut() {
            if entry.waiting_on.remove(&id) && entry.waiting_on.is_empty() {
                ready.push(*entry.key());
            }
        }
        for waiting_id in ready {
            if let Some((_, wait)) = self.inner.offline_waits.remove(&waiting_id) {
                self.push_internal(EventKind::StopService { service: waiting_id, remove_after: wait.remove_after });
            }
        }

        if remove_after {
            self.push_internal(EventKind::RemoveService { service: id });
        }
    }

    fn handle_remove_service(&self, id: ServiceId) {
        let registrations: Vec<InterfaceHash> = match self.inner.arena.get(id) {
            Some(record) => {
                if !record.dependees.is_empty() || !record.dependencies.is_empty() {
                    fatal(format!(
                        "RemoveService({id}): non-empty dependees ({}) or dependencies ({})",
                        record.dependees.len(),
                        record.dependencies.len()
                    ));
                }
                record.registrations.iter().map(|r| r.interface_hash).collect()
            }
            None => return,
        };
        for interface in registrations {
            self.push_internal(EventKind::DependencyUndoRequest { interface, requester: id });
        }
        self.inner.arena.remove(id);
        self.inner.handles.remove(&id);
        self.inner.pending_stops.remove(&id);
        self.inner.offline_waits.remove(&id);
        self.wake_service_waiters(id, false);
    }

    fn handle_dependency_request(&self, interface: InterfaceHash, requester: ServiceId, _event: Arc<Event>) {
        for entry in self.inner.trackers.trackers_for(interface) {
            let future = (entry.tracker)(requester, interface);
            self.spawn_handler(entry.tracking_service, future);
        }
    }

    fn replay_tracker(&self, interface: InterfaceHash, tracker: Arc<TrackerFn>) {
        for requester in self.inner.arena.unsatisfied_requesters(interface) {
            let future = tracker(requester, interface);
            self.spawn_handler(requester, future);
        }
    }

    fn handle_quit(&self) {
        if self.inner.quit_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut ids = self.inner.arena.all_ids();
        ids.sort();
        for id in ids {
            let (state, priority) = match self.inner.arena.get(id) {
                Some(record) => (record.state, record.priority),
                None => continue,
            };
            if state.is_active() {
                let tiebreak = Priority::INTERNAL.0.saturating_add((priority % 1_000) as i32);
                self.push(Event::new(
                    ServiceId::NONE,
                    Priority(tiebreak),
                    EventKind::StopService { service: id, remove_after: true },
                ));
            } else if matches!(state, ServiceState::Installed | ServiceState::Injecting) {
                resolver::clear_dependencies(&self.inner.arena, id);
                self.push_internal(EventKind::RemoveService { service: id });
            }
            // STARTING/STOPPING/UNINJECTING services resolve on their own;
            // handle_dependency_online and finalize_stop both re-check
            // quit_requested / offline_waits and push the follow-up events
            // needed to reach INSTALLED and then removal.
        }
        self.maybe_finish_quit();
    }

    fn maybe_finish_quit(&self) {
        if !self.inner.quit_requested.load(Ordering::SeqCst) {
            return;
        }
        let quiescent = self.inner.arena.is_empty()
            && !self.inner.scheduler.has_pending()
            && self.inner.offline_waits.is_empty()
            && self.inner.pending_stops.is_empty()
            && self.inner.event_waiters.lock().expect("event waiter lock poisoned").is_empty()
            && self.inner.service_waiters.lock().expect("service waiter lock poisoned").is_empty();
        if quiescent {
            self.inner.queue.quit();
            self.inner.pending_inserts.clear();
            self.inner.handles.clear();
            self.inner.lifecycle_ops.clear();
        }
    }

    // ---- coroutine scheduler bridge (spec.md §4.4) -----------------------

    fn spawn_handler(&self, service: ServiceId, future: HandlerFuture) {
        let chain = self.scope_stack_with(service);
        self.push_scope(service);
        let event = Arc::new(Event::new(ServiceId::NONE, Priority::INTERNAL, EventKind::RunFunction { func: Arc::new(Mutex::new(None)) }));
        let step: CoroutineStep<()> = self.inner.scheduler.spawn(future, CoroutineKind::Handler, chain, event);
        self.pop_scope();
        if let CoroutineStep::Finished { scope_stack, .. } = step {
            self.replay_pending_stops(&scope_stack);
        }
    }

    fn handle_continuable(&self, promise: PromiseId) {
        let Some(scope_stack) = self.inner.scheduler.peek_scope_stack(promise) else {
            return;
        };
        self.push_scope_stack(&scope_stack);
        let step: Option<CoroutineStep<()>> = self.inner.scheduler.resume(promise);
        self.pop_scope_stack(&scope_stack);
        if let Some(CoroutineStep::Finished { scope_stack, .. }) = step {
            self.replay_pending_stops(&scope_stack);
        }
    }

    fn handle_continuable_start(&self, promise: PromiseId) {
        let Some(scope_stack) = self.inner.scheduler.peek_scope_stack(promise) else {
            return;
        };
        let Some(op) = self.inner.lifecycle_ops.get(&promise).map(|entry| *entry) else {
            fatal(format!("ContinuableStart({promise}) with no recorded lifecycle op"));
        };
        self.push_scope_stack(&scope_stack);
        match op {
            LifecycleOp::Start(id) => {
                let step: Option<CoroutineStep<Result<(), StartError>>> = self.inner.scheduler.resume(promise);
                self.pop_scope_stack(&scope_stack);
                if let Some(step) = step {
                    if matches!(step, CoroutineStep::Finished { .. }) {
                        self.inner.lifecycle_ops.remove(&promise);
                    }
                    self.handle_start_step(id, step);
                }
            }
            LifecycleOp::Stop(id, remove_after) => {
                let step: Option<CoroutineStep<()>> = self.inner.scheduler.resume(promise);
                self.pop_scope_stack(&scope_stack);
                if let Some(step) = step {
                    if matches!(step, CoroutineStep::Finished { .. }) {
                        self.inner.lifecycle_ops.remove(&promise);
                    }
                    self.handle_stop_step(id, remove_after, step);
                }
            }
        }
    }

    /// Replay any `StopService` requests deferred while a coroutine held
    /// one of these scopes (spec.md §4.4 "pending_stops").
    fn replay_pending_stops(&self, scope_stack: &[ServiceId]) {
        for &id in scope_stack {
            if let Some((_, remove_after)) = self.inner.pending_stops.remove(&id) {
                self.push_internal(EventKind::StopService { service: id, remove_after });
            }
        }
    }

    // ---- waiter bookkeeping ----------------------------------------------

    fn complete_event(&self, id: EventId) {
        let wakers = {
            let mut map = self.inner.event_waiters.lock().expect("event waiter lock poisoned");
            match map.get_mut(&id) {
                Some(state) => match std::mem::replace(state, EventWaitState::Done) {
                    EventWaitState::Waiting(wakers) => Some(wakers),
                    EventWaitState::Done => None,
                },
                None => None,
            }
        };
        if let Some(wakers) = wakers {
            for waker in wakers {
                waker.wake();
            }
        }
    }

    fn wake_service_waiters(&self, service: ServiceId, became_active: bool) {
        let wakers = {
            let mut map = self.inner.service_waiters.lock().expect("service waiter lock poisoned");
            map.get_mut(&service).map(|lists| {
                if became_active {
                    std::mem::take(&mut lists.active)
                } else {
                    std::mem::take(&mut lists.offline)
                }
            })
        };
        if let Some(wakers) = wakers {
            for waker in wakers {
                waker.wake();
            }
        }
    }
}

// ---- public registration / waiter types ---------------------------------

enum RegistrationKind {
    Handler { event_type: TypeId, service: ServiceId },
    Interceptor { event_type: Option<TypeId>, service: ServiceId },
    Tracker { interface: InterfaceHash, service: ServiceId },
}

/// An RAII subscription returned by `register_event_handler`,
/// `register_event_interceptor`, and `register_dependency_tracker`. On
/// drop, the matching `Remove*` event is emitted (spec.md §6).
pub struct Registration {
    manager: Weak<ManagerInner>,
    kind: RegistrationKind,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let kind = match &self.kind {
            RegistrationKind::Handler { event_type, service } => {
                EventKind::RemoveEventHandler { event_type: *event_type, listening_service: *service }
            }
            RegistrationKind::Interceptor { event_type, service } => {
                EventKind::RemoveEventInterceptor { event_type: *event_type, listening_service: *service }
            }
            RegistrationKind::Tracker { interface, service } => {
                EventKind::RemoveTracker { interface: *interface, tracking_service: *service }
            }
        };
        inner.queue.push(Event::new(ServiceId::NONE, Priority::INTERNAL, kind));
    }
}

/// Awaitable returned by `wait_for_event`.
pub struct EventWaiter {
    manager: Weak<ManagerInner>,
    id: EventId,
}

impl Future for EventWaiter {
    type Output = Result<(), WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(inner) = self.manager.upgrade() else {
            return Poll::Ready(Err(WaitError::Quitting));
        };
        let mut map = inner.event_waiters.lock().expect("event waiter lock poisoned");
        match map.get_mut(&self.id) {
            Some(EventWaitState::Done) => {
                map.remove(&self.id);
                Poll::Ready(Ok(()))
            }
            Some(EventWaitState::Waiting(wakers)) => {
                wakers.push(cx.waker().clone());
                Poll::Pending
            }
            None => {
                if inner.quit_requested.load(Ordering::SeqCst) && inner.arena.is_empty() {
                    return Poll::Ready(Err(WaitError::Quitting));
                }
                map.insert(self.id, EventWaitState::Waiting(vec![cx.waker().clone()]));
                Poll::Pending
            }
        }
    }
}

/// Awaitable returned by `wait_for_service`.
pub struct ServiceWaiter {
    manager: Weak<ManagerInner>,
    service: ServiceId,
    until_active: bool,
}

impl Future for ServiceWaiter {
    type Output = Result<(), WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(inner) = self.manager.upgrade() else {
            return Poll::Ready(Err(WaitError::Quitting));
        };
        match inner.arena.get(self.service).map(|r| r.state.is_active()) {
            Some(true) if self.until_active => return Poll::Ready(Ok(())),
            Some(false) if !self.until_active => return Poll::Ready(Ok(())),
            None if !self.until_active => return Poll::Ready(Ok(())),
            None if self.until_active => {
                if inner.quit_requested.load(Ordering::SeqCst) {
                    return Poll::Ready(Err(WaitError::Quitting));
                }
                return Poll::Ready(Err(WaitError::NotFound));
            }
            _ => {}
        }
        let mut map = inner.service_waiters.lock().expect("service waiter lock poisoned");
        let lists = map.entry(self.service).or_default();
        if self.until_active {
            lists.active.push(cx.waker().clone());
        } else {
            lists.offline.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
