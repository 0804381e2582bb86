//! The event envelope dispatched by the manager, and the core event kinds.
//!
//! Every event carries an id, an originating service, a priority, and a
//! type tag. Core lifecycle/dependency events are represented as enum
//! variants (`EventKind`); user-defined event types ride in `Custom`,
//! tagged by `TypeId` the way the source tags events with a compile-time
//! type hash.

use crate::id::{EventId, PromiseId, ServiceId};
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Priority used for events the core itself synthesises (lifecycle
/// cascades, continuations). Lower runs earlier; user events default to
/// `Priority::NORMAL` unless pushed with `push_prioritised_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const INTERNAL: Priority = Priority(-100);
    pub const NORMAL: Priority = Priority(0);
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// A user-defined closure run synchronously as a cooperative yield
/// primitive (`RunFunctionEvent`).
pub type RunFn = Box<dyn FnOnce() + Send>;

/// A user-defined closure run as a coroutine (`RunFunctionEventAsync`):
/// built once to produce the future, which is then polled exactly like a
/// handler coroutine.
pub type RunAsyncFn = Box<dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send>;

/// Discriminates the payload carried by an event. Mirrors the source's
/// per-struct `TYPE` tag, but as a closed-plus-extensible enum instead of a
/// compile-time hash per struct, since Rust's `TypeId` already gives custom
/// event kinds a stable runtime tag without needing one invented here.
pub enum EventKind {
    InsertService {
        service: ServiceId,
    },
    StartService {
        service: ServiceId,
    },
    DependencyOnline {
        service: ServiceId,
    },
    DependencyOffline {
        service: ServiceId,
        remove_after: bool,
    },
    StopService {
        service: ServiceId,
        remove_after: bool,
    },
    RemoveService {
        service: ServiceId,
    },
    DependencyRequest {
        interface: crate::id::InterfaceHash,
        requester: ServiceId,
    },
    AddEventHandler {
        event_type: TypeId,
        listening_service: ServiceId,
        handler: Arc<crate::registry::HandlerFn>,
    },
    RemoveEventHandler {
        event_type: TypeId,
        listening_service: ServiceId,
    },
    AddEventInterceptor {
        event_type: Option<TypeId>,
        listening_service: ServiceId,
        interceptor: Arc<dyn crate::interceptor::Interceptor>,
    },
    RemoveEventInterceptor {
        event_type: Option<TypeId>,
        listening_service: ServiceId,
    },
    AddTracker {
        interface: crate::id::InterfaceHash,
        tracking_service: ServiceId,
        tracker: Arc<crate::registry::TrackerFn>,
    },
    RemoveTracker {
        interface: crate::id::InterfaceHash,
        tracking_service: ServiceId,
    },
    /// Withdraws an outstanding dependency registration from trackers when
    /// its owning service is removed (spec.md §4.5 `RemoveService` row,
    /// "synthesise a DependencyUndoRequest for trackers").
    DependencyUndoRequest {
        interface: crate::id::InterfaceHash,
        requester: ServiceId,
    },
    RunFunction {
        func: Arc<std::sync::Mutex<Option<RunFn>>>,
    },
    RunFunctionAsync {
        func: Arc<std::sync::Mutex<Option<RunAsyncFn>>>,
    },
    /// Resumes a generic handler coroutine suspended at `promise`.
    Continuable {
        promise: PromiseId,
    },
    /// Resumes a lifecycle (start/stop) coroutine suspended at `promise`.
    ContinuableStart {
        promise: PromiseId,
    },
    Quit,
    /// A user-defined event type, tagged by its Rust `TypeId` the way the
    /// core tags its own events by a type hash.
    Custom {
        type_tag: TypeId,
        payload: Arc<dyn Any + Send + Sync>,
    },
}

impl std::fmt::Debug for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsertService { service } => f.debug_struct("InsertService").field("service", service).finish(),
            Self::StartService { service } => f.debug_struct("StartService").field("service", service).finish(),
            Self::DependencyOnline { service } => {
                f.debug_struct("DependencyOnline").field("service", service).finish()
            }
            Self::DependencyOffline { service, remove_after } => f
                .debug_struct("DependencyOffline")
                .field("service", service)
                .field("remove_after", remove_after)
                .finish(),
            Self::StopService { service, remove_after } => f
                .debug_struct("StopService")
                .field("service", service)
                .field("remove_after", remove_after)
                .finish(),
            Self::RemoveService { service } => f.debug_struct("RemoveService").field("service", service).finish(),
            Self::DependencyRequest { interface, requester } => f
                .debug_struct("DependencyRequest")
                .field("interface", interface)
                .field("requester", requester)
                .finish(),
            Self::AddEventHandler { listening_service, .. } => {
                f.debug_struct("AddEventHandler").field("listening_service", listening_service).finish()
            }
            Self::RemoveEventHandler { listening_service, .. } => f
                .debug_struct("RemoveEventHandler")
                .field("listening_service", listening_service)
                .finish(),
            Self::AddEventInterceptor { listening_service, .. } => f
                .debug_struct("AddEventInterceptor")
                .field("listening_service", listening_service)
                .finish(),
            Self::RemoveEventInterceptor { listening_service, .. } => f
                .debug_struct("RemoveEventInterceptor")
                .field("listening_service", listening_service)
                .finish(),
            Self::AddTracker { interface, tracking_service, .. } => f
                .debug_struct("AddTracker")
                .field("interface", interface)
                .field("tracking_service", tracking_service)
                .finish(),
            Self::RemoveTracker { interface, tracking_service } => f
                .debug_struct("RemoveTracker")
                .field("interface", interface)
                .field("tracking_service", tracking_service)
                .finish(),
            Self::DependencyUndoRequest { interface, requester } => f
                .debug_struct("DependencyUndoRequest")
                .field("interface", interface)
                .field("requester", requester)
                .finish(),
            Self::RunFunction { .. } => f.debug_struct("RunFunction").finish(),
            Self::RunFunctionAsync { .. } => f.debug_struct("RunFunctionAsync").finish(),
            Self::Continuable { promise } => f.debug_struct("Continuable").field("promise", promise).finish(),
            Self::ContinuableStart { promise } => {
                f.debug_struct("ContinuableStart").field("promise", promise).finish()
            }
            Self::Quit => f.debug_struct("Quit").finish(),
            Self::Custom { type_tag, .. } => f.debug_struct("Custom").field("type_tag", type_tag).finish(),
        }
    }
}

impl EventKind {
    /// The `TypeId` used to key handler/interceptor tables for this event.
    pub fn type_tag(&self) -> TypeId {
        match self {
            Self::Custom { type_tag, .. } => *type_tag,
            other => other.core_type_tag(),
        }
    }

    fn core_type_tag(&self) -> TypeId {
        // Each core variant is tagged by a distinct zero-sized marker type
        // so handler tables can key on `TypeId` uniformly for core and
        // custom events alike.
        macro_rules! tag {
            ($marker:ident) => {{
                struct $marker;
                TypeId::of::<$marker>()
            }};
        }
        match self {
            Self::InsertService { .. } => tag!(InsertServiceTag),
            Self::StartService { .. } => tag!(StartServiceTag),
            Self::DependencyOnline { .. } => tag!(DependencyOnlineTag),
            Self::DependencyOffline { .. } => tag!(DependencyOfflineTag),
            Self::StopService { .. } => tag!(StopServiceTag),
            Self::RemoveService { .. } => tag!(RemoveServiceTag),
            Self::DependencyRequest { .. } => tag!(DependencyRequestTag),
            Self::AddEventHandler { .. } => tag!(AddEventHandlerTag),
            Self::RemoveEventHandler { .. } => tag!(RemoveEventHandlerTag),
            Self::AddEventInterceptor { .. } => tag!(AddEventInterceptorTag),
            Self::RemoveEventInterceptor { .. } => tag!(RemoveEventInterceptorTag),
            Self::AddTracker { .. } => tag!(AddTrackerTag),
            Self::RemoveTracker { .. } => tag!(RemoveTrackerTag),
            Self::DependencyUndoRequest { .. } => tag!(DependencyUndoRequestTag),
            Self::RunFunction { .. } => tag!(RunFunctionTag),
            Self::RunFunctionAsync { .. } => tag!(RunFunctionAsyncTag),
            Self::Continuable { .. } => tag!(ContinuableTag),
            Self::ContinuableStart { .. } => tag!(ContinuableStartTag),
            Self::Quit => tag!(QuitTag),
            Self::Custom { .. } => unreachable!(),
        }
    }
}

/// An event in flight through the queue and dispatch loop.
pub struct Event {
    pub id: EventId,
    pub originating_service: ServiceId,
    pub priority: Priority,
    pub kind: EventKind,
}

impl Event {
    pub fn new(originating_service: ServiceId, priority: Priority, kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            originating_service,
            priority,
            kind,
        }
    }

    pub fn type_tag(&self) -> TypeId {
        self.kind.type_tag()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("originating_service", &self.originating_service)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_events_tag_by_type_id() {
        struct Marker;
        let a = Event::new(
            ServiceId::NONE,
            Priority::NORMAL,
            EventKind::Custom {
                type_tag: TypeId::of::<Marker>(),
                payload: Arc::new(()),
            },
        );
        assert_eq!(a.type_tag(), TypeId::of::<Marker>());
    }

    #[test]
    fn core_events_tag_consistently() {
        let a = EventKind::Quit;
        let b = EventKind::Quit;
        assert_eq!(a.type_tag(), b.type_tag());
    }

    #[test]
    fn distinct_core_kinds_tag_differently() {
        let quit = EventKind::Quit;
        let insert = EventKind::InsertService { service: ServiceId::NONE };
        assert_ne!(quit.type_tag(), insert.type_tag());
    }
}
