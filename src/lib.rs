//! # dependency-manager — a per-thread service runtime
//!
//! A single-threaded, event-driven dependency injection and service
//! lifecycle runtime: services are registered with offered interfaces and
//! dependency registrations, the resolver injects providers into consumers
//! as they come online, and the manager drives each service through
//! `INSTALLED -> INJECTING -> STARTING -> ACTIVE -> UNINJECTING -> STOPPING
//! -> INSTALLED` on a priority event queue. Service start/stop and generic
//! event handlers may suspend mid-execution (any `.await` point) and resume
//! later without blocking the dispatch loop.
//!
//! ## Quick start
//!
//! ```rust
//! use dependency_manager::prelude::*;
//! use std::sync::Arc;
//!
//! struct Widget;
//! impl ServiceBehavior for Widget {
//!     fn start(&self) -> futures::future::BoxFuture<'static, std::result::Result<(), StartError>> {
//!         Box::pin(async { Ok(()) })
//!     }
//!     fn stop(&self) -> futures::future::BoxFuture<'static, ()> {
//!         Box::pin(async {})
//!     }
//! }
//!
//! let manager = DependencyManager::new();
//! manager.create_service(ServiceBuilder::new("Widget"), Arc::new(Widget), Arc::new(Widget));
//! manager.drain();
//! assert_eq!(manager.service_count(), 1);
//!
//! manager.quit();
//! manager.run(false);
//! assert_eq!(manager.service_count(), 0);
//! ```
//!
//! ## Dependency resolution
//!
//! Services offer interfaces (identified by an [`InterfaceHash`]) and
//! register dependencies against them, optionally with a [`Filter`] and
//! `REQUIRED`/`ALLOW_MULTIPLE` flags. The manager injects every matching
//! offer into every matching registration as services become ACTIVE, and
//! starts a consumer once all its REQUIRED registrations are satisfied.
//!
//! ## Observation
//!
//! Three independent observation mechanisms sit around the dispatch loop:
//! generic event handlers (react to any event, core or user-defined),
//! interceptors (pre/post hooks that can veto an event's payload step),
//! and dependency trackers (notified of unsatisfied dependency requests,
//! so a tracker can create a provider on demand). All three return an RAII
//! [`manager::Registration`] that unregisters itself on drop.

mod builder;
mod channel;
mod coroutine;
mod error;
mod event;
mod filter;
mod id;
mod interceptor;
mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;
mod manager;
mod properties;
mod queue;
mod registry;
mod resolver;

pub use builder::{ServiceBehavior, ServiceBuilder, SyncBehavior};
pub use channel::{CommunicationChannel, ManagerId};
pub use coroutine::CoroutineKind;
pub use error::{fatal, DmError, Result, StartError, WaitError};
pub use event::{Event, EventKind, Priority, RunAsyncFn, RunFn};
pub use filter::Filter;
pub use id::{EventId, InterfaceHash, PromiseId, ServiceId};
pub use interceptor::{Interceptor, InterceptorOutcome};
pub use lifecycle::{Dependency, DependencyFlags, InterfaceOffer, ServiceState};
pub use manager::{DependencyManager, EventWaiter, ManagerConfig, Registration, ServiceWaiter};
pub use properties::{Properties, PropertyValue};
pub use queue::EventQueueConfig;
pub use registry::{HandlerFn, HandlerFuture, TrackerFn, TrackerFuture};

// Re-export tracing macros for convenience when the logging feature is enabled.
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

pub use std::sync::Arc;

/// Prelude for convenient imports.
pub mod prelude {
    // Deliberately omits `crate::Result` (the `DmError`-flavoured alias):
    // `ServiceBehavior::start` returns a plain `std::result::Result<(),
    // StartError>`, and a glob-imported single-parameter `Result` alias
    // would shadow it everywhere a prelude user implements the trait.
    pub use crate::{
        DependencyFlags, DependencyManager, Event, EventKind, Filter, InterfaceHash, Priority,
        Properties, Registration, ServiceBehavior, ServiceBuilder, ServiceId, ServiceState,
        StartError, SyncBehavior,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Widget {
        stopped: Arc<AtomicBool>,
    }

    impl ServiceBehavior for Widget {
        fn start(&self) -> BoxFuture<'static, std::result::Result<(), StartError>> {
            Box::pin(async { Ok(()) })
        }

        fn stop(&self) -> BoxFuture<'static, ()> {
            let stopped = Arc::clone(&self.stopped);
            Box::pin(async move {
                stopped.store(true, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn a_service_with_no_dependencies_starts_immediately() {
        let manager = DependencyManager::new();
        let stopped = Arc::new(AtomicBool::new(false));
        manager.create_service(
            ServiceBuilder::new("Widget"),
            Arc::new(()),
            Arc::new(Widget { stopped: Arc::clone(&stopped) }),
        );
        manager.drain();
        assert_eq!(manager.service_count(), 1);
    }

    #[test]
    fn required_dependency_gates_start_until_provider_is_active() {
        let manager = DependencyManager::new();
        let iface = InterfaceHash::from_name("IWidget");

        manager.create_service(
            ServiceBuilder::new("Consumer").requires(iface, "IWidget", DependencyFlags::REQUIRED),
            Arc::new(()),
            Arc::new(Widget { stopped: Arc::new(AtomicBool::new(false)) }),
        );
        manager.drain();
        assert_eq!(manager.service_count(), 1); // still waiting on its dependency

        manager.create_service(
            ServiceBuilder::new("Provider").offers(iface, "IWidget"),
            Arc::new(()),
            Arc::new(Widget { stopped: Arc::new(AtomicBool::new(false)) }),
        );
        manager.drain();
        assert_eq!(manager.service_count(), 2);
    }

    #[test]
    fn quit_stops_every_service_and_drains_to_empty() {
        let manager = DependencyManager::new();
        let stopped = Arc::new(AtomicBool::new(false));
        manager.create_service(
            ServiceBuilder::new("Widget"),
            Arc::new(()),
            Arc::new(Widget { stopped: Arc::clone(&stopped) }),
        );
        manager.drain();
        assert_eq!(manager.service_count(), 1);

        manager.quit();
        manager.run(false);
        assert_eq!(manager.service_count(), 0);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn prelude_exposes_the_external_surface() {
        use crate::prelude::*;
        let _ = DependencyManager::new();
        let _ = ServiceBuilder::new("X");
        let _ = Properties::new();
        let _ = Filter::new();
    }
}
