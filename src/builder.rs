//! Fluent service registration, in the teacher's builder-chaining idiom
//! (`typed.rs`) minus its compile-time type-state registry: this builder
//! resolves everything at runtime, since interfaces, filters, and
//! dependency counts are only known once the caller has finished chaining.

use crate::error::StartError;
use crate::filter::Filter;
use crate::id::InterfaceHash;
use crate::lifecycle::{Dependency, DependencyFlags, InterfaceOffer, ServiceRecord};
use crate::properties::Properties;
use futures::future::BoxFuture;
use std::any::Any;
use std::sync::Arc;

/// The async start/stop behaviour backing a registered service. Both sides
/// return boxed futures so the scheduler can poll either as a coroutine
/// without knowing the concrete implementation type.
pub trait ServiceBehavior: Send + Sync {
    /// Begin starting. A behavior with nothing to await should return a
    /// future that resolves immediately.
    fn start(&self) -> BoxFuture<'static, Result<(), StartError>>;

    /// Begin stopping. Infallible: spec.md treats a failing stop coroutine
    /// as a fatal invariant violation, not a recoverable error.
    fn stop(&self) -> BoxFuture<'static, ()>;
}

/// Wraps a pair of synchronous closures as a `ServiceBehavior`, for
/// services with no genuine suspension point.
pub struct SyncBehavior<Start, Stop> {
    start: Start,
    stop: Stop,
}

impl<Start, Stop> SyncBehavior<Start, Stop>
where
    Start: Fn() -> Result<(), StartError> + Send + Sync + 'static,
    Stop: Fn() + Send + Sync + 'static,
{
    pub fn new(start: Start, stop: Stop) -> Self {
        Self { start, stop }
    }
}

impl<Start, Stop> ServiceBehavior for SyncBehavior<Start, Stop>
where
    Start: Fn() -> Result<(), StartError> + Send + Sync + 'static,
    Stop: Fn() + Send + Sync + 'static,
{
    fn start(&self) -> BoxFuture<'static, Result<(), StartError>> {
        let result = (self.start)();
        Box::pin(async move { result })
    }

    fn stop(&self) -> BoxFuture<'static, ()> {
        (self.stop)();
        Box::pin(async {})
    }
}

/// A service's instance plus its start/stop behavior, owned by the
/// manager alongside its `ServiceRecord`.
pub(crate) struct ServiceHandle {
    pub instance: Arc<dyn Any + Send + Sync>,
    pub behavior: Arc<dyn ServiceBehavior>,
}

/// Fluent construction of a service: offered interfaces, dependency
/// registrations (plain or filtered), properties, and scheduling
/// priority, finishing in a `ServiceRecord` plus the behavior/instance
/// pair the manager installs alongside it.
pub struct ServiceBuilder {
    implementation_name: String,
    properties: Properties,
    priority: u64,
    offered: Vec<InterfaceOffer>,
    registrations: Vec<Dependency>,
}

impl ServiceBuilder {
    pub fn new(implementation_name: impl Into<String>) -> Self {
        Self {
            implementation_name: implementation_name.into(),
            properties: Properties::new(),
            priority: 0,
            offered: Vec::new(),
            registrations: Vec::new(),
        }
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Dispatch priority used as the `(priority, ServiceId)` tiebreak for
    /// lifecycle events this service originates (spec.md §4.1).
    pub fn priority(mut self, priority: u64) -> Self {
        self.priority = priority;
        self
    }

    pub fn offers(mut self, hash: InterfaceHash, name: impl Into<String>) -> Self {
        self.offered.push(InterfaceOffer::new(hash, name));
        self
    }

    pub fn requires(mut self, hash: InterfaceHash, name: impl Into<String>, flags: DependencyFlags) -> Self {
        self.registrations.push(Dependency::new(hash, name, flags));
        self
    }

    pub fn requires_filtered(
        mut self,
        hash: InterfaceHash,
        name: impl Into<String>,
        flags: DependencyFlags,
        filter: Filter,
    ) -> Self {
        self.registrations.push(Dependency::new(hash, name, flags).with_filter(filter));
        self
    }

    pub(crate) fn build(self) -> ServiceRecord {
        let mut record = ServiceRecord::new(self.implementation_name, self.properties, self.priority);
        for offer in self.offered {
            record.offer(offer);
        }
        for registration in self.registrations {
            record.register_dependency(registration);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ServiceId;

    struct NoopBehavior;
    impl ServiceBehavior for NoopBehavior {
        fn start(&self) -> BoxFuture<'static, Result<(), StartError>> {
            Box::pin(async { Ok(()) })
        }
        fn stop(&self) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    #[test]
    fn builder_assembles_offers_and_registrations() {
        let hash = InterfaceHash::from_name("IUseless");
        let record = ServiceBuilder::new("Widget")
            .offers(hash, "IUseless")
            .requires(hash, "IUseless", DependencyFlags::REQUIRED)
            .priority(5)
            .build();
        assert_eq!(record.implementation_name, "Widget");
        assert!(record.offers(hash));
        assert_eq!(record.registrations.len(), 1);
        assert_eq!(record.priority, 5);
    }

    #[test]
    fn sync_behavior_wraps_closures() {
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let started2 = Arc::clone(&started);
        let behavior = SyncBehavior::new(
            move || {
                started2.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            },
            || {},
        );
        futures::executor::block_on(behavior.start()).unwrap();
        assert!(started.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn handle_holds_instance_and_behavior() {
        let handle = ServiceHandle {
            instance: Arc::new(42i32),
            behavior: Arc::new(NoopBehavior),
        };
        assert_eq!(handle.instance.downcast_ref::<i32>(), Some(&42));
        let _ = ServiceId::new();
    }
}
