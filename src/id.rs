//! Identifier types used throughout the runtime.
//!
//! `ServiceId` and `EventId` are process-unique 64-bit counters, handed out
//! by atomic counters the same way the teacher's `scope.rs` hands out
//! `Scope` ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Service identity, stable for the service's lifetime. Process-unique.
///
/// `ServiceId(0)` is reserved for "no originator" — framework-internal
/// events that were not caused by any particular service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(u64);

impl ServiceId {
    /// The reserved id used for framework-internal events with no originator.
    pub const NONE: ServiceId = ServiceId(0);

    /// Allocate a fresh, process-unique service id.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service-{}", self.0)
    }
}

/// Monotonically increasing id assigned to every event pushed onto a queue.
///
/// Used as the `(priority asc, id asc)` tiebreaker described by the event
/// queue's ordering contract, and as the key the queue's completion
/// waiters wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event-{}", self.0)
    }
}

/// Identifies one suspended coroutine instance. Keys both the scheduler's
/// `scoped_generators` and `scoped_events` maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromiseId(u64);

impl PromiseId {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Default for PromiseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PromiseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "promise-{}", self.0)
    }
}

/// Runtime tag identifying an interface by hash, the way the core matches
/// offers to requests. Produced from a stable hash of the interface's type
/// name so it is consistent across services compiled into the same binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHash(u64);

impl InterfaceHash {
    /// Derive the hash tag for an interface type `I`.
    #[inline]
    pub fn of<I: ?Sized + 'static>() -> Self {
        Self::from_name(std::any::type_name::<I>())
    }

    /// Derive the hash tag from an arbitrary name, for interfaces that are
    /// identified by a runtime string rather than a Rust type (e.g. when
    /// bridging to a foreign service registry).
    pub fn from_name(name: &str) -> Self {
        // FNV-1a: stable across process runs and platforms, unlike the
        // default hasher, which matters because interface hashes are
        // compared, not just looked up in a single process's map.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in name.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        Self(hash)
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InterfaceHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_ids_are_unique_and_ascending() {
        let a = ServiceId::new();
        let b = ServiceId::new();
        assert!(b.get() > a.get());
    }

    #[test]
    fn service_id_none_is_zero() {
        assert_eq!(ServiceId::NONE.get(), 0);
        assert!(ServiceId::NONE.is_none());
    }

    #[test]
    fn event_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn interface_hash_is_stable_for_same_name() {
        trait Foo {}
        let a = InterfaceHash::of::<dyn Foo>();
        let b = InterfaceHash::of::<dyn Foo>();
        assert_eq!(a, b);
    }

    #[test]
    fn interface_hash_differs_for_different_names() {
        let a = InterfaceHash::from_name("IUseless");
        let b = InterfaceHash::from_name("IOther");
        assert_ne!(a, b);
    }
}
