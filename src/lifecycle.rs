//! The Service Lifecycle Record: per-service identity, offered interfaces,
//! dependency registrations, and the lifecycle state machine.

use crate::filter::Filter;
use crate::id::{InterfaceHash, ServiceId};
use crate::properties::Properties;
use ahash::RandomState;
use std::collections::HashSet;

/// A service's current phase. Transitions are driven exclusively by the
/// manager/resolver, never by the service itself.
///
/// ```text
/// INSTALLED --startable?--> INJECTING --(all required injected)--> STARTING
///                                                                      |
///                                          +----------------------------+
///                                          v
///                                       ACTIVE --(dependency lost)--> UNINJECTING
///                                          |                               |
///                                          +--(stop requested)--> STOPPING-+
///                                                                   |
///                                                                   v
///                                                              INSTALLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Installed,
    Injecting,
    Starting,
    Active,
    Uninjecting,
    Stopping,
}

impl ServiceState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

bitflags::bitflags! {
    /// Flags on a dependency registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DependencyFlags: u8 {
        /// The owning service cannot be ACTIVE without this dependency
        /// satisfied at least once.
        const REQUIRED = 0b01;
        /// This registration may bind more than one provider.
        const ALLOW_MULTIPLE = 0b10;
    }
}

/// An interface a service offers to others, identified by hash.
#[derive(Debug, Clone)]
pub struct InterfaceOffer {
    pub hash: InterfaceHash,
    pub name: String,
}

impl InterfaceOffer {
    pub fn new(hash: InterfaceHash, name: impl Into<String>) -> Self {
        Self { hash, name: name.into() }
    }
}

/// One outgoing dependency request: `(interface_hash, interface_name,
/// flags, satisfied providers)`. A service may register the same
/// interface multiple times with different filters; each registration is
/// tracked independently.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub interface_hash: InterfaceHash,
    pub interface_name: String,
    pub flags: DependencyFlags,
    pub filter: Option<std::sync::Arc<Filter>>,
    satisfied: Vec<ServiceId>,
}

impl Dependency {
    pub fn new(interface_hash: InterfaceHash, interface_name: impl Into<String>, flags: DependencyFlags) -> Self {
        Self {
            interface_hash,
            interface_name: interface_name.into(),
            flags,
            filter: None,
            satisfied: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(std::sync::Arc::new(filter));
        self
    }

    pub fn required(&self) -> bool {
        self.flags.contains(DependencyFlags::REQUIRED)
    }

    pub fn allows_multiple(&self) -> bool {
        self.flags.contains(DependencyFlags::ALLOW_MULTIPLE)
    }

    pub fn satisfied_count(&self) -> usize {
        self.satisfied.len()
    }

    pub fn is_satisfied_by(&self, provider: ServiceId) -> bool {
        self.satisfied.contains(&provider)
    }

    /// Whether this registration is eligible to accept a new provider
    /// offering `offered_hash` subject to the filter, per the resolver's
    /// matching rule (spec.md §4.3): hash match, filter accepts (or is
    /// absent), and not already satisfied unless ALLOW_MULTIPLE.
    pub fn accepts(&self, offered_hash: InterfaceHash, provider: ServiceId, provider_properties: &Properties) -> bool {
        if self.interface_hash != offered_hash {
            return false;
        }
        if !self.satisfied.is_empty() && !self.allows_multiple() {
            return false;
        }
        match &self.filter {
            Some(f) => f.matches(provider, provider_properties),
            None => true,
        }
    }

    pub(crate) fn add_provider(&mut self, provider: ServiceId) {
        if !self.satisfied.contains(&provider) {
            self.satisfied.push(provider);
        }
    }

    pub(crate) fn remove_provider(&mut self, provider: ServiceId) {
        self.satisfied.retain(|p| *p != provider);
    }

    pub fn providers(&self) -> &[ServiceId] {
        &self.satisfied
    }
}

/// The canonical per-service entity owned by the manager.
pub struct ServiceRecord {
    pub id: ServiceId,
    pub implementation_name: String,
    pub uuid: uuid::Uuid,
    pub offered: Vec<InterfaceOffer>,
    pub registrations: Vec<Dependency>,
    pub dependees: HashSet<ServiceId, RandomState>,
    pub dependencies: HashSet<ServiceId, RandomState>,
    pub properties: Properties,
    pub state: ServiceState,
    pub priority: u64,
}

impl ServiceRecord {
    pub fn new(implementation_name: impl Into<String>, properties: Properties, priority: u64) -> Self {
        Self {
            id: ServiceId::new(),
            implementation_name: implementation_name.into(),
            uuid: uuid::Uuid::new_v4(),
            offered: Vec::new(),
            registrations: Vec::new(),
            dependees: HashSet::default(),
            dependencies: HashSet::default(),
            properties,
            state: ServiceState::Installed,
            priority,
        }
    }

    pub fn offer(&mut self, interface: InterfaceOffer) -> &mut Self {
        self.offered.push(interface);
        self
    }

    pub fn register_dependency(&mut self, dependency: Dependency) -> &mut Self {
        self.registrations.push(dependency);
        self
    }

    pub fn offers(&self, hash: InterfaceHash) -> bool {
        self.offered.iter().any(|o| o.hash == hash)
    }

    /// Every REQUIRED registration has satisfied_count >= 1 (spec.md §3
    /// invariant 1 / §8 property 1).
    pub fn required_satisfied(&self) -> bool {
        self.registrations.iter().filter(|d| d.required()).all(|d| d.satisfied_count() >= 1)
    }
}

impl std::fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRecord")
            .field("id", &self.id)
            .field("implementation_name", &self.implementation_name)
            .field("state", &self.state)
            .field("dependencies", &self.dependencies)
            .field("dependees", &self.dependees)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str) -> InterfaceHash {
        InterfaceHash::from_name(name)
    }

    #[test]
    fn fresh_record_is_installed_with_empty_graph() {
        let record = ServiceRecord::new("Svc", Properties::new(), 0);
        assert_eq!(record.state, ServiceState::Installed);
        assert!(record.dependencies.is_empty());
        assert!(record.dependees.is_empty());
    }

    #[test]
    fn required_satisfied_is_false_until_injected() {
        let mut record = ServiceRecord::new("Svc", Properties::new(), 0);
        record.register_dependency(Dependency::new(iface("IUseless"), "IUseless", DependencyFlags::REQUIRED));
        assert!(!record.required_satisfied());

        record.registrations[0].add_provider(ServiceId::new());
        assert!(record.required_satisfied());
    }

    #[test]
    fn dependency_accepts_respects_allow_multiple() {
        let hash = iface("IUseless");
        let mut dep = Dependency::new(hash, "IUseless", DependencyFlags::REQUIRED);
        let p1 = ServiceId::new();
        let p2 = ServiceId::new();
        assert!(dep.accepts(hash, p1, &Properties::new()));
        dep.add_provider(p1);
        assert!(!dep.accepts(hash, p2, &Properties::new()));

        let mut multi = Dependency::new(hash, "IUseless", DependencyFlags::REQUIRED | DependencyFlags::ALLOW_MULTIPLE);
        multi.add_provider(p1);
        assert!(multi.accepts(hash, p2, &Properties::new()));
    }

    #[test]
    fn dependency_filter_rejects_non_matching_provider() {
        let hash = iface("IUseless");
        let dep = Dependency::new(hash, "IUseless", DependencyFlags::REQUIRED)
            .with_filter(Filter::new().key_equals("scope", "one"));
        let provider = ServiceId::new();
        assert!(dep.accepts(hash, provider, &Properties::new().with("scope", "one")));
        assert!(!dep.accepts(hash, provider, &Properties::new().with("scope", "two")));
    }
}
