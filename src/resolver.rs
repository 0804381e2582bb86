//! The service arena and the Dependency Resolver: matches offered
//! interfaces to dependency registrations, performs injection/uninjection,
//! and computes the online/offline cascades.
//!
//! The resolver itself is stateless — "a pure function of (offer,
//! request)" per spec.md §4.3 — operating on the arena the manager owns.

use crate::id::{InterfaceHash, ServiceId};
use crate::lifecycle::{InterfaceOffer, ServiceRecord, ServiceState};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};

/// The manager's owning store of every `ServiceRecord`, keyed by
/// `ServiceId`. Thread-safe for symmetry with the rest of the runtime's
/// shared-state types, though in normal operation only the owning
/// manager's thread ever touches it.
#[derive(Default)]
pub struct ServiceArena {
    records: DashMap<ServiceId, ServiceRecord, RandomState>,
}

impl ServiceArena {
    pub fn new() -> Self {
        Self {
            records: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn insert(&self, record: ServiceRecord) -> ServiceId {
        let id = record.id;
        self.records.insert(id, record);
        id
    }

    pub fn get(&self, id: ServiceId) -> Option<Ref<'_, ServiceId, ServiceRecord, RandomState>> {
        self.records.get(&id)
    }

    pub fn get_mut(&self, id: ServiceId) -> Option<RefMut<'_, ServiceId, ServiceRecord, RandomState>> {
        self.records.get_mut(&id)
    }

    pub fn remove(&self, id: ServiceId) -> Option<ServiceRecord> {
        self.records.remove(&id).map(|(_, record)| record)
    }

    pub fn contains(&self, id: ServiceId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every other service's id, sorted ascending — the resolver's
    /// "tie-break by ServiceId ascending" cascade order (spec.md §4.3).
    pub fn other_ids_sorted(&self, except: ServiceId) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.records.iter().map(|r| *r.key()).filter(|id| *id != except).collect();
        ids.sort();
        ids
    }

    pub fn active_ids(&self) -> Vec<ServiceId> {
        self.records.iter().filter(|r| r.state.is_active()).map(|r| *r.key()).collect()
    }

    /// Every service id currently owned by the arena, in no particular
    /// order (callers that need determinism sort the result themselves).
    pub fn all_ids(&self) -> Vec<ServiceId> {
        self.records.iter().map(|r| *r.key()).collect()
    }

    /// Every service with an outstanding, unsatisfied registration against
    /// `interface` — the set a freshly registered tracker must be replayed
    /// against (spec.md §4.5 `AddTracker` row).
    pub fn unsatisfied_requesters(&self, interface: InterfaceHash) -> Vec<ServiceId> {
        self.records
            .iter()
            .filter(|r| r.registrations.iter().any(|reg| reg.interface_hash == interface && reg.satisfied_count() == 0))
            .map(|r| *r.key())
            .collect()
    }
}

/// Attempt to inject `provider`'s offered interfaces into `consumer`'s
/// registrations. Returns `true` if at least one registration accepted a
/// new provider.
fn inject_into(consumer: &mut ServiceRecord, provider: ServiceId, provider_offered: &[InterfaceOffer], provider_properties: &crate::properties::Properties) -> bool {
    let mut injected_any = false;
    for offer in provider_offered {
        for reg in consumer.registrations.iter_mut() {
            if reg.accepts(offer.hash, provider, provider_properties) {
                reg.add_provider(provider);
                injected_any = true;
            }
        }
    }
    injected_any
}

/// The online cascade (spec.md §4.3): when `provider` becomes ACTIVE,
/// attempt injection into every other service, and report which of them
/// became fully satisfied and should receive a start trigger.
pub fn online_cascade(arena: &ServiceArena, provider: ServiceId) -> Vec<ServiceId> {
    let (provider_offered, provider_properties) = {
        let record = match arena.get(provider) {
            Some(r) => r,
            None => return Vec::new(),
        };
        (record.offered.clone(), record.properties.clone())
    };

    let mut newly_dependent = Vec::new();
    let mut to_start = Vec::new();

    for consumer_id in arena.other_ids_sorted(provider) {
        let mut consumer = match arena.get_mut(consumer_id) {
            Some(c) => c,
            None => continue,
        };
        // A dependency arriving during a consumer's stop sequence is
        // suppressed from re-injection (spec.md §8 boundary behaviors).
        if matches!(consumer.state, ServiceState::Uninjecting | ServiceState::Stopping) {
            continue;
        }
        if !inject_into(&mut consumer, provider, &provider_offered, &provider_properties) {
            continue;
        }
        consumer.dependencies.insert(provider);
        newly_dependent.push(consumer_id);

        if matches!(consumer.state, ServiceState::Installed | ServiceState::Injecting) {
            if consumer.required_satisfied() {
                to_start.push(consumer_id);
            } else {
                consumer.state = ServiceState::Injecting;
            }
        }
    }

    if let Some(mut provider_record) = arena.get_mut(provider) {
        for dependent in newly_dependent {
            provider_record.dependees.insert(dependent);
        }
    }

    to_start
}

/// Remove `provider` from every registration of `consumer` that is
/// currently satisfied by it, and undo the symmetric dependee/dependency
/// bookkeeping. Returns `true` if `consumer` lost its last provider for
/// some REQUIRED registration.
pub fn uninject(arena: &ServiceArena, consumer: ServiceId, provider: ServiceId) -> bool {
    let mut lost_required = false;
    if let Some(mut record) = arena.get_mut(consumer) {
        for reg in record.registrations.iter_mut() {
            if reg.is_satisfied_by(provider) {
                reg.remove_provider(provider);
                if reg.required() && reg.satisfied_count() == 0 {
                    lost_required = true;
                }
            }
        }
        record.dependencies.remove(&provider);
    }
    if let Some(mut provider_record) = arena.get_mut(provider) {
        provider_record.dependees.remove(&consumer);
    }
    lost_required
}

/// Match a freshly inserted service's own registrations against every
/// already-ACTIVE provider in the arena (spec.md §4.5 `InsertService` row:
/// "attempt matching against every existing ACTIVE provider"). Returns
/// `true` if the new service's required registrations are now all
/// satisfied and it should receive a start trigger.
pub fn match_against_active(arena: &ServiceArena, new_service: ServiceId) -> bool {
    for provider_id in arena.active_ids() {
        if provider_id == new_service {
            continue;
        }
        let (provider_offered, provider_properties) = {
            let provider = match arena.get(provider_id) {
                Some(p) => p,
                None => continue,
            };
            (provider.offered.clone(), provider.properties.clone())
        };
        let injected = {
            let mut consumer = match arena.get_mut(new_service) {
                Some(c) => c,
                None => return false,
            };
            inject_into(&mut consumer, provider_id, &provider_offered, &provider_properties)
        };
        if injected {
            if let Some(mut provider) = arena.get_mut(provider_id) {
                provider.dependees.insert(new_service);
            }
            if let Some(mut consumer) = arena.get_mut(new_service) {
                consumer.dependencies.insert(provider_id);
            }
        }
    }
    arena.get(new_service).map(|c| c.required_satisfied()).unwrap_or(false)
}

/// Remove every remaining dependency provider from `consumer`'s
/// registrations and undo the symmetric bookkeeping, used when a stop
/// coroutine finishes (spec.md §4.5 `StopService` row: "on completion
/// clear dependencies").
pub fn clear_dependencies(arena: &ServiceArena, consumer: ServiceId) {
    let providers: Vec<ServiceId> = match arena.get(consumer) {
        Some(c) => c.dependencies.iter().copied().collect(),
        None => return,
    };
    for provider in providers {
        uninject(arena, consumer, provider);
    }
}

/// Snapshot of `leaving`'s current dependees whose REQUIRED registration
/// would now be unsatisfied — the set that must react to the offline
/// cascade before `leaving` may finish going offline (spec.md §4.3).
/// Snapshotting matters because the set mutates as each dependee reacts.
pub fn dependees_requiring_offline(arena: &ServiceArena, leaving: ServiceId) -> Vec<ServiceId> {
    let record = match arena.get(leaving) {
        Some(r) => r,
        None => return Vec::new(),
    };
    record.dependees.iter().copied().collect()
}

/// Inject a synthetic self-provider for any registration on `service`
/// whose requested interface is also one `service` itself offers
/// (spec.md §4.3 "self-reference"). No cycle forms: this edge is internal
/// bookkeeping only and never appears in the active dependency graph the
/// cycle check considers.
pub fn inject_self_provider(arena: &ServiceArena, service: ServiceId) {
    let mut record = match arena.get_mut(service) {
        Some(r) => r,
        None => return,
    };
    let offered_hashes: Vec<InterfaceHash> = record.offered.iter().map(|o| o.hash).collect();
    for reg in record.registrations.iter_mut() {
        if offered_hashes.contains(&reg.interface_hash) && reg.satisfied_count() == 0 {
            reg.add_provider(service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::InterfaceHash;
    use crate::lifecycle::{Dependency, DependencyFlags, InterfaceOffer};
    use crate::properties::Properties;

    fn iface(name: &str) -> InterfaceHash {
        InterfaceHash::from_name(name)
    }

    fn make_provider(iface_name: &str) -> ServiceRecord {
        let mut record = ServiceRecord::new("Provider", Properties::new(), 0);
        record.offer(InterfaceOffer::new(iface(iface_name), iface_name));
        record.state = ServiceState::Active;
        record
    }

    fn make_consumer(iface_name: &str, flags: DependencyFlags) -> ServiceRecord {
        let mut record = ServiceRecord::new("Consumer", Properties::new(), 0);
        record.register_dependency(Dependency::new(iface(iface_name), iface_name, flags));
        record
    }

    #[test]
    fn online_cascade_injects_and_reports_startable() {
        let arena = ServiceArena::new();
        let consumer_id = arena.insert(make_consumer("IUseless", DependencyFlags::REQUIRED));
        let provider_id = arena.insert(make_provider("IUseless"));

        let to_start = online_cascade(&arena, provider_id);
        assert_eq!(to_start, vec![consumer_id]);

        let consumer = arena.get(consumer_id).unwrap();
        assert!(consumer.dependencies.contains(&provider_id));
        let provider = arena.get(provider_id).unwrap();
        assert!(provider.dependees.contains(&consumer_id));
    }

    #[test]
    fn uninject_restores_symmetry_and_reports_loss() {
        let arena = ServiceArena::new();
        let consumer_id = arena.insert(make_consumer("IUseless", DependencyFlags::REQUIRED));
        let provider_id = arena.insert(make_provider("IUseless"));
        online_cascade(&arena, provider_id);

        let lost = uninject(&arena, consumer_id, provider_id);
        assert!(lost);

        let consumer = arena.get(consumer_id).unwrap();
        assert!(!consumer.dependencies.contains(&provider_id));
        let provider = arena.get(provider_id).unwrap();
        assert!(!provider.dependees.contains(&consumer_id));
    }

    #[test]
    fn allow_multiple_keeps_accepting_providers() {
        let arena = ServiceArena::new();
        let consumer_id = arena.insert(make_consumer(
            "IUseless",
            DependencyFlags::REQUIRED | DependencyFlags::ALLOW_MULTIPLE,
        ));
        let p1 = arena.insert(make_provider("IUseless"));
        let p2 = arena.insert(make_provider("IUseless"));
        online_cascade(&arena, p1);
        online_cascade(&arena, p2);

        let consumer = arena.get(consumer_id).unwrap();
        assert_eq!(consumer.registrations[0].satisfied_count(), 2);
    }

    #[test]
    fn cascade_visits_candidates_in_service_id_order() {
        let arena = ServiceArena::new();
        // Insert consumers out of order to show the sort applies.
        let c2 = arena.insert(make_consumer("IUseless", DependencyFlags::REQUIRED));
        let c1_record = make_consumer("IUseless", DependencyFlags::REQUIRED);
        let c1 = arena.insert(c1_record);
        let provider_id = arena.insert(make_provider("IUseless"));

        let ids = arena.other_ids_sorted(provider_id);
        assert!(ids.contains(&c1) && ids.contains(&c2));
        assert_eq!(ids, {
            let mut v = vec![c1, c2];
            v.sort();
            v
        });
    }

    #[test]
    fn match_against_active_injects_from_existing_providers() {
        let arena = ServiceArena::new();
        let provider_id = arena.insert(make_provider("IUseless"));
        let consumer_id = arena.insert(make_consumer("IUseless", DependencyFlags::REQUIRED));

        let satisfied = match_against_active(&arena, consumer_id);
        assert!(satisfied);
        assert!(arena.get(provider_id).unwrap().dependees.contains(&consumer_id));
    }

    #[test]
    fn clear_dependencies_empties_both_sides() {
        let arena = ServiceArena::new();
        let consumer_id = arena.insert(make_consumer("IUseless", DependencyFlags::REQUIRED));
        let provider_id = arena.insert(make_provider("IUseless"));
        online_cascade(&arena, provider_id);

        clear_dependencies(&arena, consumer_id);
        assert!(arena.get(consumer_id).unwrap().dependencies.is_empty());
        assert!(arena.get(provider_id).unwrap().dependees.is_empty());
    }

    #[test]
    fn unsatisfied_requesters_reports_only_unmet_registrations() {
        let arena = ServiceArena::new();
        let waiting = arena.insert(make_consumer("IUseless", DependencyFlags::REQUIRED));
        let provider_id = arena.insert(make_provider("IUseless"));
        online_cascade(&arena, provider_id);
        let still_waiting = arena.insert(make_consumer("IUseless", DependencyFlags::REQUIRED));

        let requesters = arena.unsatisfied_requesters(iface("IUseless"));
        assert!(!requesters.contains(&waiting));
        assert!(requesters.contains(&still_waiting));
    }

    #[test]
    fn self_reference_injects_synthetic_provider() {
        let arena = ServiceArena::new();
        let mut record = ServiceRecord::new("SelfRef", Properties::new(), 0);
        record.offer(InterfaceOffer::new(iface("IService"), "IService"));
        record.register_dependency(Dependency::new(iface("IService"), "IService", DependencyFlags::REQUIRED));
        let id = arena.insert(record);

        inject_self_provider(&arena, id);
        let record = arena.get(id).unwrap();
        assert!(record.required_satisfied());
        assert!(record.registrations[0].is_satisfied_by(id));
    }
}
