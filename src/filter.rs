//! Filter predicates over a candidate provider's properties and identity.
//!
//! Collapses the source's `PropertiesFilterEntry` / `ServiceIdFilterEntry`
//! / variadic `TemplatedFilter` tuple into a small combinator type: a
//! `Filter` is a conjunction of independent `FilterEntry`s, each matched
//! against the candidate's `ServiceId` and `Properties`.

use crate::id::ServiceId;
use crate::properties::{Properties, PropertyValue};

enum FilterEntry {
    PropertyEquals { key: String, value: PropertyValue },
    ServiceIs(ServiceId),
}

impl FilterEntry {
    fn matches(&self, service: ServiceId, properties: &Properties) -> bool {
        match self {
            Self::PropertyEquals { key, value } => properties.get(key) == Some(value),
            Self::ServiceIs(id) => service == *id,
        }
    }
}

/// A predicate over a candidate provider's identity and properties,
/// evaluated by the resolver when matching a dependency registration
/// against an offered interface. Absent filters accept every candidate;
/// a `Filter` accepts a candidate only when every entry matches
/// (conjunction).
#[derive(Default)]
pub struct Filter {
    entries: Vec<FilterEntry>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match providers whose property `key` equals `value`.
    pub fn key_equals(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.entries.push(FilterEntry::PropertyEquals {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Match only the provider with the given `ServiceId`.
    pub fn service_id(mut self, id: ServiceId) -> Self {
        self.entries.push(FilterEntry::ServiceIs(id));
        self
    }

    /// Combine with another filter; the result matches only when both do.
    pub fn and(mut self, other: Filter) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn matches(&self, service: ServiceId, properties: &Properties) -> bool {
        self.entries.iter().all(|e| e.matches(service, properties))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Filter({} entries)", self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = Filter::new();
        assert!(filter.matches(ServiceId::NONE, &Properties::new()));
    }

    #[test]
    fn property_filter_selects_matching_scope() {
        let filter = Filter::new().key_equals("scope", "one");
        let one = Properties::new().with("scope", "one");
        let two = Properties::new().with("scope", "two");
        assert!(filter.matches(ServiceId::NONE, &one));
        assert!(!filter.matches(ServiceId::NONE, &two));
    }

    #[test]
    fn conjunction_requires_all_entries() {
        let a = ServiceId::new();
        let filter = Filter::new().key_equals("scope", "one").service_id(a);
        let props = Properties::new().with("scope", "one");
        assert!(filter.matches(a, &props));
        assert!(!filter.matches(ServiceId::new(), &props));
    }
}
