//! Ordered property bags carried by services and dependency registrations.
//!
//! Keys used by the core itself include `Filter`, `LogLevel`, and `scope`;
//! beyond that the map is opaque payload the core never interprets.

use indexmap::IndexMap;
use std::sync::Arc;

/// A dynamically typed property value.
///
/// `Opaque` wraps an arbitrary `Send + Sync` payload for values a `Filter`
/// wants to compare against without the core needing to know its type (the
/// spec's "opaque wrapper for filters").
#[derive(Clone)]
pub enum PropertyValue {
    Integer(i64),
    String(String),
    Boolean(bool),
    Blob(Arc<[u8]>),
    Opaque(Arc<dyn std::any::Any + Send + Sync>),
}

impl PropertyValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn downcast_opaque<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Opaque(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "Integer({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Boolean(v) => write!(f, "Boolean({v})"),
            Self::Blob(v) => write!(f, "Blob({} bytes)", v.len()),
            Self::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            // Opaque values are compared by identity only; the core never
            // needs structural equality on them.
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

/// An ordered string-keyed property bag. Insertion order is preserved,
/// mirroring the spec's "ordered mapping" data model.
#[derive(Debug, Clone, Default)]
pub struct Properties(IndexMap<String, PropertyValue, ahash::RandomState>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }
}
