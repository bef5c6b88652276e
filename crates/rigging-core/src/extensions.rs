//! Typed extension registry attached to every runnable.
//!
//! Collaborators outside the engine (a metrics wrapper, a monitoring stack)
//! tag a runnable with their own capability value. Lookups are keyed by the
//! value's type, so callers get `Option<&T>` back instead of casting.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Marker for values storable in [`Extensions`].
pub trait Capability: Any + Clone + Send + Sync {}

impl<T: Any + Clone + Send + Sync> Capability for T {}

/// Map from capability type to one value of that type.
#[derive(Default)]
pub struct Extensions {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Capability>(&mut self, value: T) -> Option<T> {
        self.entries
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns the stored value of type `T`.
    #[must_use]
    pub fn get<T: Capability>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Removes and returns the stored value of type `T`.
    pub fn remove<T: Capability>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns whether a value of type `T` is stored.
    #[must_use]
    pub fn contains<T: Capability>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no capability is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Scraped(&'static str);

    #[derive(Debug, Clone, PartialEq)]
    struct Profiled;

    #[test]
    fn insert_get_remove() {
        let mut ext = Extensions::new();
        assert!(ext.insert(Scraped("/metrics")).is_none());
        assert_eq!(ext.get::<Scraped>(), Some(&Scraped("/metrics")));
        assert!(!ext.contains::<Profiled>());

        let old = ext.insert(Scraped("/other"));
        assert_eq!(old, Some(Scraped("/metrics")));
        assert_eq!(ext.len(), 1);

        assert_eq!(ext.remove::<Scraped>(), Some(Scraped("/other")));
        assert!(ext.is_empty());
    }
}
