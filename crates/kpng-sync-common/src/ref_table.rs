//! Reference-counted table that never creates entries implicitly.
//!
//! A shared resource (for example an address bound on a dummy interface)
//! may be claimed by several owners. `RefTable` keeps one entry per
//! resource and only creates it through [`RefTable::acquire`]; releasing a
//! resource that holds no reference is an error, never a silent clamp.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefCountError {
    #[error("no reference held for {0}")]
    KeyNotFound(String),

    #[error("reference count underflow for {0}")]
    Underflow(String),
}

/// Trait for types that carry a reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value.
    ///
    /// Returns `None` if the count would underflow.
    fn decrement_ref(&mut self) -> Option<u32>;

    fn ref_count(&self) -> u32;

    /// Drops every reference without touching other state.
    fn clear_refs(&mut self);
}

#[derive(Debug, Clone)]
pub struct RefTable<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K, V> RefTable<K, V>
where
    K: Ord + Clone + fmt::Display,
    V: HasRefCount,
{
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    /// Takes a reference on `key`, creating its entry with `make` when absent.
    ///
    /// Returns the new count. If `make` fails nothing is inserted.
    pub fn acquire<E>(&mut self, key: &K, make: impl FnOnce() -> Result<V, E>) -> Result<u32, E> {
        if let Some(entry) = self.inner.get_mut(key) {
            return Ok(entry.increment_ref());
        }
        let mut entry = make()?;
        let count = entry.increment_ref();
        self.inner.insert(key.clone(), entry);
        Ok(count)
    }

    /// Drops a reference on `key` and returns the new count.
    ///
    /// The entry is kept at zero; callers decide when to remove it.
    pub fn release(&mut self, key: &K) -> Result<u32, RefCountError> {
        let entry = self
            .inner
            .get_mut(key)
            .ok_or_else(|| RefCountError::KeyNotFound(key.to_string()))?;
        entry
            .decrement_ref()
            .ok_or_else(|| RefCountError::Underflow(key.to_string()))
    }

    /// Current count for `key`, or 0 if it has no entry.
    pub fn count(&self, key: &K) -> u32 {
        self.inner.get(key).map_or(0, |v| v.ref_count())
    }

    /// Zeroes every count, keeping the entries.
    pub fn clear_refs(&mut self) {
        for entry in self.inner.values_mut() {
            entry.clear_refs();
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut()
    }
}

impl<K, V> Default for RefTable<K, V>
where
    K: Ord + Clone + fmt::Display,
    V: HasRefCount,
{
    fn default() -> Self {
        Self::new()
    }
}
