//! Keyed set with staged changes and commit/rollback.
//!
//! A `DiffSet` separates the authoritative membership (what was last
//! committed, i.e. what the kernel is believed to hold) from the changes
//! staged during one reconciliation pass. `commit()` folds the staged
//! changes in and returns only the entries that actually changed, which
//! are the only operations a sink needs to issue.
//!
//! # Staging rules
//!
//! - A later staging for the same key replaces an earlier one, so a key is
//!   never staged for add and delete at the same time
//! - Staging an add for a key already present with an equal value is a no-op
//!   at commit
//! - Staging a delete for an absent key is a no-op at commit

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Predicate applied to every value before it is staged for add.
pub type Validator<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Returned by [`DiffSet::stage_add`] when the value fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entry {key} failed validation")]
pub struct InvalidEntry {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Staged<V> {
    Add(V),
    Delete,
}

/// Concrete changes applied by one [`DiffSet::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<K, V> {
    /// Keys that were not present before.
    pub added: Vec<(K, V)>,
    /// Keys whose value changed.
    pub updated: Vec<(K, V)>,
    /// Keys that were removed, with their last value.
    pub deleted: Vec<(K, V)>,
}

impl<K, V> Committed<K, V> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }
}

impl<K, V> Default for Committed<K, V> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

pub struct DiffSet<K, V> {
    current: BTreeMap<K, V>,
    staged: BTreeMap<K, Staged<V>>,
    validator: Option<Validator<V>>,
}

impl<K, V> DiffSet<K, V>
where
    K: Ord + Clone + fmt::Display,
    V: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self {
            current: BTreeMap::new(),
            staged: BTreeMap::new(),
            validator: None,
        }
    }

    /// Creates a set whose adds must satisfy `validator`.
    pub fn with_validator(validator: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        Self {
            current: BTreeMap::new(),
            staged: BTreeMap::new(),
            validator: Some(Arc::new(validator)),
        }
    }

    /// Checks `value` against the validator without staging anything.
    pub fn validate(&self, value: &V) -> bool {
        self.validator.as_ref().map_or(true, |f| f(value))
    }

    /// Stages `key` for add (or update) with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEntry`] and stages nothing if `value` fails
    /// validation. Other staged entries are unaffected.
    pub fn stage_add(&mut self, key: K, value: V) -> Result<(), InvalidEntry> {
        if !self.validate(&value) {
            return Err(InvalidEntry {
                key: key.to_string(),
            });
        }
        self.staged.insert(key, Staged::Add(value));
        Ok(())
    }

    /// Stages `key` for deletion.
    pub fn stage_delete(&mut self, key: K) {
        self.staged.insert(key, Staged::Delete);
    }

    /// Stages every current key for deletion.
    pub fn stage_delete_all(&mut self) {
        let keys: Vec<K> = self.current.keys().cloned().collect();
        for key in keys {
            self.staged.insert(key, Staged::Delete);
        }
    }

    /// Discards every staged change.
    pub fn rollback(&mut self) {
        self.staged.clear();
    }

    /// Applies staged adds, then staged deletes, to the current membership.
    pub fn commit(&mut self) -> Committed<K, V> {
        let mut result = Committed::default();
        let mut deletes = Vec::new();

        for (key, staged) in std::mem::take(&mut self.staged) {
            let value = match staged {
                Staged::Add(value) => value,
                Staged::Delete => {
                    deletes.push(key);
                    continue;
                }
            };
            match self.current.get(&key) {
                None => {
                    self.current.insert(key.clone(), value.clone());
                    result.added.push((key, value));
                }
                Some(old) if *old != value => {
                    self.current.insert(key.clone(), value.clone());
                    result.updated.push((key, value));
                }
                Some(_) => {}
            }
        }

        for key in deletes {
            if let Some(old) = self.current.remove(&key) {
                result.deleted.push((key, old));
            }
        }

        result
    }

    /// Puts back an add whose kernel operation failed so the next commit
    /// reports it again. A newer staging for the same key wins.
    pub fn requeue_add(&mut self, key: K, value: V) {
        self.current.remove(&key);
        self.staged.entry(key).or_insert(Staged::Add(value));
    }

    /// Puts back a delete whose kernel operation failed.
    pub fn requeue_delete(&mut self, key: K, value: V) {
        if !self.current.contains_key(&key) {
            self.current.insert(key.clone(), value);
        }
        self.staged.entry(key).or_insert(Staged::Delete);
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.current.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.current.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Number of staged, uncommitted changes.
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.current.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.current.keys()
    }
}

impl<K, V> Default for DiffSet<K, V>
where
    K: Ord + Clone + fmt::Display,
    V: Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for DiffSet<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffSet")
            .field("current", &self.current)
            .field("staged", &self.staged)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys<V>(entries: &[(String, V)]) -> Vec<&str> {
        entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_commit_adds_and_deletes() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.stage_add("b".into(), 2).unwrap();

        let committed = set.commit();
        assert_eq!(keys(&committed.added), vec!["a", "b"]);
        assert!(committed.deleted.is_empty());
        assert_eq!(set.len(), 2);
        assert_eq!(set.pending(), 0);

        set.stage_delete("a".into());
        set.stage_delete("missing".into());
        let committed = set.commit();
        assert_eq!(committed.deleted, vec![("a".to_string(), 1)]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_double_stage_is_idempotent() {
        let mut once: DiffSet<String, u32> = DiffSet::new();
        once.stage_add("a".into(), 1).unwrap();
        once.commit();

        let mut twice: DiffSet<String, u32> = DiffSet::new();
        twice.stage_add("a".into(), 1).unwrap();
        twice.stage_add("a".into(), 1).unwrap();
        let committed = twice.commit();

        assert_eq!(committed.added.len(), 1);
        assert_eq!(
            once.iter().collect::<Vec<_>>(),
            twice.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_restage_unchanged_is_noop() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.commit();

        set.stage_delete("a".into());
        set.stage_add("a".into(), 1).unwrap();
        assert!(set.commit().is_empty());
        assert!(set.contains_key(&"a".to_string()));
    }

    #[test]
    fn test_value_change_is_update() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.commit();

        set.stage_add("a".into(), 2).unwrap();
        let committed = set.commit();
        assert_eq!(committed.updated, vec![("a".to_string(), 2)]);
        assert_eq!(set.get(&"a".to_string()), Some(&2));
    }

    #[test]
    fn test_last_staging_wins() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.stage_delete("a".into());
        assert!(set.commit().is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn test_validation_rejects_single_entry() {
        let mut set: DiffSet<String, u32> = DiffSet::with_validator(|v| *v < 10);
        assert!(set.validate(&3));
        assert!(!set.validate(&30));

        set.stage_add("ok".into(), 3).unwrap();
        let err = set.stage_add("bad".into(), 30).unwrap_err();
        assert_eq!(err.key, "bad");

        let committed = set.commit();
        assert_eq!(keys(&committed.added), vec!["ok"]);
    }

    #[test]
    fn test_rollback_discards_staged() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.rollback();
        assert!(set.commit().is_empty());
    }

    #[test]
    fn test_stage_delete_all() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.stage_add("b".into(), 2).unwrap();
        set.commit();

        set.stage_delete_all();
        set.stage_add("b".into(), 2).unwrap();
        let committed = set.commit();
        assert_eq!(keys(&committed.deleted), vec!["a"]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_requeue_add_is_reported_again() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        let committed = set.commit();
        let (key, value) = committed.added[0].clone();

        set.requeue_add(key, value);
        let committed = set.commit();
        assert_eq!(committed.added, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn test_requeue_delete_is_reported_again() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.commit();
        set.stage_delete("a".into());
        let committed = set.commit();
        let (key, value) = committed.deleted[0].clone();

        set.requeue_delete(key, value);
        assert!(set.contains_key(&"a".to_string()));
        let committed = set.commit();
        assert_eq!(committed.deleted, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn test_requeue_does_not_override_newer_staging() {
        let mut set: DiffSet<String, u32> = DiffSet::new();
        set.stage_add("a".into(), 1).unwrap();
        set.commit();

        set.stage_delete("a".into());
        set.requeue_add("a".into(), 1);
        let committed = set.commit();
        assert!(committed.added.is_empty());
        assert!(!set.contains_key(&"a".to_string()));
    }
}
