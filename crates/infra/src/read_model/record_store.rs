use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use torque_core::AggregateRoot;

/// Key/value store abstraction for disposable read models.
pub trait RecordStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    /// Insert or replace a record. An older revision never replaces a newer one.
    fn upsert(&self, key: K, value: V);
    fn list(&self) -> Vec<V>;
    /// Drop every record (rebuild support).
    fn clear(&self);
}

impl<K, V, S> RecordStore<K, V> for Arc<S>
where
    S: RecordStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// In-memory record store holding aggregate snapshots.
///
/// Revisions are compared by aggregate version, so two writers finishing out
/// of order leave the newest snapshot in place.
#[derive(Debug)]
pub struct InMemoryRecordStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryRecordStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryRecordStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RecordStore<K, V> for InMemoryRecordStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: AggregateRoot + Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            match map.get(&key) {
                Some(existing) if existing.version() > value.version() => {}
                _ => {
                    map.insert(key, value);
                }
            }
        }
    }

    fn list(&self) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn clear(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Snapshot {
        id: u32,
        version: u64,
    }

    impl AggregateRoot for Snapshot {
        type Id = u32;

        fn id(&self) -> &Self::Id {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    #[test]
    fn older_revision_does_not_replace_newer() {
        let store = InMemoryRecordStore::new();
        store.upsert(1, Snapshot { id: 1, version: 3 });
        store.upsert(1, Snapshot { id: 1, version: 2 });

        assert_eq!(store.get(&1).unwrap().version, 3);

        store.upsert(1, Snapshot { id: 1, version: 4 });
        assert_eq!(store.get(&1).unwrap().version, 4);
    }

    #[test]
    fn clear_drops_everything() {
        let store = InMemoryRecordStore::new();
        store.upsert(1, Snapshot { id: 1, version: 1 });
        store.upsert(2, Snapshot { id: 2, version: 1 });
        assert_eq!(store.list().len(), 2);

        store.clear();
        assert!(store.list().is_empty());
        assert!(store.get(&1).is_none());
    }
}
