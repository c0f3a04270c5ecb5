// ── Generic reactive entity collection ──
//
// Lock-free concurrent storage with O(1) lookups and push-based
// change notification via `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A lock-free, reactive collection for a single entity type.
///
/// Entities are stored under a primary key and may carry one alias
/// (a second identifier the backend uses for the same entity). Every
/// mutation rebuilds the snapshot that subscribers receive.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_key: DashMap<String, Arc<T>>,

    /// Secondary index: alias -> primary key.
    alias_to_key: DashMap<String, String>,

    /// Reverse of `alias_to_key` for cleanup on update and removal.
    key_to_alias: DashMap<String, String>,

    /// Sorted-by-key snapshot, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            alias_to_key: DashMap::new(),
            key_to_alias: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or update an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, alias: Option<String>, entity: T) -> bool {
        if let Some((_, old)) = self.key_to_alias.remove(&key) {
            self.alias_to_key.remove(&old);
        }
        if let Some(alias) = alias {
            self.alias_to_key.insert(alias.clone(), key.clone());
            self.key_to_alias.insert(key.clone(), alias);
        }

        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    /// Apply `f` to a copy of the entity under `key` and store the result.
    ///
    /// Returns the updated entity, or `None` if the key is absent.
    pub(crate) fn update(&self, key: &str, f: impl FnOnce(&mut T)) -> Option<Arc<T>> {
        let updated = {
            let mut slot = self.by_key.get_mut(key)?;
            let mut entity = T::clone(slot.value());
            f(&mut entity);
            let updated = Arc::new(entity);
            *slot.value_mut() = Arc::clone(&updated);
            updated
        };
        self.rebuild_snapshot();
        Some(updated)
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            if let Some((_, alias)) = self.key_to_alias.remove(key) {
                self.alias_to_key.remove(&alias);
            }
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Resolve a primary key or alias to its primary key.
    pub(crate) fn resolve_key(&self, key_or_alias: &str) -> Option<String> {
        if self.by_key.contains_key(key_or_alias) {
            return Some(key_or_alias.to_owned());
        }
        self.alias_to_key
            .get(key_or_alias)
            .map(|r| r.value().clone())
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.by_key.iter().map(|r| r.key().clone()).collect()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn upsert_returns_true_for_new_key() {
        let col: EntityCollection<String> = EntityCollection::new();
        assert!(col.upsert("1".into(), None, "hello".into()));
        assert!(!col.upsert("1".into(), None, "world".into()));
        assert_eq!(*col.get_by_key("1").unwrap(), "world");
    }

    #[test]
    fn alias_resolves_to_primary_key() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.upsert("1".into(), Some("esp-front".into()), "front".into());

        assert_eq!(col.resolve_key("esp-front").as_deref(), Some("1"));
        assert_eq!(col.resolve_key("1").as_deref(), Some("1"));
        assert!(col.resolve_key("esp-back").is_none());
    }

    #[test]
    fn upsert_with_changed_alias_cleans_old_mapping() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.upsert("1".into(), Some("old".into()), "v1".into());
        col.upsert("1".into(), Some("new".into()), "v2".into());

        assert!(col.resolve_key("old").is_none());
        assert_eq!(col.resolve_key("new").as_deref(), Some("1"));
    }

    #[test]
    fn remove_cleans_up_indexes() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.upsert("1".into(), Some("a".into()), "x".into());

        assert_eq!(*col.remove("1").unwrap(), "x");
        assert!(col.resolve_key("a").is_none());
        assert_eq!(col.len(), 0);
    }

    #[test]
    fn update_notifies_subscribers() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.upsert("1".into(), None, "x".into());
        let mut rx = col.subscribe();
        rx.borrow_and_update();

        let updated = col.update("1", |s| s.push('!')).unwrap();
        assert_eq!(*updated, "x!");
        assert!(rx.has_changed().unwrap());
        assert!(col.update("missing", |_| {}).is_none());
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.upsert("b".into(), None, "second".into());
        col.upsert("a".into(), None, "first".into());

        let snap = col.snapshot();
        assert_eq!(*snap[0], "first");
        assert_eq!(*snap[1], "second");
    }
}
