use parking_lot::RwLock;
use std::collections::HashMap;

/// Keyed session storage with an explicit lifecycle.
///
/// Entries live until removed or the store is cleared; nothing expires on
/// its own.
pub trait SessionStore<V>: Send + Sync {
    fn get(&self, id: &str) -> Option<V>;

    /// Insert or replace, returning the previous value
    fn put(&self, id: &str, value: V) -> Option<V>;

    fn remove(&self, id: &str) -> Option<V>;

    /// Drop every entry, returning how many were removed
    fn clear(&self) -> usize;

    /// Snapshot of all entries, ordered by id
    fn list(&self) -> Vec<(String, V)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`SessionStore`] backed by a `HashMap` behind a read-write lock
#[derive(Debug)]
pub struct InMemorySessionStore<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> InMemorySessionStore<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for InMemorySessionStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SessionStore<V> for InMemorySessionStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, id: &str) -> Option<V> {
        self.entries.read().get(id).cloned()
    }

    fn put(&self, id: &str, value: V) -> Option<V> {
        self.entries.write().insert(id.to_string(), value)
    }

    fn remove(&self, id: &str) -> Option<V> {
        self.entries.write().remove(id)
    }

    fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    fn list(&self) -> Vec<(String, V)> {
        let mut items: Vec<(String, V)> = self
            .entries
            .read()
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let store = InMemorySessionStore::new();
        assert!(store.put("a", 1).is_none());
        assert_eq!(store.put("a", 2), Some(1));
        assert_eq!(store.get("a"), Some(2));
        assert_eq!(store.remove("a"), Some(2));
        assert!(store.get("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_sorted_and_clear() {
        let store = InMemorySessionStore::new();
        store.put("b", "second");
        store.put("a", "first");
        let ids: Vec<String> = store.list().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.clear(), 2);
        assert_eq!(store.len(), 0);
    }
}
