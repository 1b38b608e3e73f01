//! Identifier-keyed icon cache shared by the whole tree.

use crate::namespace::{AbsoluteId, IconToken};
use lru::LruCache;
use std::num::NonZeroUsize;

/// LRU-bounded map from identifiers to resolved icons.
pub struct IconCache {
    entries: LruCache<AbsoluteId, IconToken>,
}

impl IconCache {
    /// Create a cache holding at most `capacity` icons (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up an icon, marking it as recently used.
    pub fn get(&mut self, id: &AbsoluteId) -> Option<IconToken> {
        self.entries.get(id).copied()
    }

    /// Store an icon, evicting the least recently used entry when full.
    pub fn put(&mut self, id: AbsoluteId, icon: IconToken) {
        self.entries.put(id, icon);
    }

    /// Forget one identifier.
    pub fn remove(&mut self, id: &AbsoluteId) -> Option<IconToken> {
        self.entries.pop(id)
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached icons.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = IconCache::new(2);
        let a = AbsoluteId::new("/").join("a");
        let b = AbsoluteId::new("/").join("b");
        let c = AbsoluteId::new("/").join("c");

        cache.put(a.clone(), IconToken(1));
        cache.put(b.clone(), IconToken(2));
        assert_eq!(cache.get(&a), Some(IconToken(1)));

        cache.put(c.clone(), IconToken(3));
        assert_eq!(cache.get(&b), None);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.remove(&a), Some(IconToken(1)));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = IconCache::new(0);
        cache.put(AbsoluteId::new("/"), IconToken(1));
        assert_eq!(cache.len(), 1);
    }
}
