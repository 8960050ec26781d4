//! Keyed cache of derived handles with coalesced misses.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::Result;

/// `(identity, entity id)` cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Owning identity (inbox id).
    pub identity: String,
    /// Topic or group id.
    pub id: String,
}

impl EntityKey {
    /// Build a key.
    #[must_use]
    pub fn new(identity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.identity, self.id)
    }
}

/// Unbounded cache. Entries leave only through [`evict_identity`](Self::evict_identity).
///
/// Each slot is a [`OnceCell`], so concurrent misses on one key share a
/// single fetch. A failed fetch leaves nothing behind.
pub struct EntityCache<V> {
    slots: DashMap<EntityKey, Arc<OnceCell<V>>>,
}

impl<V> Default for EntityCache<V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<V> fmt::Debug for EntityCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> EntityCache<V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache-only lookup.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<V> {
        self.slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Overwrite the entry with a handle obtained elsewhere.
    pub fn put(&self, key: EntityKey, value: V) {
        self.slots
            .insert(key, Arc::new(OnceCell::new_with(Some(value))));
    }

    /// Return the cached handle, or run `fetch` once for every concurrent
    /// caller missing on `key` and cache its result.
    ///
    /// # Errors
    ///
    /// Propagates the error of `fetch`. Nothing is cached in that case.
    pub async fn get_or_fetch<F, Fut>(&self, key: &EntityKey, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = Arc::clone(
            &*self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        match slot.get_or_try_init(fetch).await {
            Ok(v) => Ok(v.clone()),
            Err(e) => {
                self.slots
                    .remove_if(key, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                Err(e)
            }
        }
    }

    /// Drop every entry owned by `identity`. Returns how many were removed.
    pub fn evict_identity(&self, identity: &str) -> usize {
        let before = self.slots.len();
        self.slots.retain(|k, _| k.identity != identity);
        let evicted = before.saturating_sub(self.slots.len());
        tracing::debug!(identity, evicted, "evicted cache entries");
        evicted
    }

    /// Number of populated entries owned by `identity`.
    #[must_use]
    pub fn len_for(&self, identity: &str) -> usize {
        self.slots
            .iter()
            .filter(|e| e.key().identity == identity && e.value().initialized())
            .count()
    }

    /// Number of populated entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|e| e.value().initialized()).count()
    }

    /// Whether no entry is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::Error;

    #[derive(Debug)]
    struct ConvRef {
        id: String,
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = Arc::new(EntityCache::<Arc<ConvRef>>::new());
        let fetches = Arc::new(AtomicUsize::new(0));
        let key = EntityKey::new("alice", "topicX");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let fetches = Arc::clone(&fetches);
                let key = key.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(&key, || async {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, Error>(Arc::new(ConvRef { id: "topicX".into() }))
                        })
                        .await
                })
            })
            .collect();

        let mut handles = Vec::new();
        for t in tasks {
            handles.push(t.await.unwrap().unwrap());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let cache = EntityCache::new();
        let key = EntityKey::new("alice", "topicX");
        let first = cache
            .get_or_fetch(&key, || async {
                Ok::<_, Error>(Arc::new(ConvRef { id: "topicX".into() }))
            })
            .await
            .unwrap();
        let second = cache
            .get_or_fetch(&key, || async {
                Err::<Arc<ConvRef>, _>(Error::Library("fetched twice".into()))
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.id, "topicX");
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let cache = EntityCache::<Arc<ConvRef>>::new();
        let key = EntityKey::new("alice", "missing");
        let err = cache
            .get_or_fetch(&key, || async {
                Err::<Arc<ConvRef>, _>(Error::ConversationNotFound("missing".into()))
            })
            .await;
        assert!(matches!(err, Err(Error::ConversationNotFound(_))));
        assert!(cache.get(&key).is_none());

        let ok = cache
            .get_or_fetch(&key, || async {
                Ok::<_, Error>(Arc::new(ConvRef { id: "missing".into() }))
            })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn put_overwrites_and_eviction_is_per_identity() {
        let cache = EntityCache::new();
        cache.put(EntityKey::new("alice", "t1"), 1);
        cache.put(EntityKey::new("alice", "t1"), 2);
        cache.put(EntityKey::new("alice", "t2"), 3);
        cache.put(EntityKey::new("bob", "t1"), 4);
        assert_eq!(cache.get(&EntityKey::new("alice", "t1")), Some(2));

        assert_eq!(cache.evict_identity("alice"), 2);
        assert!(cache.get(&EntityKey::new("alice", "t2")).is_none());
        assert_eq!(cache.get(&EntityKey::new("bob", "t1")), Some(4));
        assert_eq!(cache.len(), 1);
    }
}
