use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed stored value: {0}")]
    Codec(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store backing the reservation lock and the hold cache.
///
/// `set_if_absent` must be atomic: two concurrent callers with the same key
/// can never both observe `true` while the first entry is live.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Delete `key` only while it holds `expected`. Returns whether it was
    /// deleted. Backends with a compare-and-delete should override this; the
    /// default is a get followed by a delete and can remove a value written
    /// between the two calls.
    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        match self.get(key).await? {
            Some(current) if current.as_ref() == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Batched `get`. Backends with a multi-get should override this.
    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<Bytes>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }
}

struct StoredValue {
    value: Bytes,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local store with per-key expiry. Expired entries are invisible to
/// readers immediately and physically removed by `evict_expired`.
pub struct InMemoryKvStore {
    entries: DashMap<String, StoredValue>,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let stored = StoredValue {
            value,
            expires_at: now + ttl,
        };
        // The entry guard holds the shard write lock, so check-and-set is atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().is_live(now) {
                    Ok(false)
                } else {
                    e.insert(stored);
                    Ok(true)
                }
            }
            Entry::Vacant(e) => {
                e.insert(stored);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, v| v.is_live(now) && v.value.as_ref() == expected)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let store = InMemoryKvStore::new();
        assert!(store.set_if_absent("k", Bytes::from_static(b"a"), TTL).await.unwrap());
        assert!(!store.set_if_absent("k", Bytes::from_static(b"b"), TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"a")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_can_be_reclaimed() {
        let store = InMemoryKvStore::new();
        assert!(store.set_if_absent("k", Bytes::from_static(b"a"), TTL).await.unwrap());

        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", Bytes::from_static(b"b"), TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"b")));
    }

    #[tokio::test]
    async fn delete_absent_key_is_noop() {
        let store = InMemoryKvStore::new();
        assert_ok!(store.delete("missing").await);
        assert_ok!(store.delete("missing").await);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_expired_removes_only_dead_entries() {
        let store = InMemoryKvStore::new();
        store.set_if_absent("short", Bytes::new(), Duration::from_secs(1)).await.unwrap();
        store.set_if_absent("long", Bytes::new(), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_if_eq_only_removes_matching_value() {
        let store = InMemoryKvStore::new();
        store.set_if_absent("k", Bytes::from_static(b"mine"), TTL).await.unwrap();

        assert!(!store.delete_if_eq("k", b"theirs").await.unwrap());
        assert!(store.get("k").await.unwrap().is_some());
        assert!(store.delete_if_eq("k", b"mine").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete_if_eq("k", b"mine").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_if_eq_ignores_expired_value() {
        let store = InMemoryKvStore::new();
        store.set_if_absent("k", Bytes::from_static(b"mine"), TTL).await.unwrap();
        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert!(!store.delete_if_eq("k", b"mine").await.unwrap());
    }

    #[tokio::test]
    async fn get_many_preserves_order() {
        let store = InMemoryKvStore::new();
        store.set_if_absent("b", Bytes::from_static(b"2"), TTL).await.unwrap();
        let keys = vec!["a".to_string(), "b".to_string()];
        let values = store.get_many(&keys).await.unwrap();
        assert_eq!(values, vec![None, Some(Bytes::from_static(b"2"))]);
    }
}
