//! In-memory [`ByteCache`], used in tests and as a development fallback.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use obs_error::ObsError;

use crate::ByteCache;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// A `HashMap`-backed [`ByteCache`]. Expired entries are reaped lazily on
/// `get`; nothing runs in the background.
#[derive(Default)]
pub struct InMemoryByteCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryByteCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Matches `pattern` against `key`, supporting a single trailing `*`
/// wildcard (the common case for `session:<tenant>:*`-style sweeps).
fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[async_trait::async_trait]
impl ByteCache for InMemoryByteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObsError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ObsError> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObsError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<(), ObsError> {
        self.entries.write().await.retain(|key, _| !matches_pattern(pattern, key));
        Ok(())
    }

    async fn ping(&self) -> Result<(), ObsError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ObsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryByteCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_reaped() {
        let cache = InMemoryByteCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn delete_pattern_removes_matching_prefix() {
        let cache = InMemoryByteCache::new();
        cache.set("session:t1:u1:c1", b"a".to_vec(), Duration::from_secs(60)).await.unwrap();
        cache.set("session:t1:u1:c2", b"b".to_vec(), Duration::from_secs(60)).await.unwrap();
        cache.set("session:t2:u1:c1", b"c".to_vec(), Duration::from_secs(60)).await.unwrap();

        cache.delete_pattern("session:t1:*").await.unwrap();

        assert_eq!(cache.get("session:t1:u1:c1").await.unwrap(), None);
        assert_eq!(cache.get("session:t1:u1:c2").await.unwrap(), None);
        assert_eq!(cache.get("session:t2:u1:c1").await.unwrap(), Some(b"c".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_single_key() {
        let cache = InMemoryByteCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ping_always_succeeds() {
        assert!(InMemoryByteCache::new().ping().await.is_ok());
    }
}
