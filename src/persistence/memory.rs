//! In-process key-value store with per-key expiry.
//!
//! Stands in for the shared external store in tests and single-node runs.
//! Clones share the same map, so two managers built over one `MemoryStore`
//! behave like two processes pointed at the same backend.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{PersistenceError, PersistenceService};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Instant,
}

/// A thread-safe in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, StoredValue>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle reachability. While unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.iter().filter(|r| r.value().expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::Unavailable("memory store marked unavailable".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceService for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        self.check_available()?;
        let now = Instant::now();
        let hit = self
            .inner
            .get(key)
            .map(|r| (r.value().expires_at > now, r.value().value.clone()));
        match hit {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                self.inner.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.inner.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.inner.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        self.check_available()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .inner
            .iter()
            .filter(|r| r.key().starts_with(prefix) && r.value().expires_at > now)
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        store.set_with_ttl("a:1", json!({"x": 1}), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("a:1").await.unwrap(), Some(json!({"x": 1})));

        store.delete("a:1").await.unwrap();
        assert_eq!(store.get("a:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", json!(1), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys_with_prefix("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prefix_listing_and_outage() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_with_ttl("session:b", json!(1), ttl).await.unwrap();
        store.set_with_ttl("session:a", json!(2), ttl).await.unwrap();
        store.set_with_ttl("circuit_breaker:x", json!(3), ttl).await.unwrap();

        let keys = store.keys_with_prefix("session:").await.unwrap();
        assert_eq!(keys, vec!["session:a".to_string(), "session:b".to_string()]);

        store.set_available(false);
        assert!(matches!(store.get("session:a").await, Err(PersistenceError::Unavailable(_))));
    }
}
