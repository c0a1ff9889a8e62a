// src/kvstore.rs
//
// Small key-value cache behind a trait so handlers never touch a
// concrete store. The default implementation keeps entries in memory
// with a per-entry TTL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);
    async fn remove(&self, key: &str);
    /// Drop every key starting with `prefix`. Used to invalidate a
    /// whole view family after a write.
    async fn remove_prefix(&self, prefix: &str);
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct InMemoryKvStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds as i64),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.value.clone()),
            _ => None,
        }
    }

    async fn set(&self, key: &str, value: String) {
        let mut entries = self.entries.write().await;
        // Opportunistic sweep so dead keys do not pile up.
        entries.retain(|_, e| e.expires_at > Utc::now());
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Utc::now() + self.ttl,
            },
        );
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn remove_prefix(&self, prefix: &str) {
        self.entries
            .write()
            .await
            .retain(|k, _| !k.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let store = InMemoryKvStore::new(60);
        store.set("stock:LAB01", "[]".to_string()).await;
        assert_eq!(store.get("stock:LAB01").await.as_deref(), Some("[]"));
        assert_eq!(store.get("stock:LAB02").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let store = InMemoryKvStore::new(0);
        store.set("k", "v".to_string()).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn remove_prefix_drops_matching_keys() {
        let store = InMemoryKvStore::new(60);
        store.set("stock:LAB01", "a".to_string()).await;
        store.set("stock:LAB02", "b".to_string()).await;
        store.set("indents:all", "c".to_string()).await;
        store.remove_prefix("stock:").await;
        assert_eq!(store.get("stock:LAB01").await, None);
        assert_eq!(store.get("stock:LAB02").await, None);
        assert_eq!(store.get("indents:all").await.as_deref(), Some("c"));
    }
}
