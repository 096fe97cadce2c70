use crate::locker::kv::KeyValueStore;
use crate::locker::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

/// In-process key-value store with per-key expiry
///
/// Only coordinates handles living in the same process. Useful for tests and
/// single-node deployments.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    keys: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    #[cfg(test)]
    pub async fn contains(&self, key: &str) -> bool {
        let keys = self.keys.lock().await;
        keys.get(key)
            .is_some_and(|(_, expire_at)| *expire_at > Instant::now())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn provision(&self) -> Result<(), Error> {
        info!("Using in-memory lock store");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        let mut keys = self.keys.lock().await;
        let now = Instant::now();
        keys.retain(|_, (_, expire_at)| *expire_at > now);

        if keys.contains_key(key) {
            return Ok(false);
        }

        keys.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, Error> {
        let mut keys = self.keys.lock().await;
        match keys.get(key) {
            Some((owner, expire_at)) if owner == token && *expire_at > Instant::now() => {
                keys.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert_eq!(store.set_if_absent("key", "a", ttl).await, Ok(true));
        assert_eq!(store.set_if_absent("key", "b", ttl).await, Ok(false));
        assert_eq!(store.set_if_absent("other", "b", ttl).await, Ok(true));
    }

    #[tokio::test]
    async fn test_keys_expire() {
        let store = MemoryStore::new();

        assert_eq!(
            store
                .set_if_absent("key", "a", Duration::from_millis(50))
                .await,
            Ok(true)
        );
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!store.contains("key").await);
        assert_eq!(
            store
                .set_if_absent("key", "b", Duration::from_secs(10))
                .await,
            Ok(true)
        );
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store
            .set_if_absent("key", "a", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(store.compare_and_delete("key", "b").await, Ok(false));
        assert!(store.contains("key").await);

        assert_eq!(store.compare_and_delete("key", "a").await, Ok(true));
        assert!(!store.contains("key").await);

        assert_eq!(store.compare_and_delete("key", "a").await, Ok(false));
    }
}
