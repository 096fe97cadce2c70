use crate::locker::Error;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// A key-value store able to expire keys on its own
///
/// Every operation must be atomic on the store side: the lock subsystem never
/// guards these calls with a client-side lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Check the store is usable before any lock is handed out
    ///
    /// # Errors
    ///
    /// * `Error::StoreUnavailable` if the store cannot be reached
    async fn provision(&self) -> Result<(), Error>;

    /// Set `key` to `token` with the given time-to-live, only if `key` is absent
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if the key was written
    /// * `Ok(false)` if the key already exists
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error>;

    /// Delete `key`, only if it still holds `token`
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if the key was deleted
    /// * `Ok(false)` if the key is gone or now belongs to someone else
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, Error>;
}

/// Lock backend representing each held lock as a key with a store-managed TTL
#[derive(Clone)]
pub struct Backend {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl Backend {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: String) -> Self {
        Backend { store, key_prefix }
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}{name}", self.key_prefix)
    }

    pub async fn provision(&self) -> Result<(), Error> {
        info!("Using key-value lock backend with prefix '{}'", self.key_prefix);
        self.store.provision().await
    }

    pub async fn try_acquire(
        &self,
        name: &str,
        token: &str,
        lease: Duration,
    ) -> Result<bool, Error> {
        let acquired = self
            .store
            .set_if_absent(&self.lock_key(name), token, lease)
            .await?;
        debug!(acquired, "Attempted to set lock key");
        Ok(acquired)
    }

    pub async fn release(&self, name: &str, token: &str) -> Result<bool, Error> {
        let deleted = self
            .store
            .compare_and_delete(&self.lock_key(name), token)
            .await?;
        debug!(deleted, "Attempted to delete lock key");
        Ok(deleted)
    }
}
