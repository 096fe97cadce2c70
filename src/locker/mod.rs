use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

mod error;
pub mod kv;
mod reclaimer;
mod registry;
pub mod sql;

pub use error::Error;
pub use kv::{KeyValueStore, MemoryStore, RedisStore};
pub use reclaimer::Reclaimer;
pub use registry::{Registry, Store};

/// Lifecycle of a lock handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Constructed, never acquired
    Idle,
    /// Spin loop in progress
    Acquiring,
    /// Acquisition succeeded, lease running
    Held,
    /// Released by the owner
    Released,
    /// Lease elapsed without release, detected on unlock
    Expired,
    /// Attempt budget exhausted
    Failed,
}

/// How many times, and how often, acquisition is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        RetryPolicy { attempts, interval }
    }

    /// A single acquisition attempt
    pub fn no_retry() -> Self {
        RetryPolicy::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(10, Duration::from_millis(100))
    }
}

/// The two lock backend realizations
#[derive(Debug, Clone)]
pub enum Backend {
    Sql(sql::Backend),
    KeyValue(kv::Backend),
}

impl Backend {
    async fn try_acquire(&self, name: &str, token: &str, lease: Duration) -> Result<bool, Error> {
        match self {
            Backend::Sql(backend) => backend.try_acquire(name, lease).await,
            Backend::KeyValue(backend) => backend.try_acquire(name, token, lease).await,
        }
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool, Error> {
        match self {
            Backend::Sql(backend) => backend.release(name).await,
            Backend::KeyValue(backend) => backend.release(name, token).await,
        }
    }
}

/// Client-side handle on a named distributed lock
///
/// The handle only tracks its own bookkeeping: whether it believes it owns the
/// lock and when its lease started. Mutual exclusion is enforced by the store.
#[derive(Debug)]
pub struct Lock {
    backend: Backend,
    name: String,
    lease: Duration,
    retry: RetryPolicy,
    state: LockState,
    token: String,
    acquired_at: Option<Instant>,
}

impl Lock {
    pub fn new(
        backend: Backend,
        name: impl Into<String>,
        lease: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Lock {
            backend,
            name: name.into(),
            lease,
            retry,
            state: LockState::Idle,
            token: String::new(),
            acquired_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_owner(&self) -> bool {
        self.state == LockState::Held
    }

    /// Acquire the lock, retrying according to the handle's retry policy.
    /// This blocks the calling task until the lock is acquired or the attempt
    /// budget is exhausted.
    ///
    /// # Errors
    ///
    /// * `Error::AcquisitionTimeout` if every attempt lost the race
    /// * `Error::StoreUnavailable` if the store failed, the attempt loop stops
    /// * `Error::InvalidState` if the handle is already held or has failed
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn lock(&mut self) -> Result<(), Error> {
        self.acquire(self.retry).await
    }

    /// Acquire the lock with a single attempt
    ///
    /// # Errors
    ///
    /// Same as [`Lock::lock`].
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn try_lock(&mut self) -> Result<(), Error> {
        self.acquire(RetryPolicy::no_retry()).await
    }

    async fn acquire(&mut self, retry: RetryPolicy) -> Result<(), Error> {
        if matches!(self.state, LockState::Held | LockState::Failed | LockState::Acquiring) {
            return Err(Error::InvalidState(self.state));
        }

        let started = Instant::now();
        let attempts = retry.attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                self.state = LockState::Idle;
                tokio::time::sleep(retry.interval).await;
            }
            self.state = LockState::Acquiring;

            let token = Uuid::new_v4().to_string();
            match self.backend.try_acquire(&self.name, &token, self.lease).await {
                Ok(true) => {
                    self.token = token;
                    self.acquired_at = Some(Instant::now());
                    self.state = LockState::Held;
                    info!(attempt, "Acquired lock");
                    return Ok(());
                }
                Ok(false) => debug!(attempt, "Lock is held elsewhere"),
                Err(err) => {
                    warn!("Failed to acquire lock: {err}");
                    self.state = LockState::Idle;
                    return Err(err);
                }
            }
        }

        self.state = LockState::Failed;
        let elapsed = started.elapsed();
        warn!("Failed to acquire lock after {attempts} attempts");
        Err(Error::AcquisitionTimeout {
            name: self.name.clone(),
            elapsed,
        })
    }

    /// Release the lock.
    ///
    /// The release is refused without contacting the store if the local clock
    /// shows the lease has elapsed: the record may already belong to another
    /// owner.
    ///
    /// # Errors
    ///
    /// * `Error::NotOwner` if the handle does not hold the lock
    /// * `Error::LeaseExpired` if the lease has elapsed, or the store no longer
    ///   holds this handle's record
    /// * `Error::StoreUnavailable` if the store failed, the handle stays held
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn unlock(&mut self) -> Result<(), Error> {
        if self.state != LockState::Held {
            return Err(Error::NotOwner);
        }

        let lease_elapsed = self
            .acquired_at
            .map_or(true, |acquired_at| acquired_at.elapsed() >= self.lease);
        if lease_elapsed {
            debug!("Lease elapsed, refusing to release");
            self.expire();
            return Err(Error::LeaseExpired);
        }

        if self.backend.release(&self.name, &self.token).await? {
            info!("Released lock");
            self.state = LockState::Released;
            self.acquired_at = None;
            self.token.clear();
            Ok(())
        } else {
            warn!("Lock record was already gone from the store");
            self.expire();
            Err(Error::LeaseExpired)
        }
    }

    fn expire(&mut self) {
        self.state = LockState::Expired;
        self.acquired_at = None;
        self.token.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn memory_backend(store: &MemoryStore) -> Backend {
        Backend::KeyValue(kv::Backend::new(Arc::new(store.clone()), "locks:".to_string()))
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let store = MemoryStore::new();
        let mut lock = Lock::new(
            memory_backend(&store),
            "test",
            Duration::from_secs(1),
            RetryPolicy::default(),
        );
        assert_eq!(lock.state(), LockState::Idle);

        lock.try_lock().await.expect("Failed to acquire lock");
        assert!(lock.is_owner());
        assert!(store.contains("locks:test").await);

        lock.unlock().await.expect("Failed to release lock");
        assert_eq!(lock.state(), LockState::Released);
        assert!(!store.contains("locks:test").await);

        lock.lock().await.expect("Failed to re-acquire lock");
        assert!(lock.is_owner());
    }

    #[tokio::test]
    async fn test_unlock_without_lock() {
        let store = MemoryStore::new();
        let mut holder = Lock::new(
            memory_backend(&store),
            "test",
            Duration::from_secs(5),
            RetryPolicy::no_retry(),
        );
        holder.lock().await.unwrap();

        let mut other = Lock::new(
            memory_backend(&store),
            "test",
            Duration::from_secs(5),
            RetryPolicy::no_retry(),
        );
        assert_eq!(other.unlock().await, Err(Error::NotOwner));
        assert_eq!(other.state(), LockState::Idle);
        assert!(store.contains("locks:test").await);
    }

    #[tokio::test]
    async fn test_unlock_after_lease_expired() {
        let store = MemoryStore::new();
        let mut lock = Lock::new(
            memory_backend(&store),
            "expiry",
            Duration::from_millis(500),
            RetryPolicy::no_retry(),
        );

        lock.try_lock().await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(lock.unlock().await, Err(Error::LeaseExpired));
        assert_eq!(lock.state(), LockState::Expired);
        assert!(!lock.is_owner());

        let mut fresh = Lock::new(
            memory_backend(&store),
            "expiry",
            Duration::from_millis(500),
            RetryPolicy::no_retry(),
        );
        fresh.lock().await.expect("Failed to acquire expired lock");

        lock.try_lock().await.expect_err("Lock is held by the fresh handle");
    }

    #[tokio::test]
    async fn test_expired_unlock_keeps_new_owner_record() {
        let store = MemoryStore::new();
        let mut stale = Lock::new(
            memory_backend(&store),
            "job",
            Duration::from_millis(100),
            RetryPolicy::no_retry(),
        );
        stale.lock().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut owner = Lock::new(
            memory_backend(&store),
            "job",
            Duration::from_secs(10),
            RetryPolicy::no_retry(),
        );
        owner.lock().await.unwrap();

        assert_eq!(stale.unlock().await, Err(Error::LeaseExpired));
        assert!(store.contains("locks:job").await);
        assert_eq!(owner.unlock().await, Ok(()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_contested_without_retries() {
        let store = MemoryStore::new();
        let mut first = Lock::new(
            memory_backend(&store),
            "contested",
            Duration::from_secs(5),
            RetryPolicy::no_retry(),
        );
        let mut second = Lock::new(
            memory_backend(&store),
            "contested",
            Duration::from_secs(5),
            RetryPolicy::no_retry(),
        );

        let (a, b) = tokio::join!(first.lock(), second.lock());
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(Error::AcquisitionTimeout { name, .. }) if name == "contested"
        )));
        assert_eq!(
            [first.state(), second.state()]
                .iter()
                .filter(|s| **s == LockState::Failed)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_handle_is_terminal() {
        let store = MemoryStore::new();
        let mut holder = Lock::new(
            memory_backend(&store),
            "job",
            Duration::from_secs(5),
            RetryPolicy::no_retry(),
        );
        holder.lock().await.unwrap();
        assert_eq!(holder.lock().await, Err(Error::InvalidState(LockState::Held)));

        let mut waiter = Lock::new(
            memory_backend(&store),
            "job",
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_millis(10)),
        );
        let Err(Error::AcquisitionTimeout { elapsed, .. }) = waiter.lock().await else {
            panic!("Expected acquisition timeout");
        };
        assert!(elapsed >= Duration::from_millis(20));
        assert_eq!(waiter.state(), LockState::Failed);

        holder.unlock().await.unwrap();
        assert_eq!(
            waiter.lock().await,
            Err(Error::InvalidState(LockState::Failed))
        );
    }

    #[tokio::test]
    async fn test_retry_until_released() {
        let store = MemoryStore::new();
        let mut holder = Lock::new(
            memory_backend(&store),
            "job",
            Duration::from_secs(5),
            RetryPolicy::no_retry(),
        );
        holder.lock().await.unwrap();

        let mut waiter = Lock::new(
            memory_backend(&store),
            "job",
            Duration::from_secs(5),
            RetryPolicy::new(50, Duration::from_millis(20)),
        );
        let release = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            holder.unlock().await
        };

        let (acquired, released) = tokio::join!(waiter.lock(), release);
        assert_eq!(released, Ok(()));
        assert_eq!(acquired, Ok(()));
        assert!(waiter.is_owner());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion() {
        let store = MemoryStore::new();
        let holders = Arc::new(AtomicUsize::new(0));
        let max_holders = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let backend = memory_backend(&store);
            let holders = holders.clone();
            let max_holders = max_holders.clone();
            tasks.push(tokio::spawn(async move {
                let mut lock = Lock::new(
                    backend,
                    "shared",
                    Duration::from_secs(5),
                    RetryPolicy::new(500, Duration::from_millis(5)),
                );
                for _ in 0..3 {
                    lock.lock().await.expect("Failed to acquire lock");
                    let current = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_holders.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock().await.expect("Failed to release lock");
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_holders.load(Ordering::SeqCst), 1);
    }
}
