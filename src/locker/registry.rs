use crate::locker::kv::{self, KeyValueStore};
use crate::locker::reclaimer::Reclaimer;
use crate::locker::{sql, Backend, Error, Lock, RetryPolicy};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

/// A live store handle, provided by the caller
pub enum Store {
    Sql(DatabaseConnection),
    KeyValue(Arc<dyn KeyValueStore>),
}

/// Process-wide lock state: the store handle, the lock namespace and the
/// background reclamation task
#[derive(Debug)]
pub struct Registry {
    backend: Backend,
    reclaimer: Option<Reclaimer>,
}

impl Registry {
    /// Initialize the lock subsystem.
    ///
    /// For a relational store the lock table is created if absent, expired
    /// rows are reclaimed once, and a `Reclaimer` is started to repeat the
    /// sweep every `reclaim_interval`. Key-value stores expire keys natively,
    /// so only their reachability is checked.
    ///
    /// # Arguments
    ///
    /// * `store` - The store holding lock records
    /// * `namespace` - The table name (relational) or key prefix (key-value)
    /// * `reclaim_interval` - The interval between two reclamation sweeps
    ///
    /// # Errors
    ///
    /// * `Error::Initialization` if the namespace cannot be provisioned. No lock
    ///   can be trusted in that case, callers should treat it as fatal.
    #[instrument(skip(store))]
    pub async fn initialize(
        store: Store,
        namespace: &str,
        reclaim_interval: Duration,
    ) -> Result<Self, Error> {
        if reclaim_interval.is_zero() {
            return Err(Error::Initialization(
                "Reclaim interval must be greater than zero".to_string(),
            ));
        }

        let registry = match store {
            Store::Sql(conn) => {
                let backend = sql::Backend::new(conn, namespace.to_string())?;
                backend.provision().await.map_err(init_error)?;
                let reclaimed = backend.reclaim().await.map_err(init_error)?;
                info!(reclaimed, "Initial reclaim sweep completed");

                let reclaimer = Reclaimer::start(backend.clone(), reclaim_interval);
                Registry {
                    backend: Backend::Sql(backend),
                    reclaimer: Some(reclaimer),
                }
            }
            Store::KeyValue(store) => {
                let backend = kv::Backend::new(store, namespace.to_string());
                backend.provision().await.map_err(init_error)?;
                Registry {
                    backend: Backend::KeyValue(backend),
                    reclaimer: None,
                }
            }
        };

        Ok(registry)
    }

    /// Create a handle on the lock `name`. No store interaction happens until
    /// the handle is locked.
    pub fn new_lock(&self, name: impl Into<String>, lease: Duration, retry: RetryPolicy) -> Lock {
        Lock::new(self.backend.clone(), name, lease, retry)
    }

    /// Run one reclamation sweep now
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` the number of expired records deleted, always 0 for
    ///   key-value stores
    pub async fn reclaim_now(&self) -> Result<u64, Error> {
        match &self.backend {
            Backend::Sql(backend) => backend.reclaim().await,
            Backend::KeyValue(_) => Ok(0),
        }
    }

    /// Stop the background reclamation task
    pub async fn shutdown(mut self) {
        if let Some(reclaimer) = self.reclaimer.take() {
            reclaimer.stop().await;
        }
    }
}

fn init_error(err: Error) -> Error {
    error!("Failed to initialize lock store: {err}");
    match err {
        Error::Initialization(_) => err,
        err => Error::Initialization(err.to_string()),
    }
}
