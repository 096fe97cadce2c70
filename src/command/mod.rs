use crate::configuration::{Configuration, StoreConfig};
use crate::locker::{MemoryStore, RedisStore, Registry, Store};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod error;
pub mod hold;
pub mod reclaim;

pub use error::Error;

// Key-value stores expire keys natively, the interval is only checked for validity.
const KEY_VALUE_RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// Connect to the configured store and initialize the lock registry
///
/// # Errors
///
/// * `Error::Lock` if the store cannot be reached or provisioned
pub async fn build_registry(config: &Configuration) -> Result<Registry, Error> {
    let (store, namespace, reclaim_interval) = match &config.store {
        StoreConfig::Sql(sql) => {
            info!("Using SQL lock store, table '{}'", sql.table);
            let mut options = ConnectOptions::new(sql.url.clone());
            options.sqlx_logging(false);
            let conn = Database::connect(options).await?;
            (
                Store::Sql(conn),
                sql.table.clone(),
                Duration::from_secs(sql.reclaim_interval),
            )
        }
        StoreConfig::Redis(redis) => (
            Store::KeyValue(Arc::new(RedisStore::new(&redis.url)?)),
            redis.key_prefix.clone(),
            KEY_VALUE_RECLAIM_INTERVAL,
        ),
        StoreConfig::Memory => (
            Store::KeyValue(Arc::new(MemoryStore::new())),
            String::new(),
            KEY_VALUE_RECLAIM_INTERVAL,
        ),
    };

    Registry::initialize(store, &namespace, reclaim_interval)
        .await
        .map_err(|err| {
            error!("Unable to initialize lock registry: {err}");
            Error::Lock(err)
        })
}
