#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

//! Named, lease-based distributed locks stored in a relational table or a
//! key-value store.
//!
//! A [`locker::Registry`] is initialized once per process with a live store
//! handle, then hands out [`locker::Lock`] handles:
//!
//! ```no_run
//! # async fn example(conn: sea_orm::DatabaseConnection) -> Result<(), lease_lock::locker::Error> {
//! use lease_lock::locker::{Registry, RetryPolicy, Store};
//! use std::time::Duration;
//!
//! let store = Store::Sql(conn);
//! let registry = Registry::initialize(store, "distributed_locks", Duration::from_secs(60)).await?;
//!
//! let lease = Duration::from_secs(30);
//! let mut lock = registry.new_lock("nightly-report", lease, RetryPolicy::default());
//! lock.lock().await?;
//! // protected work
//! lock.unlock().await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod configuration;
pub mod locker;
