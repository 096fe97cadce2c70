use crate::locker::LockState;
use redis::RedisError;
use sea_orm::DbErr;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    AcquisitionTimeout { name: String, elapsed: Duration },
    NotOwner,
    LeaseExpired,
    InvalidState(LockState),
    StoreUnavailable(String),
    Initialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::AcquisitionTimeout { name, elapsed } => write!(
                f,
                "Failed to acquire lock '{name}' after {:.3} seconds",
                elapsed.as_secs_f64()
            ),
            Error::NotOwner => write!(f, "Lock is not held by this handle"),
            Error::LeaseExpired => write!(f, "Lock lease has expired"),
            Error::InvalidState(state) => write!(f, "Invalid lock state: {state:?}"),
            Error::StoreUnavailable(err) => write!(f, "Lock store error: {err}"),
            Error::Initialization(err) => write!(f, "Lock initialization error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<RedisError> for Error {
    fn from(error: RedisError) -> Self {
        let error = format!("Redis error: {error}");
        debug!("{error}");
        Error::StoreUnavailable(error)
    }
}

impl From<DbErr> for Error {
    fn from(error: DbErr) -> Self {
        let error = format!("Database error: {error}");
        debug!("{error}");
        Error::StoreUnavailable(error)
    }
}
