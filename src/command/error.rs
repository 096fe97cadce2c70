use crate::{configuration, locker};
use std::fmt;

#[derive(Debug)]
pub enum Error {
    Configuration(configuration::Error),
    Lock(locker::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Configuration(err) => {
                write!(f, "Configuration error: ")?;
                write!(f, "{err}")
            }
            Error::Lock(err) => {
                write!(f, "Lock error: ")?;
                write!(f, "{err}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<configuration::Error> for Error {
    fn from(err: configuration::Error) -> Self {
        Error::Configuration(err)
    }
}

impl From<locker::Error> for Error {
    fn from(err: locker::Error) -> Self {
        Error::Lock(err)
    }
}

impl From<sea_orm::DbErr> for Error {
    fn from(err: sea_orm::DbErr) -> Self {
        Error::Lock(err.into())
    }
}
