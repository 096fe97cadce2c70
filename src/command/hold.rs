use crate::command;
use crate::configuration::LockConfig;
use crate::locker::Registry;
use argh::FromArgs;
use std::time::Duration;
use tracing::{info, warn};

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "hold",
    description = "Acquire a lock, hold it for a while, then release it"
)]
pub struct Options {
    #[argh(option, short = 'n')]
    /// the name of the lock to acquire
    pub name: String,
    #[argh(option, short = 'd', default = "0")]
    /// how long to hold the lock, in seconds
    pub hold_for: u64,
    #[argh(option, short = 'l')]
    /// the lease duration in milliseconds, overrides the configuration
    pub lease: Option<u64>,
}

pub struct Command {
    registry: Registry,
    name: String,
    hold_for: Duration,
    lock_config: LockConfig,
}

impl Command {
    pub fn new(options: &Options, lock_config: &LockConfig, registry: Registry) -> Self {
        let mut lock_config = lock_config.clone();
        if let Some(lease) = options.lease {
            lock_config.lease = lease;
        }

        Command {
            registry,
            name: options.name.clone(),
            hold_for: Duration::from_secs(options.hold_for),
            lock_config,
        }
    }

    pub async fn run(self) -> Result<(), command::Error> {
        let mut lock = self.registry.new_lock(
            self.name.as_str(),
            self.lock_config.lease_duration(),
            self.lock_config.retry_policy(),
        );

        let result = async {
            lock.lock().await?;
            println!("Acquired lock '{}'", self.name);

            tokio::time::sleep(self.hold_for).await;

            lock.unlock().await?;
            println!("Released lock '{}'", self.name);
            Ok::<(), command::Error>(())
        }
        .await;

        if let Err(err) = &result {
            warn!("Lock '{}' was not held to completion: {err}", self.name);
        } else {
            info!("Lock '{}' held for {:?}", self.name, self.hold_for);
        }

        self.registry.shutdown().await;
        result
    }
}
