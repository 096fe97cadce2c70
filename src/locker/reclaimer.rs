use crate::locker::sql;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Background task deleting expired lock rows on a fixed interval
///
/// The task is cancelled when the `Reclaimer` is dropped.
#[derive(Debug)]
pub struct Reclaimer {
    stop_notify: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Reclaimer {
    /// Spawn the sweep loop. The first sweep happens one `interval` from now:
    /// the startup pass is run by the caller.
    pub fn start(backend: sql::Backend, interval: Duration) -> Self {
        let stop_notify = Arc::new(Notify::new());
        let stop_notify_clone = stop_notify.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = stop_notify_clone.notified() => break,
                    _ = ticker.tick() => {}
                }

                match backend.reclaim().await {
                    Ok(deleted) => debug!(deleted, "Reclaim sweep completed"),
                    Err(err) => warn!("Reclaim sweep failed, retrying next interval: {err}"),
                }
            }

            info!("Reclaimer stopped");
        });

        Reclaimer {
            stop_notify,
            handle: Some(handle),
        }
    }

    /// Stop the sweep loop and wait for an in-flight sweep to finish
    pub async fn stop(mut self) {
        self.stop_notify.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!("Reclaimer task did not exit cleanly: {err}");
            }
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.stop_notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locker::sql::tests::sqlite_connection;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweeps_repeatedly() {
        let dir = TempDir::new().unwrap();
        let backend = sql::Backend::new(sqlite_connection(&dir).await, "locks".to_string())
            .expect("Failed to create backend");
        backend.provision().await.unwrap();

        let reclaimer = Reclaimer::start(backend.clone(), Duration::from_millis(100));

        for name in ["first", "second"] {
            assert_eq!(
                backend.try_acquire(name, Duration::from_millis(50)).await,
                Ok(true)
            );
            time::sleep(Duration::from_millis(400)).await;
            assert_eq!(backend.count_rows(name).await, 0);
        }

        reclaimer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_sweeps() {
        let dir = TempDir::new().unwrap();
        let backend = sql::Backend::new(sqlite_connection(&dir).await, "locks".to_string())
            .expect("Failed to create backend");
        backend.provision().await.unwrap();

        Reclaimer::start(backend.clone(), Duration::from_millis(50))
            .stop()
            .await;

        backend
            .try_acquire("job", Duration::from_millis(10))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.count_rows("job").await, 1);
    }
}
