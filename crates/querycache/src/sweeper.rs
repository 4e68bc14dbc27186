//! Background sweep of the local store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::local::LocalStore;

/// Handle to a running sweep task.
pub struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a task that sweeps `store` every `interval` until stopped.
    ///
    /// The store lock is taken only for the duration of each sweep.
    pub fn spawn<V>(store: Arc<LocalStore<V>>, interval: Duration) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        let child = token.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = store.sweep();
                        if report.expired > 0 || report.evicted > 0 {
                            tracing::debug!(
                                expired = report.expired,
                                evicted = report.evicted,
                                remaining = report.remaining,
                                "local cache swept"
                            );
                        }
                    }
                }
            }
            tracing::debug!("local cache sweeper stopped");
        });

        tracing::debug!(interval_secs = interval.as_secs(), "local cache sweeper started");
        Self { token, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "local cache sweeper ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::CacheKey;
    use crate::local::EntryMeta;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let store = Arc::new(LocalStore::new(10));
        store.set(
            CacheKey::from_hash("short"),
            1u8,
            Duration::from_secs(5),
            EntryMeta::default(),
        );
        store.set(
            CacheKey::from_hash("long"),
            2u8,
            Duration::from_secs(600),
            EntryMeta::default(),
        );

        let sweeper = Sweeper::spawn(Arc::clone(&store), Duration::from_secs(60));
        assert_eq!(store.len(), 2);

        // Advancing the paused clock lets the interval fire
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 1);
        assert!(store.contains(&CacheKey::from_hash("long")));

        assert!(sweeper.is_running());
        sweeper.stop().await;
    }
}
