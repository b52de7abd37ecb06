//! Periodic retention sweep for expired sessions.

use crate::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Background task that periodically deletes sessions inactive beyond the
/// TTL. Deletions go through the store's normal per-session locking, so a
/// sweep never interrupts an in-flight mutation; running with nothing
/// expired is a no-op.
pub struct RetentionSweeper {
    store: Arc<SessionStore>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<SessionStore>, interval_seconds: u64) -> Self {
        Self {
            store,
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run sweeps forever on the configured cadence. The first sweep fires
    /// immediately, which is safe because sweeps are idempotent.
    pub async fn run(self) {
        info!(
            "Retention sweeper running every {}s",
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let deleted = self.store.sweep_expired();
            if deleted == 0 {
                debug!("Retention sweep: nothing expired");
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::embedding::EmbeddingEngine;
    use crate::memory_db::MemoryDatabase;

    fn ttl_zero_store() -> Arc<SessionStore> {
        let config = MemoryConfig {
            session_ttl_seconds: 0,
            ..MemoryConfig::default()
        };
        let database = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let embeddings = Arc::new(EmbeddingEngine::new(config.embedding_dim));
        Arc::new(SessionStore::new(config, database, embeddings))
    }

    #[tokio::test]
    async fn spawned_sweeper_deletes_expired_sessions() {
        let store = ttl_zero_store();
        store
            .create_session("user-1", Some("stale".to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let handle = RetentionSweeper::new(store.clone(), 1).spawn();
        // The first tick fires immediately; give it a moment to run.
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(store.list_sessions(None).is_empty());
    }

    #[test]
    fn sweeper_outside_a_runtime_still_sweeps_directly() {
        let store = ttl_zero_store();
        store
            .create_session("user-1", Some("stale".to_string()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        // The sweep itself is synchronous; drive it without the task wrapper.
        let deleted = tokio_test::block_on(async { store.sweep_expired() });
        assert_eq!(deleted, 1);
    }
}
