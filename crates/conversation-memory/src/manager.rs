//! The facade collaborators call: session lifecycle, message ingestion,
//! context reconstruction, search, summaries, stats, retention, and
//! backup/export artifacts.
//!
//! The manager never calls the LLM. `get_context` produces the
//! `context_messages` input for the external `generate` capability, and the
//! caller stores the model's reply back through `add_message`.

use crate::config::MemoryConfig;
use crate::embedding::EmbeddingEngine;
use crate::error::{MemoryError, Result};
use crate::memory_db::backup;
use crate::memory_db::schema::{
    Message, MemoryStats, Metadata, Role, SearchResult, SessionRecord,
};
use crate::memory_db::MemoryDatabase;
use crate::retention::RetentionSweeper;
use crate::store::{ContextOptions, SessionStore};
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct MemoryManager {
    config: MemoryConfig,
    store: Arc<SessionStore>,
    database: Arc<MemoryDatabase>,
}

impl MemoryManager {
    /// Open (or create) the durable store, expire stale sessions, and cold
    /// load everything else into memory.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let database = MemoryDatabase::new(&config.db_path)
            .map_err(|e| MemoryError::Persistence(format!("open database: {}", e)))?;
        Self::with_database(config, Arc::new(database))
    }

    /// Fully in-memory manager for tests and ephemeral deployments.
    pub fn new_in_memory(config: MemoryConfig) -> Result<Self> {
        let database = MemoryDatabase::new_in_memory()
            .map_err(|e| MemoryError::Persistence(format!("open database: {}", e)))?;
        Self::with_database(config, Arc::new(database))
    }

    fn with_database(config: MemoryConfig, database: Arc<MemoryDatabase>) -> Result<Self> {
        // Expired sessions never reach the store on the cold start path.
        let cutoff = Utc::now() - Duration::seconds(config.session_ttl_seconds);
        match database.delete_sessions_last_accessed_before(cutoff) {
            Ok(0) => {}
            Ok(expired) => info!("Dropped {} expired sessions during startup", expired),
            Err(e) => warn!("Startup expiry pass failed: {}", e),
        }

        let embeddings = Arc::new(EmbeddingEngine::new(config.embedding_dim));
        let store = Arc::new(SessionStore::new(
            config.clone(),
            database.clone(),
            embeddings,
        ));
        let loaded = store.load_from_database()?;
        info!("Memory manager ready ({} sessions resident)", loaded);

        Ok(Self {
            config,
            store,
            database,
        })
    }

    // -- sessions ----------------------------------------------------------

    pub async fn create_session(
        &self,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<String> {
        self.store.create_session(user_id, session_id)
    }

    pub async fn get_session_info(&self, session_id: &str) -> Result<SessionRecord> {
        self.store.get_session_info(session_id)
    }

    pub async fn list_sessions(&self, user_id: Option<&str>) -> Vec<SessionRecord> {
        self.store.list_sessions(user_id)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.store.delete_session(session_id)
    }

    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.store.clear_session(session_id)
    }

    // -- conversation ------------------------------------------------------

    pub async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<i64>,
        metadata: Option<Metadata>,
    ) -> Result<i64> {
        self.store
            .add_message(session_id, role, content, tokens, metadata)
    }

    pub async fn get_context(
        &self,
        session_id: &str,
        options: &ContextOptions,
    ) -> Result<Vec<Message>> {
        self.store.get_context(session_id, options)
    }

    pub async fn search_messages(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.store.search_messages(session_id, query, limit)
    }

    /// Digest of the session's current live tail; nothing is evicted.
    pub async fn summarize_session(&self, session_id: &str) -> Result<String> {
        self.store.summarize_session(session_id)
    }

    // -- operations --------------------------------------------------------

    pub async fn get_memory_stats(&self) -> MemoryStats {
        self.store.stats()
    }

    /// One retention sweep, on demand. Returns the number of sessions
    /// deleted; a second call with no new activity deletes zero.
    pub async fn cleanup_old_sessions(&self) -> usize {
        self.store.sweep_expired()
    }

    /// Start the periodic retention task on the configured cadence.
    pub fn spawn_retention_task(&self) -> JoinHandle<()> {
        RetentionSweeper::new(self.store.clone(), self.config.sweep_interval_seconds).spawn()
    }

    // -- artifacts ---------------------------------------------------------

    /// Write a point-in-time snapshot of every live session. Sessions are
    /// locked one at a time while cloning, so concurrent work on other
    /// sessions proceeds untouched.
    pub async fn backup(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        let path = path.unwrap_or_else(|| {
            self.config
                .backup_dir
                .join(format!("backup-{}.json", Utc::now().format("%Y%m%dT%H%M%S")))
        });
        let snapshots = self.store.snapshot_all();
        backup::write_backup(&path, snapshots)?;
        Ok(path)
    }

    /// Export one session's full history plus metadata.
    pub async fn export_session(
        &self,
        session_id: &str,
        path: Option<PathBuf>,
    ) -> Result<PathBuf> {
        let (record, messages) = self.store.snapshot_session(session_id)?;
        let path = path.unwrap_or_else(|| {
            self.config.backup_dir.join(format!(
                "session-{}-{}.json",
                session_id,
                Utc::now().format("%Y%m%dT%H%M%S")
            ))
        });
        backup::write_session_export(&path, record, messages)?;
        Ok(path)
    }

    /// Re-create a session from an export artifact, replacing any session
    /// with the same id.
    pub async fn import_session(&self, path: &Path) -> Result<String> {
        let export = backup::read_session_export(path)?;
        self.store.import_session(export.session, export.messages)
    }

    /// Restore every session from a backup artifact. Returns the number of
    /// sessions installed.
    pub async fn restore_backup(&self, path: &Path) -> Result<usize> {
        let document = backup::read_backup(path)?;
        let mut restored = 0usize;
        for export in document.sessions {
            self.store.import_session(export.session, export.messages)?;
            restored += 1;
        }
        info!("Restored {} sessions from {}", restored, path.display());
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manager_wires_the_whole_stack() {
        let manager = MemoryManager::new_in_memory(MemoryConfig::default()).unwrap();

        let session = manager.create_session("user-1", None).await.unwrap();
        manager
            .add_message(&session, Role::User, "hello memory", None, None)
            .await
            .unwrap();

        let context = manager
            .get_context(&session, &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(context.len(), 1);

        let stats = manager.get_memory_stats().await;
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.database.total_sessions, 1);
    }

    #[tokio::test]
    async fn summarize_session_is_on_demand_and_non_destructive() {
        let manager = MemoryManager::new_in_memory(MemoryConfig::default()).unwrap();
        let session = manager.create_session("user-1", None).await.unwrap();
        manager
            .add_message(&session, Role::User, "discussing database indexing", None, None)
            .await
            .unwrap();

        let digest = manager.summarize_session(&session).await.unwrap();
        assert!(digest.contains("indexing"));

        let info = manager.get_session_info(&session).await.unwrap();
        assert_eq!(info.message_count, 1);
        assert!(info.summary.is_none());
    }
}
