//! Memory database module - SQLite-based storage for sessions and messages
pub mod backup;
pub mod conversation_store;
pub mod migration;
pub mod schema;

pub use backup::{BackupDocument, SessionExport, ARTIFACT_SCHEMA_VERSION};
pub use conversation_store::ConversationStore;
pub use migration::MigrationManager;
pub use schema::{
    DatabaseStats, Message, MemoryStats, Metadata, Role, SearchResult, SearchSource,
    SessionRecord, StoredMessage,
};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Handle to the durable store: a pooled SQLite database with the schema
/// migrated to the current version.
pub struct MemoryDatabase {
    pub conversations: ConversationStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemoryDatabase {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            let mut migrator = migration::MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        info!("Memory database initialized successfully");
        Ok(Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    /// Ephemeral database for tests and scratch deployments. Pool size 1 so
    /// every caller shares the single in-memory connection.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let mut conn = pool.get()?;
            let mut migrator = migration::MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        Ok(Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }

    /// Delete sessions (and their messages) whose `last_accessed` is older
    /// than the cutoff. Returns the number of sessions removed.
    pub fn delete_sessions_last_accessed_before(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<usize> {
        let cutoff_str = cutoff.to_rfc3339();
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE session_id IN
             (SELECT id FROM sessions WHERE last_accessed < ?1)",
            [&cutoff_str],
        )?;
        let deleted = tx.execute("DELETE FROM sessions WHERE last_accessed < ?1", [&cutoff_str])?;
        tx.commit()?;
        if deleted > 0 {
            info!("Cleaned up {} expired sessions from database", deleted);
        }
        Ok(deleted)
    }

    /// Reclaim space after a destructive sweep.
    pub fn run_maintenance(&self) -> anyhow::Result<()> {
        let conn = self.pool.get()?;
        migration::run_maintenance(&conn)?;
        Ok(())
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    #[test]
    fn on_disk_database_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conversations.db");

        {
            let db = MemoryDatabase::new(&path).unwrap();
            let record = SessionRecord {
                session_id: "persisted".to_string(),
                user_id: "u".to_string(),
                created_at: Utc::now(),
                last_accessed: Utc::now(),
                message_count: 0,
                total_tokens: 0,
                summary: None,
                metadata: Metadata::new(),
            };
            db.conversations.insert_session(&record).unwrap();
        }

        let db = MemoryDatabase::new(&path).unwrap();
        assert!(db.conversations.get_session("persisted").unwrap().is_some());
    }

    #[test]
    fn expiry_deletes_only_stale_sessions() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let now = Utc::now();

        for (id, age_hours) in [("fresh", 0), ("stale", 48)] {
            let record = SessionRecord {
                session_id: id.to_string(),
                user_id: "u".to_string(),
                created_at: now - Duration::hours(age_hours),
                last_accessed: now - Duration::hours(age_hours),
                message_count: 0,
                total_tokens: 0,
                summary: None,
                metadata: Metadata::new(),
            };
            db.conversations.insert_session(&record).unwrap();
        }

        let cutoff = now - Duration::hours(24);
        let deleted = db.delete_sessions_last_accessed_before(cutoff).unwrap();
        assert_eq!(deleted, 1);
        assert!(db.conversations.get_session("fresh").unwrap().is_some());
        assert!(db.conversations.get_session("stale").unwrap().is_none());

        // Idempotent: nothing left to delete.
        assert_eq!(db.delete_sessions_last_accessed_before(cutoff).unwrap(), 0);
    }

    #[test]
    fn stats_count_rows() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let record = SessionRecord {
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            message_count: 0,
            total_tokens: 0,
            summary: None,
            metadata: Metadata::new(),
        };
        db.conversations.insert_session(&record).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_messages, 0);
    }
}
