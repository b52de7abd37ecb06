//! Session and message CRUD against the SQLite store.

use crate::memory_db::schema::{Metadata, Role, SessionRecord, StoredMessage};
use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CRUD operations over the `sessions` and `messages` tables.
///
/// Methods that belong to one logical mutation run inside a single
/// transaction so the durable state never shows a half-applied operation.
pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    // -- sessions ----------------------------------------------------------

    pub fn insert_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        Self::insert_session_with_conn(&conn, record)?;
        info!("Created session {} for user {}", record.session_id, record.user_id);
        Ok(())
    }

    fn insert_session_with_conn(conn: &Connection, record: &SessionRecord) -> anyhow::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO sessions
             (id, user_id, created_at, last_accessed, message_count, total_tokens, summary, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &record.session_id,
                &record.user_id,
                record.created_at.to_rfc3339(),
                record.last_accessed.to_rfc3339(),
                record.message_count,
                record.total_tokens,
                record.summary.as_deref(),
                serde_json::to_string(&record.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn update_session_with_conn(conn: &Connection, record: &SessionRecord) -> anyhow::Result<()> {
        conn.execute(
            "UPDATE sessions SET
             last_accessed = ?2, message_count = ?3, total_tokens = ?4, summary = ?5, metadata = ?6
             WHERE id = ?1",
            params![
                &record.session_id,
                record.last_accessed.to_rfc3339(),
                record.message_count,
                record.total_tokens,
                record.summary.as_deref(),
                serde_json::to_string(&record.metadata)?,
            ],
        )?;
        Ok(())
    }

    pub fn update_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        Self::update_session_with_conn(&conn, record)
    }

    pub fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE sessions SET last_accessed = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, session_id: &str) -> anyhow::Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        // Explicit child delete; does not rely on the connection's FK pragma.
        tx.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
        let deleted = tx.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
        tx.commit()?;
        info!("Deleted session {}", session_id);
        Ok(deleted)
    }

    pub fn get_session(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, created_at, last_accessed, message_count, total_tokens, summary, metadata
             FROM sessions WHERE id = ?1",
        )?;
        let mut rows = stmt.query([session_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_session(row)?))
        } else {
            Ok(None)
        }
    }

    /// All sessions, most recently accessed first. Used on cold start.
    pub fn load_all_sessions(&self) -> anyhow::Result<Vec<SessionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, created_at, last_accessed, message_count, total_tokens, summary, metadata
             FROM sessions ORDER BY last_accessed DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();

        while let Some(row) = rows.next()? {
            sessions.push(Self::row_to_session(row)?);
        }

        Ok(sessions)
    }

    // -- messages ----------------------------------------------------------

    pub fn load_session_messages(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, message_index, role, content, tokens, timestamp,
                    embedding, metadata, importance_score, access_count, last_accessed
             FROM messages WHERE session_id = ?1 ORDER BY message_index",
        )?;
        let mut rows = stmt.query([session_id])?;
        let mut messages = Vec::new();

        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_stored_message(row)?);
        }

        Ok(messages)
    }

    fn insert_message_with_conn(conn: &Connection, message: &StoredMessage) -> anyhow::Result<()> {
        let embedding_bytes = message
            .embedding
            .as_ref()
            .map(|v| bincode::serialize(v))
            .transpose()?;

        conn.execute(
            "INSERT INTO messages
             (session_id, message_index, role, content, tokens, timestamp,
              embedding, metadata, importance_score, access_count, last_accessed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                &message.session_id,
                message.id,
                message.role.to_string(),
                &message.content,
                message.tokens,
                message.timestamp.to_rfc3339(),
                embedding_bytes,
                serde_json::to_string(&message.metadata)?,
                message.importance_score as f64,
                message.access_count,
                message.last_accessed.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fill the cached embedding column for a message.
    pub fn set_message_embedding(
        &self,
        session_id: &str,
        message_id: i64,
        embedding: &[f32],
    ) -> anyhow::Result<()> {
        let bytes = bincode::serialize(&embedding.to_vec())?;
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE messages SET embedding = ?1 WHERE session_id = ?2 AND message_index = ?3",
            params![bytes, session_id, message_id],
        )?;
        Ok(())
    }

    /// Persist access bookkeeping for messages returned by a read path.
    pub fn update_message_access(
        &self,
        session_id: &str,
        updates: &[(i64, i64, DateTime<Utc>)],
        session_last_accessed: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for (message_id, access_count, last_accessed) in updates {
            tx.execute(
                "UPDATE messages SET access_count = ?1, last_accessed = ?2
                 WHERE session_id = ?3 AND message_index = ?4",
                params![access_count, last_accessed.to_rfc3339(), session_id, message_id],
            )?;
        }
        tx.execute(
            "UPDATE sessions SET last_accessed = ?1 WHERE id = ?2",
            params![session_last_accessed.to_rfc3339(), session_id],
        )?;
        tx.commit()?;
        debug!("Persisted access stats for {} messages in {}", updates.len(), session_id);
        Ok(())
    }

    // -- composite mutations (one transaction per logical operation) -------

    /// Durably apply one completed `add_message`: the new row, the rows the
    /// eviction removed, and the refreshed session aggregates.
    pub fn persist_add_message(
        &self,
        record: &SessionRecord,
        message: &StoredMessage,
        evicted_ids: &[i64],
    ) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        Self::insert_message_with_conn(&tx, message)?;
        for evicted_id in evicted_ids {
            tx.execute(
                "DELETE FROM messages WHERE session_id = ?1 AND message_index = ?2",
                params![&record.session_id, evicted_id],
            )?;
        }
        Self::update_session_with_conn(&tx, record)?;

        tx.commit()?;
        debug!(
            "Persisted message {} in session {} ({} evicted)",
            message.id,
            record.session_id,
            evicted_ids.len()
        );
        Ok(())
    }

    /// Durably apply `clear_session`: drop all messages, keep the shell.
    pub fn persist_clear_session(&self, record: &SessionRecord) -> anyhow::Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            [&record.session_id],
        )?;
        Self::update_session_with_conn(&tx, record)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Durably replace a whole session with an imported snapshot.
    pub fn persist_replace_session(
        &self,
        record: &SessionRecord,
        messages: &[StoredMessage],
    ) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", [&record.session_id])?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", [&record.session_id])?;
        Self::insert_session_with_conn(&tx, record)?;
        for message in messages {
            Self::insert_message_with_conn(&tx, message)?;
        }
        tx.commit()?;
        info!(
            "Restored session {} with {} messages",
            record.session_id,
            messages.len()
        );
        Ok(())
    }

    // -- row mapping -------------------------------------------------------

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn parse_metadata(raw: &str) -> Metadata {
        serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!("Malformed metadata JSON, using empty bag: {}", e);
            Metadata::new()
        })
    }

    fn row_to_session(row: &Row) -> anyhow::Result<SessionRecord> {
        let created_at = Self::parse_datetime_safe(&row.get::<_, String>(2)?)
            .unwrap_or_else(|| {
                warn!("Failed to parse created_at");
                Utc::now()
            });
        let last_accessed = Self::parse_datetime_safe(&row.get::<_, String>(3)?)
            .unwrap_or_else(|| {
                warn!("Failed to parse last_accessed");
                Utc::now()
            });

        Ok(SessionRecord {
            session_id: row.get(0)?,
            user_id: row.get(1)?,
            created_at,
            last_accessed,
            message_count: row.get(4)?,
            total_tokens: row.get(5)?,
            summary: row.get(6)?,
            metadata: Self::parse_metadata(&row.get::<_, String>(7)?),
        })
    }

    fn row_to_stored_message(row: &Row) -> anyhow::Result<StoredMessage> {
        let role_raw: String = row.get(2)?;
        let role = Role::from_str(&role_raw).map_err(|e| anyhow::anyhow!(e))?;

        let timestamp = Self::parse_datetime_safe(&row.get::<_, String>(5)?)
            .unwrap_or_else(|| {
                warn!("Failed to parse message timestamp");
                Utc::now()
            });
        let last_accessed = Self::parse_datetime_safe(&row.get::<_, String>(10)?)
            .unwrap_or_else(|| Utc::now());

        let embedding = match row.get::<_, Option<Vec<u8>>>(6)? {
            Some(bytes) => match bincode::deserialize::<Vec<f32>>(&bytes) {
                Ok(vector) => Some(vector),
                Err(e) => {
                    // Derived data; drop it and re-embed lazily later.
                    warn!("Discarding undecodable cached embedding: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(StoredMessage {
            session_id: row.get(0)?,
            id: row.get(1)?,
            role,
            content: row.get(3)?,
            tokens: row.get(4)?,
            timestamp,
            embedding,
            metadata: Self::parse_metadata(&row.get::<_, String>(7)?),
            importance_score: row.get::<_, f64>(8)? as f32,
            access_count: row.get(9)?,
            last_accessed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    fn test_record(session_id: &str, user_id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_accessed: now,
            message_count: 0,
            total_tokens: 0,
            summary: None,
            metadata: Metadata::new(),
        }
    }

    fn test_message(session_id: &str, id: i64, content: &str) -> StoredMessage {
        let now = Utc::now();
        StoredMessage {
            id,
            session_id: session_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            tokens: 10,
            timestamp: now,
            metadata: Metadata::new(),
            importance_score: 1.15,
            access_count: 0,
            last_accessed: now,
            embedding: None,
        }
    }

    #[test]
    fn session_roundtrip() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let mut record = test_record("s-1", "u-1");
        record
            .metadata
            .insert("channel".to_string(), serde_json::json!("cli"));

        db.conversations.insert_session(&record).unwrap();

        let loaded = db.conversations.get_session("s-1").unwrap().unwrap();
        assert_eq!(loaded.user_id, "u-1");
        assert_eq!(loaded.metadata.get("channel"), Some(&serde_json::json!("cli")));
        assert!(db.conversations.get_session("missing").unwrap().is_none());
    }

    #[test]
    fn message_roundtrip_preserves_order_and_fields() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let record = test_record("s-2", "u-1");
        db.conversations.insert_session(&record).unwrap();

        for (i, content) in ["first", "second", "third"].iter().enumerate() {
            let message = test_message("s-2", (i + 1) as i64, content);
            db.conversations
                .persist_add_message(&record, &message, &[])
                .unwrap();
        }

        let messages = db.conversations.load_session_messages("s-2").unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[2].content, "third");
        assert_eq!(messages[0].role, Role::User);
        assert!((messages[0].importance_score - 1.15).abs() < 1e-6);
    }

    #[test]
    fn eviction_rows_are_removed_in_the_same_transaction() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let mut record = test_record("s-3", "u-1");
        db.conversations.insert_session(&record).unwrap();

        for i in 1..=3 {
            let message = test_message("s-3", i, "filler");
            db.conversations
                .persist_add_message(&record, &message, &[])
                .unwrap();
        }

        record.message_count = 2;
        let newest = test_message("s-3", 4, "newest");
        db.conversations
            .persist_add_message(&record, &newest, &[1, 2])
            .unwrap();

        let messages = db.conversations.load_session_messages("s-3").unwrap();
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn embedding_column_roundtrip() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let record = test_record("s-4", "u-1");
        db.conversations.insert_session(&record).unwrap();

        let message = test_message("s-4", 1, "embed me");
        db.conversations
            .persist_add_message(&record, &message, &[])
            .unwrap();

        db.conversations
            .set_message_embedding("s-4", 1, &[0.25, 0.5, 0.75])
            .unwrap();

        let messages = db.conversations.load_session_messages("s-4").unwrap();
        assert_eq!(messages[0].embedding.as_deref(), Some(&[0.25, 0.5, 0.75][..]));
    }

    #[test]
    fn delete_session_cascades_to_messages() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let record = test_record("s-5", "u-1");
        db.conversations.insert_session(&record).unwrap();
        db.conversations
            .persist_add_message(&record, &test_message("s-5", 1, "gone"), &[])
            .unwrap();

        let deleted = db.conversations.delete_session("s-5").unwrap();
        assert_eq!(deleted, 1);
        assert!(db.conversations.get_session("s-5").unwrap().is_none());
        assert!(db.conversations.load_session_messages("s-5").unwrap().is_empty());
    }

    #[test]
    fn replace_session_is_a_full_swap() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let record = test_record("s-6", "u-1");
        db.conversations.insert_session(&record).unwrap();
        db.conversations
            .persist_add_message(&record, &test_message("s-6", 1, "old"), &[])
            .unwrap();

        let mut replacement = test_record("s-6", "u-2");
        replacement.message_count = 1;
        let imported = vec![test_message("s-6", 7, "imported")];
        db.conversations
            .persist_replace_session(&replacement, &imported)
            .unwrap();

        let loaded = db.conversations.get_session("s-6").unwrap().unwrap();
        assert_eq!(loaded.user_id, "u-2");
        let messages = db.conversations.load_session_messages("s-6").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 7);
        assert_eq!(messages[0].content, "imported");
    }
}
