//! Database schema definitions and domain types for the memory system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Conversation turn role. Closed set; summaries are re-injected as `System`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

/// Open metadata bag attached to sessions and messages. Callers store
/// arbitrary context here; the engine never interprets it.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A session row: one bounded conversation thread owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Count of physically retained (non-evicted) messages.
    pub message_count: i64,
    /// Token sum over retained messages; `<= max_session_tokens` after every
    /// completed mutation.
    pub total_tokens: i64,
    /// Compact digest of evicted content. At most one per session; merged,
    /// never stacked.
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A message row. `id` is the caller-visible identity: unique within its
/// session and monotonically increasing in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub tokens: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    pub importance_score: f32,
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
    /// Lazily computed lexical vector, cached once computed. Never
    /// serialized into artifacts; re-derived after import.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// One turn of reconstructed context, ready to hand to the LLM collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// How a search hit was produced. Keyword hits are an explicit fallback,
/// never disguised as semantic matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Semantic,
    Keyword,
}

/// A ranked search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub message: StoredMessage,
    pub similarity: f32,
    pub source: SearchSource,
}

/// Aggregate view over the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub session_count: usize,
    pub message_count: usize,
    pub token_count: i64,
    /// Sessions whose `last_accessed` falls within the TTL window.
    pub active_sessions: usize,
    pub database: DatabaseStats,
}

/// Row counts and on-disk size of the backing database.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStats {
    pub total_sessions: i64,
    pub total_messages: i64,
    pub database_size_bytes: i64,
}

/// Current DDL. Applied through the migration manager; kept in one place so
/// in-memory databases and migrations stay in sync.
pub const SCHEMA_SQL: &str = "
-- Sessions table
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL,
    last_accessed TIMESTAMP NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    summary TEXT,
    metadata TEXT NOT NULL
);
-- Messages table; message_index is the caller-visible id, monotonic per session
CREATE TABLE IF NOT EXISTS messages (
    session_id TEXT NOT NULL,
    message_index INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tokens INTEGER NOT NULL,
    timestamp TIMESTAMP NOT NULL,
    embedding BLOB,
    metadata TEXT NOT NULL,
    importance_score REAL NOT NULL DEFAULT 1.0,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TIMESTAMP NOT NULL,
    PRIMARY KEY (session_id, message_index),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);
-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_last_accessed ON sessions (last_accessed);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (timestamp);
";
