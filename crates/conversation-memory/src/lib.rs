// conversation-memory/crates/src/lib.rs

pub mod config;
pub mod embedding;
pub mod error;
pub mod manager;
pub mod memory_db;
pub mod retention;
pub mod scoring;
pub mod store;
pub mod summarize;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::MemoryConfig;
pub use error::{MemoryError, Result};
pub use manager::MemoryManager;
pub use store::{ContextOptions, SessionStore};

// Domain type exports
pub use memory_db::{
    BackupDocument, DatabaseStats, MemoryDatabase, MemoryStats, Message, Metadata, Role,
    SearchResult, SearchSource, SessionExport, SessionRecord, StoredMessage,
    ARTIFACT_SCHEMA_VERSION,
};

// Engine exports
pub use embedding::EmbeddingEngine;
pub use retention::RetentionSweeper;
pub use scoring::{ImportanceScorer, ScoringConfig};
pub use summarize::{Summarizer, SummarizerConfig};
