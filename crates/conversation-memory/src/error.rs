//! Error taxonomy for memory operations.

use thiserror::Error;

/// Errors surfaced by the memory manager and session store.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The referenced session does not exist (or has expired and been swept).
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    /// Configuration inconsistency: the operation cannot fit the token budget
    /// without evicting the protected recent window.
    #[error("capacity exceeded: {needed} tokens cannot fit a budget of {budget}")]
    CapacityExceeded { needed: i64, budget: i64 },

    /// Durable storage failed after bounded retries. In-memory state remains
    /// authoritative and consistent.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A backup or export artifact could not be written, read, or understood.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
