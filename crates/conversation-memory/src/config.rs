use anyhow::Result;
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Runtime configuration for the memory engine.
///
/// Every policy constant the store, scheduler, and search paths rely on lives
/// here; nothing is hard-coded at the call sites. Values come from the
/// environment (via `.env` when present) with documented defaults.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// SQLite database location.
    pub db_path: PathBuf,
    /// Directory for backup and export artifacts.
    pub backup_dir: PathBuf,
    /// Per-session token budget. Exceeding it triggers eviction, never
    /// rejection.
    pub max_session_tokens: i64,
    /// Per-user session cap; the least-recently-accessed session is evicted
    /// when a new one would exceed it.
    pub max_sessions_per_user: usize,
    /// The most recent N messages of a session are never evicted.
    pub protected_recent_count: usize,
    /// Evicted batches at or above this many tokens are summarized into the
    /// session summary.
    pub summary_threshold_tokens: i64,
    /// Minimum similarity (inclusive) for a semantic search hit.
    pub similarity_floor: f32,
    /// Sessions inactive longer than this are deleted by the retention sweep.
    pub session_ttl_seconds: i64,
    /// Cadence of the periodic retention sweep.
    pub sweep_interval_seconds: u64,
    /// Bounded retry count for durable writes before surfacing an error.
    pub persist_retries: u32,
    /// Dimensionality of the hashed lexical embeddings.
    pub embedding_dim: usize,
    /// Additional caller-supplied keywords that boost importance scoring.
    pub urgency_keywords: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/conversations.db"),
            backup_dir: PathBuf::from("./data/backups"),
            max_session_tokens: 4000,
            max_sessions_per_user: 10,
            protected_recent_count: 3,
            summary_threshold_tokens: 100,
            similarity_floor: 0.0,
            session_ttl_seconds: 86_400,
            sweep_interval_seconds: 3_600,
            persist_retries: 3,
            embedding_dim: 256,
            urgency_keywords: Vec::new(),
        }
    }
}

impl MemoryConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("No .env file loaded: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let defaults = Self::default();

        let config = Self {
            db_path: env::var("MEMORY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            backup_dir: env::var("MEMORY_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
            max_session_tokens: parse_env("MEMORY_MAX_SESSION_TOKENS", defaults.max_session_tokens),
            max_sessions_per_user: parse_env(
                "MEMORY_MAX_SESSIONS_PER_USER",
                defaults.max_sessions_per_user,
            ),
            protected_recent_count: parse_env(
                "MEMORY_PROTECTED_RECENT_COUNT",
                defaults.protected_recent_count,
            ),
            summary_threshold_tokens: parse_env(
                "MEMORY_SUMMARY_THRESHOLD_TOKENS",
                defaults.summary_threshold_tokens,
            ),
            similarity_floor: parse_env("MEMORY_SIMILARITY_FLOOR", defaults.similarity_floor),
            session_ttl_seconds: parse_env("MEMORY_SESSION_TTL_SECONDS", defaults.session_ttl_seconds),
            sweep_interval_seconds: parse_env(
                "MEMORY_SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval_seconds,
            ),
            persist_retries: parse_env("MEMORY_PERSIST_RETRIES", defaults.persist_retries),
            embedding_dim: parse_env("MEMORY_EMBEDDING_DIM", defaults.embedding_dim),
            urgency_keywords: env::var("MEMORY_URGENCY_KEYWORDS")
                .map(|raw| {
                    raw.split(',')
                        .map(|k| k.trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        config.validate()?;

        info!(
            "Memory configuration: {} token budget, {} sessions/user, recent-{} protected, ttl {}s",
            config.max_session_tokens,
            config.max_sessions_per_user,
            config.protected_recent_count,
            config.session_ttl_seconds
        );

        Ok(config)
    }

    /// Reject configurations the store cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_session_tokens <= 0 {
            anyhow::bail!("MEMORY_MAX_SESSION_TOKENS must be positive");
        }
        if self.max_sessions_per_user == 0 {
            anyhow::bail!("MEMORY_MAX_SESSIONS_PER_USER must be at least 1");
        }
        if self.protected_recent_count == 0 {
            anyhow::bail!("MEMORY_PROTECTED_RECENT_COUNT must be at least 1");
        }
        if self.embedding_dim < 8 {
            anyhow::bail!("MEMORY_EMBEDDING_DIM must be at least 8");
        }
        if self.persist_retries == 0 {
            anyhow::bail!("MEMORY_PERSIST_RETRIES must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            anyhow::bail!("MEMORY_SIMILARITY_FLOOR must be within [0.0, 1.0]");
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}: '{}'. Using default.", key, raw);
            default
        }),
        Err(_) => default,
    }
}
