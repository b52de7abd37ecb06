//! The session store: authoritative in-memory state for all active sessions
//! and sole mutator of session/message state.
//!
//! Locking follows a two-level hierarchy: a coarse mutex over the per-user
//! session index for creation/deletion bookkeeping, and one `RwLock` per
//! session for everything else, held in `user-index -> session` order.
//! Callers on different sessions proceed independently. Every mutation is
//! written through to SQLite inside one transaction before the call returns;
//! if the durable write exhausts its retries the in-memory state remains
//! authoritative and the failure is surfaced.

use crate::config::MemoryConfig;
use crate::embedding::EmbeddingEngine;
use crate::error::{MemoryError, Result};
use crate::memory_db::schema::{
    Message, MemoryStats, Metadata, Role, SearchResult, SearchSource, SessionRecord,
    StoredMessage,
};
use crate::memory_db::MemoryDatabase;
use crate::scoring::ImportanceScorer;
use crate::summarize::Summarizer;
use crate::utils::TextUtils;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Options for context reconstruction.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Token budget for the returned context; the session budget by default.
    pub max_tokens: Option<i64>,
    /// When false, stored system messages and the synthetic summary message
    /// are suppressed.
    pub include_system: bool,
    /// When set, messages are selected by similarity to this query instead of
    /// recency. Output order stays chronological either way.
    pub semantic_query: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            include_system: true,
            semantic_query: None,
        }
    }
}

struct SessionState {
    record: SessionRecord,
    /// Live messages in creation order.
    messages: Vec<StoredMessage>,
    /// Next caller-visible message id; survives clears so ids stay unique
    /// for the session's lifetime.
    next_message_id: i64,
    /// Evicted messages not yet folded into the summary. Summarization runs
    /// once the buffered batch reaches the configured threshold, so the
    /// buffer is bounded by it.
    pending_evicted: Vec<StoredMessage>,
}

pub struct SessionStore {
    config: MemoryConfig,
    database: Arc<MemoryDatabase>,
    embeddings: Arc<EmbeddingEngine>,
    scorer: ImportanceScorer,
    summarizer: Summarizer,
    sessions: DashMap<String, Arc<RwLock<SessionState>>>,
    /// user_id -> session ids. Guards creation/deletion bookkeeping only.
    user_index: Mutex<HashMap<String, Vec<String>>>,
}

impl SessionStore {
    pub fn new(
        config: MemoryConfig,
        database: Arc<MemoryDatabase>,
        embeddings: Arc<EmbeddingEngine>,
    ) -> Self {
        let scorer = ImportanceScorer::with_extra_keywords(config.urgency_keywords.clone());
        Self {
            config,
            database,
            embeddings,
            scorer,
            summarizer: Summarizer::default(),
            sessions: DashMap::new(),
            user_index: Mutex::new(HashMap::new()),
        }
    }

    /// Cold start: rebuild the in-memory store from the durable tables.
    /// Returns the number of sessions loaded.
    pub fn load_from_database(&self) -> Result<usize> {
        let records = self
            .database
            .conversations
            .load_all_sessions()
            .map_err(|e| MemoryError::Persistence(format!("load sessions: {}", e)))?;

        let mut index = self.user_index.lock().unwrap();
        let mut loaded = 0usize;

        for record in records {
            let messages = self
                .database
                .conversations
                .load_session_messages(&record.session_id)
                .map_err(|e| MemoryError::Persistence(format!("load messages: {}", e)))?;
            let next_message_id = messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;

            index
                .entry(record.user_id.clone())
                .or_default()
                .push(record.session_id.clone());
            self.sessions.insert(
                record.session_id.clone(),
                Arc::new(RwLock::new(SessionState {
                    record,
                    messages,
                    next_message_id,
                    pending_evicted: Vec::new(),
                })),
            );
            loaded += 1;
        }

        info!("Cold start loaded {} sessions into the store", loaded);
        Ok(loaded)
    }

    // -- session lifecycle -------------------------------------------------

    /// Create a session for a user, evicting that user's least-recently
    /// accessed session first if the per-user cap would be exceeded. An
    /// explicit `session_id` that already exists is touched and returned
    /// (get-or-create); generated ids are regenerated on collision.
    pub fn create_session(&self, user_id: &str, session_id: Option<String>) -> Result<String> {
        let mut index = self.user_index.lock().unwrap();
        let now = Utc::now();

        if let Some(ref requested) = session_id {
            if let Some(handle) = self.sessions.get(requested).map(|r| r.value().clone()) {
                let mut state = handle.write().unwrap();
                state.record.last_accessed = now;
                if let Err(e) = self
                    .database
                    .conversations
                    .touch_session(requested, now)
                {
                    warn!("Failed to persist session touch for {}: {}", requested, e);
                }
                return Ok(requested.clone());
            }
        }

        let new_id = match session_id {
            Some(requested) => requested,
            None => loop {
                let candidate = Uuid::new_v4().to_string();
                if !self.sessions.contains_key(&candidate) {
                    break candidate;
                }
                warn!("Generated session id collided; regenerating");
            },
        };

        // Per-user cap: evict the least-recently-accessed session first.
        let owned = index.entry(user_id.to_string()).or_default().clone();
        if owned.len() >= self.config.max_sessions_per_user {
            if let Some(lru_id) = self.least_recently_accessed(&owned) {
                info!(
                    "User {} at session cap ({}); evicting LRU session {}",
                    user_id, self.config.max_sessions_per_user, lru_id
                );
                self.delete_session_locked(&lru_id, &mut index)?;
            }
        }

        let record = SessionRecord {
            session_id: new_id.clone(),
            user_id: user_id.to_string(),
            created_at: now,
            last_accessed: now,
            message_count: 0,
            total_tokens: 0,
            summary: None,
            metadata: Metadata::new(),
        };

        index
            .entry(user_id.to_string())
            .or_default()
            .push(new_id.clone());
        self.sessions.insert(
            new_id.clone(),
            Arc::new(RwLock::new(SessionState {
                record: record.clone(),
                messages: Vec::new(),
                next_message_id: 1,
                pending_evicted: Vec::new(),
            })),
        );

        self.persist_with_retries("create_session", || {
            self.database.conversations.insert_session(&record)
        })?;

        Ok(new_id)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut index = self.user_index.lock().unwrap();
        self.delete_session_locked(session_id, &mut index)
    }

    /// Remove a session while the user-index lock is already held.
    fn delete_session_locked(
        &self,
        session_id: &str,
        index: &mut HashMap<String, Vec<String>>,
    ) -> Result<()> {
        let handle = self.handle(session_id)?;
        let state = handle.write().unwrap();

        self.sessions.remove(session_id);
        if let Some(owned) = index.get_mut(&state.record.user_id) {
            owned.retain(|id| id != session_id);
            if owned.is_empty() {
                index.remove(&state.record.user_id);
            }
        }

        self.persist_with_retries("delete_session", || {
            self.database
                .conversations
                .delete_session(session_id)
                .map(|_| ())
        })?;

        Ok(())
    }

    /// Remove all messages but keep the session shell: aggregates, summary,
    /// and the eviction buffer reset to zero.
    pub fn clear_session(&self, session_id: &str) -> Result<()> {
        let handle = self.handle(session_id)?;
        let mut state = handle.write().unwrap();
        self.ensure_present(session_id)?;

        state.messages.clear();
        state.pending_evicted.clear();
        state.record.message_count = 0;
        state.record.total_tokens = 0;
        state.record.summary = None;
        state.record.last_accessed = Utc::now();

        self.persist_with_retries("clear_session", || {
            self.database
                .conversations
                .persist_clear_session(&state.record)
                .map(|_| ())
        })?;

        info!("Cleared session {}", session_id);
        Ok(())
    }

    // -- message ingestion -------------------------------------------------

    /// Append a message, evicting under token pressure and summarizing the
    /// evicted batch when it is large enough. Logical failures mutate
    /// nothing; a durable-write failure after the in-memory commit is
    /// surfaced while memory stays authoritative.
    pub fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<i64>,
        metadata: Option<Metadata>,
    ) -> Result<i64> {
        let handle = self.handle(session_id)?;
        let mut state = handle.write().unwrap();
        self.ensure_present(session_id)?;

        let now = Utc::now();
        let budget = self.config.max_session_tokens;
        let tokens = tokens.unwrap_or_else(|| TextUtils::estimate_tokens(content));

        if tokens > budget {
            return Err(MemoryError::CapacityExceeded {
                needed: tokens,
                budget,
            });
        }

        // Plan eviction before mutating anything. The new message occupies
        // one slot of the protected recent window; the rest shields the tail
        // of the existing list.
        let projected = state.record.total_tokens + tokens;
        let mut evict_ids: Vec<i64> = Vec::new();
        if projected > budget {
            let shielded = self.config.protected_recent_count.saturating_sub(1);
            let evictable = state.messages.len().saturating_sub(shielded);

            let mut candidates: Vec<&StoredMessage> = state.messages[..evictable].iter().collect();
            candidates.sort_by(|a, b| {
                a.importance_score
                    .partial_cmp(&b.importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.timestamp.cmp(&b.timestamp))
                    .then(a.id.cmp(&b.id))
            });

            let mut remaining = projected;
            for candidate in candidates {
                if remaining <= budget {
                    break;
                }
                remaining -= candidate.tokens;
                evict_ids.push(candidate.id);
            }

            if remaining > budget {
                // Only the protected window is left and we are still over
                // budget: a configuration inconsistency, not an eviction job.
                return Err(MemoryError::CapacityExceeded {
                    needed: remaining,
                    budget,
                });
            }
        }

        let importance_score = self.scorer.score(&role, content);
        let message_id = state.next_message_id;
        state.next_message_id += 1;

        let message = StoredMessage {
            id: message_id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            tokens,
            timestamp: now,
            metadata: metadata.unwrap_or_default(),
            importance_score,
            access_count: 0,
            last_accessed: now,
            embedding: None,
        };
        state.messages.push(message.clone());

        if !evict_ids.is_empty() {
            let evict_set: HashSet<i64> = evict_ids.iter().copied().collect();
            let all = std::mem::take(&mut state.messages);
            let mut evicted_now = Vec::with_capacity(evict_ids.len());
            for m in all {
                if evict_set.contains(&m.id) {
                    evicted_now.push(m);
                } else {
                    state.messages.push(m);
                }
            }
            debug!(
                "Evicted {} messages from session {} to stay under {} tokens",
                evicted_now.len(),
                session_id,
                budget
            );
            state.pending_evicted.extend(evicted_now);
        }

        state.record.message_count = state.messages.len() as i64;
        state.record.total_tokens = state.messages.iter().map(|m| m.tokens).sum();
        state.record.last_accessed = now;

        let pending_tokens: i64 = state.pending_evicted.iter().map(|m| m.tokens).sum();
        if pending_tokens >= self.config.summary_threshold_tokens && !state.pending_evicted.is_empty()
        {
            let batch = std::mem::take(&mut state.pending_evicted);
            let digest = self.summarizer.summarize(&batch);
            let merged = self
                .summarizer
                .merge(state.record.summary.as_deref(), &digest);
            info!(
                "Summarized {} evicted messages ({} tokens) for session {}",
                batch.len(),
                pending_tokens,
                session_id
            );
            state.record.summary = Some(merged);
        }

        self.persist_with_retries("add_message", || {
            self.database
                .conversations
                .persist_add_message(&state.record, &message, &evict_ids)
        })?;

        Ok(message_id)
    }

    // -- read paths --------------------------------------------------------

    /// Reconstruct conversation context in chronological order, newest-first
    /// selection by default or similarity-ranked selection under a semantic
    /// query, with the session summary prepended as a synthetic system
    /// message. Mutates only access bookkeeping.
    pub fn get_context(&self, session_id: &str, options: &ContextOptions) -> Result<Vec<Message>> {
        let handle = self.handle(session_id)?;
        let mut state = handle.write().unwrap();
        self.ensure_present(session_id)?;

        let now = Utc::now();
        let budget = options
            .max_tokens
            .unwrap_or(self.config.max_session_tokens)
            .max(0);
        let mut remaining = budget;

        let summary_message = if options.include_system {
            state.record.summary.as_ref().map(|summary| Message {
                role: Role::System,
                content: format!("[Summary of earlier conversation: {}]", summary),
            })
        } else {
            None
        };
        if let Some(ref m) = summary_message {
            remaining -= TextUtils::estimate_tokens(&m.content);
        }

        let selected: HashSet<i64> = match options.semantic_query {
            Some(ref query) if !query.trim().is_empty() => {
                let query_vector = self.embeddings.embed(query);
                self.ensure_embeddings(session_id, &mut state);

                let mut ranked: Vec<(i64, f32, i64, DateTime<Utc>)> = state
                    .messages
                    .iter()
                    .filter(|m| options.include_system || m.role != Role::System)
                    .map(|m| {
                        let similarity = m
                            .embedding
                            .as_ref()
                            .map(|v| self.embeddings.similarity(&query_vector, v))
                            .unwrap_or(0.0);
                        (m.id, similarity, m.tokens, m.timestamp)
                    })
                    .collect();
                ranked.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.3.cmp(&a.3))
                        .then(b.0.cmp(&a.0))
                });

                let mut chosen = HashSet::new();
                for (id, _, tokens, _) in ranked {
                    if tokens <= remaining {
                        remaining -= tokens;
                        chosen.insert(id);
                    }
                }
                chosen
            }
            _ => {
                let mut chosen = HashSet::new();
                for m in state
                    .messages
                    .iter()
                    .rev()
                    .filter(|m| options.include_system || m.role != Role::System)
                {
                    if m.tokens > remaining {
                        break;
                    }
                    remaining -= m.tokens;
                    chosen.insert(m.id);
                }
                chosen
            }
        };

        // Access bookkeeping for every message that made it into the context.
        let mut access_updates = Vec::with_capacity(selected.len());
        for m in state.messages.iter_mut().filter(|m| selected.contains(&m.id)) {
            m.access_count += 1;
            m.last_accessed = now;
            access_updates.push((m.id, m.access_count, now));
        }
        state.record.last_accessed = now;
        if let Err(e) =
            self.database
                .conversations
                .update_message_access(session_id, &access_updates, now)
        {
            // Bookkeeping is derived state; the read itself stays valid.
            warn!("Failed to persist access stats for {}: {}", session_id, e);
        }

        let mut context = Vec::with_capacity(selected.len() + 1);
        if let Some(summary) = summary_message {
            context.push(summary);
        }
        context.extend(
            state
                .messages
                .iter()
                .filter(|m| selected.contains(&m.id))
                .map(|m| Message {
                    role: m.role,
                    content: m.content.clone(),
                }),
        );

        Ok(context)
    }

    /// Rank live messages against a query, best first. Semantic hits must
    /// clear the similarity floor; when none do, a keyword scan runs as an
    /// explicitly tagged fallback rather than a disguised semantic result.
    pub fn search_messages(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let handle = self.handle(session_id)?;
        let mut state = handle.write().unwrap();
        self.ensure_present(session_id)?;

        if limit == 0 || state.messages.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let query_vector = self.embeddings.embed(query);
        self.ensure_embeddings(session_id, &mut state);

        let mut hits: Vec<(i64, f32, SearchSource)> = state
            .messages
            .iter()
            .filter_map(|m| {
                let similarity = m
                    .embedding
                    .as_ref()
                    .map(|v| self.embeddings.similarity(&query_vector, v))
                    .unwrap_or(0.0);
                if similarity > 0.0 && similarity >= self.config.similarity_floor {
                    Some((m.id, similarity, SearchSource::Semantic))
                } else {
                    None
                }
            })
            .collect();

        if hits.is_empty() {
            let keywords = TextUtils::extract_keywords(query);
            if !keywords.is_empty() {
                debug!(
                    "No semantic hits above floor {} in {}; falling back to keyword scan",
                    self.config.similarity_floor, session_id
                );
                hits = state
                    .messages
                    .iter()
                    .filter_map(|m| {
                        let content = m.content.to_lowercase();
                        let matched = keywords.iter().filter(|k| content.contains(*k)).count();
                        if matched > 0 {
                            Some((
                                m.id,
                                matched as f32 / keywords.len() as f32,
                                SearchSource::Keyword,
                            ))
                        } else {
                            None
                        }
                    })
                    .collect();
            }
        }

        let by_id: HashMap<i64, (DateTime<Utc>, i64)> = state
            .messages
            .iter()
            .map(|m| (m.id, (m.timestamp, m.id)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| by_id[&b.0].cmp(&by_id[&a.0]))
        });
        hits.truncate(limit);

        let hit_ids: HashSet<i64> = hits.iter().map(|(id, _, _)| *id).collect();
        let mut access_updates = Vec::with_capacity(hit_ids.len());
        for m in state.messages.iter_mut().filter(|m| hit_ids.contains(&m.id)) {
            m.access_count += 1;
            m.last_accessed = now;
            access_updates.push((m.id, m.access_count, now));
        }
        state.record.last_accessed = now;
        if let Err(e) =
            self.database
                .conversations
                .update_message_access(session_id, &access_updates, now)
        {
            warn!("Failed to persist access stats for {}: {}", session_id, e);
        }

        let results = hits
            .into_iter()
            .filter_map(|(id, similarity, source)| {
                state
                    .messages
                    .iter()
                    .find(|m| m.id == id)
                    .map(|m| SearchResult {
                        message: m.clone(),
                        similarity,
                        source,
                    })
            })
            .collect();

        Ok(results)
    }

    /// Read-only aggregate snapshot of one session.
    pub fn get_session_info(&self, session_id: &str) -> Result<SessionRecord> {
        let handle = self.handle(session_id)?;
        let state = handle.read().unwrap();
        self.ensure_present(session_id)?;
        Ok(state.record.clone())
    }

    /// Session snapshots, most recently accessed first, optionally scoped to
    /// one user. Administrative view; does not count as access.
    pub fn list_sessions(&self, user_id: Option<&str>) -> Vec<SessionRecord> {
        let mut records: Vec<SessionRecord> = self
            .session_handles()
            .into_iter()
            .map(|(_, handle)| handle.read().unwrap().record.clone())
            .filter(|record| user_id.map_or(true, |u| record.user_id == u))
            .collect();
        records.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        records
    }

    /// On-demand digest of the current live tail. Does not evict anything.
    pub fn summarize_session(&self, session_id: &str) -> Result<String> {
        let handle = self.handle(session_id)?;
        let state = handle.read().unwrap();
        self.ensure_present(session_id)?;
        Ok(self.summarizer.summarize(&state.messages))
    }

    pub fn stats(&self) -> MemoryStats {
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.session_ttl_seconds);
        let mut session_count = 0usize;
        let mut message_count = 0usize;
        let mut token_count = 0i64;
        let mut active_sessions = 0usize;

        for (_, handle) in self.session_handles() {
            let state = handle.read().unwrap();
            session_count += 1;
            message_count += state.messages.len();
            token_count += state.record.total_tokens;
            if now.signed_duration_since(state.record.last_accessed) <= ttl {
                active_sessions += 1;
            }
        }

        let database = self.database.get_stats().unwrap_or_else(|e| {
            warn!("Failed to read database stats: {}", e);
            Default::default()
        });

        MemoryStats {
            session_count,
            message_count,
            token_count,
            active_sessions,
            database,
        }
    }

    // -- snapshots, import, retention -------------------------------------

    /// Consistent copy of one session under a short read lock.
    pub fn snapshot_session(
        &self,
        session_id: &str,
    ) -> Result<(SessionRecord, Vec<StoredMessage>)> {
        let handle = self.handle(session_id)?;
        let state = handle.read().unwrap();
        self.ensure_present(session_id)?;
        Ok((state.record.clone(), state.messages.clone()))
    }

    /// Copy of every live session. Each session is locked only long enough
    /// to clone it; readers and writers of other sessions are never blocked.
    pub fn snapshot_all(&self) -> Vec<(SessionRecord, Vec<StoredMessage>)> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(snapshot) = self.snapshot_session(&id) {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Install an imported session, replacing any session with the same id.
    /// Aggregates are recomputed from the message list so a tampered artifact
    /// cannot install inconsistent counts.
    pub fn import_session(
        &self,
        mut record: SessionRecord,
        mut messages: Vec<StoredMessage>,
    ) -> Result<String> {
        let mut index = self.user_index.lock().unwrap();

        if self.sessions.contains_key(&record.session_id) {
            self.delete_session_locked(&record.session_id, &mut index)?;
        }

        messages.sort_by_key(|m| m.id);
        for message in messages.iter_mut() {
            message.session_id = record.session_id.clone();
            message.embedding = None;
        }

        let message_count = messages.len() as i64;
        let total_tokens: i64 = messages.iter().map(|m| m.tokens).sum();
        if record.message_count != message_count || record.total_tokens != total_tokens {
            warn!(
                "Imported aggregates for {} disagreed with messages; recomputed",
                record.session_id
            );
            record.message_count = message_count;
            record.total_tokens = total_tokens;
        }

        let next_message_id = messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        let session_id = record.session_id.clone();

        index
            .entry(record.user_id.clone())
            .or_default()
            .push(session_id.clone());
        self.sessions.insert(
            session_id.clone(),
            Arc::new(RwLock::new(SessionState {
                record: record.clone(),
                messages: messages.clone(),
                next_message_id,
                pending_evicted: Vec::new(),
            })),
        );

        self.persist_with_retries("import_session", || {
            self.database
                .conversations
                .persist_replace_session(&record, &messages)
        })?;

        Ok(session_id)
    }

    /// Delete every session inactive beyond the TTL. Idempotent: a second
    /// sweep with no new activity deletes nothing. Each deletion goes through
    /// the normal locking discipline, so an in-flight mutation is never
    /// interrupted.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(self.config.session_ttl_seconds);

        let expired: Vec<String> = self
            .session_handles()
            .into_iter()
            .filter(|(_, handle)| handle.read().unwrap().record.last_accessed < cutoff)
            .map(|(id, _)| id)
            .collect();

        if expired.is_empty() {
            debug!("Retention sweep found no expired sessions");
            return 0;
        }

        let mut index = self.user_index.lock().unwrap();
        let mut deleted = 0usize;
        for session_id in expired {
            // Re-check under the deletion discipline; the session may have
            // been touched since the scan.
            let still_expired = match self.sessions.get(&session_id).map(|e| e.value().clone()) {
                Some(handle) => handle.read().unwrap().record.last_accessed < cutoff,
                None => false,
            };
            if !still_expired {
                continue;
            }
            match self.delete_session_locked(&session_id, &mut index) {
                Ok(()) => deleted += 1,
                Err(MemoryError::SessionNotFound { .. }) => {}
                Err(e) => warn!("Retention sweep could not delete {}: {}", session_id, e),
            }
        }
        drop(index);

        if deleted > 0 {
            info!("Retention sweep deleted {} expired sessions", deleted);
            if let Err(e) = self.database.run_maintenance() {
                warn!("Post-sweep maintenance failed: {}", e);
            }
        }
        deleted
    }

    // -- internals ---------------------------------------------------------

    /// Clone out every (id, handle) pair before touching any session lock.
    /// Session locks are never acquired while a map shard is held.
    fn session_handles(&self) -> Vec<(String, Arc<RwLock<SessionState>>)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn handle(&self, session_id: &str) -> Result<Arc<RwLock<SessionState>>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MemoryError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Re-validate existence after acquiring a session lock; a concurrent
    /// delete may have removed the session while we waited.
    fn ensure_present(&self, session_id: &str) -> Result<()> {
        if self.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(MemoryError::SessionNotFound {
                session_id: session_id.to_string(),
            })
        }
    }

    fn least_recently_accessed(&self, session_ids: &[String]) -> Option<String> {
        session_ids
            .iter()
            .filter_map(|id| {
                let handle = self.sessions.get(id).map(|entry| entry.value().clone())?;
                let last_accessed = handle.read().unwrap().record.last_accessed;
                Some((id.clone(), last_accessed))
            })
            .min_by_key(|(_, last_accessed)| *last_accessed)
            .map(|(id, _)| id)
    }

    /// Lazily compute and cache embeddings for messages that lack one,
    /// persisting the derived vectors best-effort.
    fn ensure_embeddings(&self, session_id: &str, state: &mut SessionState) {
        for message in state.messages.iter_mut().filter(|m| m.embedding.is_none()) {
            let vector = self.embeddings.embed(&message.content);
            if let Err(e) =
                self.database
                    .conversations
                    .set_message_embedding(session_id, message.id, &vector)
            {
                warn!(
                    "Failed to persist embedding for message {} in {}: {}",
                    message.id, session_id, e
                );
            }
            message.embedding = Some(vector);
        }
    }

    fn persist_with_retries<F>(&self, what: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> anyhow::Result<()>,
    {
        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 1..=self.config.persist_retries {
            match op() {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("{} persisted after {} attempts", what, attempt);
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Durable write for {} failed (attempt {}/{}): {}",
                        what, attempt, self.config.persist_retries, e
                    );
                    last_error = Some(e);
                }
            }
        }
        error!(
            "Durable write for {} exhausted retries; in-memory state remains authoritative",
            what
        );
        Err(MemoryError::Persistence(format!(
            "{}: {}",
            what,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
