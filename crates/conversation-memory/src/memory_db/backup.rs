//! Point-in-time backup and per-session export artifacts.
//!
//! Artifacts are self-describing JSON documents tagged with a schema version
//! and creation time; they carry everything needed to rebuild a session
//! without loss (cached embeddings excluded — they are derived data and are
//! re-computed lazily after import).

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::{SessionRecord, StoredMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

/// Version tag written into every artifact. Bump on layout changes.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// One exported session: record plus its ordered message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub session: SessionRecord,
    pub messages: Vec<StoredMessage>,
}

/// Full point-in-time snapshot of every live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub sessions: Vec<SessionExport>,
}

pub fn write_backup(
    path: &Path,
    snapshots: Vec<(SessionRecord, Vec<StoredMessage>)>,
) -> Result<()> {
    let created_at = Utc::now();
    let document = BackupDocument {
        schema_version: ARTIFACT_SCHEMA_VERSION,
        created_at,
        sessions: snapshots
            .into_iter()
            .map(|(session, messages)| SessionExport {
                schema_version: ARTIFACT_SCHEMA_VERSION,
                exported_at: created_at,
                session,
                messages,
            })
            .collect(),
    };

    write_document(path, &document)?;
    info!(
        "Wrote backup of {} sessions to {}",
        document.sessions.len(),
        path.display()
    );
    Ok(())
}

pub fn read_backup(path: &Path) -> Result<BackupDocument> {
    let document: BackupDocument = read_document(path)?;
    check_version(document.schema_version, path)?;
    Ok(document)
}

pub fn write_session_export(
    path: &Path,
    session: SessionRecord,
    messages: Vec<StoredMessage>,
) -> Result<()> {
    let export = SessionExport {
        schema_version: ARTIFACT_SCHEMA_VERSION,
        exported_at: Utc::now(),
        session,
        messages,
    };
    write_document(path, &export)?;
    info!("Exported session {} to {}", export.session.session_id, path.display());
    Ok(())
}

pub fn read_session_export(path: &Path) -> Result<SessionExport> {
    let export: SessionExport = read_document(path)?;
    check_version(export.schema_version, path)?;
    Ok(export)
}

fn check_version(found: u32, path: &Path) -> Result<()> {
    if found != ARTIFACT_SCHEMA_VERSION {
        return Err(MemoryError::Serialization(format!(
            "unsupported artifact schema version {} in {} (expected {})",
            found,
            path.display(),
            ARTIFACT_SCHEMA_VERSION
        )));
    }
    Ok(())
}

fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| MemoryError::Serialization(format!("create {}: {}", parent.display(), e)))?;
    }
    let file = File::create(path)
        .map_err(|e| MemoryError::Serialization(format!("create {}: {}", path.display(), e)))?;
    serde_json::to_writer_pretty(BufWriter::new(file), document)
        .map_err(|e| MemoryError::Serialization(format!("write {}: {}", path.display(), e)))
}

fn read_document<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| MemoryError::Serialization(format!("open {}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| MemoryError::Serialization(format!("parse {}: {}", path.display(), e)))
}
