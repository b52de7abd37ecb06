//! Database migration system

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{error, info, warn};

use crate::memory_db::schema::{self, DatabaseStats};

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Initialize database with current schema, applying any pending
    /// migrations. Safe to call on every open; an up-to-date database is a
    /// no-op.
    pub fn initialize_database(&mut self) -> Result<()> {
        info!("Initializing memory database schema...");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        info!("Current database schema version: {}", current_version);

        self.apply_migrations(current_version)?;

        Ok(())
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version > current_version {
                info!("Applying migration {}...", version);

                let tx = self.conn.transaction()?;

                if let Err(e) = tx.execute_batch(migration_sql) {
                    error!("Failed to apply migration {}: {}", version, e);
                    return Err(e);
                }

                tx.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
                tx.commit()?;

                info!("Migration {} applied successfully", version);
            }
        }

        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .or_else(|_| Ok(0))
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }
}

/// All migration scripts, oldest first. Version 1 is the full current DDL;
/// later versions alter forward from there.
fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![(1, schema::SCHEMA_SQL)]
}

/// Get database statistics from a connection.
/// Read-only; safe to call concurrently with writers.
pub fn get_database_stats(conn: &Connection) -> Result<DatabaseStats> {
    fn get_table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| {
            row.get(0)
        })
        .or_else(|e| {
            warn!("Failed to get count from table {}: {}", table_name, e);
            Ok(0)
        })
    }

    let total_sessions = get_table_count(conn, "sessions")?;
    let total_messages = get_table_count(conn, "messages")?;

    let database_size_bytes: i64 = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(DatabaseStats {
        total_sessions,
        total_messages,
        database_size_bytes,
    })
}

/// Run database maintenance after a destructive sweep: reclaim space and
/// refresh the query planner's statistics.
pub fn run_maintenance(conn: &Connection) -> Result<()> {
    info!("Running database maintenance...");
    conn.execute_batch("ANALYZE")?;
    conn.execute_batch("VACUUM")?;
    info!("Database maintenance completed");
    Ok(())
}
