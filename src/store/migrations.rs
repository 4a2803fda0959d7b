//! Forward-only schema migrations.
//!
//! Schema versions are tracked with SQLite's `PRAGMA user_version`.
//! Migrations are strictly additive — they add columns, tables, or indexes,
//! never drop or rename. Each step runs in its own transaction so a failed
//! migration leaves the version stamp untouched and the next open retries.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{MeshError, Result};

/// The schema version the current build expects.
pub const LATEST_VERSION: u32 = 2;

/// One migration step: DDL statements that bring the schema to `version`.
struct Migration {
    version: u32,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Full schema installed on a fresh database, already at [`LATEST_VERSION`].
const FULL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id             TEXT PRIMARY KEY,
    text           TEXT    NOT NULL,
    metadata_json  TEXT    NOT NULL DEFAULT '{}',
    embedding_blob BLOB,
    session_id     TEXT,
    created_at     TEXT    NOT NULL,
    updated_at     TEXT    NOT NULL,
    access_count   INTEGER NOT NULL DEFAULT 0,
    importance     REAL    NOT NULL DEFAULT 0.5,
    decay_rate     REAL    NOT NULL DEFAULT 0.01
);

CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories (importance DESC);
CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories (updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_memories_session ON memories (session_id);

CREATE TABLE IF NOT EXISTS mesh_meta (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
"#;

/// Incremental upgrades for databases created by older builds.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema",
        // Schema already exists for both fresh and pre-versioned databases.
        statements: &[],
    },
    Migration {
        version: 2,
        description: "session grouping and meta table",
        statements: &[
            "ALTER TABLE memories ADD COLUMN session_id TEXT",
            "CREATE INDEX IF NOT EXISTS idx_memories_session ON memories (session_id)",
            "CREATE TABLE IF NOT EXISTS mesh_meta (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
        ],
    },
];

/// Read the current schema version stamp.
pub fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Ensure the database schema is up to date. Returns the final version.
///
/// Handles three cases:
/// 1. Fresh database — install the full latest schema in one transaction and
///    stamp [`LATEST_VERSION`].
/// 2. Pre-versioned database (`memories` table present, stamp 0) — stamp as
///    version 1, then apply pending migrations.
/// 3. Previously migrated database — apply only migrations whose version
///    exceeds the stamp, each in its own transaction.
///
/// A database stamped newer than [`LATEST_VERSION`] is rejected with
/// `SchemaMismatch` so an old build never writes into a future schema.
pub fn ensure_schema(conn: &mut Connection) -> Result<u32> {
    let mut current = get_schema_version(conn)?;
    debug!(current, latest = LATEST_VERSION, "checking schema version");

    if current > LATEST_VERSION {
        return Err(MeshError::SchemaMismatch {
            found: current,
            supported: LATEST_VERSION,
        });
    }

    // Case 1: fresh database.
    if current == 0 && !table_exists(conn, "memories")? {
        debug!("fresh database, installing schema at v{LATEST_VERSION}");
        let tx = conn.transaction()?;
        tx.execute_batch(FULL_SCHEMA)?;
        tx.pragma_update(None, "user_version", LATEST_VERSION)?;
        tx.commit()?;
        return Ok(LATEST_VERSION);
    }

    // Case 2: pre-versioned database created before migrations existed.
    if current == 0 {
        debug!("pre-versioned database detected, stamping as v1");
        set_schema_version(conn, 1)?;
        current = 1;
    }

    // Case 3: apply pending migrations.
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        info!(
            from = current,
            to = migration.version,
            description = migration.description,
            "applying migration"
        );
        let tx = conn.transaction()?;
        for stmt in migration.statements {
            tx.execute_batch(stmt)?;
        }
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        current = migration.version;
    }

    Ok(current)
}
