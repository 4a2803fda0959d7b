//! SQLite persistence for memories.
//!
//! [`MemoryStore`] manages a single database file through an r2d2 connection
//! pool (one pooled connection per concurrent caller; SQLite's WAL journal
//! serialises the writers). [`EncryptedStore`](encrypted::EncryptedStore)
//! wraps it with field-level encryption. Both implement the full [`Store`]
//! contract so the orchestrator never cares which one it holds.

pub mod crypto;
pub mod encrypted;
pub mod migrations;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::categories::Category;
use crate::error::{MeshError, Result};
use crate::memory::{
    format_timestamp, pack_embedding, parse_timestamp, unpack_embedding, Memory, Metadata,
};

/// Maximum number of rows a single store will hold.
pub const MAX_ROWS: usize = 100_000;

/// Upper bound for embedding scans, to keep recall memory-bounded.
pub const MAX_SCAN_LIMIT: usize = 10_000;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const MEMORY_COLUMNS: &str = "id, text, metadata_json, embedding_blob, session_id, \
     created_at, updated_at, access_count, importance, decay_rate";

/// Pre-ranking filters for [`Store::search_filtered`].
#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    /// Match `metadata.category`.
    pub category: Option<Category>,
    /// Keep only memories at or above this importance.
    pub min_importance: Option<f64>,
    /// Keep only memories created inside this inclusive range.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Exact-match constraints on metadata values. Keys must match
    /// `^[A-Za-z_][A-Za-z0-9_]*$`; anything else fails with
    /// `InvalidArgument` before any SQL is built.
    pub metadata_filter: Option<Metadata>,
}

impl SearchFilter {
    /// True when at least one constraint is set.
    pub fn is_active(&self) -> bool {
        self.category.is_some()
            || self.min_importance.is_some()
            || self.time_range.is_some()
            || self.metadata_filter.as_ref().is_some_and(|m| !m.is_empty())
    }

    fn validate(&self) -> Result<()> {
        if let Some((start, end)) = &self.time_range {
            if start > end {
                return Err(MeshError::invalid(format!(
                    "time range start {start} is after end {end}"
                )));
            }
        }
        if let Some(meta) = &self.metadata_filter {
            for key in meta.keys() {
                if !IDENTIFIER_RE.is_match(key) {
                    return Err(MeshError::invalid(format!(
                        "metadata filter key {key:?} must match [A-Za-z_][A-Za-z0-9_]*"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Partial update for [`Store::update_fields`]. `id` and `created_at` are
/// immutable and therefore absent.
#[derive(Debug, Default, Clone)]
pub struct MemoryPatch {
    pub text: Option<String>,
    pub importance: Option<f64>,
    pub decay_rate: Option<f64>,
    pub metadata: Option<Metadata>,
    pub embedding: EmbeddingPatch,
    /// Override for the refreshed `updated_at`; defaults to now.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Tri-state embedding update: untouched, replaced, or cleared.
#[derive(Debug, Default, Clone)]
pub enum EmbeddingPatch {
    #[default]
    Keep,
    Set(Vec<f32>),
    Clear,
}

/// Summary row returned by [`Store::list_sessions`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub count: usize,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
    /// Filled in by the orchestrator when merging both stores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<crate::memory::Scope>,
}

/// The full storage contract shared by the plaintext and encrypted stores.
pub trait Store: Send + Sync {
    /// Resolved database file path.
    fn path(&self) -> &Path;

    /// Schema version stamped on the database at open time.
    fn schema_version(&self) -> u32;

    /// Validating insert-or-replace. An existing row with the same id is
    /// fully overwritten; a new row past the cap fails with
    /// `CapacityExceeded`.
    fn save(&self, memory: &Memory) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Memory>>;

    /// Returns `true` if a row was deleted.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Delete everything; returns the number of rows removed.
    fn clear(&self) -> Result<usize>;

    /// Partial update. Returns `false` when the id does not exist.
    fn update_fields(&self, id: &str, patch: MemoryPatch) -> Result<bool>;

    /// Bump `access_count` and refresh `updated_at`.
    fn update_access(&self, id: &str) -> Result<()>;

    /// Case-insensitive substring search over `text`, newest first.
    fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>>;

    /// Pre-filtered candidate retrieval, newest first.
    fn search_filtered(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<Memory>>;

    /// Rows that carry an embedding, bounded by `limit` (capped at
    /// [`MAX_SCAN_LIMIT`]), newest first.
    fn scan_with_embeddings(&self, limit: usize) -> Result<Vec<Memory>>;

    fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Memory>>;

    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Memory>>;

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>>;

    fn count(&self) -> Result<usize>;

    /// Oldest and newest `created_at`, or `None` for an empty store.
    fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>>;
}

/// Plaintext SQLite store. One instance per database file.
pub struct MemoryStore {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
    schema_version: u32,
}

impl MemoryStore {
    /// Open (or create) the database at `path`.
    ///
    /// Ensures the parent directory exists with owner-only permissions,
    /// resolves symlinks in the parent path, enables WAL mode, and runs any
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = resolve_db_path(path.as_ref())?;

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        });
        let pool = Pool::builder().max_size(8).build(manager)?;

        let schema_version = {
            let mut conn = pool.get()?;
            migrations::ensure_schema(&mut conn)?
        };

        restrict_file_mode(&path);

        debug!(path = %path.display(), schema_version, "store opened");
        Ok(Self {
            path,
            pool,
            schema_version,
        })
    }

    fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }

    /// Read a raw meta value (salt record, embedding dimension stamp).
    pub(crate) fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM mesh_meta WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a meta value, inserting or replacing.
    pub(crate) fn set_meta(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO mesh_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Enforce the embedding-dimension stamp: the first embedded write fixes
    /// the store's dimension, later writes must match it.
    fn check_embedding_dimension(&self, embedding: &[f32]) -> Result<()> {
        match self.get_meta("embedding_dim")? {
            Some(raw) => {
                let stamped: usize = String::from_utf8_lossy(&raw).parse().unwrap_or(0);
                if stamped != 0 && stamped != embedding.len() {
                    return Err(MeshError::invalid(format!(
                        "embedding has {} dimensions but this store holds {}-dimensional vectors",
                        embedding.len(),
                        stamped
                    )));
                }
                Ok(())
            }
            None => self.set_meta("embedding_dim", embedding.len().to_string().as_bytes()),
        }
    }

    fn row_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<u32> = conn
            .query_row("SELECT 1 FROM memories WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert-or-replace without plaintext validation. Used by the encrypted
    /// wrapper, which validates the plaintext before ciphertext inflates it
    /// past the size limits. Cap and embedding-dimension checks still apply.
    pub(crate) fn save_unchecked(&self, memory: &Memory) -> Result<()> {
        if let Some(emb) = &memory.embedding {
            if emb.iter().any(|v| !v.is_finite()) {
                return Err(MeshError::invalid(
                    "embedding contains NaN or infinite values",
                ));
            }
            self.check_embedding_dimension(emb)?;
        }
        if !self.row_exists(&memory.id)? && self.count()? >= MAX_ROWS {
            return Err(MeshError::CapacityExceeded(MAX_ROWS));
        }

        let mut clamped = memory.clone();
        clamped.clamp_ranges();

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO memories \
                (id, text, metadata_json, embedding_blob, session_id, \
                 created_at, updated_at, access_count, importance, decay_rate) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                clamped.id,
                clamped.text,
                serde_json::to_string(&clamped.metadata)?,
                clamped.embedding.as_deref().map(pack_embedding),
                clamped.session_id,
                format_timestamp(clamped.created_at),
                format_timestamp(clamped.updated_at),
                clamped.access_count,
                clamped.importance,
                clamped.decay_rate,
            ],
        )?;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn save(&self, memory: &Memory) -> Result<()> {
        memory.validate()?;
        self.save_unchecked(memory)
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                row_to_memory,
            )
            .optional()?;
        Ok(row)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn()?;
        let total: usize = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        conn.execute("DELETE FROM memories", [])?;
        Ok(total)
    }

    fn update_fields(&self, id: &str, patch: MemoryPatch) -> Result<bool> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(text) = &patch.text {
            if text.trim().is_empty() {
                return Err(MeshError::invalid("memory text must not be empty"));
            }
            sets.push("text = ?");
            values.push(text.clone().into());
        }
        if let Some(importance) = patch.importance {
            sets.push("importance = ?");
            values.push(importance.clamp(0.0, 1.0).into());
        }
        if let Some(decay_rate) = patch.decay_rate {
            sets.push("decay_rate = ?");
            values.push(decay_rate.max(0.0).into());
        }
        if let Some(metadata) = &patch.metadata {
            sets.push("metadata_json = ?");
            values.push(serde_json::to_string(metadata)?.into());
        }
        match &patch.embedding {
            EmbeddingPatch::Keep => {}
            EmbeddingPatch::Set(emb) => {
                if emb.iter().any(|v| !v.is_finite()) {
                    return Err(MeshError::invalid("embedding contains NaN or infinite values"));
                }
                self.check_embedding_dimension(emb)?;
                sets.push("embedding_blob = ?");
                values.push(pack_embedding(emb).into());
            }
            EmbeddingPatch::Clear => {
                sets.push("embedding_blob = NULL");
            }
        }

        if sets.is_empty() && patch.updated_at.is_none() {
            return self.row_exists(id);
        }

        sets.push("updated_at = ?");
        values.push(format_timestamp(patch.updated_at.unwrap_or_else(Utc::now)).into());
        values.push(id.to_string().into());

        let sql = format!("UPDATE memories SET {} WHERE id = ?", sets.join(", "));
        let conn = self.conn()?;
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }

    fn update_access(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE memories SET access_count = access_count + 1, updated_at = ?1 WHERE id = ?2",
            params![format_timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        // Escape LIKE wildcards so they match literally.
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE text LIKE ?1 ESCAPE '\\' \
             ORDER BY updated_at DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], row_to_memory)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn search_filtered(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<Memory>> {
        filter.validate()?;

        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(category) = filter.category {
            conditions.push("json_extract(metadata_json, '$.category') = ?".into());
            values.push(category.as_str().to_string().into());
        }
        if let Some(min_importance) = filter.min_importance {
            conditions.push("importance >= ?".into());
            values.push(min_importance.into());
        }
        if let Some((start, end)) = filter.time_range {
            conditions.push("created_at >= ? AND created_at <= ?".into());
            values.push(format_timestamp(start).into());
            values.push(format_timestamp(end).into());
        }
        if let Some(meta) = &filter.metadata_filter {
            for (key, value) in meta {
                // Keys were validated against the identifier regex above, so
                // interpolating them into the JSON path is safe.
                let path = format!("$.{key}");
                match value {
                    Value::String(s) => {
                        conditions.push(format!("json_extract(metadata_json, '{path}') = ?"));
                        values.push(s.clone().into());
                    }
                    Value::Bool(b) => {
                        conditions.push(format!("json_extract(metadata_json, '{path}') = ?"));
                        values.push((*b as i64).into());
                    }
                    Value::Number(n) => {
                        conditions.push(format!("json_extract(metadata_json, '{path}') = ?"));
                        values.push(n.as_f64().unwrap_or(0.0).into());
                    }
                    other => {
                        // Objects, arrays, null: compare canonical JSON text.
                        conditions.push(format!("json(json_extract(metadata_json, '{path}')) = json(?)"));
                        values.push(other.to_string().into());
                    }
                }
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        values.push((limit as i64).into());

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories {where_clause} \
             ORDER BY updated_at DESC LIMIT ?"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), row_to_memory)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn scan_with_embeddings(&self, limit: usize) -> Result<Vec<Memory>> {
        let limit = limit.min(MAX_SCAN_LIMIT);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE embedding_blob IS NOT NULL \
             ORDER BY updated_at DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_memory)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], row_to_memory)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE session_id = ?1 ORDER BY created_at ASC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![session_id, limit as i64], row_to_memory)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, COUNT(*), MIN(created_at), MAX(created_at) \
             FROM memories WHERE session_id IS NOT NULL \
             GROUP BY session_id ORDER BY MAX(created_at) DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(session_id, count, first, last)| {
                Ok(SessionSummary {
                    session_id,
                    count: count as usize,
                    first_at: parse_timestamp(&first)?,
                    last_at: parse_timestamp(&last)?,
                    scope: None,
                })
            })
            .collect()
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        Ok(total as usize)
    }

    fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let conn = self.conn()?;
        let row: (Option<String>, Option<String>) =
            conn.query_row("SELECT MIN(created_at), MAX(created_at) FROM memories", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })?;
        match row {
            (Some(oldest), Some(newest)) => {
                Ok(Some((parse_timestamp(&oldest)?, parse_timestamp(&newest)?)))
            }
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("path", &self.path)
            .field("schema_version", &self.schema_version)
            .finish()
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let metadata_json: String = row.get(2)?;
    let embedding_blob: Option<Vec<u8>> = row.get(3)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    let bad_column = |idx: usize, err: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
        )
    };

    Ok(Memory {
        id: row.get(0)?,
        text: row.get(1)?,
        metadata: serde_json::from_str(&metadata_json)
            .map_err(|e| bad_column(2, e.to_string()))?,
        embedding: embedding_blob.as_deref().map(unpack_embedding),
        session_id: row.get(4)?,
        created_at: parse_timestamp(&created_at).map_err(|e| bad_column(5, e.to_string()))?,
        updated_at: parse_timestamp(&updated_at).map_err(|e| bad_column(6, e.to_string()))?,
        access_count: row.get(7)?,
        importance: row.get(8)?,
        decay_rate: row.get(9)?,
        scope: None,
    })
}

/// Canonicalise the parent directory (defeating symlink traversal) and
/// create it with owner-only permissions.
fn resolve_db_path(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = path
        .file_name()
        .ok_or_else(|| MeshError::invalid(format!("database path {path:?} has no file name")))?;

    match parent {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            restrict_dir_mode(parent);
            let canonical = std::fs::canonicalize(parent)?;
            Ok(canonical.join(file_name))
        }
        None => Ok(PathBuf::from(file_name)),
    }
}

#[cfg(unix)]
fn restrict_dir_mode(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn restrict_dir_mode(_dir: &Path) {}

#[cfg(unix)]
fn restrict_file_mode(file: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if file.exists() {
        let _ = std::fs::set_permissions(file, std::fs::Permissions::from_mode(0o600));
    }
}

#[cfg(not(unix))]
fn restrict_file_mode(_file: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, MemoryStore) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(dir.path().join("memories.db")).unwrap();
        (dir, store)
    }

    fn sample(text: &str) -> Memory {
        Memory::new(text).unwrap()
    }

    #[test]
    fn save_and_get_roundtrip() {
        let (_dir, store) = test_store();
        let mut mem = sample("User prefers Python and dark mode");
        mem.metadata
            .insert("category".into(), Value::String("preference".into()));
        mem.embedding = Some(vec![0.1, 0.2, 0.3]);
        store.save(&mem).unwrap();

        let loaded = store.get(&mem.id).unwrap().unwrap();
        assert_eq!(loaded.text, mem.text);
        assert_eq!(loaded.embedding, mem.embedding);
        assert_eq!(loaded.metadata, mem.metadata);
        assert_eq!(loaded.access_count, 0);
    }

    #[test]
    fn get_missing_returns_none() {
        let (_dir, store) = test_store();
        assert!(store.get("deadbeefdeadbeefdeadbeefdeadbeef").unwrap().is_none());
    }

    #[test]
    fn delete_reports_existence() {
        let (_dir, store) = test_store();
        let mem = sample("to be deleted");
        store.save(&mem).unwrap();
        assert!(store.delete(&mem.id).unwrap());
        assert!(!store.delete(&mem.id).unwrap());
        assert!(store.get(&mem.id).unwrap().is_none());
    }

    #[test]
    fn clear_returns_row_count() {
        let (_dir, store) = test_store();
        for i in 0..3 {
            store.save(&sample(&format!("memory {i}"))).unwrap();
        }
        assert_eq!(store.clear().unwrap(), 3);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn search_by_text_is_case_insensitive_and_escapes_wildcards() {
        let (_dir, store) = test_store();
        store.save(&sample("The user PREFERS dark mode")).unwrap();
        store.save(&sample("100% coverage is a goal")).unwrap();

        let hits = store.search_by_text("prefers", 10).unwrap();
        assert_eq!(hits.len(), 1);

        // '%' must match literally, not as a wildcard.
        let hits = store.search_by_text("100%", 10).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store.search_by_text("0%c", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn filtered_search_by_category_and_importance() {
        let (_dir, store) = test_store();
        let mut a = sample("guardrail: never force push");
        a.metadata
            .insert("category".into(), Value::String("guardrail".into()));
        a.importance = 0.9;
        store.save(&a).unwrap();

        let mut b = sample("low importance note");
        b.importance = 0.1;
        store.save(&b).unwrap();

        let filter = SearchFilter {
            category: Some(Category::Guardrail),
            ..Default::default()
        };
        let hits = store.search_filtered(&filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);

        let filter = SearchFilter {
            min_importance: Some(0.5),
            ..Default::default()
        };
        let hits = store.search_filtered(&filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);
    }

    #[test]
    fn filtered_search_rejects_bad_metadata_key() {
        let (_dir, store) = test_store();
        let mut meta = Metadata::new();
        meta.insert("bad-key; DROP TABLE".into(), Value::Bool(true));
        let filter = SearchFilter {
            metadata_filter: Some(meta),
            ..Default::default()
        };
        let err = store.search_filtered(&filter, 10).unwrap_err();
        assert!(matches!(err, MeshError::InvalidArgument(_)));
    }

    #[test]
    fn filtered_search_rejects_inverted_time_range() {
        let (_dir, store) = test_store();
        let now = Utc::now();
        let filter = SearchFilter {
            time_range: Some((now, now - chrono::Duration::days(1))),
            ..Default::default()
        };
        assert!(matches!(
            store.search_filtered(&filter, 10).unwrap_err(),
            MeshError::InvalidArgument(_)
        ));
    }

    #[test]
    fn filtered_search_on_metadata_values() {
        let (_dir, store) = test_store();
        let mut a = sample("tagged memory");
        a.metadata.insert("project".into(), Value::String("mesh".into()));
        a.metadata.insert("pinned".into(), Value::Bool(true));
        store.save(&a).unwrap();
        store.save(&sample("untagged memory")).unwrap();

        let mut meta = Metadata::new();
        meta.insert("project".into(), Value::String("mesh".into()));
        meta.insert("pinned".into(), Value::Bool(true));
        let filter = SearchFilter {
            metadata_filter: Some(meta),
            ..Default::default()
        };
        let hits = store.search_filtered(&filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);
    }

    #[test]
    fn scan_with_embeddings_only_returns_embedded_rows() {
        let (_dir, store) = test_store();
        let mut with = sample("embedded");
        with.embedding = Some(vec![1.0, 0.0]);
        store.save(&with).unwrap();
        store.save(&sample("not embedded")).unwrap();

        let rows = store.scan_with_embeddings(100).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, with.id);
    }

    #[test]
    fn embedding_dimension_is_stamped_and_enforced() {
        let (_dir, store) = test_store();
        let mut first = sample("first embedded");
        first.embedding = Some(vec![0.0; 4]);
        store.save(&first).unwrap();

        let mut wrong = sample("wrong dimension");
        wrong.embedding = Some(vec![0.0; 8]);
        assert!(matches!(
            store.save(&wrong).unwrap_err(),
            MeshError::InvalidArgument(_)
        ));
    }

    #[test]
    fn update_fields_partial_and_missing() {
        let (_dir, store) = test_store();
        let mem = sample("original text");
        store.save(&mem).unwrap();

        let updated = store
            .update_fields(
                &mem.id,
                MemoryPatch {
                    text: Some("revised text".into()),
                    importance: Some(0.8),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated);

        let loaded = store.get(&mem.id).unwrap().unwrap();
        assert_eq!(loaded.text, "revised text");
        assert!((loaded.importance - 0.8).abs() < 1e-9);
        assert_eq!(loaded.created_at, mem.created_at);
        assert!(loaded.updated_at >= mem.updated_at);

        assert!(!store
            .update_fields("missing-id", MemoryPatch::default())
            .unwrap());
    }

    #[test]
    fn update_fields_can_clear_embedding() {
        let (_dir, store) = test_store();
        let mut mem = sample("embedded then cleared");
        mem.embedding = Some(vec![1.0, 2.0]);
        store.save(&mem).unwrap();

        store
            .update_fields(
                &mem.id,
                MemoryPatch {
                    embedding: EmbeddingPatch::Clear,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(store.get(&mem.id).unwrap().unwrap().embedding.is_none());
    }

    #[test]
    fn update_access_bumps_count_and_timestamp() {
        let (_dir, store) = test_store();
        let mem = sample("accessed memory");
        store.save(&mem).unwrap();

        store.update_access(&mem.id).unwrap();
        store.update_access(&mem.id).unwrap();

        let loaded = store.get(&mem.id).unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert!(loaded.updated_at >= mem.updated_at);
    }

    #[test]
    fn sessions_group_and_order() {
        let (_dir, store) = test_store();
        for (text, session) in [
            ("first in s1", Some("s1")),
            ("second in s1", Some("s1")),
            ("only in s2", Some("s2")),
            ("no session", None),
        ] {
            let mut mem = sample(text);
            mem.session_id = session.map(String::from);
            store.save(&mem).unwrap();
        }

        let s1 = store.get_by_session("s1", 100).unwrap();
        assert_eq!(s1.len(), 2);
        assert!(s1[0].created_at <= s1[1].created_at);

        let sessions = store.list_sessions(10).unwrap();
        assert_eq!(sessions.len(), 2);
        let by_id: std::collections::HashMap<_, _> = sessions
            .iter()
            .map(|s| (s.session_id.clone(), s.count))
            .collect();
        assert_eq!(by_id["s1"], 2);
        assert_eq!(by_id["s2"], 1);
    }

    #[test]
    fn time_range_empty_and_populated() {
        let (_dir, store) = test_store();
        assert!(store.time_range().unwrap().is_none());

        store.save(&sample("one")).unwrap();
        store.save(&sample("two")).unwrap();
        let (oldest, newest) = store.time_range().unwrap().unwrap();
        assert!(oldest <= newest);
    }

    #[test]
    fn identical_text_distinct_sessions_are_distinct_rows() {
        let (_dir, store) = test_store();
        let mut a = sample("same words");
        a.session_id = Some("s1".into());
        let mut b = sample("same words");
        b.session_id = Some("s2".into());
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn files_have_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let db_dir = dir.path().join(".memorymesh");
        let store = MemoryStore::open(db_dir.join("memories.db")).unwrap();
        store.save(&sample("perm check")).unwrap();

        let dir_mode = std::fs::metadata(&db_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        let file_mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
    }
}
