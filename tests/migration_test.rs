use memorymesh::store::{MemoryStore, Store};
use tempfile::TempDir;

const V1_SCHEMA: &str = r#"
    CREATE TABLE memories (
        id             TEXT PRIMARY KEY,
        text           TEXT    NOT NULL,
        metadata_json  TEXT    NOT NULL DEFAULT '{}',
        embedding_blob BLOB,
        created_at     TEXT    NOT NULL,
        updated_at     TEXT    NOT NULL,
        access_count   INTEGER NOT NULL DEFAULT 0,
        importance     REAL    NOT NULL DEFAULT 0.5,
        decay_rate     REAL    NOT NULL DEFAULT 0.01
    );
    CREATE INDEX idx_memories_importance ON memories (importance DESC);
    CREATE INDEX idx_memories_updated_at ON memories (updated_at DESC);
"#;

fn write_v1_database(path: &std::path::Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(V1_SCHEMA).unwrap();
    conn.pragma_update(None, "user_version", 1u32).unwrap();
    conn.execute(
        "INSERT INTO memories (id, text, metadata_json, created_at, updated_at, importance) \
         VALUES ('aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa', 'a pre-session memory', '{}', \
                 '2025-06-01T12:00:00Z', '2025-06-01T12:00:00Z', 0.7)",
        [],
    )
    .unwrap();
}

#[test]
fn v1_file_upgrades_to_v2_preserving_rows() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("memories.db");
    write_v1_database(&db_path);

    let store = MemoryStore::open(&db_path).unwrap();
    assert_eq!(store.schema_version(), 2);

    // Existing rows survive with a NULL session_id.
    let old = store
        .get("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        .unwrap()
        .unwrap();
    assert_eq!(old.text, "a pre-session memory");
    assert!(old.session_id.is_none());
    assert!((old.importance - 0.7).abs() < 1e-9);

    // New rows may carry sessions.
    let mut mem = memorymesh::Memory::new("a post-upgrade memory").unwrap();
    mem.session_id = Some("s1".into());
    store.save(&mem).unwrap();
    assert_eq!(store.get_by_session("s1", 10).unwrap().len(), 1);
}

#[test]
fn upgrade_is_idempotent_across_reopens() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("memories.db");
    write_v1_database(&db_path);

    let first = MemoryStore::open(&db_path).unwrap();
    let v1 = first.schema_version();
    drop(first);

    let second = MemoryStore::open(&db_path).unwrap();
    assert_eq!(second.schema_version(), v1);
    assert_eq!(second.count().unwrap(), 1);
}

#[test]
fn future_stamped_database_is_refused() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("memories.db");
    write_v1_database(&db_path);
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.pragma_update(None, "user_version", 42u32).unwrap();
    }

    let err = MemoryStore::open(&db_path).unwrap_err();
    assert!(matches!(
        err,
        memorymesh::MeshError::SchemaMismatch { found: 42, .. }
    ));
}

#[test]
fn unstamped_legacy_database_is_adopted() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("memories.db");
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(V1_SCHEMA).unwrap();
        // No version stamp at all: created before the migration system.
    }

    let store = MemoryStore::open(&db_path).unwrap();
    assert_eq!(store.schema_version(), 2);
}
