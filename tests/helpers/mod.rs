#![allow(dead_code)]

use memorymesh::{MemoryMesh, MeshOptions};
use tempfile::TempDir;

/// Open a mesh with both stores inside a temp directory.
///
/// Auto-compaction is disabled so tests control exactly when merges run.
pub fn test_mesh(dir: &TempDir, provider: &str) -> MemoryMesh {
    MemoryMesh::open(options(dir, provider)).unwrap()
}

/// Options pointing both stores into `dir`, with a chosen provider.
pub fn options(dir: &TempDir, provider: &str) -> MeshOptions {
    MeshOptions {
        project_path: Some(dir.path().join("project").join(".memorymesh").join("memories.db")),
        global_path: Some(dir.path().join("global.db")),
        embedding_provider: provider.into(),
        compact_interval: 0,
        ..Default::default()
    }
}

/// Options for a global-only mesh (no project store).
pub fn global_only_options(dir: &TempDir, provider: &str) -> MeshOptions {
    MeshOptions {
        project_path: None,
        global_path: Some(dir.path().join("global.db")),
        embedding_provider: provider.into(),
        compact_interval: 0,
        ..Default::default()
    }
}
