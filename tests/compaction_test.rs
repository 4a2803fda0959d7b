mod helpers;

use helpers::test_mesh;
use memorymesh::{MemoryMesh, MeshOptions, RememberOptions, Scope};
use tempfile::TempDir;

#[test]
fn compact_merges_near_duplicates_in_one_scope() {
    let dir = TempDir::new().unwrap();
    let mesh = test_mesh(&dir, "none");

    mesh.remember(
        "the build pipeline caches dependencies between runs",
        RememberOptions {
            scope: Some(Scope::Project),
            importance: Some(0.9),
            ..Default::default()
        },
    )
    .unwrap();
    mesh.remember(
        "the build pipeline caches dependencies between runs",
        RememberOptions {
            scope: Some(Scope::Project),
            importance: Some(0.2),
            ..Default::default()
        },
    )
    .unwrap();
    mesh.remember(
        "the build pipeline caches dependencies between runs",
        RememberOptions {
            scope: Some(Scope::Global),
            ..Default::default()
        },
    )
    .unwrap();

    let result = mesh.compact(Scope::Project, 0.85, false).unwrap();
    assert_eq!(result.merged_count, 1);
    assert_eq!(mesh.count(Some(Scope::Project)).unwrap(), 1);
    // Compaction never crosses stores.
    assert_eq!(mesh.count(Some(Scope::Global)).unwrap(), 1);

    // The survivor kept the higher importance.
    let survivor = mesh.list(10, 0, Some(Scope::Project)).unwrap();
    assert!((survivor[0].importance - 0.9).abs() < 1e-9);
}

#[test]
fn dry_run_reports_plan_without_changes() {
    let dir = TempDir::new().unwrap();
    let mesh = test_mesh(&dir, "none");

    for _ in 0..2 {
        mesh.remember(
            "identical content for the dry run check",
            RememberOptions {
                scope: Some(Scope::Project),
                ..Default::default()
            },
        )
        .unwrap();
    }

    let result = mesh.compact(Scope::Project, 0.85, true).unwrap();
    assert_eq!(result.merged_count, 1);
    assert_eq!(result.deleted_ids.len(), 1);
    assert_eq!(mesh.count(Some(Scope::Project)).unwrap(), 2);
}

#[test]
fn compact_project_without_store_errors() {
    let dir = TempDir::new().unwrap();
    let mesh = MemoryMesh::open(helpers::global_only_options(&dir, "none")).unwrap();
    let err = mesh.compact(Scope::Project, 0.85, false).unwrap_err();
    assert!(matches!(err, memorymesh::MeshError::NoProjectStore));
}

#[test]
fn auto_compaction_runs_after_interval() {
    let dir = TempDir::new().unwrap();
    let mesh = MemoryMesh::open(MeshOptions {
        compact_interval: 3,
        ..helpers::options(&dir, "none")
    })
    .unwrap();

    for _ in 0..3 {
        mesh.remember(
            "repeated sentence that should be merged automatically",
            RememberOptions {
                scope: Some(Scope::Project),
                ..Default::default()
            },
        )
        .unwrap();
    }

    // close() joins the background compaction pass.
    mesh.close();
    assert!(mesh.count(Some(Scope::Project)).unwrap() < 3);
}

#[test]
fn merged_memory_accumulates_access_counts() {
    let dir = TempDir::new().unwrap();
    let mesh = test_mesh(&dir, "none");

    let keeper = mesh
        .remember(
            "merge target sentence with enough words",
            RememberOptions {
                scope: Some(Scope::Project),
                importance: Some(0.8),
                ..Default::default()
            },
        )
        .unwrap();
    mesh.remember(
        "merge target sentence with enough words",
        RememberOptions {
            scope: Some(Scope::Project),
            importance: Some(0.3),
            ..Default::default()
        },
    )
    .unwrap();

    // Recall both once so each carries an access count.
    mesh.recall(
        "merge target sentence",
        memorymesh::RecallOptions {
            k: 10,
            scope: Some(Scope::Project),
            ..Default::default()
        },
    )
    .unwrap();

    mesh.compact(Scope::Project, 0.85, false).unwrap();
    let survivor = mesh.get(&keeper).unwrap().unwrap();
    assert_eq!(survivor.access_count, 2);
}
