/// End-to-end tests for the codemem pipeline.
///
/// Tests the complete flow:
///   Project → Indexer → HybridStore (graph + semantic index) → Impact
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use codemem::Error;
use codemem::embedder::hash::HashEmbedder;
use codemem::fingerprint::hash_content;
use codemem::graph::Direction;
use codemem::impact::ImpactAnalyzer;
use codemem::indexer::{Indexer, SyncStats};
use codemem::models::{CodeChunk, RelationType, Relationship, SymbolType, symbol_id};
use codemem::project::Project;
use codemem::store::HybridStore;
use tempfile::tempdir;

const A_PY: &str = "\"\"\"Math helpers.\"\"\"\n\n\ndef f(x):\n    \"\"\"Double x.\"\"\"\n    return x * 2\n";
const B_PY: &str = "from a import f\n\n\ndef g(y):\n    return f(y) + 1\n";

fn write_ab(root: &Path) {
    fs::write(root.join("a.py"), A_PY).unwrap();
    fs::write(root.join("b.py"), B_PY).unwrap();
}

fn open(root: &Path) -> Indexer {
    Indexer::open(Project::init(root).unwrap()).unwrap()
}

fn ids_of_file_chunks(indexer: &Indexer, file: &str) -> BTreeSet<String> {
    indexer
        .store()
        .semantic_index()
        .get_chunks_by_file(file)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect()
}

fn ids_of_file_nodes(indexer: &Indexer, file: &str) -> BTreeSet<String> {
    indexer
        .store()
        .graph()
        .get_nodes_by_file(file)
        .into_iter()
        .map(|n| n.id.clone())
        .collect()
}

/// a.py defines f, b.py's g calls f: dependents and impact line up.
#[test]
fn test_dependents_and_impact() {
    let dir = tempdir().unwrap();
    write_ab(dir.path());
    let mut indexer = open(dir.path());
    let stats = indexer.full_sync().unwrap();
    assert_eq!(stats.files_indexed, 2);

    let store = indexer.store();
    assert_eq!(
        store.get_dependents("function:a.py:f", 1),
        vec!["function:b.py:g".to_string()]
    );

    let result = ImpactAnalyzer::new(store).analyze_files(&["a.py"], 3);
    assert_eq!(result.affected_files, vec!["b.py".to_string()]);
    assert_eq!(result.directly_affected, vec!["function:b.py:g".to_string()]);
    assert!(result.transitively_affected.is_empty());
    assert!(result.changed_symbols.contains(&"function:a.py:f".to_string()));

    let info = store.get_symbol_info("f", Some("a.py")).unwrap().unwrap();
    assert_eq!(info.docstring.as_deref(), Some("Double x."));
    assert_eq!(info.signature.as_deref(), Some("def f(x)"));
    assert_eq!(info.called_by.len(), 1);
    assert_eq!(info.called_by[0].source_id, "function:b.py:g");
}

/// Deleting a file from disk removes it on the next incremental sync.
#[test]
fn test_deleted_file_is_dropped() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_ab(root);
    let mut indexer = open(root);
    indexer.full_sync().unwrap();

    fs::remove_file(root.join("a.py")).unwrap();
    let stats = indexer.incremental_sync().unwrap();

    assert_eq!(stats.deleted_files, 1);
    assert_eq!(stats.files_skipped, 1);
    assert!(indexer.fingerprints().get("a.py").is_none());
    assert!(indexer.store().graph().get_nodes_by_file("a.py").is_empty());
    assert!(ids_of_file_chunks(&indexer, "a.py").is_empty());

    // Reopening from disk sees the same state.
    drop(indexer);
    let reopened = Indexer::open(Project::open(root).unwrap()).unwrap();
    assert!(reopened.fingerprints().get("a.py").is_none());
    assert!(reopened.store().graph().get_nodes_by_file("a.py").is_empty());
}

/// b.py is indexed before a.py exists: its call edge dangles, queries keep
/// working, and the edge resolves once a.py shows up.
#[test]
fn test_dangling_reference_resolves_later() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("b.py"), B_PY).unwrap();
    let mut indexer = open(root);
    indexer.full_sync().unwrap();

    let store = indexer.store();
    assert!(!store.graph().has_node("function:a.py:f"));
    assert_eq!(
        store.get_dependencies("function:b.py:g", 1),
        vec!["function:a.py:f".to_string()]
    );
    assert!(store.search("double f", 5, true, None).is_ok());
    let result = ImpactAnalyzer::new(store).analyze_files(&["b.py"], 3);
    assert!(result.affected_files.is_empty());

    fs::write(root.join("a.py"), A_PY).unwrap();
    let stats = indexer.incremental_sync().unwrap();
    assert_eq!(stats.files_indexed, 1);
    assert_eq!(stats.files_skipped, 1);

    let graph = indexer.store().graph();
    assert!(graph.has_node("function:a.py:f"));
    let callers = graph.get_relationships(
        "function:a.py:f",
        Direction::Incoming,
        &[RelationType::Calls],
    );
    assert_eq!(callers.len(), 1);
    assert!(graph.has_node(&callers[0].source_id));
}

/// An unchanged tree syncs with zero writes and identical contents.
#[test]
fn test_idempotent_reindex() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_ab(root);
    fs::write(root.join("NOTES.md"), "# Notes\n\nSee a.py\n\n## More\n\ntext\n").unwrap();
    let mut indexer = open(root);
    indexer.full_sync().unwrap();

    let stats_before = indexer.store().get_statistics().unwrap();
    let chunks_before = ids_of_file_chunks(&indexer, "NOTES.md");

    let stats = indexer.incremental_sync().unwrap();
    assert_eq!(
        stats,
        SyncStats {
            files_skipped: 3,
            ..SyncStats::default()
        }
    );
    assert_eq!(indexer.store().get_statistics().unwrap(), stats_before);
    assert_eq!(ids_of_file_chunks(&indexer, "NOTES.md"), chunks_before);
    assert_eq!(chunks_before.len(), 2);
}

/// Chunk ids and node ids agree for every indexed file.
#[test]
fn test_chunk_node_bijection() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_ab(root);
    fs::create_dir_all(root.join("pkg")).unwrap();
    fs::write(
        root.join("pkg/shapes.py"),
        "class Base:\n    def area(self):\n        return 0\n\n\nclass Square(Base):\n    def area(self):\n        return self.side ** 2\n",
    )
    .unwrap();
    fs::write(root.join("config.json"), "{\"debug\": true}\n").unwrap();
    let mut indexer = open(root);
    indexer.full_sync().unwrap();

    let files = indexer.store().semantic_index().file_paths().unwrap();
    assert_eq!(files.len(), 4);
    for file in &files {
        assert_eq!(
            ids_of_file_chunks(&indexer, file),
            ids_of_file_nodes(&indexer, file),
            "mismatch for {file}"
        );
    }

    let graph = indexer.store().graph();
    assert!(graph.has_node("method:pkg/shapes.py:Square.area"));
    let bases = graph.get_relationships(
        "class:pkg/shapes.py:Square",
        Direction::Outgoing,
        &[RelationType::Inherits],
    );
    assert!(bases.iter().any(|r| r.target_id == "class:pkg/shapes.py:Base"));
}

fn function_chunk(file: &str, name: &str) -> CodeChunk {
    let content = format!("def {name}():\n    pass");
    CodeChunk {
        id: symbol_id(SymbolType::Function, file, name, None),
        file_path: file.to_string(),
        language: "python".to_string(),
        symbol_name: Some(name.to_string()),
        symbol_type: SymbolType::Function,
        line_start: 1,
        line_end: 2,
        content_hash: hash_content(&content),
        content,
        docstring: None,
        signature: Some(format!("def {name}()")),
        parent_symbol: None,
        last_indexed: Utc::now(),
    }
}

/// Removing a file leaves no chunks, nodes or outgoing edges behind.
#[test]
fn test_cascade_delete() {
    let mut store = HybridStore::in_memory(Arc::new(HashEmbedder::new(64))).unwrap();
    let f = function_chunk("a.py", "f");
    let g = function_chunk("b.py", "g");
    store
        .index_chunks(
            &[f.clone(), g.clone()],
            &[
                Relationship::new(&g.id, &f.id, RelationType::Calls),
                Relationship::new(&f.id, "module:os", RelationType::Imports),
                Relationship::new("file:a.py", &f.id, RelationType::Contains),
            ],
        )
        .unwrap();

    let removed = store.remove_file("a.py").unwrap();
    assert_eq!(removed, 1);
    assert!(store.semantic_index().get_chunks_by_file("a.py").unwrap().is_empty());
    assert!(store.graph().get_nodes_by_file("a.py").is_empty());
    assert!(
        store
            .graph()
            .relationships()
            .all(|r| r.source_id != f.id && r.source_id != "file:a.py")
    );
    // The edge from b.py stays as a dangling reference.
    assert_eq!(store.get_dependencies(&g.id, 1), vec![f.id.clone()]);
}

/// A second sync cannot start while one holds the project lock.
#[test]
fn test_lock_contention() {
    let dir = tempdir().unwrap();
    write_ab(dir.path());
    let project = Project::init(dir.path()).unwrap();
    let mut indexer = Indexer::open(project.clone()).unwrap();

    {
        let _held = project.lock().unwrap();
        match indexer.incremental_sync() {
            Err(Error::Locked(path)) => assert_eq!(path, project.lock_path()),
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    // Released on drop.
    assert_eq!(indexer.incremental_sync().unwrap().files_indexed, 2);
    assert!(!project.lock_path().exists());
}

/// A lock left by a sync that died without cleaning up does not block
/// later syncs.
#[cfg(unix)]
#[test]
fn test_stale_lock_is_recovered() {
    let dir = tempdir().unwrap();
    write_ab(dir.path());
    let project = Project::init(dir.path()).unwrap();
    fs::write(project.lock_path(), "999999999\n").unwrap();

    let mut indexer = Indexer::open(project.clone()).unwrap();
    assert_eq!(indexer.incremental_sync().unwrap().files_indexed, 2);
    assert!(!project.lock_path().exists());
}

/// Project init, config defaults and file selection.
#[test]
fn test_project_selection() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_ab(root);
    fs::create_dir_all(root.join("node_modules/lib")).unwrap();
    fs::write(root.join("node_modules/lib/index.js"), "x()\n").unwrap();
    fs::write(root.join("image.png"), [0u8; 4]).unwrap();
    fs::write(root.join(".codememignore"), "b.py\n").unwrap();

    assert!(matches!(Project::open(root), Err(Error::ProjectNotFound(_))));
    let project = Project::init(root).unwrap();
    assert_eq!(project.iter_files().unwrap(), vec!["a.py".to_string()]);
    assert!(project.config_path().exists());
}
