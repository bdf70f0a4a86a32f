#![forbid(unsafe_code)]

use cord_core::ids::NodeId;
use cord_core::model::{NodeKind, NodeStatus, Returns};
use cord_storage::{SqliteStore, StoreError};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("cord_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn open(test_name: &str) -> SqliteStore {
    SqliteStore::open(temp_dir(test_name)).expect("open store")
}

fn task(store: &mut SqliteStore, parent: NodeId, goal: &str) -> NodeId {
    store
        .create_child(parent, NodeKind::Task, goal, None, Returns::Text, &[], None)
        .expect("create task")
}

fn run_to_complete(store: &mut SqliteStore, id: NodeId, result: &str) {
    store
        .transition(id, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate");
    store
        .transition(id, NodeStatus::Active, NodeStatus::Complete, Some(result))
        .expect("complete");
}

#[test]
fn candidate_appears_only_when_every_child_is_terminal() {
    let mut store = open("candidate_gate");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    store
        .transition(root, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate root");
    let a = task(&mut store, root, "a");
    let b = task(&mut store, root, "b");
    store
        .transition(root, NodeStatus::Active, NodeStatus::Complete, Some("fan out"))
        .expect("root phase one");

    assert!(
        store.synthesis_candidates().expect("candidates").is_empty(),
        "children still pending"
    );

    run_to_complete(&mut store, a, "A");
    assert!(store.synthesis_candidates().expect("candidates").is_empty());

    run_to_complete(&mut store, b, "B");
    let candidates = store.synthesis_candidates().expect("candidates");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, root);
    assert!(candidates[0].any_child_complete);
}

#[test]
fn begin_synthesis_resets_the_parent_exactly_once() {
    let mut store = open("begin_once");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    store
        .transition(root, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate root");
    let a = task(&mut store, root, "a");
    store
        .transition(root, NodeStatus::Active, NodeStatus::Complete, Some("phase one"))
        .expect("root phase one");
    run_to_complete(&mut store, a, "A");

    store.begin_synthesis(root).expect("begin synthesis");
    let row = store.get(root).expect("get").expect("row");
    assert_eq!(row.status, NodeStatus::Pending);
    assert!(row.synthesized);
    assert_eq!(row.result, None, "phase-one result is cleared");

    // The relaunch completes with the final result.
    run_to_complete(&mut store, root, "final: A");
    let row = store.get(root).expect("get").expect("row");
    assert_eq!(row.result.as_deref(), Some("final: A"));

    // Synthesized parents never come back as candidates.
    assert!(store.synthesis_candidates().expect("candidates").is_empty());
    let err = store
        .begin_synthesis(root)
        .expect_err("second synthesis must fail");
    assert!(matches!(err, StoreError::InvalidStatus { .. }));
}

#[test]
fn all_children_failed_fails_the_parent() {
    let mut store = open("all_failed");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    store
        .transition(root, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate root");
    let a = task(&mut store, root, "a");
    store
        .transition(root, NodeStatus::Active, NodeStatus::Complete, Some("fan out"))
        .expect("root phase one");
    store
        .transition(a, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate a");
    store
        .transition(a, NodeStatus::Active, NodeStatus::Failed, None)
        .expect("fail a");

    let candidates = store.synthesis_candidates().expect("candidates");
    assert_eq!(candidates.len(), 1);
    assert!(!candidates[0].any_child_complete);

    store
        .mark_synthesis_failed(root)
        .expect("mark synthesis failed");
    let row = store.get(root).expect("get").expect("row");
    assert_eq!(row.status, NodeStatus::Failed);
    assert!(row.synthesized);
    assert!(store.is_tree_complete().expect("tree complete"));
}

#[test]
fn childless_nodes_never_synthesize() {
    let mut store = open("childless");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    run_to_complete(&mut store, root, "hello");
    assert!(store.synthesis_candidates().expect("candidates").is_empty());
    assert!(store.is_tree_complete().expect("tree complete"));
}
