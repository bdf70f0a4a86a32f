#![forbid(unsafe_code)]

use cord_core::ids::NodeId;
use cord_core::model::{NodeKind, NodeStatus, Returns};
use cord_storage::SqliteStore;
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

fn status_of(store: &SqliteStore, id: NodeId) -> NodeStatus {
    store.get(id).expect("get").expect("row").status
}

#[test]
fn cancel_marks_every_non_terminal_descendant() {
    let mut store = open("cascade");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    store
        .transition(root, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate root");
    let a = task(&mut store, root, "a");
    store
        .transition(a, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate a");
    let a1 = task(&mut store, a, "a1");
    store
        .transition(a1, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate a1");
    store
        .transition(a1, NodeStatus::Active, NodeStatus::Complete, Some("done"))
        .expect("complete a1");
    let a2 = task(&mut store, a, "a2");
    let a3 = task(&mut store, a, "a3");
    store
        .transition(a3, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate a3");

    let outcome = store.cancel_subtree(a).expect("cancel a");

    assert_eq!(outcome.cancelled, vec![a, a2, a3]);
    assert_eq!(outcome.signalled, vec![a, a3], "only live processes get signals");
    assert_eq!(status_of(&store, a), NodeStatus::Cancelled);
    assert_eq!(status_of(&store, a2), NodeStatus::Cancelled);
    assert_eq!(status_of(&store, a3), NodeStatus::Cancelled);
    assert_eq!(
        status_of(&store, a1),
        NodeStatus::Complete,
        "terminal descendants keep their status"
    );
    assert_eq!(status_of(&store, root), NodeStatus::Active, "cancel never climbs");
}

#[test]
fn cancelling_the_root_reaches_the_whole_tree() {
    let mut store = open("cancel_root");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    store
        .transition(root, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate root");
    let a = task(&mut store, root, "a");
    let b = task(&mut store, root, "b");
    store
        .transition(b, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate b");
    let b1 = task(&mut store, b, "b1");

    let outcome = store.cancel_subtree(root).expect("cancel root");
    assert_eq!(outcome.cancelled, vec![root, a, b, b1]);
    for id in [root, a, b, b1] {
        assert_eq!(status_of(&store, id), NodeStatus::Cancelled);
    }
}

#[test]
fn cancel_on_a_terminal_node_is_a_no_op() {
    let mut store = open("cancel_idempotent");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    store
        .transition(root, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate root");
    let a = task(&mut store, root, "a");
    store.cancel_subtree(a).expect("first cancel");
    assert_eq!(status_of(&store, a), NodeStatus::Cancelled);

    let outcome = store.cancel_subtree(a).expect("second cancel succeeds");
    assert!(outcome.cancelled.is_empty());
    assert!(outcome.signalled.is_empty());
}

#[test]
fn paused_descendants_are_cancelled_too() {
    let mut store = open("cancel_paused");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    store
        .transition(root, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate root");
    let a = task(&mut store, root, "a");
    store
        .transition(a, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate a");
    store
        .transition(a, NodeStatus::Active, NodeStatus::Paused, None)
        .expect("pause a");

    let outcome = store.cancel_subtree(a).expect("cancel paused");
    assert_eq!(outcome.cancelled, vec![a]);
    assert!(outcome.signalled.is_empty(), "paused processes are already gone");
    assert_eq!(status_of(&store, a), NodeStatus::Cancelled);
}
