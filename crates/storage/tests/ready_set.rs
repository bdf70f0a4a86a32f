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

fn ready_ids(store: &SqliteStore) -> Vec<NodeId> {
    store
        .ready_set()
        .expect("ready set")
        .into_iter()
        .map(|row| row.id)
        .collect()
}

fn task(store: &mut SqliteStore, parent: NodeId, goal: &str, needs: &[NodeId]) -> NodeId {
    store
        .create_child(parent, NodeKind::Task, goal, None, Returns::Text, needs, None)
        .expect("create task")
}

fn activate(store: &mut SqliteStore, id: NodeId) {
    store
        .transition(id, NodeStatus::Pending, NodeStatus::Active, None)
        .expect("activate");
}

fn complete(store: &mut SqliteStore, id: NodeId, result: &str) {
    store
        .transition(id, NodeStatus::Active, NodeStatus::Complete, Some(result))
        .expect("complete");
}

#[test]
fn fresh_root_is_the_initial_ready_set() {
    let mut store = open("fresh_root");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    assert_eq!(ready_ids(&store), vec![root]);
}

#[test]
fn empty_needs_child_is_ready_once_parent_is_active() {
    let mut store = open("empty_needs");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    activate(&mut store, root);
    let a = task(&mut store, root, "a", &[]);
    assert_eq!(ready_ids(&store), vec![a]);
}

#[test]
fn dependency_chain_gates_launch_order() {
    let mut store = open("dep_chain");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    activate(&mut store, root);
    let a = task(&mut store, root, "a", &[]);
    let b = task(&mut store, root, "b", &[]);
    let c = task(&mut store, root, "c", &[a, b]);
    let d = task(&mut store, root, "d", &[c]);

    assert_eq!(ready_ids(&store), vec![a, b], "only the free pair starts");

    activate(&mut store, a);
    complete(&mut store, a, "A");
    assert_eq!(ready_ids(&store), vec![b], "c still waits on b");

    activate(&mut store, b);
    complete(&mut store, b, "B");
    assert_eq!(ready_ids(&store), vec![c]);

    activate(&mut store, c);
    complete(&mut store, c, "C");
    assert_eq!(ready_ids(&store), vec![d]);
}

#[test]
fn serial_children_become_ready_one_at_a_time() {
    let mut store = open("serial_order");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    activate(&mut store, root);
    let serial = store
        .create_child(root, NodeKind::Serial, "steps", None, Returns::Text, &[], None)
        .expect("serial");
    activate(&mut store, serial);
    let s1 = task(&mut store, serial, "step 1", &[]);
    let s2 = task(&mut store, serial, "step 2", &[]);
    let s3 = task(&mut store, serial, "step 3", &[]);

    assert_eq!(ready_ids(&store), vec![s1]);
    activate(&mut store, s1);
    assert_eq!(ready_ids(&store), vec![], "next step waits for completion");
    complete(&mut store, s1, "one");
    assert_eq!(ready_ids(&store), vec![s2]);
    activate(&mut store, s2);
    complete(&mut store, s2, "two");
    assert_eq!(ready_ids(&store), vec![s3]);
}

#[test]
fn paused_parent_blocks_its_pending_children() {
    let mut store = open("paused_parent");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    activate(&mut store, root);
    let a = task(&mut store, root, "a", &[]);
    activate(&mut store, a);
    let a1 = task(&mut store, a, "a1", &[]);
    assert_eq!(ready_ids(&store), vec![a1]);

    store
        .transition(a, NodeStatus::Active, NodeStatus::Paused, None)
        .expect("pause a");
    assert_eq!(ready_ids(&store), vec![], "paused parent does not supervise");

    store
        .transition(a, NodeStatus::Paused, NodeStatus::Pending, None)
        .expect("resume a");
    // a itself is ready again; a1 waits for a to become active.
    assert_eq!(ready_ids(&store), vec![a]);
}

#[test]
fn complete_parent_awaiting_synthesis_still_supervises() {
    let mut store = open("complete_parent");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    activate(&mut store, root);
    let a = task(&mut store, root, "a", &[]);
    activate(&mut store, a);
    let a1 = task(&mut store, a, "a1", &[]);
    let a2 = task(&mut store, a, "a2", &[a1]);

    // The decomposing parent finishes its first phase while children run.
    complete(&mut store, a, "decomposed");
    assert_eq!(ready_ids(&store), vec![a1], "children stay schedulable");

    activate(&mut store, a1);
    complete(&mut store, a1, "one");
    assert_eq!(ready_ids(&store), vec![a2]);
}

#[test]
fn goal_root_children_are_ready_during_root_synthesis_window() {
    let mut store = open("root_window");
    let root = store
        .create_root("root", None, Returns::Text)
        .expect("root");
    activate(&mut store, root);
    let a = task(&mut store, root, "a", &[]);
    complete(&mut store, root, "decomposed");
    // Children of the goal root are never orphaned by its status.
    assert_eq!(ready_ids(&store), vec![a]);
}
