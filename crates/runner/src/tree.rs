#![forbid(unsafe_code)]

//! ANSI status tree for the operator terminal. Redraws only when the tree
//! actually changed; the final frame doubles as the run report, with failed
//! branches visible in red.

use cord_core::ids::NodeId;
use cord_core::model::{AskTarget, NodeKind, NodeStatus};
use cord_storage::TreeNode;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const RESULT_PREVIEW_CHARS: usize = 60;

fn status_style(status: NodeStatus, waiting_on_human: bool) -> (&'static str, &'static str) {
    if waiting_on_human {
        return ("\x1b[36m", "?");
    }
    match status {
        NodeStatus::Pending => ("\x1b[90m", "○"),
        NodeStatus::Active => ("\x1b[34m", "●"),
        NodeStatus::Paused => ("\x1b[33m", "‖"),
        NodeStatus::Complete => ("\x1b[32m", "✓"),
        NodeStatus::Failed => ("\x1b[31m", "✗"),
        NodeStatus::Cancelled => ("\x1b[33m", "⊘"),
    }
}

/// Full frame: clear screen, header, tree, running footer.
pub(crate) fn render_frame(tree: &TreeNode, running: &[NodeId]) -> String {
    let mut lines = vec![format!("\x1b[2J\x1b[H{BOLD}cord run{RESET}"), String::new()];
    render_node(tree, 0, &mut lines);
    lines.push(String::new());
    if !running.is_empty() {
        let rendered: Vec<String> = running.iter().map(|id| id.to_string()).collect();
        lines.push(format!("\x1b[90m  running: {}{RESET}", rendered.join(", ")));
    }
    lines.join("\n")
}

fn render_node(tree: &TreeNode, depth: usize, lines: &mut Vec<String>) {
    let node = &tree.node;
    let prefix = "  ".repeat(depth);
    let waiting_on_human = node.kind == NodeKind::Ask
        && node.ask_target == Some(AskTarget::Human)
        && node.status == NodeStatus::Active;
    let (color, icon) = status_style(node.status, waiting_on_human);

    lines.push(format!(
        "  {prefix}{color}{icon} {BOLD}{id}{RESET} {color}[{status}]{RESET} {DIM}{kind}{RESET} {goal}",
        id = node.id,
        status = node.status.as_str(),
        kind = node.kind.as_str().to_uppercase(),
        goal = node.goal,
    ));

    if !node.needs.is_empty() {
        let deps: Vec<String> = node.needs.iter().map(|id| id.to_string()).collect();
        lines.push(format!("  {prefix}  {DIM}blocked-by: {}{RESET}", deps.join(", ")));
    }

    if let Some(result) = node.result.as_deref().filter(|r| !r.is_empty()) {
        lines.push(format!(
            "  {prefix}  {DIM}result: {}{RESET}",
            preview(result)
        ));
    }

    for child in &tree.children {
        render_node(child, depth + 1, lines);
    }
}

fn preview(result: &str) -> String {
    let flat: String = result
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= RESULT_PREVIEW_CHARS {
        return flat;
    }
    let mut out: String = flat.chars().take(RESULT_PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// Cheap change detection so identical frames are not redrawn.
pub(crate) fn frame_hash(tree: &TreeNode, running: &[NodeId]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_node(tree, &mut hasher);
    for id in running {
        id.as_i64().hash(&mut hasher);
    }
    hasher.finish()
}

fn hash_node(tree: &TreeNode, hasher: &mut DefaultHasher) {
    let node = &tree.node;
    node.id.as_i64().hash(hasher);
    node.status.as_str().hash(hasher);
    node.goal.hash(hasher);
    node.result.hash(hasher);
    node.synthesized.hash(hasher);
    for child in &tree.children {
        hash_node(child, hasher);
    }
}
