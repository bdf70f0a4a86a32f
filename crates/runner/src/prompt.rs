#![forbid(unsafe_code)]

//! Prompt assembly: pure functions from store state to the text handed to an
//! agent subprocess. Section order is fixed; agents learn the tool names from
//! here and the tool server enforces the semantics.

use cord_core::ids::NodeId;
use cord_core::model::{NodeStatus, Returns};
use cord_storage::{SqliteStore, StoreError};

const TOOL_INSTRUCTIONS: &str = "\
You have MCP tools available for coordination:
- create(goal, prompt, returns, needs, kind): create a child task under you \
(kind=serial runs its own children strictly in order)
- complete(result): mark your task done with a result
- read_tree(): view the full coordination tree
- read_node(id): inspect a single node
- ask(question, target, options, default): ask the human operator \
(target=human) or escalate to your parent agent (target=parent)
- stop(id) / pause(id) / resume(id) / modify(id, goal, prompt): control nodes \
in your own subtree

WORKFLOW:
1. Assess whether your task has independent parts
2. If yes: create children (declare needs for ordering), then call complete()
3. If no: do the work, then call complete()

needs = the child waits for the listed nodes to complete before starting.

IMPORTANT: When you are done, you MUST call the `complete` tool with your result.";

/// First-phase prompt for a node launch.
pub(crate) fn build_agent_prompt(store: &SqliteStore, id: NodeId) -> Result<String, StoreError> {
    let node = store.get(id)?.ok_or_else(|| StoreError::NotFound {
        id: id.to_string(),
    })?;

    let mut parts: Vec<String> = Vec::new();

    parts.push(format!("You are node {id} in a coordination tree."));
    parts.push(String::new());

    let chain = store.goal_chain(id)?;
    if chain.len() > 1 {
        parts.push("Goal chain:".to_string());
        for (depth, (chain_id, goal)) in chain.iter().enumerate() {
            let indent = "  ".repeat(depth);
            let marker = if *chain_id == id { " <- your task" } else { "" };
            parts.push(format!("  {indent}{chain_id} \"{goal}\"{marker}"));
        }
        parts.push(String::new());
    }

    parts.push(format!("Your goal: {}", node.goal));
    parts.push(String::new());

    if let Some(prompt) = node.prompt.as_deref().filter(|p| !p.is_empty()) {
        parts.push("Your task:".to_string());
        parts.push(prompt.to_string());
        parts.push(String::new());
    }

    if !node.needs.is_empty() {
        let results = store.completed_results(&node.needs)?;
        if !results.is_empty() {
            parts.push("Results from completed dependencies:".to_string());
            parts.push(String::new());
            for (dep_id, goal, result) in results {
                parts.push(format!("--- {dep_id} \"{goal}\" ---"));
                parts.push(result);
                parts.push(String::new());
            }
        }
    }

    parts.push(output_instructions(node.returns));
    parts.push(String::new());
    parts.push(TOOL_INSTRUCTIONS.to_string());
    parts.push(String::new());

    Ok(parts.join("\n"))
}

/// Second-phase prompt: the node's children have all terminated and their
/// results replace the dependency section.
pub(crate) fn build_synthesis_prompt(
    store: &SqliteStore,
    id: NodeId,
) -> Result<String, StoreError> {
    let node = store.get(id)?.ok_or_else(|| StoreError::NotFound {
        id: id.to_string(),
    })?;

    let mut parts: Vec<String> = Vec::new();

    parts.push(format!("You are node {id}: \"{}\"", node.goal));
    parts.push(String::new());
    parts.push(
        "Your decomposed children have completed. Here are their results:".to_string(),
    );
    parts.push(String::new());

    for child in store.children(id)? {
        if child.status == NodeStatus::Complete {
            if let Some(result) = child.result.as_deref().filter(|r| !r.is_empty()) {
                parts.push(format!("--- {} \"{}\" ---", child.id, child.goal));
                parts.push(result.to_string());
                parts.push(String::new());
            }
        }
    }

    if let Some(prompt) = node.prompt.as_deref().filter(|p| !p.is_empty()) {
        parts.push("Original instructions:".to_string());
        parts.push(prompt.to_string());
        parts.push(String::new());
    }

    parts.push("Produce the final synthesis of your child tasks' results.".to_string());
    parts.push(String::new());
    parts.push(
        "IMPORTANT: When you are done, you MUST call the `complete` tool with your result."
            .to_string(),
    );
    parts.push(String::new());
    parts.push(output_instructions(node.returns));
    parts.push(String::new());

    Ok(parts.join("\n"))
}

fn output_instructions(returns: Returns) -> String {
    let instruction = match returns {
        Returns::Text => "Output your result as plain text.",
        Returns::List => "Output ONLY a JSON array. No markdown formatting, no explanation.",
        Returns::Structured => "Output ONLY valid JSON. No markdown formatting, no explanation.",
        Returns::File => "Write your result to a file and output the file path.",
        Returns::Boolean => "Output ONLY 'true' or 'false'. No explanation.",
        Returns::Approval => "Output ONLY 'approved' or 'rejected'. No explanation.",
    };
    format!("Expected result type: {}. {}", returns.as_str(), instruction)
}
