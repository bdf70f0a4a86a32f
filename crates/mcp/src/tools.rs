#![forbid(unsafe_code)]

use serde_json::{Value, json};

/// The advertised tool surface. Parameter shapes are fixed; the prompt
/// assembler teaches agents the same names.
pub(crate) fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "read_tree",
            "description": "Returns the full coordination tree as JSON.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "required": []
            }
        }),
        json!({
            "name": "read_node",
            "description": "Returns a single node's details by id (e.g. '#1').",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "create",
            "description": "Create a child node under your node. Use needs to declare dependencies on other node ids (e.g. ['#2', '#3']); a serial child runs its own children strictly in order.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "goal": { "type": "string" },
                    "prompt": { "type": "string" },
                    "returns": { "type": "string", "enum": ["text", "boolean", "list", "structured", "file", "approval"] },
                    "needs": { "type": "array", "items": { "type": "string" } },
                    "kind": { "type": "string", "enum": ["task", "serial", "ask"] }
                },
                "required": ["goal"]
            }
        }),
        json!({
            "name": "complete",
            "description": "Mark your node as complete with a result. Call this when your task is done.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "result": { "type": "string" }
                },
                "required": []
            }
        }),
        json!({
            "name": "ask",
            "description": "Ask a question. target=human routes to the operator, target=parent escalates to your parent agent, target=children creates a question node under you.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "question": { "type": "string" },
                    "target": { "type": "string", "enum": ["human", "parent", "children"] },
                    "options": { "type": "array", "items": { "type": "string" } },
                    "default": { "type": "string" },
                    "timeout": { "type": "integer" }
                },
                "required": ["question"]
            }
        }),
        json!({
            "name": "stop",
            "description": "Cancel a node in your subtree, cascading to its descendants. Idempotent on already-terminal nodes.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "pause",
            "description": "Pause an active node in your subtree. The engine terminates its process; resume relaunches it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "resume",
            "description": "Resume a paused node in your subtree. Dependencies are re-evaluated before relaunch.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "modify",
            "description": "Update the goal and/or prompt of a pending or paused node in your subtree.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "goal": { "type": "string" },
                    "prompt": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
    ]
}
