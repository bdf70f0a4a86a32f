#![forbid(unsafe_code)]

use crate::{
    JsonRpcRequest, ai_error, ai_error_with, ai_ok, json_rpc_error, json_rpc_response,
    suggest_call, tool_text_content, ts_ms_to_rfc3339,
};
use cord_core::ids::NodeId;
use cord_core::model::{AskTarget, NodeKind, NodeStatus, Returns};
use cord_storage::{SqliteStore, StoreError, TreeNode};
use serde_json::{Map, Value, json};

pub(crate) struct McpServer {
    initialized: bool,
    store: SqliteStore,
    agent_id: NodeId,
}

impl McpServer {
    pub(crate) fn new(store: SqliteStore, agent_id: NodeId) -> Self {
        Self {
            initialized: false,
            store,
            agent_id,
        }
    }

    pub(crate) fn handle(&mut self, request: JsonRpcRequest) -> Option<Value> {
        let method = request.method.as_str();
        let expects_response = !matches!(request.id.as_ref(), None | Some(Value::Null));

        if method == "initialize" {
            // Some clients are strict about the server echoing the protocol
            // version they declared; reflect it back, falling back to our
            // baseline when absent.
            let protocol_version = request
                .params
                .as_ref()
                .and_then(|v| v.get("protocolVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or(crate::MCP_VERSION);
            return Some(json_rpc_response(
                request.id,
                json!({
                    "protocolVersion": protocol_version,
                    "serverInfo": { "name": crate::SERVER_NAME, "version": crate::SERVER_VERSION },
                    "capabilities": { "tools": {} }
                }),
            ));
        }

        // Clients are split between `notifications/initialized` and a bare
        // `initialized`. Accept both, never respond to a notification.
        if method == "notifications/initialized" || method == "initialized" {
            self.initialized = true;
            return None;
        }

        if !self.initialized {
            // Allow auto-initialization on the first real request to avoid
            // client startup races.
            if matches!(method, "tools/call" | "tools/list" | "ping") {
                self.initialized = true;
            } else if expects_response {
                return Some(json_rpc_error(
                    request.id,
                    -32002,
                    "Server not initialized",
                ));
            } else {
                return None;
            }
        }

        if method == "ping" {
            return Some(json_rpc_response(request.id, json!({})));
        }

        if method == "tools/list" {
            return Some(json_rpc_response(
                request.id,
                json!({ "tools": crate::tools::tool_definitions() }),
            ));
        }

        if method == "tools/call" {
            let Some(params) = request.params else {
                return Some(json_rpc_error(
                    request.id,
                    -32602,
                    "params must be an object",
                ));
            };
            let Some(params_obj) = params.as_object() else {
                return Some(json_rpc_error(
                    request.id,
                    -32602,
                    "params must be an object",
                ));
            };

            let tool_name = params_obj
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            // Some clients send `"arguments": null` for empty-args tools.
            let args = match params_obj.get("arguments") {
                None | Some(Value::Null) => json!({}),
                Some(v) => v.clone(),
            };
            let response_body = self.call_tool(tool_name, args);

            return Some(json_rpc_response(
                request.id,
                json!({
                    "content": [tool_text_content(&response_body)],
                    "isError": !response_body.get("success").and_then(|v| v.as_bool()).unwrap_or(false)
                }),
            ));
        }

        if !expects_response {
            return None;
        }

        Some(json_rpc_error(
            request.id,
            -32601,
            &format!("Method not found: {method}"),
        ))
    }

    fn call_tool(&mut self, name: &str, args: Value) -> Value {
        match name {
            "read_tree" => self.tool_read_tree(args),
            "read_node" => self.tool_read_node(args),
            "create" => self.tool_create(args),
            "complete" => self.tool_complete(args),
            "ask" => self.tool_ask(args),
            "stop" => self.tool_stop(args),
            "pause" => self.tool_pause(args),
            "resume" => self.tool_resume(args),
            "modify" => self.tool_modify(args),
            _ => ai_error("invalid_input", &format!("Unknown tool: {name}")),
        }
    }

    fn tool_read_tree(&mut self, _args: Value) -> Value {
        match self.store.tree() {
            Ok(Some(tree)) => ai_ok("read_tree", tree_to_json(&tree)),
            Ok(None) => ai_error("not_found", "No tree found"),
            Err(err) => store_error(&err),
        }
    }

    fn tool_read_node(&mut self, args: Value) -> Value {
        let Some(args_obj) = args.as_object() else {
            return ai_error("invalid_input", "arguments must be an object");
        };
        let id = match require_node_id(args_obj, "id") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        match self.store.get(id) {
            Ok(Some(row)) => ai_ok("read_node", node_to_json(&row)),
            Ok(None) => ai_error("not_found", &format!("Node {id} not found")),
            Err(err) => store_error(&err),
        }
    }

    fn tool_create(&mut self, args: Value) -> Value {
        let Some(args_obj) = args.as_object() else {
            return ai_error("invalid_input", "arguments must be an object");
        };
        let goal = match require_string(args_obj, "goal") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let prompt = args_obj
            .get("prompt")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty());
        let returns = match optional_returns(args_obj) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let kind = match args_obj.get("kind").and_then(|v| v.as_str()) {
            None => NodeKind::Task,
            Some(raw) => match NodeKind::parse(raw) {
                Some(NodeKind::Goal) | None => {
                    return ai_error(
                        "invalid_input",
                        "kind must be one of: task, serial, ask",
                    );
                }
                Some(kind) => kind,
            },
        };
        let needs = match optional_node_ids(args_obj, "needs") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        // Ask nodes created through `create` are human-routed; directed asks
        // go through the `ask` tool.
        let ask_target = (kind == NodeKind::Ask).then_some(AskTarget::Human);

        match self.store.create_child(
            self.agent_id,
            kind,
            &goal,
            prompt,
            returns,
            &needs,
            ask_target,
        ) {
            Ok(id) => ai_ok("create", json!({ "created": id.to_string(), "goal": goal })),
            Err(err) => store_error(&err),
        }
    }

    fn tool_complete(&mut self, args: Value) -> Value {
        let result = args
            .as_object()
            .and_then(|obj| obj.get("result"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        match self.store.transition(
            self.agent_id,
            NodeStatus::Active,
            NodeStatus::Complete,
            Some(result),
        ) {
            Ok(()) => ai_ok(
                "complete",
                json!({ "completed": self.agent_id.to_string() }),
            ),
            Err(err) => store_error(&err),
        }
    }

    fn tool_ask(&mut self, args: Value) -> Value {
        let Some(args_obj) = args.as_object() else {
            return ai_error("invalid_input", "arguments must be an object");
        };
        let question = match require_string(args_obj, "question") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let target = match args_obj.get("target").and_then(|v| v.as_str()) {
            None => AskTarget::Human,
            Some(raw) => match AskTarget::parse(raw) {
                Some(target) => target,
                None => {
                    return ai_error(
                        "invalid_input",
                        "target must be one of: human, parent, children",
                    );
                }
            },
        };

        let mut prompt = question.clone();
        if let Some(options) = args_obj.get("options").and_then(|v| v.as_array()) {
            let rendered: Vec<&str> = options.iter().filter_map(|v| v.as_str()).collect();
            if !rendered.is_empty() {
                prompt.push_str("\nOptions: ");
                prompt.push_str(&rendered.join(", "));
            }
        }
        if let Some(default) = args_obj.get("default").and_then(|v| v.as_str()) {
            prompt.push_str(&format!("\nDefault: {default}"));
        }
        if let Some(timeout) = args_obj.get("timeout").and_then(|v| v.as_u64()) {
            prompt.push_str(&format!("\nTimeout: {timeout}s"));
        }

        // Escalation is the one exception to the child-of-self rule: the ask
        // node lands under the caller's parent.
        let parent = match target {
            AskTarget::Parent => match self.store.get(self.agent_id) {
                Ok(Some(row)) => match row.parent_id {
                    Some(parent) => parent,
                    None => {
                        return ai_error(
                            "not_found",
                            &format!("{} has no parent to escalate to", self.agent_id),
                        );
                    }
                },
                Ok(None) => {
                    return ai_error(
                        "not_found",
                        &format!("Node {} not found", self.agent_id),
                    );
                }
                Err(err) => return store_error(&err),
            },
            AskTarget::Human | AskTarget::Children => self.agent_id,
        };

        match self.store.create_child(
            parent,
            NodeKind::Ask,
            &question,
            Some(prompt.as_str()),
            Returns::Text,
            &[],
            Some(target),
        ) {
            Ok(id) => ai_ok(
                "ask",
                json!({ "created": id.to_string(), "question": question, "target": target.as_str() }),
            ),
            Err(err) => store_error(&err),
        }
    }

    fn tool_stop(&mut self, args: Value) -> Value {
        let Some(args_obj) = args.as_object() else {
            return ai_error("invalid_input", "arguments must be an object");
        };
        let id = match require_node_id(args_obj, "id") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        if let Some(denied) = self.check_subtree(id) {
            return denied;
        }
        match self.store.cancel_subtree(id) {
            Ok(outcome) => ai_ok(
                "stop",
                json!({
                    "cancelled": outcome
                        .cancelled
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>(),
                }),
            ),
            Err(err) => store_error(&err),
        }
    }

    fn tool_pause(&mut self, args: Value) -> Value {
        let Some(args_obj) = args.as_object() else {
            return ai_error("invalid_input", "arguments must be an object");
        };
        let id = match require_node_id(args_obj, "id") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        if let Some(denied) = self.check_subtree(id) {
            return denied;
        }
        match self
            .store
            .transition(id, NodeStatus::Active, NodeStatus::Paused, None)
        {
            Ok(()) => ai_ok("pause", json!({ "paused": id.to_string() })),
            Err(err) => store_error(&err),
        }
    }

    fn tool_resume(&mut self, args: Value) -> Value {
        let Some(args_obj) = args.as_object() else {
            return ai_error("invalid_input", "arguments must be an object");
        };
        let id = match require_node_id(args_obj, "id") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        if let Some(denied) = self.check_subtree(id) {
            return denied;
        }
        match self
            .store
            .transition(id, NodeStatus::Paused, NodeStatus::Pending, None)
        {
            Ok(()) => ai_ok("resume", json!({ "resumed": id.to_string() })),
            Err(err) => store_error(&err),
        }
    }

    fn tool_modify(&mut self, args: Value) -> Value {
        let Some(args_obj) = args.as_object() else {
            return ai_error("invalid_input", "arguments must be an object");
        };
        let id = match require_node_id(args_obj, "id") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        if let Some(denied) = self.check_subtree(id) {
            return denied;
        }
        let goal = args_obj.get("goal").and_then(|v| v.as_str());
        let prompt = args_obj.get("prompt").and_then(|v| v.as_str());
        match self.store.modify(id, goal, prompt) {
            Ok(()) => {
                let updated_goal = self
                    .store
                    .get(id)
                    .ok()
                    .flatten()
                    .map(|row| row.goal)
                    .unwrap_or_default();
                ai_ok(
                    "modify",
                    json!({ "modified": id.to_string(), "goal": updated_goal }),
                )
            }
            Err(err) => store_error(&err),
        }
    }

    /// Authority gate for stop/pause/resume/modify: the target must be a
    /// strict descendant of this agent. Denials name the caller and the rule
    /// and point at the escalation path instead of silently fixing anything.
    fn check_subtree(&self, target: NodeId) -> Option<Value> {
        match self.store.get(target) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Some(ai_error("not_found", &format!("Node {target} not found")));
            }
            Err(err) => return Some(store_error(&err)),
        }
        let in_subtree = match self.store.is_ancestor(self.agent_id, target) {
            Ok(v) => v,
            Err(err) => return Some(store_error(&err)),
        };
        if target == self.agent_id || !in_subtree {
            return Some(ai_error_with(
                "authority_denied",
                &format!(
                    "{target} is not in the subtree of {caller}: agents may only act on their own descendants",
                    caller = self.agent_id
                ),
                Some("escalate with ask(target=parent) instead"),
                vec![suggest_call(
                    "ask",
                    "Escalate to the parent agent, which has authority here.",
                    json!({ "question": format!("Please act on {target}"), "target": "parent" }),
                )],
            ));
        }
        None
    }
}

fn store_error(err: &StoreError) -> Value {
    ai_error_with(err.code(), &err.to_string(), err.recovery_hint(), Vec::new())
}

fn require_string(args: &Map<String, Value>, key: &str) -> Result<String, Value> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(ai_error(
            "invalid_input",
            &format!("{key} is required and must be a non-empty string"),
        )),
    }
}

fn require_node_id(args: &Map<String, Value>, key: &str) -> Result<NodeId, Value> {
    let raw = require_string(args, key)?;
    NodeId::parse(&raw)
        .map_err(|err| ai_error("invalid_input", &format!("{key}: {err}")))
}

fn optional_returns(args: &Map<String, Value>) -> Result<Returns, Value> {
    match args.get("returns").and_then(|v| v.as_str()) {
        None => Ok(Returns::Text),
        Some(raw) => Returns::parse(raw).ok_or_else(|| {
            ai_error(
                "invalid_input",
                "returns must be one of: text, boolean, list, structured, file, approval",
            )
        }),
    }
}

fn optional_node_ids(args: &Map<String, Value>, key: &str) -> Result<Vec<NodeId>, Value> {
    let Some(value) = args.get(key) else {
        return Ok(Vec::new());
    };
    let Some(items) = value.as_array() else {
        return Err(ai_error(
            "invalid_input",
            &format!("{key} must be an array of node ids"),
        ));
    };
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let Some(raw) = item.as_str() else {
            return Err(ai_error(
                "invalid_input",
                &format!("{key} items must be node id strings like \"#2\""),
            ));
        };
        let id = NodeId::parse(raw)
            .map_err(|err| ai_error("invalid_input", &format!("{key}: {err}")))?;
        ids.push(id);
    }
    Ok(ids)
}

fn node_to_json(row: &cord_storage::NodeRow) -> Value {
    let mut out = Map::new();
    out.insert("id".to_string(), json!(row.id.to_string()));
    out.insert("kind".to_string(), json!(row.kind.as_str()));
    out.insert("goal".to_string(), json!(row.goal));
    out.insert("status".to_string(), json!(row.status.as_str()));
    out.insert("returns".to_string(), json!(row.returns.as_str()));
    if let Some(parent) = row.parent_id {
        out.insert("parent".to_string(), json!(parent.to_string()));
    }
    if let Some(prompt) = &row.prompt {
        out.insert("prompt".to_string(), json!(prompt));
    }
    if let Some(result) = &row.result {
        out.insert("result".to_string(), json!(result));
    }
    if !row.needs.is_empty() {
        out.insert(
            "needs".to_string(),
            json!(row.needs.iter().map(|id| id.to_string()).collect::<Vec<_>>()),
        );
    }
    if row.synthesized {
        out.insert("synthesized".to_string(), json!(true));
    }
    if let Some(target) = row.ask_target {
        out.insert("ask_target".to_string(), json!(target.as_str()));
    }
    out.insert(
        "updated_at".to_string(),
        json!(ts_ms_to_rfc3339(row.updated_at)),
    );
    Value::Object(out)
}

fn tree_to_json(tree: &TreeNode) -> Value {
    let mut out = node_to_json(&tree.node);
    if !tree.children.is_empty() {
        if let Some(obj) = out.as_object_mut() {
            obj.insert(
                "children".to_string(),
                json!(tree.children.iter().map(tree_to_json).collect::<Vec<_>>()),
            );
        }
    }
    out
}
