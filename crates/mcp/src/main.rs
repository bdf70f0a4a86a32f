#![forbid(unsafe_code)]

//! Per-agent coordination tool server.
//!
//! One instance runs for every agent subprocess; the agent's identity is a
//! property of which server it connected to, never a request parameter.
//! Transport is line-delimited JSON-RPC over stdio with the MCP handshake
//! the agent CLIs speak.

mod server;
mod tools;

use cord_core::ids::NodeId;
use serde::Deserialize;
use serde_json::{Value, json};
use server::McpServer;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const MCP_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "cord";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    #[serde(rename = "jsonrpc")]
    _jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
}

fn json_rpc_response(id: Option<Value>, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn json_rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn tool_text_content(payload: &Value) -> Value {
    json!({
        "type": "text",
        "text": serde_json::to_string_pretty(payload).unwrap_or_else(|_| "{}".to_string()),
    })
}

fn now_rfc3339() -> Value {
    Value::String(
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()),
    )
}

fn ts_ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn ai_ok(intent: &str, result: Value) -> Value {
    json!({
        "success": true,
        "intent": intent,
        "result": result,
        "warnings": [],
        "suggestions": [],
        "error": null,
        "timestamp": now_rfc3339(),
    })
}

fn ai_error(kind: &str, message: &str) -> Value {
    ai_error_with(kind, message, None, Vec::new())
}

fn ai_error_with(
    kind: &str,
    message: &str,
    recovery: Option<&str>,
    suggestions: Vec<Value>,
) -> Value {
    let error = match recovery {
        None => json!({ "kind": kind, "message": message }),
        Some(recovery) => json!({ "kind": kind, "message": message, "recovery": recovery }),
    };
    json!({
        "success": false,
        "intent": "error",
        "result": {},
        "warnings": [],
        "suggestions": suggestions,
        "error": error,
        "timestamp": now_rfc3339(),
    })
}

fn suggest_call(target: &str, reason: &str, params: Value) -> Value {
    json!({
        "action": "call_tool",
        "target": target,
        "reason": reason,
        "params": params
    })
}

fn usage() -> &'static str {
    "cord_mcp — per-agent coordination tool server (stdio JSON-RPC)\n\n\
USAGE:\n\
  cord_mcp --db-path PATH --agent-id '#N'\n\n\
NOTES:\n\
  - one instance per agent process; the agent id binds every tool call.\n\
  - state is shared through the SQLite store (WAL) written by the engine.\n"
}

struct CliArgs {
    db_path: PathBuf,
    agent_id: NodeId,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut db_path: Option<PathBuf> = None;
    let mut agent_id: Option<NodeId> = None;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--db-path" => {
                index += 1;
                let value = args.get(index).ok_or("--db-path requires a value")?;
                db_path = Some(PathBuf::from(value));
            }
            "--agent-id" => {
                index += 1;
                let value = args.get(index).ok_or("--agent-id requires a value")?;
                agent_id = Some(NodeId::parse(value).map_err(|err| err.to_string())?);
            }
            "--help" | "-h" => {
                return Err(usage().to_string());
            }
            other => {
                return Err(format!("unknown argument: {other}\n\n{}", usage()));
            }
        }
        index += 1;
    }

    Ok(CliArgs {
        db_path: db_path.ok_or("--db-path is required")?,
        agent_id: agent_id.ok_or("--agent-id is required")?,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let storage_dir = match cli.db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let store = cord_storage::SqliteStore::open(storage_dir)?;
    let mut server = McpServer::new(store, cli.agent_id);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let parsed: Result<Value, _> = serde_json::from_str(raw);
        let data = match parsed {
            Ok(v) => v,
            Err(e) => {
                let resp = json_rpc_error(None, -32700, &format!("Parse error: {e}"));
                writeln!(stdout, "{}", serde_json::to_string(&resp)?)?;
                stdout.flush()?;
                continue;
            }
        };
        let (id, has_method) = match data.as_object() {
            Some(obj) => (obj.get("id").cloned(), obj.contains_key("method")),
            None => {
                let resp = json_rpc_error(None, -32600, "Invalid Request");
                writeln!(stdout, "{}", serde_json::to_string(&resp)?)?;
                stdout.flush()?;
                continue;
            }
        };
        if !has_method {
            let resp = json_rpc_error(id, -32600, "Invalid Request");
            writeln!(stdout, "{}", serde_json::to_string(&resp)?)?;
            stdout.flush()?;
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_value(data) {
            Ok(v) => v,
            Err(e) => {
                let resp = json_rpc_error(id, -32600, &format!("Invalid Request: {e}"));
                writeln!(stdout, "{}", serde_json::to_string(&resp)?)?;
                stdout.flush()?;
                continue;
            }
        };

        if let Some(resp) = server.handle(request) {
            writeln!(stdout, "{}", serde_json::to_string(&resp)?)?;
            stdout.flush()?;
        }
    }

    Ok(())
}
