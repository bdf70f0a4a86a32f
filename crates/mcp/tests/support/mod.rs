#![forbid(unsafe_code)]
#![allow(dead_code)]

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub(crate) fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("cord_mcp_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// One spawned `cord_mcp` bound to a single agent id, speaking line-JSON
/// over its stdio. The store lives in `storage_dir` and is shared with the
/// test through a second connection (WAL).
pub(crate) struct Server {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
    pub(crate) storage_dir: PathBuf,
}

impl Server {
    pub(crate) fn start(storage_dir: PathBuf, agent_id: &str) -> Self {
        let db_path = storage_dir.join("cord.db");
        let mut child = Command::new(env!("CARGO_BIN_EXE_cord_mcp"))
            .arg("--db-path")
            .arg(&db_path)
            .arg("--agent-id")
            .arg(agent_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn cord_mcp");
        let stdin = child.stdin.take().expect("cord_mcp stdin");
        let stdout = BufReader::new(child.stdout.take().expect("cord_mcp stdout"));
        let mut server = Self {
            child,
            stdin,
            stdout,
            next_id: 1,
            storage_dir,
        };
        server.initialize();
        server
    }

    fn initialize(&mut self) {
        let id = self.bump_id();
        let init = self.request(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "cord-mcp-tests", "version": "0" }
            }
        }));
        assert!(init.get("result").is_some(), "initialize must return result");
        self.notify(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {}
        }));
    }

    fn bump_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn notify(&mut self, payload: Value) {
        writeln!(self.stdin, "{payload}").expect("write notification");
        self.stdin.flush().expect("flush notification");
    }

    pub(crate) fn request(&mut self, payload: Value) -> Value {
        writeln!(self.stdin, "{payload}").expect("write request");
        self.stdin.flush().expect("flush request");
        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("read response");
        assert!(!line.trim().is_empty(), "empty response line from cord_mcp");
        serde_json::from_str(&line).expect("parse response json")
    }

    pub(crate) fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        let id = self.bump_id();
        let response = self.request(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }));
        extract_tool_text(&response)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Unwraps the AI envelope out of an MCP `tools/call` response.
pub(crate) fn extract_tool_text(response: &Value) -> Value {
    let text = response
        .get("result")
        .and_then(|v| v.get("content"))
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("text"))
        .and_then(|v| v.as_str())
        .expect("result.content[0].text");
    serde_json::from_str(text).expect("parse tool payload")
}

pub(crate) fn error_kind(payload: &Value) -> &str {
    payload
        .get("error")
        .and_then(|v| v.get("kind"))
        .and_then(|v| v.as_str())
        .expect("error.kind")
}

pub(crate) fn assert_success(payload: &Value) {
    assert_eq!(
        payload.get("success").and_then(|v| v.as_bool()),
        Some(true),
        "expected success envelope, got: {payload}"
    );
}
