#![forbid(unsafe_code)]

pub(crate) mod claude;
pub(crate) mod codex;

use cord_core::ids::NodeId;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Child;

/// Tool names as the agent CLIs see them through the MCP namespace.
pub(crate) const MCP_TOOLS: [&str; 9] = [
    "mcp__cord__read_tree",
    "mcp__cord__read_node",
    "mcp__cord__create",
    "mcp__cord__complete",
    "mcp__cord__ask",
    "mcp__cord__stop",
    "mcp__cord__pause",
    "mcp__cord__resume",
    "mcp__cord__modify",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum HarnessKind {
    Claude,
    Codex,
}

impl HarnessKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            HarnessKind::Claude => "claude",
            HarnessKind::Codex => "codex",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claude" => Some(HarnessKind::Claude),
            "codex" => Some(HarnessKind::Codex),
            _ => None,
        }
    }

    pub(crate) fn names() -> Vec<&'static str> {
        vec![HarnessKind::Claude.as_str(), HarnessKind::Codex.as_str()]
    }

    pub(crate) fn default_bin(self) -> &'static str {
        self.as_str()
    }
}

/// Everything a harness needs to turn one node into one subprocess.
pub(crate) struct AgentLaunchRequest<'a> {
    pub(crate) node_id: NodeId,
    pub(crate) prompt: &'a str,
    pub(crate) db_path: &'a Path,
    pub(crate) run_dir: &'a Path,
    pub(crate) project_dir: &'a Path,
    pub(crate) model: &'a str,
    pub(crate) max_budget_usd: f64,
    pub(crate) agent_bin: Option<&'a str>,
    pub(crate) mcp_bin: &'a str,
    pub(crate) out_path: &'a Path,
    pub(crate) err_path: &'a Path,
}

pub(crate) fn spawn_agent(
    kind: HarnessKind,
    request: &AgentLaunchRequest<'_>,
) -> Result<Child, String> {
    match kind {
        HarnessKind::Claude => claude::spawn_exec(request),
        HarnessKind::Codex => codex::spawn_exec(request),
    }
}

pub(crate) fn node_file_slug(node_id: NodeId) -> String {
    node_id.as_i64().to_string()
}

/// Per-agent MCP config: the spawned tool server carries the agent identity
/// in its argv, so the agent never supplies it.
pub(crate) fn write_mcp_config(request: &AgentLaunchRequest<'_>) -> Result<PathBuf, String> {
    let config = json!({
        "mcpServers": {
            "cord": {
                "command": request.mcp_bin,
                "args": [
                    "--db-path",
                    request.db_path.to_string_lossy(),
                    "--agent-id",
                    request.node_id.to_string(),
                ]
            }
        }
    });
    let path = request
        .run_dir
        .join(format!("mcp-{}.json", node_file_slug(request.node_id)));
    let payload = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("serialize mcp config failed: {e}"))?;
    std::fs::write(&path, payload)
        .map_err(|e| format!("write mcp config {}: {e}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_names_round_trip() {
        for name in HarnessKind::names() {
            let kind = HarnessKind::parse(name).expect("parse");
            assert_eq!(kind.as_str(), name);
        }
        assert_eq!(HarnessKind::parse("CLAUDE"), Some(HarnessKind::Claude));
        assert_eq!(HarnessKind::parse("gemini"), None);
    }

    #[test]
    fn mcp_config_binds_the_agent_identity() {
        let dir = std::env::temp_dir().join(format!(
            "cord_mcp_config_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");

        let node_id = NodeId::from_raw(7).expect("id");
        let db_path = dir.join("cord.db");
        let out_path = dir.join("agent-7.out");
        let err_path = dir.join("agent-7.err");
        let request = AgentLaunchRequest {
            node_id,
            prompt: "p",
            db_path: &db_path,
            run_dir: &dir,
            project_dir: &dir,
            model: "sonnet",
            max_budget_usd: 2.0,
            agent_bin: None,
            mcp_bin: "/usr/local/bin/cord_mcp",
            out_path: &out_path,
            err_path: &err_path,
        };

        let path = write_mcp_config(&request).expect("write config");
        assert!(path.ends_with("mcp-7.json"));

        let raw = std::fs::read_to_string(&path).expect("read config");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse config");
        let args = parsed["mcpServers"]["cord"]["args"]
            .as_array()
            .expect("args array");
        let rendered: Vec<&str> = args.iter().filter_map(|v| v.as_str()).collect();
        assert!(rendered.contains(&"--agent-id"));
        assert!(rendered.contains(&"#7"));
    }
}
