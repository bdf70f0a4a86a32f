#![forbid(unsafe_code)]

use super::AgentLaunchRequest;
use crate::bin_detect::resolve_agent_bin;
use std::fs::File;
use std::io::Write;
use std::process::{Child, Command, Stdio};

fn append_exec_args(cmd: &mut Command, request: &AgentLaunchRequest<'_>) {
    cmd.arg("exec")
        .arg("--skip-git-repo-check")
        .arg("-c")
        .arg("approval_policy=\"never\"")
        .arg("-s")
        .arg("workspace-write")
        // Codex streams a transcript on stdout; the final agent message is
        // what the engine treats as the implicit result, so route it to the
        // capture file instead.
        .arg("--output-last-message")
        .arg(request.out_path)
        .arg("-c")
        .arg(format!(
            "mcp_servers.cord.command=\"{}\"",
            request.mcp_bin
        ))
        .arg("-c")
        .arg(format!(
            "mcp_servers.cord.args=[\"--db-path\",\"{}\",\"--agent-id\",\"{}\"]",
            request.db_path.to_string_lossy(),
            request.node_id
        ));
    if !request.model.is_empty() {
        cmd.arg("--model").arg(request.model);
    }
}

pub(crate) fn spawn_exec(request: &AgentLaunchRequest<'_>) -> Result<Child, String> {
    let Some(codex_bin) = resolve_agent_bin(
        request.agent_bin,
        super::HarnessKind::Codex.default_bin(),
    ) else {
        return Err(
            "codex binary not found (set --agent-bin or CORD_CODEX_BIN, or install codex on PATH)"
                .to_string(),
        );
    };

    let stderr_file = File::create(request.err_path)
        .map_err(|e| format!("create codex stderr capture failed: {e}"))?;

    let mut cmd = Command::new(&codex_bin);
    append_exec_args(&mut cmd, request);
    cmd.current_dir(request.project_dir);

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .map_err(|e| format!("failed to spawn codex exec ({codex_bin}): {e}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(request.prompt.as_bytes())
            .map_err(|e| format!("write codex stdin failed: {e}"))?;
    }

    Ok(child)
}
