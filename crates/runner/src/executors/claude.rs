#![forbid(unsafe_code)]

use super::{AgentLaunchRequest, MCP_TOOLS, write_mcp_config};
use crate::bin_detect::resolve_agent_bin;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

fn append_exec_args(cmd: &mut Command, config_path: &Path, model: &str, max_budget_usd: f64) {
    cmd.arg("-p")
        .arg("--model")
        .arg(model)
        .arg("--mcp-config")
        .arg(config_path)
        // Only the coordination tools are pre-approved; everything else goes
        // through the CLI's own permission flow.
        .arg("--allowedTools")
        .arg(MCP_TOOLS.join(" "))
        // Headless runs must never hang on an interactive prompt.
        .arg("--dangerously-skip-permissions")
        .arg("--max-budget-usd")
        .arg(max_budget_usd.to_string());
}

pub(crate) fn spawn_exec(request: &AgentLaunchRequest<'_>) -> Result<Child, String> {
    let Some(claude_bin) = resolve_agent_bin(
        request.agent_bin,
        super::HarnessKind::Claude.default_bin(),
    ) else {
        return Err(
            "claude binary not found (set --agent-bin or CORD_CLAUDE_BIN, or install claude on PATH)"
                .to_string(),
        );
    };

    let config_path = write_mcp_config(request)?;

    let stdout_file = File::create(request.out_path)
        .map_err(|e| format!("create claude stdout capture failed: {e}"))?;
    let stderr_file = File::create(request.err_path)
        .map_err(|e| format!("create claude stderr capture failed: {e}"))?;

    let mut cmd = Command::new(&claude_bin);
    append_exec_args(&mut cmd, &config_path, request.model, request.max_budget_usd);
    cmd.current_dir(request.project_dir);

    let mut child = cmd
        // The prompt goes through stdin: argv is brittle for long prompts
        // (ARG_MAX, quoting) and leaks into process listings.
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .map_err(|e| format!("failed to spawn claude ({claude_bin}): {e}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(request.prompt.as_bytes())
            .map_err(|e| format!("write claude stdin failed: {e}"))?;
    }

    Ok(child)
}
