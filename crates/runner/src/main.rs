#![forbid(unsafe_code)]

//! `cord`: coordinate a tree of LLM agents toward one goal.
//!
//! The engine seeds a root node in a fresh SQLite store, launches agent
//! subprocesses for ready nodes, and relaunches parents for synthesis once
//! their children terminate. Agents coordinate back through per-agent
//! `cord_mcp` tool servers that share the store.

mod bin_detect;
mod engine;
mod executors;
mod process;
mod prompt;
mod tree;

use cord_core::model::NodeStatus;
use executors::HarnessKind;
use std::path::PathBuf;

fn usage() -> &'static str {
    "cord — coordinate a tree of LLM agents toward one goal\n\n\
USAGE:\n\
  cord run <goal-or-path> [--budget USD] [--model NAME] [--runtime NAME]\n\
           [--max-agents N] [--poll-ms MS] [--project-dir DIR]\n\
           [--agent-bin PATH] [--mcp-bin PATH]\n\n\
NOTES:\n\
  - a readable file argument is read as the goal text; anything else is the\n\
    literal goal string.\n\
  - runtimes: claude (default), codex. Agent binaries can be overridden via\n\
    --agent-bin or CORD_CLAUDE_BIN / CORD_CODEX_BIN.\n\
  - the run writes its store and per-agent logs under <project-dir>/.cord.\n"
}

#[derive(Clone, Debug)]
pub(crate) struct RunConfig {
    pub(crate) goal: String,
    pub(crate) project_dir: PathBuf,
    pub(crate) runtime: HarnessKind,
    pub(crate) model: String,
    pub(crate) max_budget_usd: f64,
    pub(crate) max_agents: usize,
    pub(crate) poll_ms: u64,
    pub(crate) agent_bin: Option<String>,
    pub(crate) mcp_bin: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_run_args(args: &[String]) -> Result<RunConfig, String> {
    let Some(goal_arg) = args.first() else {
        return Err(format!("run requires a goal\n\n{}", usage()));
    };
    if goal_arg.starts_with("--") {
        return Err(format!("run requires a goal before options\n\n{}", usage()));
    }

    let goal_path = PathBuf::from(goal_arg);
    let goal = if goal_path.is_file() {
        std::fs::read_to_string(&goal_path)
            .map_err(|e| format!("read goal file {}: {e}", goal_path.display()))?
            .trim()
            .to_string()
    } else {
        goal_arg.clone()
    };
    if goal.is_empty() {
        return Err("goal must not be empty".to_string());
    }

    let mut cfg = RunConfig {
        goal,
        project_dir: std::env::current_dir().map_err(|e| format!("current dir: {e}"))?,
        runtime: HarnessKind::Claude,
        model: "sonnet".to_string(),
        max_budget_usd: 2.0,
        max_agents: 4,
        poll_ms: 2000,
        agent_bin: None,
        mcp_bin: env_var("CORD_MCP_BIN"),
    };

    let mut index = 1;
    while index < args.len() {
        let flag = args[index].as_str();
        let value = |index: usize| -> Result<&String, String> {
            args.get(index + 1)
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag {
            "--budget" => {
                cfg.max_budget_usd = value(index)?
                    .parse::<f64>()
                    .map_err(|_| "--budget must be a number (USD)".to_string())?;
                index += 2;
            }
            "--model" => {
                cfg.model = value(index)?.clone();
                index += 2;
            }
            "--runtime" => {
                let raw = value(index)?;
                cfg.runtime = HarnessKind::parse(raw).ok_or_else(|| {
                    format!(
                        "unsupported runtime: {raw}. Expected one of: {}",
                        HarnessKind::names().join(", ")
                    )
                })?;
                index += 2;
            }
            "--max-agents" => {
                cfg.max_agents = value(index)?
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or("--max-agents must be a positive integer")?;
                index += 2;
            }
            "--poll-ms" => {
                cfg.poll_ms = value(index)?
                    .parse::<u64>()
                    .map_err(|_| "--poll-ms must be an integer")?;
                index += 2;
            }
            "--project-dir" => {
                cfg.project_dir = PathBuf::from(value(index)?);
                index += 2;
            }
            "--agent-bin" => {
                cfg.agent_bin = Some(value(index)?.clone());
                index += 2;
            }
            "--mcp-bin" => {
                cfg.mcp_bin = Some(value(index)?.clone());
                index += 2;
            }
            other => {
                return Err(format!("unknown option: {other}\n\n{}", usage()));
            }
        }
    }

    if cfg.agent_bin.is_none() {
        cfg.agent_bin = match cfg.runtime {
            HarnessKind::Claude => env_var("CORD_CLAUDE_BIN"),
            HarnessKind::Codex => env_var("CORD_CODEX_BIN"),
        };
    }

    Ok(cfg)
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let Some(command) = args.first() else {
        eprintln!("{}", usage());
        std::process::exit(2);
    };

    match command.as_str() {
        "run" => {
            let cfg = match parse_run_args(&args[1..]) {
                Ok(cfg) => cfg,
                Err(message) => {
                    eprintln!("{message}");
                    std::process::exit(2);
                }
            };
            let mut engine = match engine::Engine::new(cfg) {
                Ok(engine) => engine,
                Err(message) => {
                    eprintln!("cord: {message}");
                    std::process::exit(2);
                }
            };
            match engine.run() {
                Ok(root) => {
                    if root.status == NodeStatus::Complete {
                        if let Some(result) = root.result {
                            println!("{result}");
                        }
                        std::process::exit(0);
                    }
                    std::process::exit(1);
                }
                Err(message) => {
                    eprintln!("cord: {message}");
                    std::process::exit(1);
                }
            }
        }
        "--help" | "-h" | "help" => {
            println!("{}", usage());
        }
        other => {
            eprintln!("unknown command: {other}\n\n{}", usage());
            std::process::exit(2);
        }
    }
}
