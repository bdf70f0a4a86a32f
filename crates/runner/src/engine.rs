#![forbid(unsafe_code)]

//! The coordination loop: poll subprocess exits, reconcile signals, trigger
//! synthesis relaunches, launch ready nodes, render. The store is the single
//! source of truth; every tick re-reads it instead of caching node state.

use crate::RunConfig;
use crate::executors::{self, AgentLaunchRequest};
use crate::process::{ProcessManager, implicit_result};
use crate::prompt::{build_agent_prompt, build_synthesis_prompt};
use crate::tree::{frame_hash, render_frame};
use cord_core::ids::NodeId;
use cord_core::model::{AskTarget, NodeKind, NodeStatus, Returns};
use cord_storage::{NodeRow, SqliteStore};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::time::Duration;

const RUN_DIR: &str = ".cord";
const NO_ANSWER: &str = "(no answer)";

pub(crate) struct Engine {
    cfg: RunConfig,
    store: SqliteStore,
    processes: ProcessManager,
    run_dir: PathBuf,
    db_path: PathBuf,
    mcp_bin: String,
    human_rx: Receiver<String>,
    last_frame_hash: u64,
}

impl Engine {
    pub(crate) fn new(cfg: RunConfig) -> Result<Self, String> {
        let run_dir = cfg.project_dir.join(RUN_DIR);
        std::fs::create_dir_all(&run_dir)
            .map_err(|e| format!("create {}: {e}", run_dir.display()))?;

        // Fresh store per run; stale WAL sidecars go with it.
        let db_path = run_dir.join(cord_storage::DB_FILE);
        for suffix in ["", "-wal", "-shm"] {
            let stale = run_dir.join(format!("{}{suffix}", cord_storage::DB_FILE));
            if stale.exists() {
                std::fs::remove_file(&stale)
                    .map_err(|e| format!("remove stale {}: {e}", stale.display()))?;
            }
        }
        let store = SqliteStore::open(&run_dir).map_err(|e| e.to_string())?;

        let mcp_bin = match crate::bin_detect::resolve_tool_server_bin(
            cfg.mcp_bin.clone(),
            "cord_mcp",
        ) {
            Some(path) => path,
            None => {
                eprintln!(
                    "cord: cord_mcp not found next to this binary or on PATH; \
                     agents will fail to dial their tool server"
                );
                "cord_mcp".to_string()
            }
        };

        // One persistent reader owns stdin; human asks drain the channel with
        // or without a timeout.
        let (tx, human_rx) = channel::<String>();
        std::thread::spawn(move || {
            use std::io::BufRead;
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            cfg,
            store,
            processes: ProcessManager::default(),
            run_dir,
            db_path,
            mcp_bin,
            human_rx,
            last_frame_hash: 0,
        })
    }

    pub(crate) fn run(&mut self) -> Result<NodeRow, String> {
        eprintln!("cord run: {}", self.cfg.goal);
        eprintln!();

        let root_id = self
            .store
            .create_root(&self.cfg.goal, None, Returns::Text)
            .map_err(|e| e.to_string())?;

        loop {
            self.reap_completions();
            self.reconcile_signals();
            self.synthesis_pass();
            self.launch_ready()?;
            self.render(false);

            if self.store.is_tree_complete().map_err(|e| e.to_string())? {
                break;
            }
            if self.is_stuck()? {
                break;
            }
            std::thread::sleep(Duration::from_millis(self.cfg.poll_ms));
        }

        // Cancelled nodes may still have processes draining; do not leave
        // orphans behind.
        if self.processes.active_count() > 0 {
            self.processes.signal_all();
            std::thread::sleep(Duration::from_millis(200));
            let _ = self.processes.poll_completions();
        }

        self.render(true);
        eprintln!("Done.");

        self.store
            .get(root_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "root node vanished from the store".to_string())
    }

    /// Reap rules: a tool-completed node needs nothing; a signal outcome
    /// (cancelled/paused) is honored regardless of exit state; an active node
    /// that exited clean with output completes implicitly; everything else
    /// failed.
    fn reap_completions(&mut self) {
        for completion in self.processes.poll_completions() {
            let id = completion.node_id;
            let row = match self.store.get(id) {
                Ok(Some(row)) => row,
                Ok(None) => continue,
                Err(err) => {
                    eprintln!("cord: read {id} at reap: {err}");
                    continue;
                }
            };
            if row.status != NodeStatus::Active {
                continue;
            }

            if completion.exit_ok && !completion.stdout.trim().is_empty() {
                let result = implicit_result(&completion.stdout);
                if let Err(err) =
                    self.store
                        .transition(id, NodeStatus::Active, NodeStatus::Complete, Some(&result))
                {
                    // Lost races mean the agent's own complete landed first.
                    eprintln!("cord: implicit completion of {id} skipped: {err}");
                }
            } else {
                match completion.exit_code {
                    Some(code) => eprintln!("cord: {id} exited with code {code} and no result"),
                    None => eprintln!("cord: {id} was terminated by a signal"),
                }
                if let Err(err) =
                    self.store
                        .transition(id, NodeStatus::Active, NodeStatus::Failed, None)
                {
                    eprintln!("cord: failing {id} skipped: {err}");
                }
            }
        }
    }

    /// Tool servers only mark the store; delivering SIGTERM to a process
    /// whose node went `cancelled` or `paused` is this loop's job.
    fn reconcile_signals(&mut self) {
        for id in self.processes.active_ids() {
            let status = match self.store.get(id) {
                Ok(Some(row)) => row.status,
                _ => continue,
            };
            if matches!(status, NodeStatus::Cancelled | NodeStatus::Paused) {
                self.processes.signal(id);
            }
        }
    }

    /// Parents whose children all terminated either relaunch for synthesis or
    /// fail when no child succeeded.
    fn synthesis_pass(&mut self) {
        let candidates = match self.store.synthesis_candidates() {
            Ok(candidates) => candidates,
            Err(err) => {
                eprintln!("cord: synthesis scan failed: {err}");
                return;
            }
        };
        for candidate in candidates {
            let outcome = if candidate.any_child_complete {
                self.store.begin_synthesis(candidate.id)
            } else {
                self.store.mark_synthesis_failed(candidate.id)
            };
            if let Err(err) = outcome {
                eprintln!("cord: synthesis of {} skipped: {err}", candidate.id);
            }
        }
    }

    fn launch_ready(&mut self) -> Result<(), String> {
        let ready = self.store.ready_set().map_err(|e| e.to_string())?;
        for row in ready {
            if self.processes.active_count() >= self.cfg.max_agents {
                break;
            }
            if self.processes.contains(row.id) {
                continue;
            }
            if row.kind == NodeKind::Ask && row.ask_target == Some(AskTarget::Human) {
                self.handle_human_ask(&row);
                continue;
            }
            self.launch_node(&row);
        }
        Ok(())
    }

    fn launch_node(&mut self, row: &NodeRow) {
        let prompt = if row.synthesized {
            build_synthesis_prompt(&self.store, row.id)
        } else {
            build_agent_prompt(&self.store, row.id)
        };
        let prompt = match prompt {
            Ok(prompt) => prompt,
            Err(err) => {
                eprintln!("cord: prompt for {} failed: {err}", row.id);
                return;
            }
        };

        // pending -> active happens before the child exists; a lost race
        // means another tick got here first.
        if let Err(err) =
            self.store
                .transition(row.id, NodeStatus::Pending, NodeStatus::Active, None)
        {
            eprintln!("cord: launch of {} skipped: {err}", row.id);
            return;
        }

        let slug = executors::node_file_slug(row.id);
        let out_path = self.run_dir.join(format!("agent-{slug}.out"));
        let err_path = self.run_dir.join(format!("agent-{slug}.err"));
        let request = AgentLaunchRequest {
            node_id: row.id,
            prompt: &prompt,
            db_path: &self.db_path,
            run_dir: &self.run_dir,
            project_dir: &self.cfg.project_dir,
            model: &self.cfg.model,
            max_budget_usd: self.cfg.max_budget_usd,
            agent_bin: self.cfg.agent_bin.as_deref(),
            mcp_bin: &self.mcp_bin,
            out_path: &out_path,
            err_path: &err_path,
        };

        match executors::spawn_agent(self.cfg.runtime, &request) {
            Ok(child) => {
                self.processes.register(row.id, child, out_path);
            }
            Err(diagnostic) => {
                eprintln!("cord: launch of {} failed: {diagnostic}", row.id);
                if let Err(err) =
                    self.store
                        .transition(row.id, NodeStatus::Active, NodeStatus::Failed, None)
                {
                    eprintln!("cord: failing {} skipped: {err}", row.id);
                }
            }
        }
    }

    /// Human asks never get a subprocess: the node goes active, the question
    /// goes to the operator channel, and the answer becomes the result.
    fn handle_human_ask(&mut self, row: &NodeRow) {
        if let Err(err) =
            self.store
                .transition(row.id, NodeStatus::Pending, NodeStatus::Active, None)
        {
            eprintln!("cord: ask {} skipped: {err}", row.id);
            return;
        }
        self.render(false);

        let bold = "\x1b[1m";
        let cyan = "\x1b[36m";
        let dim = "\x1b[2m";
        let reset = "\x1b[0m";

        eprintln!();
        eprintln!("{cyan}{bold}? {}{reset}", row.goal);
        let prompt = row.prompt.clone().unwrap_or_default();
        for line in prompt.lines() {
            if line != row.goal {
                eprintln!("  {dim}{line}{reset}");
            }
        }
        eprintln!();
        eprint!("{cyan}> {reset}");

        let default = prompt_field(&prompt, "Default:");
        let timeout = prompt_field(&prompt, "Timeout:")
            .and_then(|raw| raw.trim_end_matches('s').parse::<u64>().ok());

        let answer = match timeout {
            Some(secs) => match self.human_rx.recv_timeout(Duration::from_secs(secs)) {
                Ok(line) => Some(line.trim().to_string()),
                Err(RecvTimeoutError::Timeout) => {
                    eprintln!();
                    eprintln!("cord: ask {} timed out after {secs}s", row.id);
                    match default {
                        Some(_) => None,
                        None => {
                            // No default to fall back on: the ask fails.
                            if let Err(err) = self.store.transition(
                                row.id,
                                NodeStatus::Active,
                                NodeStatus::Failed,
                                None,
                            ) {
                                eprintln!("cord: failing ask {} skipped: {err}", row.id);
                            }
                            return;
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.human_rx.recv().ok().map(|line| line.trim().to_string()),
        };

        let resolved = answer
            .filter(|a| !a.is_empty())
            .or(default)
            .unwrap_or_else(|| NO_ANSWER.to_string());
        if let Err(err) = self.store.transition(
            row.id,
            NodeStatus::Active,
            NodeStatus::Complete,
            Some(&resolved),
        ) {
            eprintln!("cord: answering ask {} skipped: {err}", row.id);
        }
    }

    /// Nothing running, nothing ready, tree not terminal: unmet dependencies
    /// nobody can satisfy any more.
    fn is_stuck(&self) -> Result<bool, String> {
        if self.processes.active_count() > 0 {
            return Ok(false);
        }
        if !self.store.ready_set().map_err(|e| e.to_string())?.is_empty() {
            return Ok(false);
        }
        let open: Vec<NodeId> = self
            .store
            .all_nodes()
            .map_err(|e| e.to_string())?
            .into_iter()
            .filter(|row| !row.status.is_terminal())
            .map(|row| row.id)
            .collect();
        if open.is_empty() {
            return Ok(false);
        }
        let rendered: Vec<String> = open.iter().map(|id| id.to_string()).collect();
        eprintln!(
            "cord: stuck — {} open node(s) with unmet dependencies: {}",
            open.len(),
            rendered.join(", ")
        );
        Ok(true)
    }

    fn render(&mut self, force: bool) {
        let tree = match self.store.tree() {
            Ok(Some(tree)) => tree,
            _ => return,
        };
        let running = self.processes.active_ids();
        let hash = frame_hash(&tree, &running);
        if !force && hash == self.last_frame_hash {
            return;
        }
        self.last_frame_hash = hash;
        eprintln!("{}", render_frame(&tree, &running));
    }
}

/// Extracts `<key> value` lines the ask tool folded into the prompt.
fn prompt_field(prompt: &str, key: &str) -> Option<String> {
    prompt.lines().find_map(|line| {
        line.strip_prefix(key)
            .map(|rest| rest.trim().to_string())
            .filter(|rest| !rest.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::prompt_field;

    #[test]
    fn prompt_field_extracts_default_and_timeout() {
        let prompt = "pick a color\nOptions: red, blue\nDefault: red\nTimeout: 30s";
        assert_eq!(prompt_field(prompt, "Default:").as_deref(), Some("red"));
        assert_eq!(prompt_field(prompt, "Timeout:").as_deref(), Some("30s"));
        assert_eq!(prompt_field(prompt, "Options:").as_deref(), Some("red, blue"));
        assert_eq!(prompt_field(prompt, "Missing:"), None);
    }
}
