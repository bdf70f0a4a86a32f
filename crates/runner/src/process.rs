#![forbid(unsafe_code)]

//! Live subprocess handles for active nodes. The store stays authoritative
//! for node state; this table only maps node ids to OS processes and their
//! capture files.

use cord_core::ids::NodeId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Child;

/// Implicit-completion results are capped so a chatty agent cannot dump its
/// whole transcript into the store.
pub(crate) const RESULT_CAP_CHARS: usize = 500;

pub(crate) struct ProcessInfo {
    child: Child,
    out_path: PathBuf,
}

pub(crate) struct Completion {
    pub(crate) node_id: NodeId,
    pub(crate) exit_ok: bool,
    pub(crate) exit_code: Option<i32>,
    pub(crate) stdout: String,
}

#[derive(Default)]
pub(crate) struct ProcessManager {
    processes: HashMap<NodeId, ProcessInfo>,
}

impl ProcessManager {
    pub(crate) fn register(&mut self, node_id: NodeId, child: Child, out_path: PathBuf) {
        self.processes.insert(node_id, ProcessInfo { child, out_path });
    }

    pub(crate) fn contains(&self, node_id: NodeId) -> bool {
        self.processes.contains_key(&node_id)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.processes.len()
    }

    pub(crate) fn active_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.processes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Non-blocking sweep for exited processes. Capture files are read after
    /// the exit is observed, so the redirected output is complete.
    pub(crate) fn poll_completions(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        for (node_id, info) in self.processes.iter_mut() {
            match info.child.try_wait() {
                Ok(Some(status)) => {
                    let stdout = std::fs::read_to_string(&info.out_path).unwrap_or_default();
                    done.push(Completion {
                        node_id: *node_id,
                        exit_ok: status.success(),
                        exit_code: status.code(),
                        stdout,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    eprintln!("cord: wait on {node_id} failed: {err}");
                    done.push(Completion {
                        node_id: *node_id,
                        exit_ok: false,
                        exit_code: None,
                        stdout: String::new(),
                    });
                }
            }
        }
        for completion in &done {
            self.processes.remove(&completion.node_id);
        }
        done
    }

    /// Terminate signal for cancel and pause. The exit itself is observed by
    /// the next `poll_completions` sweep.
    pub(crate) fn signal(&mut self, node_id: NodeId) -> bool {
        let Some(info) = self.processes.get_mut(&node_id) else {
            return false;
        };
        terminate(&mut info.child)
    }

    pub(crate) fn signal_all(&mut self) {
        for info in self.processes.values_mut() {
            terminate(&mut info.child);
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> bool {
    child.kill().is_ok()
}

/// Trim and cap stdout used as an implicit result.
pub(crate) fn implicit_result(stdout: &str) -> String {
    let trimmed = stdout.trim();
    if trimmed.chars().count() <= RESULT_CAP_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().take(RESULT_CAP_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn temp_dir(prefix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "{prefix}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[cfg(unix)]
    #[test]
    fn poll_reads_the_capture_file_after_exit() {
        let dir = temp_dir("cord_process_poll");
        let out_path = dir.join("agent-1.out");
        let out_file = std::fs::File::create(&out_path).expect("create capture");

        let child = Command::new("sh")
            .arg("-c")
            .arg("printf 'hello from the agent'")
            .stdout(Stdio::from(out_file))
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sh");

        let node = cord_core::ids::NodeId::from_raw(1).expect("id");
        let mut manager = ProcessManager::default();
        manager.register(node, child, out_path);

        let mut completions = Vec::new();
        for _ in 0..100 {
            completions = manager.poll_completions();
            if !completions.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(completions.len(), 1);
        assert!(completions[0].exit_ok);
        assert_eq!(completions[0].stdout, "hello from the agent");
        assert_eq!(manager.active_count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn signal_terminates_a_sleeping_child() {
        let dir = temp_dir("cord_process_signal");
        let out_path = dir.join("agent-2.out");
        let out_file = std::fs::File::create(&out_path).expect("create capture");

        let child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .stdout(Stdio::from(out_file))
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sh");

        let node = cord_core::ids::NodeId::from_raw(2).expect("id");
        let mut manager = ProcessManager::default();
        manager.register(node, child, out_path);

        assert!(manager.signal(node), "signal delivery");

        let mut completions = Vec::new();
        for _ in 0..100 {
            completions = manager.poll_completions();
            if !completions.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(completions.len(), 1);
        assert!(!completions[0].exit_ok, "SIGTERM exit is not success");
    }

    #[test]
    fn implicit_result_trims_and_caps() {
        assert_eq!(implicit_result("  hi  \n"), "hi");
        let long = "x".repeat(RESULT_CAP_CHARS + 100);
        assert_eq!(implicit_result(&long).chars().count(), RESULT_CAP_CHARS);
    }
}
