#![forbid(unsafe_code)]

//! Locates the agent CLI and tool-server binaries. Agent binaries follow the
//! usual PATH lookup; `cord_mcp` prefers the directory of the running
//! executable so a plain cargo build works without installation.

use std::path::{Path, PathBuf};

fn executable(candidate: PathBuf) -> Option<PathBuf> {
    let meta = std::fs::metadata(&candidate).ok()?;
    if !meta.is_file() {
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return None;
        }
    }
    Some(candidate)
}

fn first_executable<I>(name: &str, dirs: I) -> Option<String>
where
    I: IntoIterator<Item = PathBuf>,
{
    if name.trim().is_empty() {
        return None;
    }
    dirs.into_iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .find_map(|dir| executable(dir.join(name)))
        .map(|path| path.to_string_lossy().to_string())
}

fn path_dirs() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|raw| std::env::split_paths(&raw).collect())
        .unwrap_or_default()
}

/// Agent CLI lookup. An explicit override is trusted untouched (it may be a
/// shim that only exists once spawned); otherwise the runtime's default name
/// is searched on PATH.
pub(crate) fn resolve_agent_bin(explicit: Option<&str>, default_name: &str) -> Option<String> {
    match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(path) => Some(path.to_string()),
        None => first_executable(default_name, path_dirs()),
    }
}

/// Tool-server lookup: explicit flag/env first, then next to the running
/// executable (the usual cargo target layout), then PATH.
pub(crate) fn resolve_tool_server_bin(explicit: Option<String>, name: &str) -> Option<String> {
    if let Some(path) = explicit
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        return Some(path);
    }
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|current| current.parent().map(Path::to_path_buf));
    first_executable(name, sibling).or_else(|| first_executable(name, path_dirs()))
}
