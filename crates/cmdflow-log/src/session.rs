//! Process context captured with every record

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable a parent invocation sets so that its children
/// record the same session pid.
pub const SESSION_PID_ENV: &str = "CMDFLOW_SESSION_PID";

/// Who wrote a record, and from where. Captured once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session process id (the invoking shell, or the batch/script parent)
    pub pid: u32,
    /// Login name
    pub user: String,
    /// Host name
    pub host: String,
    /// Working directory
    pub cwd: String,
    /// Shell name
    pub shell: String,
}

impl SessionInfo {
    /// Capture the current process context.
    ///
    /// The pid is taken from `CMDFLOW_SESSION_PID` when a parent cmdflow
    /// invocation exported it, otherwise from the parent process (the shell
    /// the user typed into).
    #[must_use]
    pub fn capture() -> Self {
        let pid = std::env::var(SESSION_PID_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_else(parent_pid);

        Self {
            pid,
            user: env_first(&["USER", "USERNAME", "LOGNAME"]).unwrap_or_else(|| "unknown".into()),
            host: host_name(),
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            shell: shell_name(),
        }
    }

    /// `user@host`
    #[must_use]
    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

#[cfg(unix)]
fn parent_pid() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn parent_pid() -> u32 {
    std::process::id()
}

fn host_name() -> String {
    if let Some(host) = env_first(&["HOSTNAME", "COMPUTERNAME"]) {
        return host;
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

fn shell_name() -> String {
    if let Some(shell) = env_first(&["SHELL"]) {
        return Path::new(&shell)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(shell);
    }
    if env_first(&["PSModulePath"]).is_some() {
        return "powershell".into();
    }
    env_first(&["ComSpec"]).unwrap_or_else(|| "unknown".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_fills_every_field() {
        let session = SessionInfo::capture();
        assert!(!session.user.is_empty());
        assert!(!session.host.is_empty());
        assert!(!session.shell.is_empty());
    }

    #[test]
    fn user_at_host_format() {
        let session = SessionInfo {
            pid: 1,
            user: "alice".into(),
            host: "box".into(),
            cwd: "/".into(),
            shell: "bash".into(),
        };
        assert_eq!(session.user_at_host(), "alice@box");
    }
}
