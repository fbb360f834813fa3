//! Process runner
//!
//! Spawns a command line or a script file, copies its output to the
//! terminal as it arrives and keeps a copy for the log.
//!
//! ```text
//! child stdout ──► pump ──► terminal stdout
//!                    └────► captured stdout
//! child stderr ──► pump ──► terminal stderr
//!                    └────► captured stderr
//! ```

use cmdflow_log::session::SESSION_PID_ENV;
use cmdflow_log::SessionInfo;
use cmdflow_script::ScriptType;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

/// Exit code recorded when a process ends without one (killed by a signal)
pub const NO_EXIT_CODE: i32 = -1;

/// What a finished process left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code, or [`NO_EXIT_CODE`]
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl RunOutput {
    /// Whether the process exited zero
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command running `line` through the shell of `script_type`
#[must_use]
pub fn shell_command(script_type: ScriptType, shell: Option<&str>, line: &str) -> Command {
    match script_type {
        ScriptType::Bash => {
            let mut command = Command::new(shell.unwrap_or("sh"));
            command.arg("-c").arg(line);
            command
        }
        ScriptType::Powershell => {
            let mut command = Command::new(shell.unwrap_or("powershell"));
            command.args(["-NoProfile", "-Command", line]);
            command
        }
    }
}

/// Command running the script file at `path` with the interpreter of `script_type`
#[must_use]
pub fn script_command(script_type: ScriptType, shell: Option<&str>, path: &Path) -> Command {
    match script_type {
        ScriptType::Bash => {
            let mut command = Command::new(shell.unwrap_or("bash"));
            command.arg(path);
            command
        }
        ScriptType::Powershell => {
            let mut command = Command::new(shell.unwrap_or("powershell"));
            command
                .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                .arg(path);
            command
        }
    }
}

/// Export the session pid so records written by the child join this session
pub fn inherit_session(command: &mut Command, session: &SessionInfo) {
    command.env(SESSION_PID_ENV, session.pid.to_string());
}

/// Run to completion, teeing output to this process's stdout/stderr
pub async fn run_teed(command: Command) -> io::Result<RunOutput> {
    run_with_sinks(command, tokio::io::stdout(), tokio::io::stderr()).await
}

/// Run to completion, copying output into the given sinks while capturing it
pub async fn run_with_sinks<O, E>(mut command: Command, out: O, err: E) -> io::Result<RunOutput>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut child = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stderr not captured"))?;

    let (stdout, stderr, status) = tokio::join!(pump(stdout, out), pump(stderr, err), child.wait());
    let status = status?;
    let output = RunOutput {
        exit_code: status.code().unwrap_or(NO_EXIT_CODE),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        stdout: String::from_utf8_lossy(&stdout?).into_owned(),
        stderr: String::from_utf8_lossy(&stderr?).into_owned(),
    };
    tracing::debug!(exit_code = output.exit_code, duration_ms = output.duration_ms, "process finished");
    Ok(output)
}

async fn pump<R, W>(mut source: R, mut sink: W) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        captured.extend_from_slice(&chunk[..n]);
        // A closed terminal must not kill the child's capture.
        if sink.write_all(&chunk[..n]).await.is_ok() {
            let _ = sink.flush().await;
        }
    }
    Ok(captured)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let command = shell_command(ScriptType::Bash, None, "echo out; echo err >&2; exit 3");
        let mut out = Vec::new();
        let mut err = Vec::new();
        let output = run_with_sinks(command, &mut out, &mut err).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(out, b"out\n");
        assert_eq!(err, b"err\n");
    }

    #[tokio::test]
    async fn runs_script_files_with_session_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sh");
        std::fs::write(&path, format!("echo ${SESSION_PID_ENV}\n")).unwrap();
        let mut command = script_command(ScriptType::Bash, Some("sh"), &path);
        inherit_session(
            &mut command,
            &SessionInfo {
                pid: 4242,
                ..SessionInfo::default()
            },
        );
        let output = run_with_sinks(command, tokio::io::sink(), tokio::io::sink())
            .await
            .unwrap();
        assert_eq!(output.stdout, "4242\n");
    }

    #[tokio::test]
    async fn missing_program_is_an_io_error() {
        let command = Command::new("/definitely/not/a/program");
        assert!(run_with_sinks(command, tokio::io::sink(), tokio::io::sink())
            .await
            .is_err());
    }
}
