//! Batch orchestration
//!
//! A composite command line such as `cmdflow run build + test + deploy prod`
//! is split at the separator token and each part runs as its own cmdflow
//! invocation, one after another:
//!
//! ```text
//! batch-start (total, line)
//!   ├─ spawn part 1 ──► batch-step 1 (exit, success)
//!   ├─ spawn part 2 ──► batch-step 2
//!   └─ ...
//! batch-end (total, successful, failed, duration)
//! ```
//!
//! A failing part does not stop the batch. The batch exits 0 only when every
//! part succeeded.

use crate::recorder::Recorder;
use crate::runner::NO_EXIT_CODE;
use async_trait::async_trait;
use cmdflow_log::session::SESSION_PID_ENV;
use cmdflow_log::{BatchEnd, BatchStart, BatchStep, LogId, Payload};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Errors starting a sub-invocation
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The program could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program path
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Result type for spawning
pub type BatchResult<T> = Result<T, BatchError>;

/// Split `tokens` at every `separator`, dropping empty parts
#[must_use]
pub fn split_batch(tokens: &[String], separator: &str) -> Vec<Vec<String>> {
    tokens
        .split(|token| token == separator)
        .filter(|part| !part.is_empty())
        .map(<[String]>::to_vec)
        .collect()
}

/// Starts one sub-invocation and waits for it
#[async_trait]
pub trait CommandSpawner: Send + Sync {
    /// Run the part's tokens, returning its exit code
    async fn spawn(&self, args: &[String]) -> BatchResult<i32>;
}

/// Spawns the cmdflow executable itself, inheriting the terminal
#[derive(Debug, Clone)]
pub struct SelfSpawner {
    program: PathBuf,
    prefix: Vec<String>,
    session_pid: u32,
}

impl SelfSpawner {
    /// Spawner for `program <prefix..> <args..>`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, prefix: Vec<String>, session_pid: u32) -> Self {
        Self {
            program: program.into(),
            prefix,
            session_pid,
        }
    }

    /// Spawner for the running executable
    pub fn current(prefix: Vec<String>, session_pid: u32) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, prefix, session_pid))
    }
}

#[async_trait]
impl CommandSpawner for SelfSpawner {
    async fn spawn(&self, args: &[String]) -> BatchResult<i32> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.prefix)
            .args(args)
            .env(SESSION_PID_ENV, self.session_pid.to_string())
            .status()
            .await
            .map_err(|source| BatchError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        Ok(status.code().unwrap_or(NO_EXIT_CODE))
    }
}

/// Outcome of one part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStepOutcome {
    /// 1-based position
    pub step_number: u32,
    /// Part as typed
    pub command: String,
    /// Exit code, `-1` when the part could not be started
    pub exit_code: i32,
}

impl BatchStepOutcome {
    /// Whether the part exited zero
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of a whole batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// `batch-start` id, when it could be recorded
    pub event: Option<LogId>,
    /// Per-part outcomes in run order
    pub steps: Vec<BatchStepOutcome>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl BatchReport {
    /// Number of parts run
    #[must_use]
    pub fn total(&self) -> u32 {
        count(self.steps.len())
    }

    /// Parts that exited zero
    #[must_use]
    pub fn successful(&self) -> u32 {
        count(self.steps.iter().filter(|s| s.success()).count())
    }

    /// Parts that failed
    #[must_use]
    pub fn failed(&self) -> u32 {
        self.total() - self.successful()
    }

    /// Process exit code for the batch
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.failed() > 0)
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Runs split parts in sequence and records them as one batch event
pub struct BatchOrchestrator<'a> {
    recorder: &'a Recorder,
    spawner: Arc<dyn CommandSpawner>,
}

impl<'a> BatchOrchestrator<'a> {
    /// Orchestrator writing through `recorder`
    #[must_use]
    pub fn new(recorder: &'a Recorder, spawner: Arc<dyn CommandSpawner>) -> Self {
        Self { recorder, spawner }
    }

    /// Run every part; never stops early
    pub async fn run(&self, parts: &[Vec<String>], command_line: &str) -> BatchReport {
        let started = Instant::now();
        let total = count(parts.len());
        let event = self.recorder.record(Payload::BatchStart(BatchStart {
            total,
            command_line: command_line.to_string(),
        }));
        tracing::info!(total, event = ?event, "batch started");

        let mut steps = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let step_number = count(index + 1);
            let command = part.join(" ");
            let exit_code = match self.spawner.spawn(part).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(error = %e, step = step_number, "batch step could not start");
                    NO_EXIT_CODE
                }
            };
            let outcome = BatchStepOutcome {
                step_number,
                command,
                exit_code,
            };
            if let Some(parent) = event {
                self.recorder.record(Payload::BatchStep(BatchStep {
                    parent,
                    step_number,
                    command: outcome.command.clone(),
                    exit_code,
                    success: outcome.success(),
                }));
            }
            steps.push(outcome);
        }

        let mut report = BatchReport {
            event,
            steps,
            duration_ms: 0,
        };
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Some(parent) = event {
            self.recorder.record(Payload::BatchEnd(BatchEnd {
                parent,
                total: report.total(),
                successful: report.successful(),
                failed: report.failed(),
                duration_ms: report.duration_ms,
            }));
        }
        tracing::info!(
            total = report.total(),
            failed = report.failed(),
            duration_ms = report.duration_ms,
            "batch finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdflow_log::{EventState, LogStore, SessionInfo};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    /// Replays canned exit codes and remembers what it was asked to run
    struct ScriptedSpawner {
        codes: Mutex<Vec<BatchResult<i32>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedSpawner {
        fn new(codes: Vec<BatchResult<i32>>) -> Self {
            Self {
                codes: Mutex::new(codes.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandSpawner for ScriptedSpawner {
        async fn spawn(&self, args: &[String]) -> BatchResult<i32> {
            self.calls.lock().unwrap().push(args.to_vec());
            self.codes.lock().unwrap().pop().unwrap_or(Ok(0))
        }
    }

    #[test]
    fn splitting_drops_empty_parts() {
        assert_eq!(
            split_batch(&tokens("+ build + + test --all +"), "+"),
            vec![tokens("build"), tokens("test --all")]
        );
        assert_eq!(split_batch(&tokens("build x"), "+"), vec![tokens("build x")]);
        assert_eq!(split_batch(&tokens("a :: b"), "::").len(), 2);
        assert!(split_batch(&[], "+").is_empty());
    }

    #[tokio::test]
    async fn continues_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(LogStore::open(dir.path()), SessionInfo::default());
        let spawner = Arc::new(ScriptedSpawner::new(vec![Ok(0), Ok(2), Ok(0)]));
        let parts = split_batch(&tokens("a + b x + c"), "+");

        let report = BatchOrchestrator::new(&recorder, spawner.clone())
            .run(&parts, "a + b x + c")
            .await;

        assert_eq!(spawner.calls.lock().unwrap().clone(), parts);
        assert_eq!((report.total(), report.successful(), report.failed()), (3, 2, 1));
        assert_eq!(report.exit_code(), 1);

        let index = recorder.store().index().unwrap();
        let family = index.family(report.event.unwrap()).unwrap();
        let steps = family.steps();
        assert_eq!(steps.len(), 3);
        let Payload::BatchStep(second) = &steps[1].payload else {
            panic!("expected batch step");
        };
        assert_eq!((second.command.as_str(), second.exit_code, second.success), ("b x", 2, false));
        let Payload::BatchEnd(end) = &family.end().unwrap().payload else {
            panic!("expected batch end");
        };
        assert_eq!((end.total, end.successful, end.failed), (3, 2, 1));
        assert_eq!(family.state(), EventState::Ended { exit_code: Some(1) });
    }

    #[tokio::test]
    async fn spawn_failures_count_as_failed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(LogStore::open(dir.path()), SessionInfo::default());
        let spawner = Arc::new(ScriptedSpawner::new(vec![Err(BatchError::Spawn {
            program: "cmdflow".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })]));
        let report = BatchOrchestrator::new(&recorder, spawner)
            .run(&[tokens("a"), tokens("b")], "a + b")
            .await;
        assert_eq!(report.steps[0].exit_code, NO_EXIT_CODE);
        assert!(report.steps[1].success());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn all_successful_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(LogStore::open(dir.path()), SessionInfo::default());
        let report = BatchOrchestrator::new(&recorder, Arc::new(ScriptedSpawner::new(Vec::new())))
            .run(&[tokens("a"), tokens("b")], "a + b")
            .await;
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.failed(), 0);
    }
}
