//! Log record model
//!
//! Every entry in the store is a [`LogRecord`]: a shared header (id,
//! timestamp, session) plus a kind-specific [`Payload`]. Step and end
//! payloads carry the id of the start record that owns their family.

use crate::session::SessionInfo;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier shared by every record kind in one store.
///
/// Ids are strictly increasing in write order while the counter file is
/// healthy; see [`crate::IdAllocator`] for the fallback behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub u64);

impl LogId {
    /// Raw integer value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LogId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(LogId)
    }
}

impl From<u64> for LogId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Family a start/step/end record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FamilyKind {
    /// Script execution events
    Event,
    /// Batch command events
    Batch,
}

/// Discriminant of a record, as written on the `Event-Type:` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// A standalone command run
    Single,
    /// Opens a script execution event
    EventStart,
    /// One step of a script execution event
    EventStep,
    /// Closes a script execution event
    EventEnd,
    /// Opens a batch
    BatchStart,
    /// One sub-command of a batch
    BatchStep,
    /// Closes a batch
    BatchEnd,
}

impl RecordKind {
    /// All kinds, in declaration order
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Single,
        RecordKind::EventStart,
        RecordKind::EventStep,
        RecordKind::EventEnd,
        RecordKind::BatchStart,
        RecordKind::BatchStep,
        RecordKind::BatchEnd,
    ];

    /// Wire name used on the `Event-Type:` line
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Single => "single",
            RecordKind::EventStart => "event-start",
            RecordKind::EventStep => "event-step",
            RecordKind::EventEnd => "event-end",
            RecordKind::BatchStart => "batch-start",
            RecordKind::BatchStep => "batch-step",
            RecordKind::BatchEnd => "batch-end",
        }
    }

    /// Family of a start/step/end kind; `None` for singles
    #[must_use]
    pub const fn family(self) -> Option<FamilyKind> {
        match self {
            RecordKind::Single => None,
            RecordKind::EventStart | RecordKind::EventStep | RecordKind::EventEnd => {
                Some(FamilyKind::Event)
            }
            RecordKind::BatchStart | RecordKind::BatchStep | RecordKind::BatchEnd => {
                Some(FamilyKind::Batch)
            }
        }
    }

    /// `event-start` or `batch-start`
    #[inline]
    #[must_use]
    pub const fn is_start(self) -> bool {
        matches!(self, RecordKind::EventStart | RecordKind::BatchStart)
    }

    /// `event-step` or `batch-step`
    #[inline]
    #[must_use]
    pub const fn is_step(self) -> bool {
        matches!(self, RecordKind::EventStep | RecordKind::BatchStep)
    }

    /// `event-end` or `batch-end`
    #[inline]
    #[must_use]
    pub const fn is_end(self) -> bool {
        matches!(self, RecordKind::EventEnd | RecordKind::BatchEnd)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == trimmed)
            .ok_or_else(|| trimmed.to_string())
    }
}

/// A standalone command run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleRun {
    /// Registered command name (or the program name for ad-hoc runs)
    pub name: String,
    /// Command line that was actually executed
    pub command: String,
    /// Process exit code
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Opens a script execution event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStart {
    /// Script or workflow name
    pub name: String,
    /// Script type (`bash`, `powershell`)
    pub script_type: String,
    /// Declared number of steps
    pub total_steps: u32,
    /// Full script text, kept for replay
    pub script: Option<String>,
}

/// One step of a script execution event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStep {
    /// Owning `event-start`
    pub parent: LogId,
    /// Caller-supplied step number (1-based)
    pub step_number: u32,
    /// Step label
    pub name: String,
    /// Generated code for this step
    pub code: Option<String>,
    /// Written ahead of execution from the workflow plan, not by the running script
    #[serde(default)]
    pub planned: bool,
}

/// Closes a script execution event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnd {
    /// Owning `event-start`
    pub parent: LogId,
    /// Script or workflow name
    pub name: String,
    /// Exit code of the script
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Opens a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStart {
    /// Number of sub-commands
    pub total: u32,
    /// Composite command line as typed
    pub command_line: String,
}

/// One sub-command of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStep {
    /// Owning `batch-start`
    pub parent: LogId,
    /// Position in the batch (1-based)
    pub step_number: u32,
    /// Literal sub-command text
    pub command: String,
    /// Exit code of the sub-invocation
    pub exit_code: i32,
    /// Whether the sub-invocation succeeded
    pub success: bool,
}

/// Closes a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnd {
    /// Owning `batch-start`
    pub parent: LogId,
    /// Number of sub-commands run
    pub total: u32,
    /// Number that exited zero
    pub successful: u32,
    /// Number that failed
    pub failed: u32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Kind-specific record content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Payload {
    /// `single`
    Single(SingleRun),
    /// `event-start`
    EventStart(EventStart),
    /// `event-step`
    EventStep(EventStep),
    /// `event-end`
    EventEnd(EventEnd),
    /// `batch-start`
    BatchStart(BatchStart),
    /// `batch-step`
    BatchStep(BatchStep),
    /// `batch-end`
    BatchEnd(BatchEnd),
}

impl Payload {
    /// Discriminant of this payload
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Payload::Single(_) => RecordKind::Single,
            Payload::EventStart(_) => RecordKind::EventStart,
            Payload::EventStep(_) => RecordKind::EventStep,
            Payload::EventEnd(_) => RecordKind::EventEnd,
            Payload::BatchStart(_) => RecordKind::BatchStart,
            Payload::BatchStep(_) => RecordKind::BatchStep,
            Payload::BatchEnd(_) => RecordKind::BatchEnd,
        }
    }

    /// Owning start record for step/end payloads
    #[must_use]
    pub const fn parent(&self) -> Option<LogId> {
        match self {
            Payload::EventStep(step) => Some(step.parent),
            Payload::EventEnd(end) => Some(end.parent),
            Payload::BatchStep(step) => Some(step.parent),
            Payload::BatchEnd(end) => Some(end.parent),
            Payload::Single(_) | Payload::EventStart(_) | Payload::BatchStart(_) => None,
        }
    }

    /// Step number for step payloads
    #[must_use]
    pub const fn step_number(&self) -> Option<u32> {
        match self {
            Payload::EventStep(step) => Some(step.step_number),
            Payload::BatchStep(step) => Some(step.step_number),
            _ => None,
        }
    }

    /// Exit code carried by singles, ends and batch steps
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Payload::Single(run) => Some(run.exit_code),
            Payload::EventEnd(end) => Some(end.exit_code),
            Payload::BatchStep(step) => Some(step.exit_code),
            Payload::BatchEnd(end) => Some(if end.failed == 0 { 0 } else { 1 }),
            _ => None,
        }
    }
}

/// The atomic unit appended to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Store-wide id
    pub id: LogId,
    /// Write time
    pub timestamp: DateTime<FixedOffset>,
    /// Process context captured at write time
    pub session: SessionInfo,
    /// Kind-specific content
    #[serde(flatten)]
    pub payload: Payload,
}

impl LogRecord {
    /// Discriminant of this record
    #[inline]
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    /// Owning start record, for step and end kinds
    #[inline]
    #[must_use]
    pub fn parent_id(&self) -> Option<LogId> {
        self.payload.parent()
    }

    /// Step number, for step kinds
    #[inline]
    #[must_use]
    pub fn step_number(&self) -> Option<u32> {
        self.payload.step_number()
    }

    /// Payload as a single run
    #[must_use]
    pub fn as_single(&self) -> Option<&SingleRun> {
        match &self.payload {
            Payload::Single(run) => Some(run),
            _ => None,
        }
    }

    /// Payload as an event start
    #[must_use]
    pub fn as_event_start(&self) -> Option<&EventStart> {
        match &self.payload {
            Payload::EventStart(start) => Some(start),
            _ => None,
        }
    }

    /// Payload as an event step
    #[must_use]
    pub fn as_event_step(&self) -> Option<&EventStep> {
        match &self.payload {
            Payload::EventStep(step) => Some(step),
            _ => None,
        }
    }

    /// Short human-readable title (command name, script name, batch summary)
    #[must_use]
    pub fn title(&self) -> String {
        match &self.payload {
            Payload::Single(run) => run.name.clone(),
            Payload::EventStart(start) => start.name.clone(),
            Payload::EventStep(step) => step.name.clone(),
            Payload::EventEnd(end) => end.name.clone(),
            Payload::BatchStart(start) => start.command_line.clone(),
            Payload::BatchStep(step) => step.command.clone(),
            Payload::BatchEnd(end) => format!("{} commands", end.total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_roundtrip() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>(), Ok(kind));
        }
        assert!("event-middle".parse::<RecordKind>().is_err());
    }

    #[test]
    fn kind_families() {
        assert_eq!(RecordKind::Single.family(), None);
        assert_eq!(RecordKind::EventStep.family(), Some(FamilyKind::Event));
        assert_eq!(RecordKind::BatchEnd.family(), Some(FamilyKind::Batch));
        assert!(RecordKind::BatchStart.is_start());
        assert!(!RecordKind::EventEnd.is_step());
    }

    #[test]
    fn log_id_parses_hash_prefix() {
        assert_eq!("#42".parse::<LogId>().unwrap(), LogId(42));
        assert_eq!(" 7 ".parse::<LogId>().unwrap(), LogId(7));
        assert!("x".parse::<LogId>().is_err());
    }

    #[test]
    fn payload_parent_only_on_steps_and_ends() {
        let step = Payload::EventStep(EventStep {
            parent: LogId(3),
            step_number: 1,
            name: "build".into(),
            code: None,
            planned: false,
        });
        assert_eq!(step.parent(), Some(LogId(3)));
        assert_eq!(step.step_number(), Some(1));

        let start = Payload::BatchStart(BatchStart {
            total: 2,
            command_line: "a + b".into(),
        });
        assert_eq!(start.parent(), None);
    }
}
