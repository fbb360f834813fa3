//! Error types for the execution log
//!
//! Provides error handling for:
//! - Store I/O (append, read, clear)
//! - Record decoding (malformed text, skipped by readers)
//! - Event lookups (missing or mistyped ids)

use crate::record::{LogId, RecordKind};
use std::path::PathBuf;

/// Errors from the log store and id allocator
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error on the log or counter file
    #[error("io error on {path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Counter file does not hold a decimal integer
    #[error("corrupt id counter in {path}: {value:?}")]
    CorruptCounter {
        /// Counter file
        path: PathBuf,
        /// Raw content
        value: String,
    },

    /// Search pattern failed to compile
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Event projection error
    #[error(transparent)]
    Event(#[from] EventError),
}

impl StoreError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reasons a record chunk is not well-formed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Chunk has no lines
    #[error("empty record")]
    Empty,

    /// First line is not `[#<id>] [<timestamp>]`
    #[error("missing id line")]
    MissingIdLine,

    /// Timestamp is not RFC 3339
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// `Event-Type:` names no known kind
    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    /// Header line does not match the kind's pattern
    #[error("header does not match {kind}: {header:?}")]
    BadHeader {
        /// Declared kind
        kind: RecordKind,
        /// Raw header line
        header: String,
    },

    /// Required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Numeric field does not parse
    #[error("invalid value for {field}: {value:?}")]
    InvalidNumber {
        /// Field label
        field: &'static str,
        /// Raw value
        value: String,
    },
}

/// Errors from the event projection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// No record with this id
    #[error("log #{0} not found")]
    NotFound(LogId),

    /// The id exists but is not a start record
    #[error("log #{id} is a {kind} record, not an event start")]
    NotAStart {
        /// Requested id
        id: LogId,
        /// Actual kind
        kind: RecordKind,
    },

    /// The id exists but is not an event step
    #[error("log #{id} is a {kind} record, not an event step")]
    NotAStep {
        /// Requested id
        id: LogId,
        /// Actual kind
        kind: RecordKind,
    },
}

impl EventError {
    /// Whether the id was missing entirely
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for event lookups
pub type EventResult<T> = Result<T, EventError>;
