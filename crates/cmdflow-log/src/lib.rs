//! cmdflow execution log
//!
//! A flat, human-readable text file that behaves like a relational log:
//! heterogeneous record kinds share one append stream, one id counter, and
//! link to each other through `Parent-Event` references.
//!
//! # Architecture
//!
//! ```text
//! IdAllocator ──► LogStore::append ──► codec::encode ──► history.log
//!                                                           │
//!             EventIndex ◄── codec::decode_all ◄────────────┘
//! ```
//!
//! The store is append-only. Reads re-parse the whole file and skip records
//! that do not match their kind's layout; [`EventIndex`] is the in-memory
//! projection that groups start/step/end families by parent id.
//!
//! # Single writer
//!
//! Neither the log file nor the counter file is locked. Two processes
//! appending at the same time may interleave records or race on the counter.
//! Callers that need multi-process safety must serialize access themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! use cmdflow_log::prelude::*;
//!
//! let store = LogStore::open("/tmp/cmdflow/logs");
//! let start = store.append(SessionInfo::capture(), Payload::EventStart(EventStart {
//!     name: "deploy".into(),
//!     script_type: "bash".into(),
//!     total_steps: 1,
//!     script: None,
//! }))?;
//!
//! let index = store.index()?;
//! let family = index.family(start.id)?;
//! assert_eq!(family.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod allocator;
pub mod codec;
pub mod error;
pub mod event;
pub mod record;
pub mod session;
pub mod store;

pub use allocator::IdAllocator;
pub use error::{DecodeError, EventError, EventResult, StoreError, StoreResult};
pub use event::{EventFamily, EventIndex, EventState, FamilyFilter};
pub use record::{
    BatchEnd, BatchStart, BatchStep, EventEnd, EventStart, EventStep, FamilyKind, LogId,
    LogRecord, Payload, RecordKind, SingleRun,
};
pub use session::SessionInfo;
pub use store::{LogStore, Query, StorePaths};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for reading and writing the execution log
    pub use crate::event::{EventFamily, EventIndex, EventState, FamilyFilter};
    pub use crate::record::{
        BatchEnd, BatchStart, BatchStep, EventEnd, EventStart, EventStep, LogId, LogRecord,
        Payload, RecordKind, SingleRun,
    };
    pub use crate::session::SessionInfo;
    pub use crate::store::{LogStore, Query};
}
