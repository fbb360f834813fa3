//! cmdflow command-line interface
//!
//! Glue between the execution log, the script assembler and child
//! processes.
//!
//! ```text
//! argv ──► cli::build_cli ──► App::dispatch
//!                               ├─ run/exec ──► runner ──► Recorder (single)
//!                               ├─ run a + b ─► BatchOrchestrator ──► SelfSpawner × n
//!                               ├─ workflow ──► Assembler ──► runner (event)
//!                               ├─ event ─────► LogStore (prints new id)
//!                               └─ logs/events/step ──► display
//! ```
//!
//! Every record an invocation writes carries the session captured at
//! startup; child cmdflow processes inherit its pid through
//! `CMDFLOW_SESSION_PID`.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod batch;
pub mod cli;
pub mod commands;
pub mod config;
pub mod display;
pub mod recorder;
pub mod runner;
pub mod steps;

pub use batch::{
    split_batch, BatchError, BatchOrchestrator, BatchReport, BatchResult, BatchStepOutcome,
    CommandSpawner, SelfSpawner,
};
pub use cli::build_cli;
pub use commands::App;
pub use config::{Config, ConfigError, ConfigResult, Settings};
pub use recorder::Recorder;
pub use runner::{RunOutput, NO_EXIT_CODE};
pub use steps::build_from_steps;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving cmdflow programmatically
    pub use crate::batch::{BatchOrchestrator, CommandSpawner};
    pub use crate::commands::App;
    pub use crate::config::{Config, Settings};
    pub use crate::recorder::Recorder;
}
