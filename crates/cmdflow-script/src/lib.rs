//! cmdflow script assembly
//!
//! Turns a declared workflow graph into one executable shell or PowerShell
//! script.
//!
//! # Architecture
//!
//! ```text
//! workflows.json ──► Workflow ──► ExecutionPlan (DFS post-order, cycle check)
//!                                      │
//! custom-nodes.json ─► generators ─────┤
//! commands.json ─────► invocations ────┼──► Assembler ──► AssembledScript
//! history.log ───────► replays ────────┘
//! ```
//!
//! Generators come in two forms. Template sources substitute `{{key}}`,
//! `{{branches.<handle>}}` and `{{#if key}}...{{/if}}`. Function sources are
//! a small JavaScript subset run by an in-crate interpreter with no I/O;
//! they only execute when the [`Compiler`] is built with function generators
//! enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use cmdflow_script::prelude::*;
//!
//! let catalogs = Catalogs::load_dir(data_dir)?;
//! let workflow = catalogs.workflows.get("deploy").unwrap();
//! let script = Assembler::new(&catalogs.custom_nodes, &catalogs.commands)
//!     .assemble("deploy", &workflow.graph, ScriptType::Bash)?;
//! println!("{}", script.text());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod assemble;
pub mod catalog;
pub mod error;
pub mod generator;
pub mod graph;
pub mod plan;
pub mod script_type;

pub use assemble::{AssembledScript, Assembler, Section, SectionSource, DEFAULT_INVOKER};
pub use catalog::{
    Catalogs, CommandRegistry, CustomNodeCatalog, CustomNodeDef, FieldDef, RegisteredCommand,
    WorkflowCatalog,
};
pub use error::{
    AssemblyError, AssemblyResult, CatalogError, CatalogResult, CompileError, CompileResult,
    EvalError, EvalResult, UnknownScriptType,
};
pub use generator::{Branches, Compiler, Generator, GeneratorForm};
pub use graph::{Edge, Node, NodeConfig, OperationRef, Workflow, WorkflowGraph};
pub use plan::{Branch, ExecutionPlan};
pub use script_type::ScriptType;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building scripts from workflows
    pub use crate::assemble::{AssembledScript, Assembler};
    pub use crate::catalog::Catalogs;
    pub use crate::generator::Compiler;
    pub use crate::graph::{Edge, Node, Workflow, WorkflowGraph};
    pub use crate::plan::ExecutionPlan;
    pub use crate::script_type::ScriptType;
}
