//! Error types for script assembly
//!
//! Provides error handling for:
//! - Catalog loading (missing files are not errors, malformed ones are)
//! - Graph linearization (cycles)
//! - Generator compilation and evaluation

use std::path::PathBuf;

/// Errors while reading a definition catalog
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// File exists but could not be read
    #[error("io error on {path}: {source}")]
    Io {
        /// Catalog file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON of the expected shape
    #[error("malformed catalog {path}: {source}")]
    Malformed {
        /// Catalog file
        path: PathBuf,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },
}

impl CatalogError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort assembly
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// Dependency edges form a cycle
    #[error("cycle detected between nodes: {}", .nodes.join(", "))]
    CycleDetected {
        /// Node ids of the strongly connected component, in declaration order
        nodes: Vec<String>,
    },
}

/// Generator source could not be compiled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// `{{#if}}` without a matching `{{/if}}`
    #[error("unterminated {{{{#if {0}}}}} block")]
    UnterminatedBlock(String),

    /// `{{else}}` or `{{/if}}` with no open block, or an unknown block tag
    #[error("unexpected template tag {{{{{0}}}}}")]
    UnexpectedTag(String),

    /// Function-form source is not valid
    #[error("syntax error: {0}")]
    Syntax(String),
}

/// Runtime failure of a function-form generator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// Value passed to `throw`
    #[error("{0}")]
    Thrown(String),

    /// Unknown identifier
    #[error("ReferenceError: {0}")]
    Reference(String),

    /// Operation on the wrong kind of value
    #[error("TypeError: {0}")]
    Type(String),

    /// Too many statements or loop iterations
    #[error("step budget of {0} exceeded")]
    BudgetExceeded(usize),
}

/// Unrecognized script type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown script type: {0} (expected bash or powershell)")]
pub struct UnknownScriptType(pub String);

/// Result type alias for catalog loading
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result type alias for assembly
pub type AssemblyResult<T> = Result<T, AssemblyError>;

/// Result type alias for generator compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Result type alias for generator evaluation
pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_read_naturally() {
        let cycle = AssemblyError::CycleDetected {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(cycle.to_string(), "cycle detected between nodes: a, b");
        assert_eq!(
            CompileError::UnterminatedBlock("debug".into()).to_string(),
            "unterminated {{#if debug}} block"
        );
        assert_eq!(
            CompileError::UnexpectedTag("/if".into()).to_string(),
            "unexpected template tag {{/if}}"
        );
        assert_eq!(
            EvalError::Reference("x is not defined".into()).to_string(),
            "ReferenceError: x is not defined"
        );
    }
}
