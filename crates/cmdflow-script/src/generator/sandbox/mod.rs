//! Sandboxed function-form generators
//!
//! A small JavaScript subset, enough for script generators:
//!
//! ```text
//! source ─► lexer ─► parser ─► Lambda ─► interp(config, branches) ─► text
//! ```
//!
//! Supported: arrow and `function` expressions, `const`/`let`, object
//! destructuring with defaults, `if`/`for`/`for...of`/`while`, template
//! literals, the usual operators, string and array helpers, plus `JSON`,
//! `Object`, `Array.isArray`, `Math` and `new Error(...)`.
//!
//! There is nothing to reach outside the interpreter: no globals beyond the
//! ones above, no I/O. Evaluation is bounded by a step budget.

mod ast;
mod interp;
mod lexer;
mod parser;
mod value;

use super::Branches;
use crate::error::{CompileResult, EvalResult};
use crate::graph::NodeConfig;
use ast::Lambda;
use interp::Interpreter;
use std::sync::Arc;
use value::Value;

/// Statements and loop iterations one call may execute
pub const STEP_BUDGET: usize = 100_000;

/// A compiled function-form generator
#[derive(Debug, Clone)]
pub struct Function {
    lambda: Arc<Lambda>,
}

impl Function {
    /// Parse a function expression
    pub fn compile(source: &str) -> CompileResult<Self> {
        Ok(Self {
            lambda: parser::parse_function(source)?,
        })
    }

    /// Call with `(config, branches)`.
    ///
    /// `undefined` and `null` results render as empty text; anything else is
    /// converted the way `String(value)` would.
    pub fn call(&self, config: &NodeConfig, branches: &Branches) -> EvalResult<String> {
        let config = Value::Object(
            config
                .iter()
                .map(|(key, value)| (key.clone(), Value::from_json(value)))
                .collect(),
        );
        let branches = Value::Object(
            branches
                .iter()
                .map(|(handle, text)| (handle.clone(), Value::Str(text.clone())))
                .collect(),
        );
        let result = Interpreter::new(STEP_BUDGET).call_lambda(&self.lambda, vec![config, branches])?;
        Ok(if result.is_nullish() {
            String::new()
        } else {
            result.to_js_string()
        })
    }
}
