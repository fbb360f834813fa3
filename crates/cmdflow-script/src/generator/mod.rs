//! Generator compiler
//!
//! A custom node carries one generator source per script type. The source is
//! classified by shape and compiled into a [`Generator`]:
//!
//! ```text
//! "(config, branches) => ..."   ─► function form ─► sandbox interpreter
//! "function (config) { ... }"   ─┘                  (opt-in)
//! anything else                 ─► template form  ─► {{key}} substitution
//! ```
//!
//! Both forms are pure: rendering reads only the config and branch maps
//! passed in. The sandbox has no filesystem, network or process access.

pub mod sandbox;
pub mod template;

use crate::error::{CompileResult, EvalResult};
use crate::graph::NodeConfig;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub use sandbox::Function;
pub use template::Template;

/// Rendered branch text by handle name
pub type Branches = IndexMap<String, String>;

/// Comment rendered in place of a function-form generator when disabled
pub const DISABLED_NOTICE: &str =
    "# Function generators are disabled (set allow_function_generators = true to enable)";

static FUNCTION_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:\([^()]*\)|[A-Za-z_$][\w$]*)\s*=>|function\b\s*[A-Za-z_$]?[\w$]*\s*\()",
    )
    .unwrap()
});

/// Syntactic shape of a generator source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorForm {
    /// `{{...}}` template
    Template,
    /// Arrow function or anonymous `function`
    Function,
}

/// Classify a generator source by shape
#[must_use]
pub fn classify(source: &str) -> GeneratorForm {
    if FUNCTION_SHAPE.is_match(source) {
        GeneratorForm::Function
    } else {
        GeneratorForm::Template
    }
}

/// Text form of a config value: strings verbatim, null empty, the rest JSON
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Truthiness used by `{{#if}}`.
///
/// Falsy: null, `false`, zero, empty arrays, and strings that are blank or
/// spell `false` in any case.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !s.eq_ignore_ascii_case("false")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Compiles generator sources
#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler {
    allow_functions: bool,
}

impl Compiler {
    /// Compiler; function-form sources are only executed when `allow_functions`
    #[inline]
    #[must_use]
    pub const fn new(allow_functions: bool) -> Self {
        Self { allow_functions }
    }

    /// Whether function-form sources are executed
    #[inline]
    #[must_use]
    pub const fn allows_functions(&self) -> bool {
        self.allow_functions
    }

    /// Classify and compile a source
    pub fn compile(&self, source: &str) -> CompileResult<Generator> {
        let inner = match classify(source) {
            GeneratorForm::Template => GeneratorInner::Template(Template::compile(source)?),
            GeneratorForm::Function if self.allow_functions => {
                GeneratorInner::Function(Function::compile(source)?)
            }
            GeneratorForm::Function => {
                tracing::debug!("function-form generator skipped, not enabled");
                GeneratorInner::Disabled
            }
        };
        Ok(Generator { inner })
    }
}

#[derive(Debug, Clone)]
enum GeneratorInner {
    Template(Template),
    Function(Function),
    Disabled,
}

/// A compiled generator: `(config, branches) -> text`
#[derive(Debug, Clone)]
pub struct Generator {
    inner: GeneratorInner,
}

impl Generator {
    /// Produce script text
    pub fn render(&self, config: &NodeConfig, branches: &Branches) -> EvalResult<String> {
        match &self.inner {
            GeneratorInner::Template(template) => Ok(template.render(config, branches)),
            GeneratorInner::Function(function) => function.call(config, branches),
            GeneratorInner::Disabled => Ok(DISABLED_NOTICE.to_string()),
        }
    }
}

/// Compile and render, turning any failure into a `# Generator error:` line
#[must_use]
pub fn render_or_comment(
    compiler: &Compiler,
    source: &str,
    config: &NodeConfig,
    branches: &Branches,
) -> String {
    let rendered = compiler
        .compile(source)
        .map_err(|e| e.to_string())
        .and_then(|generator| generator.render(config, branches).map_err(|e| e.to_string()));
    match rendered {
        Ok(text) => text,
        Err(message) => {
            tracing::warn!(%message, "generator failed");
            error_comment(&message)
        }
    }
}

/// Single comment line reporting a generator failure
#[must_use]
pub fn error_comment(message: &str) -> String {
    format!("# Generator error: {}", message.replace(['\r', '\n'], " "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classification() {
        assert_eq!(classify("config => `echo`"), GeneratorForm::Function);
        assert_eq!(classify("  (config, branches) => {}"), GeneratorForm::Function);
        assert_eq!(classify("() => 'x'"), GeneratorForm::Function);
        assert_eq!(classify("function (config) { return 'x' }"), GeneratorForm::Function);
        assert_eq!(classify("function gen(c, b) { return 'x' }"), GeneratorForm::Function);
        assert_eq!(classify("echo {{message}}"), GeneratorForm::Template);
        assert_eq!(classify("functional-test --run"), GeneratorForm::Template);
        assert_eq!(classify("echo (a) => b"), GeneratorForm::Template);
    }

    #[test]
    fn function_form_is_disabled_by_default() {
        let generator = Compiler::default().compile("config => 'rm -rf /'").unwrap();
        let out = generator.render(&NodeConfig::new(), &Branches::new()).unwrap();
        assert_eq!(out, DISABLED_NOTICE);
    }

    #[test]
    fn enabled_function_form_runs() {
        let mut config = NodeConfig::new();
        config.insert("name".into(), json!("api"));
        let out = render_or_comment(
            &Compiler::new(true),
            "(config) => `deploy ${config.name}`",
            &config,
            &Branches::new(),
        );
        assert_eq!(out, "deploy api");
    }

    #[test]
    fn failures_become_one_comment_line() {
        let compiler = Compiler::new(true);
        let none = Branches::new();
        let thrown = render_or_comment(
            &compiler,
            "() => { throw new Error('bad\\nconfig') }",
            &NodeConfig::new(),
            &none,
        );
        assert_eq!(thrown, "# Generator error: bad config");
        let unterminated = render_or_comment(&compiler, "{{#if x}}", &NodeConfig::new(), &none);
        assert!(unterminated.starts_with("# Generator error: unterminated"));
        assert!(!unterminated.contains('\n'));
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!(2.5)));
        assert!(!is_truthy(&json!("  ")));
        assert!(!is_truthy(&json!("FALSE")));
        assert!(!is_truthy(&json!([])));
    }
}
