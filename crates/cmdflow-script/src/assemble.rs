//! Script assembly
//!
//! Turns a workflow graph into one script:
//!
//! ```text
//! graph ──► ExecutionPlan ──► per node ──┬─ log:<id>          replay recorded command
//!                                        ├─ registered name   <invoker> run <name> <values>
//!                                        └─ custom node       generator(config, branches)
//!        ──► header + "# --- label ---" sections
//! ```
//!
//! Only a dependency cycle aborts assembly. Every other problem with a node
//! (unknown operation, missing generator, failing generator, missing log
//! record) becomes a comment in that node's section.

use crate::catalog::{CommandRegistry, CustomNodeCatalog, CustomNodeDef};
use crate::error::AssemblyResult;
use crate::generator::{self, Branches, Compiler};
use crate::graph::{Node, OperationRef, WorkflowGraph};
use crate::plan::ExecutionPlan;
use crate::script_type::ScriptType;
use cmdflow_log::{EventIndex, LogId};

/// Invoker used when none is configured
pub const DEFAULT_INVOKER: &str = "cmdflow";

/// How a section's code was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionSource {
    /// Replayed from a log record
    Replay(LogId),
    /// Call to a registered command
    Command,
    /// Custom-node generator output
    Generator,
    /// Placeholder comment; the node could not be resolved
    Unresolved,
}

/// Rendered code of one top-level node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Workflow node id
    pub node_id: String,
    /// Display label
    pub label: String,
    /// Generated code, without the label comment
    pub code: String,
    /// Resolution path
    pub source: SectionSource,
}

/// Assembled script, kept per section so callers can record each node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledScript {
    /// Target language
    pub script_type: ScriptType,
    /// Title used in the header comment
    pub title: String,
    /// Top-level sections in execution order
    pub sections: Vec<Section>,
}

impl AssembledScript {
    /// Script-type preamble
    #[must_use]
    pub fn header(&self) -> String {
        self.script_type.header(&self.title)
    }

    /// Full script text
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = self.header();
        for section in &self.sections {
            out.push('\n');
            out.push_str(&self.script_type.comment(&format!("--- {} ---", section.label)));
            out.push('\n');
            if !section.code.is_empty() {
                out.push_str(&section.code);
                if !section.code.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out
    }

    /// Number of sections
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether the workflow had no top-level nodes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Resolves workflow nodes against the catalogs and history
#[derive(Debug, Clone)]
pub struct Assembler<'a> {
    custom_nodes: &'a CustomNodeCatalog,
    commands: &'a CommandRegistry,
    history: Option<&'a EventIndex>,
    compiler: Compiler,
    invoker: String,
}

impl<'a> Assembler<'a> {
    /// Assembler without history; log references render as placeholders
    #[must_use]
    pub fn new(custom_nodes: &'a CustomNodeCatalog, commands: &'a CommandRegistry) -> Self {
        Self {
            custom_nodes,
            commands,
            history: None,
            compiler: Compiler::default(),
            invoker: DEFAULT_INVOKER.to_string(),
        }
    }

    /// Resolve `log:<id>` references against this index
    #[must_use]
    pub fn with_history(mut self, history: &'a EventIndex) -> Self {
        self.history = Some(history);
        self
    }

    /// Generator compiler (controls function-form opt-in)
    #[must_use]
    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Command name used for registered-command calls
    #[must_use]
    pub fn with_invoker(mut self, invoker: impl Into<String>) -> Self {
        self.invoker = invoker.into();
        self
    }

    /// Custom-node definition a node resolves to, if any.
    ///
    /// Log references and registered commands take precedence.
    #[must_use]
    pub fn custom_node(&self, node: &Node) -> Option<&'a CustomNodeDef> {
        match node.operation_ref() {
            OperationRef::Log(_) => None,
            OperationRef::Named(name) if self.commands.contains(name) => None,
            OperationRef::Named(name) => self.custom_nodes.get(name),
        }
    }

    /// Execution order, with branch edges taken from the custom-node catalog
    pub fn plan(&self, graph: &WorkflowGraph) -> AssemblyResult<ExecutionPlan> {
        ExecutionPlan::build(graph, |node| {
            self.custom_node(node)
                .map_or(&[][..], |def| def.output_handles.as_slice())
        })
    }

    /// Assemble `graph` into a script of `script_type`
    pub fn assemble(
        &self,
        title: &str,
        graph: &WorkflowGraph,
        script_type: ScriptType,
    ) -> AssemblyResult<AssembledScript> {
        let plan = self.plan(graph)?;
        let mut rendering = Vec::new();
        let sections = plan
            .order()
            .iter()
            .map(|&pos| {
                let node = &graph.nodes[pos];
                let (code, source) =
                    self.render_node(graph, &plan, pos, script_type, &mut rendering);
                Section {
                    node_id: node.id.clone(),
                    label: node.display_label().to_string(),
                    code,
                    source,
                }
            })
            .collect::<Vec<_>>();
        tracing::info!(
            workflow = title,
            script_type = %script_type,
            sections = sections.len(),
            "assembled workflow"
        );
        Ok(AssembledScript {
            script_type,
            title: title.to_string(),
            sections,
        })
    }

    fn render_node(
        &self,
        graph: &WorkflowGraph,
        plan: &ExecutionPlan,
        pos: usize,
        script_type: ScriptType,
        rendering: &mut Vec<usize>,
    ) -> (String, SectionSource) {
        let node = &graph.nodes[pos];
        match node.operation_ref() {
            OperationRef::Log(id) => self.replay(id, script_type),
            OperationRef::Named(name) => {
                if self.commands.contains(name) {
                    tracing::debug!(node = %node.id, command = name, "resolved registered command");
                    return (self.command_call(name, node, script_type), SectionSource::Command);
                }
                let Some(def) = self.custom_nodes.get(name) else {
                    tracing::debug!(node = %node.id, operation = name, "unknown operation");
                    return (
                        script_type.comment(&format!("TODO: unknown operation '{name}'")),
                        SectionSource::Unresolved,
                    );
                };
                let Some(source) = def.generator(script_type) else {
                    tracing::debug!(node = %node.id, operation = name, "no generator for script type");
                    return (
                        script_type.comment(&format!(
                            "TODO: no {script_type} generator for operation '{name}'"
                        )),
                        SectionSource::Unresolved,
                    );
                };

                rendering.push(pos);
                let mut branches = Branches::new();
                for branch in plan.branches_of(pos) {
                    let mut body = Vec::with_capacity(branch.order.len());
                    for &member in &branch.order {
                        // Two owners claiming each other would recurse forever.
                        if rendering.contains(&member) {
                            continue;
                        }
                        let (code, _) = self.render_node(graph, plan, member, script_type, rendering);
                        if !code.is_empty() {
                            body.push(code);
                        }
                    }
                    branches.insert(branch.handle.clone(), body.join("\n"));
                }
                rendering.pop();

                let config = def.effective_config(&node.config);
                let code = generator::render_or_comment(&self.compiler, source, &config, &branches);
                (code, SectionSource::Generator)
            }
        }
    }

    fn replay(&self, id: LogId, script_type: ScriptType) -> (String, SectionSource) {
        let Some(history) = self.history else {
            return (
                script_type.comment(&format!("Log #{id} unavailable: no history loaded")),
                SectionSource::Unresolved,
            );
        };
        match history.get(id) {
            None => (
                script_type.comment(&format!("Log #{id} not found")),
                SectionSource::Unresolved,
            ),
            Some(record) => match record.as_single() {
                Some(single) => (
                    format!(
                        "{}\n{}",
                        script_type.comment(&format!("Replayed from log #{id}")),
                        single.command
                    ),
                    SectionSource::Replay(id),
                ),
                None => (
                    script_type.comment(&format!(
                        "Log #{id} is a {} record; only single commands can be replayed",
                        record.kind()
                    )),
                    SectionSource::Unresolved,
                ),
            },
        }
    }

    fn command_call(&self, name: &str, node: &Node, script_type: ScriptType) -> String {
        let mut parts = vec![self.invoker.clone(), "run".to_string(), script_type.quote(name)];
        parts.extend(
            node.config
                .values()
                .map(generator::stringify)
                .filter(|value| !value.trim().is_empty())
                .map(|value| script_type.quote(&value)),
        );
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use crate::graph::Edge;
    use chrono::{FixedOffset, TimeZone};
    use cmdflow_log::{LogRecord, Payload, SessionInfo, SingleRun};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn greet_catalog() -> CustomNodeCatalog {
        let mut catalog = CustomNodeCatalog::default();
        catalog.insert(
            "greet",
            CustomNodeDef {
                name: Some("Greeting".into()),
                fields: vec![FieldDef {
                    key: "who".into(),
                    label: None,
                    default: Some(json!("world")),
                }],
                output_handles: Vec::new(),
                generators: IndexMap::from([
                    ("bash".to_string(), "echo \"hello {{who}}\"".to_string()),
                ]),
            },
        );
        catalog
    }

    fn single(id: u64, command: &str) -> LogRecord {
        LogRecord {
            id: LogId(id),
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
                .unwrap(),
            session: SessionInfo::default(),
            payload: Payload::Single(SingleRun {
                name: "build".into(),
                command: command.into(),
                exit_code: 0,
                duration_ms: 10,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    #[test]
    fn resolution_order_and_text_layout() {
        let catalog = greet_catalog();
        let mut commands = CommandRegistry::default();
        commands.insert("lint", "cargo clippy");
        let history = EventIndex::build(vec![single(4, "make build")]);

        let graph = WorkflowGraph {
            nodes: vec![
                Node::new("a", "greet"),
                Node::new("b", "lint")
                    .with_config("path", "src dir")
                    .with_config("empty", "")
                    .with_label("Lint"),
                Node::new("c", "log:4"),
            ],
            edges: vec![Edge::new("a", "b"), Edge::new("b", "c")],
        };
        let script = Assembler::new(&catalog, &commands)
            .with_history(&history)
            .with_invoker("cf")
            .assemble("demo", &graph, ScriptType::Bash)
            .unwrap();

        let sources: Vec<_> = script.sections.iter().map(|s| s.source).collect();
        assert_eq!(
            sources,
            vec![
                SectionSource::Generator,
                SectionSource::Command,
                SectionSource::Replay(LogId(4))
            ]
        );
        assert_eq!(
            script.text(),
            "#!/usr/bin/env bash\n# Generated by cmdflow: demo\nset -e\n\
             \n# --- greet ---\necho \"hello world\"\n\
             \n# --- Lint ---\ncf run lint 'src dir'\n\
             \n# --- log:4 ---\n# Replayed from log #4\nmake build\n"
        );
    }

    #[test]
    fn log_placeholders() {
        let catalog = CustomNodeCatalog::default();
        let commands = CommandRegistry::default();
        let graph = WorkflowGraph {
            nodes: vec![Node::new("a", "log-9")],
            edges: Vec::new(),
        };

        let without = Assembler::new(&catalog, &commands)
            .assemble("t", &graph, ScriptType::Bash)
            .unwrap();
        assert_eq!(without.sections[0].source, SectionSource::Unresolved);

        let history = EventIndex::build(vec![single(1, "true")]);
        let missing = Assembler::new(&catalog, &commands)
            .with_history(&history)
            .assemble("t", &graph, ScriptType::Bash)
            .unwrap();
        assert_eq!(missing.sections[0].code, "# Log #9 not found");
    }

    #[test]
    fn missing_generator_for_script_type() {
        let catalog = greet_catalog();
        let commands = CommandRegistry::default();
        let graph = WorkflowGraph {
            nodes: vec![Node::new("a", "greet")],
            edges: Vec::new(),
        };
        let script = Assembler::new(&catalog, &commands)
            .assemble("t", &graph, ScriptType::Powershell)
            .unwrap();
        assert_eq!(
            script.sections[0].code,
            "# TODO: no powershell generator for operation 'greet'"
        );
    }

    #[test]
    fn registered_command_shadows_custom_node() {
        let catalog = greet_catalog();
        let mut commands = CommandRegistry::default();
        commands.insert("greet", "echo registered");
        let assembler = Assembler::new(&catalog, &commands);
        assert!(assembler.custom_node(&Node::new("a", "greet")).is_none());
        let graph = WorkflowGraph {
            nodes: vec![Node::new("a", "greet").with_config("who", "it's me")],
            edges: Vec::new(),
        };
        let script = assembler.assemble("t", &graph, ScriptType::Powershell).unwrap();
        assert_eq!(script.sections[0].code, "cmdflow run greet 'it''s me'");
    }
}
