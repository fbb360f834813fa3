//! Workflow graph model
//!
//! A workflow is a list of nodes and a list of edges exactly as authored.
//! Nothing is validated on load: edges may name unknown nodes and the edge
//! set may contain cycles. Both are handled by [`crate::plan`].

use crate::script_type::ScriptType;
use cmdflow_log::LogId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node configuration, keys in declaration order
pub type NodeConfig = IndexMap<String, Value>;

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Id unique within the workflow
    pub id: String,
    /// Log reference, registered command name or custom-node id
    #[serde(rename = "type")]
    pub operation: String,
    /// Field values
    #[serde(default)]
    pub config: NodeConfig,
    /// Display label; defaults to the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Node {
    /// Node with empty config
    #[must_use]
    pub fn new(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation: operation.into(),
            config: NodeConfig::new(),
            label: None,
        }
    }

    /// Builder-style config entry
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Builder-style label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label used in the script's section comment
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.operation)
    }

    /// Parsed operation reference
    #[must_use]
    pub fn operation_ref(&self) -> OperationRef<'_> {
        OperationRef::parse(&self.operation)
    }
}

/// Dependency or branch edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Upstream node id
    pub source: String,
    /// Downstream node id
    pub target: String,
    /// Output handle of the source, for branch edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Edge {
    /// Plain dependency edge
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: None,
        }
    }

    /// Edge leaving through a named output handle
    #[must_use]
    pub fn from_handle(
        source: impl Into<String>,
        handle: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: Some(handle.into()),
        }
    }
}

/// Nodes and edges of one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Nodes in declaration order
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges in declaration order
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Position of the first node with this id
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Node by id
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A named workflow as stored in `workflows.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Preferred script type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_type: Option<ScriptType>,
    /// Graph
    #[serde(flatten)]
    pub graph: WorkflowGraph,
}

/// What a node's `type` points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationRef<'a> {
    /// `log:<id>` or `log-<id>`: replay a recorded command
    Log(LogId),
    /// Registered command or custom-node id
    Named(&'a str),
}

impl<'a> OperationRef<'a> {
    /// Classify a raw operation string
    #[must_use]
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        trimmed
            .strip_prefix("log:")
            .or_else(|| trimmed.strip_prefix("log-"))
            .and_then(|digits| digits.parse::<u64>().ok())
            .map_or(OperationRef::Named(trimmed), |id| OperationRef::Log(LogId(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_refs() {
        assert_eq!(OperationRef::parse("log:12"), OperationRef::Log(LogId(12)));
        assert_eq!(OperationRef::parse("log-7"), OperationRef::Log(LogId(7)));
        assert_eq!(OperationRef::parse("log-book"), OperationRef::Named("log-book"));
        assert_eq!(OperationRef::parse(" build "), OperationRef::Named("build"));
    }

    #[test]
    fn workflow_json_shape() {
        let raw = json!({
            "description": "ship it",
            "scriptType": "powershell",
            "nodes": [
                {"id": "n1", "type": "greet", "config": {"zeta": "z", "alpha": "a"}, "label": "Say hi"},
                {"id": "n2", "type": "log:3"}
            ],
            "edges": [{"source": "n1", "target": "n2", "sourceHandle": "true-path"}]
        });
        let wf: Workflow = serde_json::from_value(raw).unwrap();
        assert_eq!(wf.script_type, Some(ScriptType::Powershell));
        let keys: Vec<_> = wf.graph.nodes[0].config.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(wf.graph.nodes[0].display_label(), "Say hi");
        assert_eq!(wf.graph.nodes[1].display_label(), "log:3");
        assert_eq!(wf.graph.edges[0].source_handle.as_deref(), Some("true-path"));
    }
}
