//! Read-only definition catalogs
//!
//! Three JSON documents live in the data directory:
//!
//! ```text
//! workflows.json     { "<name>": { description?, scriptType?, nodes, edges } }
//! custom-nodes.json  { "<id>":   { name?, fields, outputHandles?, generators } }
//! commands.json      { "<name>": { command, description? } }
//! ```
//!
//! A missing file is an empty catalog. A file that exists but does not parse
//! is an error naming the path.

use crate::error::{CatalogError, CatalogResult};
use crate::graph::{NodeConfig, Workflow};
use crate::script_type::ScriptType;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Workflow definitions file name
pub const WORKFLOWS_FILE: &str = "workflows.json";
/// Custom-node catalog file name
pub const CUSTOM_NODES_FILE: &str = "custom-nodes.json";
/// Command registry file name
pub const COMMANDS_FILE: &str = "commands.json";

/// Read a JSON document, treating a missing file as `T::default()`
pub fn load_json<T>(path: &Path) -> CatalogResult<T>
where
    T: DeserializeOwned + Default,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "catalog file absent, using empty catalog");
            return Ok(T::default());
        }
        Err(e) => return Err(CatalogError::io(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|source| CatalogError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// One configurable field of a custom node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Config key
    pub key: String,
    /// Human label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Value used when a node omits the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A user-authored node type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomNodeDef {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Configurable fields
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Branch handles this node exposes
    #[serde(default)]
    pub output_handles: Vec<String>,
    /// Generator source per script type name
    #[serde(default)]
    pub generators: IndexMap<String, String>,
}

impl CustomNodeDef {
    /// Generator source for a script type
    #[must_use]
    pub fn generator(&self, script_type: ScriptType) -> Option<&str> {
        self.generators.get(script_type.as_str()).map(String::as_str)
    }

    /// Node config with field defaults filling absent keys.
    ///
    /// Keys the node sets keep their order; defaulted keys follow in field
    /// declaration order.
    #[must_use]
    pub fn effective_config(&self, config: &NodeConfig) -> NodeConfig {
        let mut merged = config.clone();
        for field in &self.fields {
            if let Some(default) = &field.default {
                merged
                    .entry(field.key.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        merged
    }
}

/// `custom-nodes.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomNodeCatalog {
    nodes: IndexMap<String, CustomNodeDef>,
}

impl CustomNodeCatalog {
    /// Load from a file; missing means empty
    pub fn load(path: &Path) -> CatalogResult<Self> {
        load_json(path)
    }

    /// Add or replace a definition
    pub fn insert(&mut self, id: impl Into<String>, def: CustomNodeDef) {
        self.nodes.insert(id.into(), def);
    }

    /// Definition by id
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CustomNodeDef> {
        self.nodes.get(id)
    }

    /// Number of definitions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the catalog is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Definitions in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CustomNodeDef)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One entry of `commands.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredCommand {
    /// Shell command line
    pub command: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `commands.json`, read-only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandRegistry {
    commands: IndexMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    /// Load from a file; missing means empty
    pub fn load(path: &Path) -> CatalogResult<Self> {
        load_json(path)
    }

    /// Add or replace a command
    pub fn insert(&mut self, name: impl Into<String>, command: impl Into<String>) {
        self.commands.insert(
            name.into(),
            RegisteredCommand {
                command: command.into(),
                description: None,
            },
        );
    }

    /// Command by name
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredCommand> {
        self.commands.get(name)
    }

    /// Whether a command is registered under `name`
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Commands in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisteredCommand)> {
        self.commands.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// `workflows.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowCatalog {
    workflows: IndexMap<String, Workflow>,
}

impl WorkflowCatalog {
    /// Load from a file; missing means empty
    pub fn load(path: &Path) -> CatalogResult<Self> {
        load_json(path)
    }

    /// Add or replace a workflow
    pub fn insert(&mut self, name: impl Into<String>, workflow: Workflow) {
        self.workflows.insert(name.into(), workflow);
    }

    /// Workflow by name
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }

    /// Number of workflows
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Whether the catalog is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Workflows in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Workflow)> {
        self.workflows.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// All three catalogs from one data directory
#[derive(Debug, Clone, Default)]
pub struct Catalogs {
    /// Workflow definitions
    pub workflows: WorkflowCatalog,
    /// Custom node types
    pub custom_nodes: CustomNodeCatalog,
    /// Registered commands
    pub commands: CommandRegistry,
}

impl Catalogs {
    /// Load every catalog found in `dir`
    pub fn load_dir(dir: &Path) -> CatalogResult<Self> {
        Ok(Self {
            workflows: WorkflowCatalog::load(&dir.join(WORKFLOWS_FILE))?,
            custom_nodes: CustomNodeCatalog::load(&dir.join(CUSTOM_NODES_FILE))?,
            commands: CommandRegistry::load(&dir.join(COMMANDS_FILE))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = Catalogs::load_dir(dir.path()).unwrap();
        assert!(catalogs.workflows.is_empty());
        assert!(catalogs.custom_nodes.is_empty());
        assert!(catalogs.commands.get("build").is_none());
    }

    #[test]
    fn malformed_file_names_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(COMMANDS_FILE);
        fs::write(&path, "{ not json").unwrap();
        let err = CommandRegistry::load(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed { .. }));
        assert!(err.to_string().contains("commands.json"));
    }

    #[test]
    fn custom_node_defaults_fill_absent_keys() {
        let def: CustomNodeDef = serde_json::from_value(json!({
            "name": "Greeting",
            "fields": [
                {"key": "message", "default": "hello"},
                {"key": "target", "default": "world"},
                {"key": "extra"}
            ],
            "outputHandles": ["true-path", "false-path"],
            "generators": {"bash": "echo {{message}} {{target}}"}
        }))
        .unwrap();

        let mut config = NodeConfig::new();
        config.insert("target".into(), json!("moon"));
        let merged = def.effective_config(&config);
        assert_eq!(merged.get("message"), Some(&json!("hello")));
        assert_eq!(merged.get("target"), Some(&json!("moon")));
        assert!(!merged.contains_key("extra"));

        assert!(def.generator(ScriptType::Bash).is_some());
        assert!(def.generator(ScriptType::Powershell).is_none());
        assert!(def.output_handles.iter().any(|h| h == "false-path"));
    }

    #[test]
    fn loads_written_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(COMMANDS_FILE),
            r#"{"build": {"command": "cargo build", "description": "compile"}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join(WORKFLOWS_FILE),
            r#"{"ci": {"nodes": [{"id": "a", "type": "build"}], "edges": []}}"#,
        )
        .unwrap();
        let catalogs = Catalogs::load_dir(dir.path()).unwrap();
        assert_eq!(catalogs.commands.get("build").unwrap().command, "cargo build");
        assert_eq!(catalogs.workflows.get("ci").unwrap().graph.nodes.len(), 1);
    }
}
