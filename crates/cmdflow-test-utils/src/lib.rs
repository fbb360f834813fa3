//! Testing utilities for cmdflow workspace
//!
//! Shared test helpers, fixtures, and catalog builders.

#![allow(missing_docs)]

use cmdflow_log::{EventStart, EventStep, LogId, LogStore, Payload, SessionInfo, SingleRun};
use cmdflow_script::{CustomNodeDef, FieldDef};
use indexmap::IndexMap;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A store in a fresh temporary directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, LogStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::open(dir.path().join("logs"));
    (dir, store)
}

/// Deterministic session for record fixtures
pub fn session(pid: u32) -> SessionInfo {
    SessionInfo {
        pid,
        user: "alice".into(),
        host: "build01".into(),
        cwd: "/home/alice/app".into(),
        shell: "bash".into(),
    }
}

pub fn single_run(name: &str, command: &str, exit_code: i32) -> Payload {
    Payload::Single(SingleRun {
        name: name.into(),
        command: command.into(),
        exit_code,
        duration_ms: 12,
        stdout: format!("ran {name}\n"),
        stderr: String::new(),
    })
}

pub fn event_start(name: &str, total_steps: u32) -> Payload {
    Payload::EventStart(EventStart {
        name: name.into(),
        script_type: "bash".into(),
        total_steps,
        script: None,
    })
}

pub fn event_step(parent: LogId, step_number: u32, name: &str, code: &str) -> Payload {
    Payload::EventStep(EventStep {
        parent,
        step_number,
        name: name.into(),
        code: Some(code.into()),
        planned: false,
    })
}

/// Custom node with one generator per `(script type, source)` pair
pub fn custom_node(fields: &[(&str, Option<Value>)], generators: &[(&str, &str)]) -> CustomNodeDef {
    CustomNodeDef {
        name: None,
        fields: fields
            .iter()
            .map(|(key, default)| FieldDef {
                key: (*key).into(),
                label: None,
                default: default.clone(),
            })
            .collect(),
        output_handles: Vec::new(),
        generators: generators
            .iter()
            .map(|(ty, src)| ((*ty).to_string(), (*src).to_string()))
            .collect::<IndexMap<_, _>>(),
    }
}

/// Write a JSON catalog file into `dir`
pub fn write_json(dir: &Path, file: &str, value: &Value) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(file), serde_json::to_string_pretty(value).unwrap()).unwrap();
}
