//! Workflow assembly from on-disk catalogs

use cmdflow_script::generator::DISABLED_NOTICE;
use cmdflow_script::prelude::*;
use cmdflow_script::{AssemblyError, CommandRegistry, CustomNodeCatalog, SectionSource};
use cmdflow_test_utils::{custom_node, session, single_run, temp_store, write_json};
use pretty_assertions::assert_eq;
use serde_json::json;

fn guard_catalogs() -> (tempfile::TempDir, Catalogs) {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        dir.path(),
        "custom-nodes.json",
        &json!({
            "check-file": {
                "fields": [{"key": "path"}],
                "outputHandles": ["true-path", "false-path"],
                "generators": {
                    "bash": "if [ -f {{path}} ]; then\n  {{branches.true-path}}\nelse\n  {{branches.false-path}}\nfi"
                }
            },
            "say": {
                "fields": [{"key": "msg", "default": "hi"}],
                "generators": {"bash": "echo {{msg}}", "powershell": "Write-Host '{{msg}}'"}
            }
        }),
    );
    write_json(
        dir.path(),
        "workflows.json",
        &json!({
            "guard": {
                "description": "branch on a file",
                "nodes": [
                    {"id": "check", "type": "check-file", "config": {"path": "/etc/hosts"}},
                    {"id": "yes", "type": "say", "config": {"msg": "found"}},
                    {"id": "yes2", "type": "say", "config": {"msg": "again"}},
                    {"id": "no", "type": "say"},
                    {"id": "after", "type": "say", "config": {"msg": "done"}, "label": "Finish"}
                ],
                "edges": [
                    {"source": "check", "target": "yes", "sourceHandle": "true-path"},
                    {"source": "yes", "target": "yes2"},
                    {"source": "check", "target": "no", "sourceHandle": "false-path"},
                    {"source": "check", "target": "after"}
                ]
            }
        }),
    );
    let catalogs = Catalogs::load_dir(dir.path()).unwrap();
    (dir, catalogs)
}

#[test]
fn branches_are_rendered_inside_their_owner() {
    let (_dir, catalogs) = guard_catalogs();
    let workflow = catalogs.workflows.get("guard").unwrap();
    let assembler = Assembler::new(&catalogs.custom_nodes, &catalogs.commands);

    let plan = assembler.plan(&workflow.graph).unwrap();
    assert_eq!(plan.ordered_ids(&workflow.graph), vec!["check", "after"]);

    let script = assembler
        .assemble("guard", &workflow.graph, ScriptType::Bash)
        .unwrap();
    assert_eq!(
        script.text(),
        "#!/usr/bin/env bash\n# Generated by cmdflow: guard\nset -e\n\
         \n# --- check-file ---\n\
         if [ -f /etc/hosts ]; then\n  echo found\n  echo again\nelse\n  echo hi\nfi\n\
         \n# --- Finish ---\necho done\n"
    );
}

#[test]
fn generator_failures_stay_in_their_section() {
    let mut custom = CustomNodeCatalog::default();
    custom.insert(
        "boom",
        custom_node(&[], &[("bash", "(config) => { throw new Error(`no ${config.what}`) }")]),
    );
    custom.insert("ok", custom_node(&[], &[("bash", "echo ok")]));
    let commands = CommandRegistry::default();
    let graph = WorkflowGraph {
        nodes: vec![
            Node::new("a", "boom").with_config("what", "luck"),
            Node::new("b", "ok"),
        ],
        edges: vec![Edge::new("a", "b")],
    };

    let enabled = Assembler::new(&custom, &commands)
        .with_compiler(Compiler::new(true))
        .assemble("t", &graph, ScriptType::Bash)
        .unwrap();
    assert_eq!(enabled.sections[0].code, "# Generator error: no luck");
    assert_eq!(enabled.sections[1].code, "echo ok");

    let disabled = Assembler::new(&custom, &commands)
        .assemble("t", &graph, ScriptType::Bash)
        .unwrap();
    assert_eq!(disabled.sections[0].code, DISABLED_NOTICE);
    assert_eq!(disabled.sections[1].code, "echo ok");
}

#[test]
fn unknown_nodes_do_not_stop_assembly() {
    let custom = CustomNodeCatalog::default();
    let mut commands = CommandRegistry::default();
    commands.insert("build", "make");
    let graph = WorkflowGraph {
        nodes: vec![Node::new("a", "nope"), Node::new("b", "build")],
        edges: vec![Edge::new("a", "b"), Edge::new("ghost", "b")],
    };
    let script = Assembler::new(&custom, &commands)
        .assemble("t", &graph, ScriptType::Bash)
        .unwrap();
    assert_eq!(script.len(), 2);
    assert_eq!(script.sections[0].code, "# TODO: unknown operation 'nope'");
    assert_eq!(script.sections[0].source, SectionSource::Unresolved);
    assert_eq!(script.sections[1].code, "cmdflow run build");
}

#[test]
fn cycles_abort_with_the_nodes_named() {
    let custom = CustomNodeCatalog::default();
    let commands = CommandRegistry::default();
    let graph = WorkflowGraph {
        nodes: vec![Node::new("a", "x"), Node::new("b", "x"), Node::new("c", "x")],
        edges: vec![Edge::new("a", "b"), Edge::new("b", "a"), Edge::new("b", "c")],
    };
    let err = Assembler::new(&custom, &commands)
        .assemble("t", &graph, ScriptType::Bash)
        .unwrap_err();
    assert_eq!(
        err,
        AssemblyError::CycleDetected {
            nodes: vec!["a".into(), "b".into()]
        }
    );
    assert_eq!(err.to_string(), "cycle detected between nodes: a, b");
}

#[test]
fn replays_commands_from_the_store() {
    let (_dir, store) = temp_store();
    let first = store
        .append(session(10), single_run("deploy", "kubectl apply -f app.yaml", 0))
        .unwrap();
    let index = store.index().unwrap();

    let custom = CustomNodeCatalog::default();
    let commands = CommandRegistry::default();
    let graph = WorkflowGraph {
        nodes: vec![Node::new("r", format!("log:{}", first.id.get()))],
        edges: Vec::new(),
    };
    let script = Assembler::new(&custom, &commands)
        .with_history(&index)
        .assemble("replay", &graph, ScriptType::Powershell)
        .unwrap();
    assert_eq!(
        script.sections[0].code,
        format!("# Replayed from log #{}\nkubectl apply -f app.yaml", first.id)
    );
    assert_eq!(script.sections[0].source, SectionSource::Replay(first.id));
}
