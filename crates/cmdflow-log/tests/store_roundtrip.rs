//! End-to-end tests for the log store: append, re-read and project families

use cmdflow_log::prelude::*;
use cmdflow_log::{BatchEnd, BatchStart, BatchStep, EventState, FamilyFilter};
use pretty_assertions::assert_eq;

fn session() -> SessionInfo {
    SessionInfo {
        pid: 777,
        user: "carol".into(),
        host: "ci-runner".into(),
        cwd: "/work/repo".into(),
        shell: "bash".into(),
    }
}

#[test]
fn single_run_survives_a_reread() {
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::open(dir.path());
    let written = store
        .append(
            session(),
            Payload::Single(SingleRun {
                name: "build".into(),
                command: "cargo build --release".into(),
                exit_code: 0,
                duration_ms: 1234,
                stdout: "Compiling app\n---\nFinished".into(),
                stderr: String::new(),
            }),
        )
        .unwrap();

    let last = store.read_last(1).unwrap();
    assert_eq!(last.len(), 1);
    let read = &last[0];
    assert_eq!(read.id, written.id);
    assert_eq!(read.session, written.session);
    assert_eq!(read.payload, written.payload);
    assert_eq!(
        read.timestamp.timestamp_millis(),
        written.timestamp.timestamp_millis()
    );
}

#[test]
fn script_event_family_is_complete_amid_other_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::open(dir.path());

    let start = store
        .append(
            session(),
            Payload::EventStart(EventStart {
                name: "deploy".into(),
                script_type: "bash".into(),
                total_steps: 2,
                script: Some("#!/usr/bin/env bash\necho one\necho two".into()),
            }),
        )
        .unwrap();
    for n in 1..=2u32 {
        store
            .append(
                session(),
                Payload::Single(SingleRun {
                    name: format!("noise-{n}"),
                    command: "true".into(),
                    exit_code: 0,
                    duration_ms: 1,
                    stdout: String::new(),
                    stderr: String::new(),
                }),
            )
            .unwrap();
        store
            .append(
                session(),
                Payload::EventStep(EventStep {
                    parent: start.id,
                    step_number: n,
                    name: format!("step {n}"),
                    code: Some(format!("echo {n}")),
                    planned: false,
                }),
            )
            .unwrap();
    }
    store
        .append(
            session(),
            Payload::EventEnd(EventEnd {
                parent: start.id,
                name: "deploy".into(),
                exit_code: 0,
                duration_ms: 40,
                stdout: "one\ntwo".into(),
                stderr: String::new(),
            }),
        )
        .unwrap();

    let index = store.index().unwrap();
    let family = index.family(start.id).unwrap();
    assert_eq!(family.len(), 4);
    assert_eq!(family.state(), EventState::Ended { exit_code: Some(0) });
    let codes: Vec<_> = family
        .steps()
        .iter()
        .filter_map(|r| r.as_event_step().and_then(|s| s.code.clone()))
        .collect();
    assert_eq!(codes, vec!["echo 1".to_string(), "echo 2".to_string()]);
}

#[test]
fn batch_family_lists_separately_from_events() {
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::open(dir.path());
    let start = store
        .append(
            session(),
            Payload::BatchStart(BatchStart {
                total: 1,
                command_line: "run lint".into(),
            }),
        )
        .unwrap();
    store
        .append(
            session(),
            Payload::BatchStep(BatchStep {
                parent: start.id,
                step_number: 1,
                command: "run lint".into(),
                exit_code: 2,
                success: false,
            }),
        )
        .unwrap();
    store
        .append(
            session(),
            Payload::BatchEnd(BatchEnd {
                parent: start.id,
                total: 1,
                successful: 0,
                failed: 1,
                duration_ms: 9,
            }),
        )
        .unwrap();

    let index = store.index().unwrap();
    assert!(index.list_events(FamilyFilter::Events, None).is_empty());
    assert_eq!(index.list_events(FamilyFilter::Batches, None).len(), 1);
    let family = index.family(start.id).unwrap();
    assert_eq!(family.state(), EventState::Ended { exit_code: Some(1) });
}

#[test]
fn garbage_between_records_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::open(dir.path());
    store
        .append(
            session(),
            Payload::BatchStart(BatchStart {
                total: 2,
                command_line: "run a + run b".into(),
            }),
        )
        .unwrap();
    let mut text = std::fs::read_to_string(&store.paths().log_file).unwrap();
    text.push_str("this is not a record\n---\n");
    std::fs::write(&store.paths().log_file, text).unwrap();
    store
        .append(
            session(),
            Payload::BatchStart(BatchStart {
                total: 1,
                command_line: "run c".into(),
            }),
        )
        .unwrap();

    let ids: Vec<_> = store.read_all().unwrap().iter().map(|r| r.id.get()).collect();
    assert_eq!(ids, vec![1, 2]);
}
