//! Terminal rendering of log records and event families

use cmdflow_log::{EventFamily, EventState, LogRecord, Payload};
use std::fmt::Write as _;

/// One line per record: id, time, kind, title, exit code
#[must_use]
pub fn summary_line(record: &LogRecord) -> String {
    let mut line = format!(
        "#{:<6} {}  {:<11} {}",
        record.id.get(),
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.kind().as_str(),
        record.title()
    );
    if let Some(parent) = record.parent_id() {
        let _ = write!(line, "  (parent #{parent})");
    }
    if let Some(code) = record.payload.exit_code() {
        let _ = write!(line, "  [exit {code}]");
    }
    line
}

fn block(out: &mut String, label: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    let _ = writeln!(out, "{label}:");
    for line in body.lines() {
        let _ = writeln!(out, "  {line}");
    }
}

/// Every field of a record
#[must_use]
pub fn detail(record: &LogRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", summary_line(record));
    let session = &record.session;
    let _ = writeln!(
        out,
        "Session: {} | {} | {} ({})",
        session.pid,
        session.user_at_host(),
        session.cwd,
        session.shell
    );
    match &record.payload {
        Payload::Single(run) => {
            let _ = writeln!(out, "Command: {}", run.command);
            let _ = writeln!(out, "Duration: {}ms", run.duration_ms);
            block(&mut out, "Output", &run.stdout);
            block(&mut out, "Errors", &run.stderr);
        }
        Payload::EventStart(start) => {
            let _ = writeln!(out, "Script-Type: {}", start.script_type);
            let _ = writeln!(out, "Total-Steps: {}", start.total_steps);
            if let Some(script) = &start.script {
                block(&mut out, "Script", script);
            }
        }
        Payload::EventStep(step) => {
            let planned = if step.planned { " (planned)" } else { "" };
            let _ = writeln!(out, "Step: {}{planned}", step.step_number);
            if let Some(code) = &step.code {
                block(&mut out, "Code", code);
            }
        }
        Payload::EventEnd(end) => {
            let _ = writeln!(out, "Duration: {}ms", end.duration_ms);
            block(&mut out, "Output", &end.stdout);
            block(&mut out, "Errors", &end.stderr);
        }
        Payload::BatchStart(start) => {
            let _ = writeln!(out, "Commands: {}", start.total);
        }
        Payload::BatchStep(step) => {
            let _ = writeln!(out, "Success: {}", step.success);
        }
        Payload::BatchEnd(end) => {
            let _ = writeln!(
                out,
                "Successful: {} Failed: {} Duration: {}ms",
                end.successful, end.failed, end.duration_ms
            );
        }
    }
    out
}

fn state_label(state: EventState) -> String {
    match state {
        EventState::Started => "started".to_string(),
        EventState::Stepping { steps } => format!("running ({steps} steps so far)"),
        EventState::Ended {
            exit_code: Some(code),
        } => format!("ended, exit {code}"),
        EventState::Ended { exit_code: None } => "ended".to_string(),
    }
}

/// Start record, sorted steps and end of a family
#[must_use]
pub fn family(family: &EventFamily<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", summary_line(family.start));
    let state = family.state();
    let _ = writeln!(out, "State: {}", state_label(state));
    let planned = family
        .steps()
        .iter()
        .any(|step| step.as_event_step().is_some_and(|s| s.planned));
    if planned {
        let _ = writeln!(out, "Steps were recorded from the plan before the script ran.");
        if !state.is_ended() {
            let _ = writeln!(out, "No end record: some planned steps may not have run.");
        }
    }
    for step in family.steps() {
        let _ = writeln!(out, "  {}", summary_line(step));
        if let Payload::EventStep(event_step) = &step.payload {
            if let Some(code) = &event_step.code {
                for line in code.lines() {
                    let _ = writeln!(out, "      {line}");
                }
            }
        }
    }
    if let Some(end) = family.end() {
        let _ = writeln!(out, "  {}", summary_line(end));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdflow_log::{EventEnd, EventIndex, EventStart, EventStep, LogId, SessionInfo, SingleRun};

    fn record(id: u64, payload: Payload) -> LogRecord {
        LogRecord {
            id: LogId(id),
            timestamp: "2026-10-18T09:14:03.512+02:00".parse().unwrap(),
            session: SessionInfo::default(),
            payload,
        }
    }

    #[test]
    fn summary_shows_exit_and_parent() {
        let line = summary_line(&record(
            7,
            Payload::Single(SingleRun {
                name: "build".into(),
                command: "make".into(),
                exit_code: 2,
                duration_ms: 1,
                stdout: String::new(),
                stderr: String::new(),
            }),
        ));
        assert!(line.starts_with("#7 "));
        assert!(line.contains("2026-10-18 09:14:03"));
        assert!(line.ends_with("build  [exit 2]"));
    }

    #[test]
    fn family_lists_steps_in_order_with_code() {
        let index = EventIndex::build(vec![
            record(
                1,
                Payload::EventStart(EventStart {
                    name: "deploy".into(),
                    script_type: "bash".into(),
                    total_steps: 2,
                    script: None,
                }),
            ),
            record(
                2,
                Payload::EventStep(EventStep {
                    parent: LogId(1),
                    step_number: 2,
                    name: "push".into(),
                    code: Some("git push".into()),
                    planned: false,
                }),
            ),
            record(
                3,
                Payload::EventStep(EventStep {
                    parent: LogId(1),
                    step_number: 1,
                    name: "pull".into(),
                    code: None,
                    planned: false,
                }),
            ),
        ]);
        let text = family(&index.family(LogId(1)).unwrap());
        let pull = text.find("pull").unwrap();
        let push = text.find("push").unwrap();
        assert!(pull < push);
        assert!(text.contains("      git push"));
        assert!(text.contains("State: running (2 steps so far)"));
        assert!(!text.contains("planned"));
    }

    #[test]
    fn planned_steps_are_flagged_until_the_event_ends() {
        let start = record(
            1,
            Payload::EventStart(EventStart {
                name: "hello".into(),
                script_type: "bash".into(),
                total_steps: 1,
                script: Some("echo hi".into()),
            }),
        );
        let step = record(
            2,
            Payload::EventStep(EventStep {
                parent: LogId(1),
                step_number: 1,
                name: "say".into(),
                code: Some("echo hi".into()),
                planned: true,
            }),
        );
        let end = record(
            3,
            Payload::EventEnd(EventEnd {
                parent: LogId(1),
                name: "hello".into(),
                exit_code: 0,
                duration_ms: 4,
                stdout: "hi".into(),
                stderr: String::new(),
            }),
        );

        let open = EventIndex::build(vec![start.clone(), step.clone()]);
        let text = family(&open.family(LogId(1)).unwrap());
        assert!(text.contains("Steps were recorded from the plan before the script ran."));
        assert!(text.contains("No end record: some planned steps may not have run."));

        let closed = EventIndex::build(vec![start, step.clone(), end]);
        let text = family(&closed.family(LogId(1)).unwrap());
        assert!(text.contains("Steps were recorded from the plan before the script ran."));
        assert!(!text.contains("No end record"));

        assert!(detail(&step).contains("Step: 1 (planned)"));
    }
}
