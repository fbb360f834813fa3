//! Text layout of the log file
//!
//! Records are separated by a line holding exactly [`SEPARATOR`]. Each record
//! starts with an id line and a kind-specific header:
//!
//! ```text
//! [#13] [2026-10-18T09:14:03.514+02:00]
//! STEP-1: checkout
//! Event-Type: event-step
//! Parent-Event: 12
//! Session: 4242 | alice@build01 | /home/alice/app
//! Shell: bash
//! Step-Code:
//!   git pull
//! ---
//! ```
//!
//! Multi-line bodies (`Command:`, `Output:`, `Errors:`, `Script-Content:`,
//! `Step-Code:`) are indented by two spaces, so no body line can ever equal the
//! separator or look like an id line. Trailing newlines of a body are not
//! preserved. Single-line values have embedded newlines replaced by spaces;
//! the header of a `single` is one of them, so the exact command lives in its
//! `Command:` block.
//!
//! An id line always opens a new record, even without a separator before it,
//! so a torn write cannot swallow the record appended after it.

use crate::error::DecodeError;
use crate::record::{
    BatchEnd, BatchStart, BatchStep, EventEnd, EventStart, EventStep, LogId, LogRecord, Payload,
    RecordKind, SingleRun,
};
use crate::session::SessionInfo;
use chrono::{DateTime, SecondsFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

/// Record separator line
pub const SEPARATOR: &str = "---";

const BODY_INDENT: &str = "  ";
/// `Step-Status` of a step recorded from the plan before its script ran
const PLANNED: &str = "planned";

const BLOCK_FIELDS: [&str; 5] = ["Command", "Output", "Errors", "Script-Content", "Step-Code"];

static ID_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[#(\d+)\] \[([^\]]+)\]$").unwrap());
static FIELD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Za-z]*(?:[- ][A-Z][A-Za-z]*)*):(?: (.*))?$").unwrap());
static SINGLE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?) \((.*)\)$").unwrap());
static START_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^EVENT-START: (.*)$").unwrap());
static STEP_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^STEP-(\d+): (.*)$").unwrap());
static END_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^EVENT-END: (.*)$").unwrap());
static BATCH_START_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BATCH-START: (\d+) commands?$").unwrap());
static BATCH_STEP_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BATCH-STEP-(\d+): (.*)$").unwrap());
static BATCH_END_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BATCH-END: (\d+) commands?$").unwrap());

/// Serialize one record, without the trailing separator
#[must_use]
pub fn encode(record: &LogRecord) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(&format!(
        "[#{}] [{}]\n",
        record.id,
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false)
    ));
    out.push_str(&one_line(&header(&record.payload)));
    out.push('\n');

    field(&mut out, "Event-Type", record.kind().as_str());
    if let Some(parent) = record.parent_id() {
        field(&mut out, "Parent-Event", &parent.to_string());
    }
    let session = &record.session;
    field(
        &mut out,
        "Session",
        &format!("{} | {} | {}", session.pid, session.user_at_host(), session.cwd),
    );
    field(&mut out, "Shell", &session.shell);

    match &record.payload {
        Payload::Single(run) => {
            block(&mut out, "Command", &run.command);
            field(&mut out, "Exit Code", &run.exit_code.to_string());
            field(&mut out, "Duration", &format!("{}ms", run.duration_ms));
            block(&mut out, "Output", &run.stdout);
            block(&mut out, "Errors", &run.stderr);
        }
        Payload::EventStart(start) => {
            field(&mut out, "Script-Type", &start.script_type);
            field(&mut out, "Total-Steps", &start.total_steps.to_string());
            if let Some(script) = &start.script {
                block(&mut out, "Script-Content", script);
            }
        }
        Payload::EventStep(step) => {
            if step.planned {
                field(&mut out, "Step-Status", PLANNED);
            }
            if let Some(code) = &step.code {
                block(&mut out, "Step-Code", code);
            }
        }
        Payload::EventEnd(end) => {
            field(&mut out, "Exit Code", &end.exit_code.to_string());
            field(&mut out, "Duration", &format!("{}ms", end.duration_ms));
            block(&mut out, "Output", &end.stdout);
            block(&mut out, "Errors", &end.stderr);
        }
        Payload::BatchStart(start) => {
            field(&mut out, "Total", &start.total.to_string());
            field(&mut out, "Command-Line", &start.command_line);
        }
        Payload::BatchStep(step) => {
            field(&mut out, "Exit Code", &step.exit_code.to_string());
            field(&mut out, "Success", if step.success { "true" } else { "false" });
        }
        Payload::BatchEnd(end) => {
            field(&mut out, "Total", &end.total.to_string());
            field(&mut out, "Successful", &end.successful.to_string());
            field(&mut out, "Failed", &end.failed.to_string());
            field(&mut out, "Duration", &format!("{}ms", end.duration_ms));
        }
    }
    out
}

/// Serialize one record followed by the separator line, ready to append
#[must_use]
pub fn encode_entry(record: &LogRecord) -> String {
    let mut out = encode(record);
    out.push_str(SEPARATOR);
    out.push('\n');
    out
}

/// Split store text into raw record chunks.
///
/// CRLF is normalized first. A chunk ends at a separator line or right before
/// the next id line. Blank chunks are dropped; a trailing chunk with no
/// separator (a partial write) is still returned and left to [`decode`].
#[must_use]
pub fn split_records(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in normalized.split('\n') {
        if line.trim_end() == SEPARATOR {
            if !current.trim().is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.clear();
        } else if ID_LINE.is_match(line.trim_end()) && !current.trim().is_empty() {
            chunks.push(std::mem::take(&mut current));
            current.push_str(line);
            current.push('\n');
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Parse every well-formed record, skipping the rest
#[must_use]
pub fn decode_all(text: &str) -> Vec<LogRecord> {
    split_records(text)
        .iter()
        .filter_map(|chunk| match decode(chunk) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::debug!(%error, "skipping malformed log record");
                None
            }
        })
        .collect()
}

/// Parse a single record chunk
pub fn decode(chunk: &str) -> Result<LogRecord, DecodeError> {
    let normalized = chunk.replace("\r\n", "\n");
    let mut lines = normalized.lines().skip_while(|l| l.trim().is_empty());

    let id_line = lines.next().ok_or(DecodeError::Empty)?;
    let caps = ID_LINE
        .captures(id_line.trim_end())
        .ok_or(DecodeError::MissingIdLine)?;
    let id = LogId(parse_number("id", &caps[1])?);
    let timestamp = DateTime::parse_from_rfc3339(&caps[2])
        .map_err(|_| DecodeError::InvalidTimestamp(caps[2].to_string()))?;

    let header = lines
        .next()
        .ok_or(DecodeError::MissingField("header"))?
        .trim_end()
        .to_string();
    let fields = Fields::parse(lines);

    let kind = fields
        .required("Event-Type")?
        .parse::<RecordKind>()
        .map_err(DecodeError::UnknownKind)?;
    let session = fields.session();
    let payload = decode_payload(kind, &header, &fields)?;

    Ok(LogRecord {
        id,
        timestamp,
        session,
        payload,
    })
}

fn decode_payload(kind: RecordKind, header: &str, fields: &Fields) -> Result<Payload, DecodeError> {
    let bad_header = || DecodeError::BadHeader {
        kind,
        header: header.to_string(),
    };

    let payload = match kind {
        RecordKind::Single => {
            let caps = SINGLE_HEADER.captures(header).ok_or_else(bad_header)?;
            Payload::Single(SingleRun {
                name: caps[1].to_string(),
                command: fields
                    .get("Command")
                    .map_or_else(|| caps[2].to_string(), str::to_string),
                exit_code: fields.number("Exit Code")?,
                duration_ms: fields.duration()?,
                stdout: fields.text("Output"),
                stderr: fields.text("Errors"),
            })
        }
        RecordKind::EventStart => {
            let caps = START_HEADER.captures(header).ok_or_else(bad_header)?;
            Payload::EventStart(EventStart {
                name: caps[1].to_string(),
                script_type: fields.get("Script-Type").unwrap_or("bash").to_string(),
                total_steps: fields.optional_number("Total-Steps")?.unwrap_or(0),
                script: fields.get("Script-Content").map(str::to_string),
            })
        }
        RecordKind::EventStep => {
            let caps = STEP_HEADER.captures(header).ok_or_else(bad_header)?;
            Payload::EventStep(EventStep {
                parent: fields.parent()?,
                step_number: parse_number("step number", &caps[1])?,
                name: caps[2].to_string(),
                code: fields.get("Step-Code").map(str::to_string),
                planned: fields.get("Step-Status") == Some(PLANNED),
            })
        }
        RecordKind::EventEnd => {
            let caps = END_HEADER.captures(header).ok_or_else(bad_header)?;
            Payload::EventEnd(EventEnd {
                parent: fields.parent()?,
                name: caps[1].to_string(),
                exit_code: fields.number("Exit Code")?,
                duration_ms: fields.duration()?,
                stdout: fields.text("Output"),
                stderr: fields.text("Errors"),
            })
        }
        RecordKind::BatchStart => {
            let caps = BATCH_START_HEADER.captures(header).ok_or_else(bad_header)?;
            Payload::BatchStart(BatchStart {
                total: parse_number("total", &caps[1])?,
                command_line: fields.text("Command-Line"),
            })
        }
        RecordKind::BatchStep => {
            let caps = BATCH_STEP_HEADER.captures(header).ok_or_else(bad_header)?;
            let exit_code: i32 = fields.number("Exit Code")?;
            Payload::BatchStep(BatchStep {
                parent: fields.parent()?,
                step_number: parse_number("step number", &caps[1])?,
                command: caps[2].to_string(),
                exit_code,
                success: fields
                    .get("Success")
                    .map_or(exit_code == 0, |v| v.eq_ignore_ascii_case("true")),
            })
        }
        RecordKind::BatchEnd => {
            let caps = BATCH_END_HEADER.captures(header).ok_or_else(bad_header)?;
            Payload::BatchEnd(BatchEnd {
                parent: fields.parent()?,
                total: parse_number("total", &caps[1])?,
                successful: fields.optional_number("Successful")?.unwrap_or(0),
                failed: fields.optional_number("Failed")?.unwrap_or(0),
                duration_ms: fields.duration()?,
            })
        }
    };
    Ok(payload)
}

fn header(payload: &Payload) -> String {
    match payload {
        Payload::Single(run) => format!("{} ({})", run.name, run.command),
        Payload::EventStart(start) => format!("EVENT-START: {}", start.name),
        Payload::EventStep(step) => format!("STEP-{}: {}", step.step_number, step.name),
        Payload::EventEnd(end) => format!("EVENT-END: {}", end.name),
        Payload::BatchStart(start) => format!("BATCH-START: {} commands", start.total),
        Payload::BatchStep(step) => format!("BATCH-STEP-{}: {}", step.step_number, step.command),
        Payload::BatchEnd(end) => format!("BATCH-END: {} commands", end.total),
    }
}

fn one_line(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn field(out: &mut String, label: &str, value: &str) {
    out.push_str(label);
    out.push_str(": ");
    out.push_str(&one_line(value));
    out.push('\n');
}

fn block(out: &mut String, label: &str, body: &str) {
    out.push_str(label);
    out.push_str(":\n");
    let body = body.replace("\r\n", "\n");
    let body = body.trim_end_matches('\n');
    if body.is_empty() {
        return;
    }
    for line in body.split('\n') {
        if !line.is_empty() {
            out.push_str(BODY_INDENT);
            out.push_str(line);
        }
        out.push('\n');
    }
}

fn parse_number<T: FromStr>(field: &'static str, raw: &str) -> Result<T, DecodeError> {
    raw.trim().parse().map_err(|_| DecodeError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Labelled fields of one record, block bodies already de-indented
struct Fields<'a> {
    values: HashMap<&'a str, String>,
}

impl<'a> Fields<'a> {
    fn parse(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut values = HashMap::new();
        let mut lines = lines.peekable();

        while let Some(line) = lines.next() {
            let Some(caps) = FIELD_LINE.captures(line.trim_end()) else {
                continue;
            };
            let Some(label) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let inline = caps.get(2).map_or("", |m| m.as_str());

            if !BLOCK_FIELDS.contains(&label) {
                values.entry(label).or_insert_with(|| inline.to_string());
                continue;
            }

            let mut body: Vec<&str> = Vec::new();
            if !inline.is_empty() {
                body.push(inline);
            }
            while let Some(&next) = lines.peek() {
                if next.is_empty() {
                    body.push("");
                } else if let Some(stripped) = next.strip_prefix(BODY_INDENT) {
                    body.push(stripped);
                } else {
                    break;
                }
                lines.next();
            }
            while body.last().is_some_and(|l| l.is_empty()) {
                body.pop();
            }
            values.entry(label).or_insert_with(|| body.join("\n"));
        }
        Self { values }
    }

    fn get(&self, label: &str) -> Option<&str> {
        self.values.get(label).map(String::as_str)
    }

    fn text(&self, label: &str) -> String {
        self.get(label).unwrap_or_default().to_string()
    }

    fn required(&self, label: &'static str) -> Result<&str, DecodeError> {
        self.get(label).ok_or(DecodeError::MissingField(label))
    }

    fn number<T: FromStr>(&self, label: &'static str) -> Result<T, DecodeError> {
        parse_number(label, self.required(label)?)
    }

    fn optional_number<T: FromStr>(&self, label: &'static str) -> Result<Option<T>, DecodeError> {
        self.get(label).map(|raw| parse_number(label, raw)).transpose()
    }

    fn parent(&self) -> Result<LogId, DecodeError> {
        self.number::<u64>("Parent-Event").map(LogId)
    }

    fn duration(&self) -> Result<u64, DecodeError> {
        match self.get("Duration") {
            Some(raw) => parse_number("Duration", raw.trim().trim_end_matches("ms")),
            None => Ok(0),
        }
    }

    /// `Session: <pid> | <user>@<host> | <cwd>` plus `Shell:`; lenient
    fn session(&self) -> SessionInfo {
        let mut session = SessionInfo {
            shell: self.text("Shell"),
            ..SessionInfo::default()
        };
        if let Some(raw) = self.get("Session") {
            let mut parts = raw.splitn(3, " | ");
            session.pid = parts
                .next()
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or_default();
            if let Some(who) = parts.next() {
                match who.rsplit_once('@') {
                    Some((user, host)) => {
                        session.user = user.to_string();
                        session.host = host.to_string();
                    }
                    None => session.user = who.to_string(),
                }
            }
            session.cwd = parts.next().unwrap_or_default().to_string();
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;

    fn session() -> SessionInfo {
        SessionInfo {
            pid: 4242,
            user: "alice".into(),
            host: "build01".into(),
            cwd: "/home/alice/app".into(),
            shell: "bash".into(),
        }
    }

    fn record(id: u64, payload: Payload) -> LogRecord {
        LogRecord {
            id: LogId(id),
            timestamp: FixedOffset::east_opt(2 * 3600)
                .unwrap()
                .with_ymd_and_hms(2026, 10, 18, 9, 14, 3)
                .unwrap(),
            session: session(),
            payload,
        }
    }

    #[test]
    fn step_layout_matches_documented_format() {
        let rec = record(
            13,
            Payload::EventStep(EventStep {
                parent: LogId(12),
                step_number: 1,
                name: "checkout".into(),
                code: Some("git pull".into()),
                planned: false,
            }),
        );
        let expected = "[#13] [2026-10-18T09:14:03.000+02:00]\n\
                        STEP-1: checkout\n\
                        Event-Type: event-step\n\
                        Parent-Event: 12\n\
                        Session: 4242 | alice@build01 | /home/alice/app\n\
                        Shell: bash\n\
                        Step-Code:\n  git pull\n";
        assert_eq!(encode(&rec), expected);
        assert_eq!(decode(expected).unwrap(), rec);
    }

    #[test]
    fn planned_step_keeps_its_status() {
        let rec = record(
            14,
            Payload::EventStep(EventStep {
                parent: LogId(12),
                step_number: 2,
                name: "build".into(),
                code: None,
                planned: true,
            }),
        );
        let text = encode(&rec);
        assert!(text.contains("\nStep-Status: planned\n"));
        assert_eq!(decode(&text).unwrap(), rec);
    }

    #[test]
    fn single_with_multiline_output_decodes() {
        let rec = record(
            1,
            Payload::Single(SingleRun {
                name: "status".into(),
                command: "git status (short)".into(),
                exit_code: 0,
                duration_ms: 12,
                stdout: "line one\n\n  indented\nline four\n".into(),
                stderr: String::new(),
            }),
        );
        let decoded = decode(&encode(&rec)).unwrap();
        let run = decoded.as_single().unwrap();
        assert_eq!(run.name, "status");
        assert_eq!(run.command, "git status (short)");
        assert_eq!(run.stdout, "line one\n\n  indented\nline four");
        assert_eq!(run.stderr, "");
    }

    #[test]
    fn multiline_single_command_is_kept_verbatim() {
        let rec = record(
            4,
            Payload::Single(SingleRun {
                name: "release".into(),
                command: "cargo build \\\n  --release".into(),
                exit_code: 0,
                duration_ms: 3,
                stdout: String::new(),
                stderr: String::new(),
            }),
        );
        let text = encode(&rec);
        assert!(text.contains("release (cargo build \\   --release)\n"));
        assert_eq!(decode(&text).unwrap(), rec);
    }

    #[test]
    fn single_without_command_block_uses_header() {
        let text = "[#6] [2026-10-18T09:14:03.000+02:00]\n\
                    ls (ls -la)\n\
                    Event-Type: single\n\
                    Exit Code: 0\n\
                    Duration: 4ms\n";
        let decoded = decode(text).unwrap();
        assert_eq!(decoded.as_single().unwrap().command, "ls -la");
    }

    #[test]
    fn id_line_starts_a_new_chunk_without_separator() {
        let text = "[#1] [2026-10-18T09:14:03.000+02:00]\nEVENT-START: a\nOutput:\n  parti\n\
                    [#2] [2026-10-18T09:14:03.000+02:00]\nEVENT-START: b\n---\n";
        let chunks = split_records(text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with("  parti\n"));
        assert!(chunks[1].starts_with("[#2] "));
    }

    #[test]
    fn separator_inside_output_does_not_split_record() {
        let rec = record(
            5,
            Payload::EventStart(EventStart {
                name: "yaml".into(),
                script_type: "bash".into(),
                total_steps: 1,
                script: Some("cat <<EOF\n---\nkey: value\nEOF".into()),
            }),
        );
        let text = encode_entry(&rec);
        let chunks = split_records(&text);
        assert_eq!(chunks.len(), 1);
        let decoded = decode(&chunks[0]).unwrap();
        assert_eq!(
            decoded.as_event_start().unwrap().script.as_deref(),
            Some("cat <<EOF\n---\nkey: value\nEOF")
        );
    }

    #[test]
    fn crlf_store_is_normalized() {
        let rec = record(
            2,
            Payload::BatchStep(BatchStep {
                parent: LogId(1),
                step_number: 2,
                command: "run test".into(),
                exit_code: 3,
                success: false,
            }),
        );
        let crlf = encode_entry(&rec).replace('\n', "\r\n");
        let records = decode_all(&crlf);
        assert_eq!(records, vec![rec]);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let good = encode_entry(&record(
            3,
            Payload::BatchEnd(BatchEnd {
                parent: LogId(1),
                total: 3,
                successful: 2,
                failed: 1,
                duration_ms: 900,
            }),
        ));
        let text = format!(
            "garbage without id\n---\n\
             [#2] [2026-10-18T09:14:03.000+02:00]\nSTEP-x: bad\nEvent-Type: event-step\nParent-Event: 1\n---\n\
             {good}\
             [#4] [2026-10-18T09:14:03.000+02:00]\nEVENT-END: trunc"
        );
        let records = decode_all(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, LogId(3));
    }

    #[test]
    fn header_mismatch_is_reported() {
        let text = "[#9] [2026-10-18T09:14:03.000+02:00]\nnot a step\nEvent-Type: event-step\nParent-Event: 1\n";
        assert!(matches!(
            decode(text),
            Err(DecodeError::BadHeader {
                kind: RecordKind::EventStep,
                ..
            })
        ));
    }

    #[test]
    fn newlines_in_headers_are_flattened() {
        let rec = record(
            7,
            Payload::EventStart(EventStart {
                name: "two\nlines".into(),
                script_type: "powershell".into(),
                total_steps: 0,
                script: None,
            }),
        );
        let decoded = decode(&encode(&rec)).unwrap();
        let start = decoded.as_event_start().unwrap();
        assert_eq!(start.name, "two lines");
        assert_eq!(start.script, None);
    }
}
