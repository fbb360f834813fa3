//! Template-form generators
//!
//! ```text
//! {{key}} {{config.key}}        config value, empty when absent
//! {{branches.handle}}           branch text, re-indented to the tag's line
//! {{#if key}}..{{else}}..{{/if}} conditional, nestable
//! ```

use super::{is_truthy, stringify, Branches};
use crate::error::{CompileError, CompileResult};
use crate::graph::NodeConfig;
use once_cell::sync::Lazy;
use regex::Regex;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Value(String),
    Branch { handle: String, indent: String },
    If {
        key: String,
        then: Vec<Segment>,
        otherwise: Vec<Segment>,
    },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

struct Frame {
    key: String,
    then: Vec<Segment>,
    otherwise: Vec<Segment>,
    in_else: bool,
}

fn target<'a>(root: &'a mut Vec<Segment>, open: &'a mut [Frame]) -> &'a mut Vec<Segment> {
    match open.last_mut() {
        Some(frame) if frame.in_else => &mut frame.otherwise,
        Some(frame) => &mut frame.then,
        None => root,
    }
}

impl Template {
    /// Parse template source
    pub fn compile(source: &str) -> CompileResult<Self> {
        let mut root: Vec<Segment> = Vec::new();
        let mut open: Vec<Frame> = Vec::new();
        let mut cursor = 0;

        for caps in TAG.captures_iter(source) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > cursor {
                target(&mut root, &mut open)
                    .push(Segment::Text(source[cursor..whole.start()].to_string()));
            }
            cursor = whole.end();
            let tag = inner.as_str();

            let if_key = tag
                .strip_prefix("#if")
                .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));
            if let Some(key) = if_key {
                let key = normalize_key(key.trim());
                if key.is_empty() {
                    return Err(CompileError::UnexpectedTag(tag.to_string()));
                }
                open.push(Frame {
                    key,
                    then: Vec::new(),
                    otherwise: Vec::new(),
                    in_else: false,
                });
                continue;
            }
            match tag {
                "else" => match open.last_mut() {
                    Some(frame) if !frame.in_else => frame.in_else = true,
                    _ => return Err(CompileError::UnexpectedTag(tag.to_string())),
                },
                "/if" => {
                    let frame = open
                        .pop()
                        .ok_or_else(|| CompileError::UnexpectedTag(tag.to_string()))?;
                    target(&mut root, &mut open).push(Segment::If {
                        key: frame.key,
                        then: frame.then,
                        otherwise: frame.otherwise,
                    });
                }
                _ if tag.starts_with('#') || tag.starts_with('/') => {
                    return Err(CompileError::UnexpectedTag(tag.to_string()));
                }
                _ => {
                    let segment = match tag.strip_prefix("branches.") {
                        Some(handle) => Segment::Branch {
                            handle: handle.trim().to_string(),
                            indent: line_indent(source, whole.start()),
                        },
                        None => Segment::Value(normalize_key(tag)),
                    };
                    target(&mut root, &mut open).push(segment);
                }
            }
        }
        if cursor < source.len() {
            target(&mut root, &mut open).push(Segment::Text(source[cursor..].to_string()));
        }
        if let Some(frame) = open.pop() {
            return Err(CompileError::UnterminatedBlock(frame.key));
        }
        Ok(Self { segments: root })
    }

    /// Substitute config and branch text
    #[must_use]
    pub fn render(&self, config: &NodeConfig, branches: &Branches) -> String {
        let mut out = String::new();
        render_into(&mut out, &self.segments, config, branches);
        out
    }
}

fn normalize_key(raw: &str) -> String {
    raw.strip_prefix("config.").unwrap_or(raw).trim().to_string()
}

/// Leading whitespace of the line containing byte `at`
fn line_indent(source: &str, at: usize) -> String {
    let line_start = source[..at].rfind('\n').map_or(0, |i| i + 1);
    source[line_start..at]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

fn reindent(text: &str, indent: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.trim().is_empty() {
                out.push_str(indent);
            }
        }
        out.push_str(line);
    }
    out
}

fn lookup<'a>(key: &str, config: &'a NodeConfig, branches: &'a Branches) -> Option<Lookup<'a>> {
    if let Some(handle) = key.strip_prefix("branches.") {
        return branches.get(handle).map(|s| Lookup::Branch(s.as_str()));
    }
    config.get(key).map(Lookup::Config)
}

enum Lookup<'a> {
    Config(&'a serde_json::Value),
    Branch(&'a str),
}

fn render_into(out: &mut String, segments: &[Segment], config: &NodeConfig, branches: &Branches) {
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Value(key) => {
                if let Some(value) = config.get(key) {
                    out.push_str(&stringify(value));
                }
            }
            Segment::Branch { handle, indent } => {
                if let Some(text) = branches.get(handle) {
                    out.push_str(&reindent(text, indent));
                }
            }
            Segment::If {
                key,
                then,
                otherwise,
            } => {
                let truthy = match lookup(key, config, branches) {
                    Some(Lookup::Config(value)) => is_truthy(value),
                    Some(Lookup::Branch(text)) => !text.trim().is_empty(),
                    None => false,
                };
                render_into(out, if truthy { then } else { otherwise }, config, branches);
            }
        }
    }
}
