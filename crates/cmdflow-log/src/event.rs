//! Event projection over the log
//!
//! Nothing here is persisted. [`EventIndex`] is built by one linear scan of
//! the store and answers family queries from two maps: id → position and
//! parent id → child positions.
//!
//! # Lifecycle
//!
//! ```text
//! Started ──step──► Stepping ──step──► Stepping
//!    │                  │
//!    └──────end─────────┴──────────► Ended
//! ```
//!
//! The store does not stop writes after `Ended`; late steps are kept and
//! reported, the state stays `Ended`.

use crate::error::{EventError, EventResult};
use crate::record::{FamilyKind, LogId, LogRecord, RecordKind};
use serde::Serialize;
use std::collections::HashMap;

/// Which start records [`EventIndex::list_events`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FamilyFilter {
    /// Script events and batches
    #[default]
    All,
    /// Script events only
    Events,
    /// Batches only
    Batches,
}

impl FamilyFilter {
    fn accepts(self, kind: RecordKind) -> bool {
        match self {
            FamilyFilter::All => kind.is_start(),
            FamilyFilter::Events => kind == RecordKind::EventStart,
            FamilyFilter::Batches => kind == RecordKind::BatchStart,
        }
    }
}

/// Where an event family is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EventState {
    /// Start written, nothing else yet
    Started,
    /// Some steps written, no end
    Stepping {
        /// Steps seen so far
        steps: usize,
    },
    /// End written
    Ended {
        /// Exit code from the end record
        exit_code: Option<i32>,
    },
}

impl EventState {
    /// Whether an end record exists
    #[inline]
    #[must_use]
    pub fn is_ended(self) -> bool {
        matches!(self, EventState::Ended { .. })
    }
}

/// A start record and every record that names it as parent
#[derive(Debug, Clone)]
pub struct EventFamily<'a> {
    /// The `*-start` record
    pub start: &'a LogRecord,
    /// Children in write order, any kind
    pub members: Vec<&'a LogRecord>,
}

impl<'a> EventFamily<'a> {
    /// Start plus all members
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.members.len()
    }

    /// Never true; a family always has its start
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Family of the start record
    #[must_use]
    pub fn kind(&self) -> Option<FamilyKind> {
        self.start.kind().family()
    }

    /// Step members sorted by step number, then id
    #[must_use]
    pub fn steps(&self) -> Vec<&'a LogRecord> {
        let mut steps: Vec<_> = self
            .members
            .iter()
            .copied()
            .filter(|r| r.kind().is_step())
            .collect();
        steps.sort_by_key(|r| (r.step_number().unwrap_or(u32::MAX), r.id));
        steps
    }

    /// First end member, if the family was closed
    #[must_use]
    pub fn end(&self) -> Option<&'a LogRecord> {
        self.members.iter().copied().find(|r| r.kind().is_end())
    }

    /// Lifecycle state derived from the members
    #[must_use]
    pub fn state(&self) -> EventState {
        if let Some(end) = self.end() {
            return EventState::Ended {
                exit_code: end.payload.exit_code(),
            };
        }
        match self.members.iter().filter(|r| r.kind().is_step()).count() {
            0 => EventState::Started,
            steps => EventState::Stepping { steps },
        }
    }

    /// All records, start first
    pub fn iter(&self) -> impl Iterator<Item = &'a LogRecord> + '_ {
        std::iter::once(self.start).chain(self.members.iter().copied())
    }
}

/// In-memory index over a snapshot of the store
#[derive(Debug, Clone, Default)]
pub struct EventIndex {
    records: Vec<LogRecord>,
    by_id: HashMap<LogId, usize>,
    children: HashMap<LogId, Vec<usize>>,
}

impl EventIndex {
    /// Index records given in write order.
    ///
    /// Duplicate ids (possible after a counter race) resolve to the first
    /// record written with that id.
    #[must_use]
    pub fn build(records: Vec<LogRecord>) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        let mut children: HashMap<LogId, Vec<usize>> = HashMap::new();

        for (pos, record) in records.iter().enumerate() {
            if by_id.contains_key(&record.id) {
                tracing::debug!(id = %record.id, "duplicate log id, keeping first");
            } else {
                by_id.insert(record.id, pos);
            }
            if let Some(parent) = record.parent_id() {
                children.entry(parent).or_default().push(pos);
            }
        }

        Self {
            records,
            by_id,
            children,
        }
    }

    /// Number of indexed records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store was empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in write order
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Record by id
    #[must_use]
    pub fn get(&self, id: LogId) -> Option<&LogRecord> {
        self.by_id.get(&id).map(|&pos| &self.records[pos])
    }

    /// A start record and all its children.
    ///
    /// Children are matched on parent id alone; a member of the other family
    /// prefix is still returned and left for the caller to filter.
    pub fn family(&self, start: LogId) -> EventResult<EventFamily<'_>> {
        let record = self.get(start).ok_or(EventError::NotFound(start))?;
        if !record.kind().is_start() {
            return Err(EventError::NotAStart {
                id: start,
                kind: record.kind(),
            });
        }
        let members = self
            .children
            .get(&start)
            .map(|positions| positions.iter().map(|&pos| &self.records[pos]).collect())
            .unwrap_or_default();
        Ok(EventFamily {
            start: record,
            members,
        })
    }

    /// Start records in write order, optionally only the newest `last`
    #[must_use]
    pub fn list_events(&self, filter: FamilyFilter, last: Option<usize>) -> Vec<&LogRecord> {
        let mut starts: Vec<_> = self
            .records
            .iter()
            .filter(|r| filter.accepts(r.kind()))
            .collect();
        if let Some(n) = last.filter(|&n| n > 0) {
            if starts.len() > n {
                starts.drain(..starts.len() - n);
            }
        }
        starts
    }

    /// An `event-step` record by id
    pub fn step(&self, id: LogId) -> EventResult<&LogRecord> {
        let record = self.get(id).ok_or(EventError::NotFound(id))?;
        if record.kind() != RecordKind::EventStep {
            return Err(EventError::NotAStep {
                id,
                kind: record.kind(),
            });
        }
        Ok(record)
    }

    /// Steps of an event sorted by step number
    pub fn steps_of(&self, start: LogId) -> EventResult<Vec<&LogRecord>> {
        Ok(self.family(start)?.steps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventEnd, EventStart, EventStep, Payload, SingleRun};
    use crate::session::SessionInfo;
    use chrono::{FixedOffset, TimeZone};

    fn rec(id: u64, payload: Payload) -> LogRecord {
        LogRecord {
            id: LogId(id),
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
                .unwrap(),
            session: SessionInfo::default(),
            payload,
        }
    }

    fn start(id: u64, name: &str) -> LogRecord {
        rec(
            id,
            Payload::EventStart(EventStart {
                name: name.into(),
                script_type: "bash".into(),
                total_steps: 2,
                script: None,
            }),
        )
    }

    fn step(id: u64, parent: u64, n: u32) -> LogRecord {
        rec(
            id,
            Payload::EventStep(EventStep {
                parent: LogId(parent),
                step_number: n,
                name: format!("step {n}"),
                code: Some(format!("echo {n}")),
                planned: false,
            }),
        )
    }

    fn end(id: u64, parent: u64, exit_code: i32) -> LogRecord {
        rec(
            id,
            Payload::EventEnd(EventEnd {
                parent: LogId(parent),
                name: "deploy".into(),
                exit_code,
                duration_ms: 10,
                stdout: String::new(),
                stderr: String::new(),
            }),
        )
    }

    fn single(id: u64) -> LogRecord {
        rec(
            id,
            Payload::Single(SingleRun {
                name: "ls".into(),
                command: "ls".into(),
                exit_code: 0,
                duration_ms: 1,
                stdout: String::new(),
                stderr: String::new(),
            }),
        )
    }

    #[test]
    fn interleaved_steps_sort_by_step_number() {
        let index = EventIndex::build(vec![
            start(1, "deploy"),
            single(2),
            step(3, 1, 2),
            single(4),
            step(5, 1, 1),
            end(6, 1, 0),
        ]);
        let family = index.family(LogId(1)).unwrap();
        assert_eq!(family.len(), 4);
        let numbers: Vec<_> = family.steps().iter().map(|r| r.step_number()).collect();
        assert_eq!(numbers, vec![Some(1), Some(2)]);
        assert_eq!(family.state(), EventState::Ended { exit_code: Some(0) });
        assert_eq!(index.steps_of(LogId(1)).unwrap()[0].id, LogId(5));
    }

    #[test]
    fn open_event_has_no_end() {
        let index = EventIndex::build(vec![start(1, "crashy"), step(2, 1, 1)]);
        let family = index.family(LogId(1)).unwrap();
        assert!(family.end().is_none());
        assert_eq!(family.state(), EventState::Stepping { steps: 1 });

        let fresh = EventIndex::build(vec![start(7, "fresh")]);
        assert_eq!(fresh.family(LogId(7)).unwrap().state(), EventState::Started);
    }

    #[test]
    fn family_requires_a_start() {
        let index = EventIndex::build(vec![start(1, "x"), step(2, 1, 1)]);
        assert_eq!(index.family(LogId(9)).unwrap_err(), EventError::NotFound(LogId(9)));
        assert!(matches!(
            index.family(LogId(2)),
            Err(EventError::NotAStart {
                kind: RecordKind::EventStep,
                ..
            })
        ));
    }

    #[test]
    fn dangling_parents_are_tolerated() {
        let index = EventIndex::build(vec![step(1, 99, 1), end(2, 99, 1)]);
        assert_eq!(index.len(), 2);
        assert!(index.family(LogId(99)).is_err());
        assert!(index.step(LogId(1)).is_ok());
    }

    #[test]
    fn step_lookup_is_restricted_to_event_steps() {
        let index = EventIndex::build(vec![start(1, "x"), step(2, 1, 1), single(3)]);
        assert_eq!(index.step(LogId(2)).unwrap().id, LogId(2));
        assert!(matches!(
            index.step(LogId(1)),
            Err(EventError::NotAStep {
                kind: RecordKind::EventStart,
                ..
            })
        ));
        assert!(matches!(index.step(LogId(3)), Err(EventError::NotAStep { .. })));
        assert!(index.step(LogId(4)).unwrap_err().is_not_found());
    }

    #[test]
    fn list_events_truncates_to_newest() {
        let index = EventIndex::build(vec![
            start(1, "a"),
            single(2),
            start(3, "b"),
            start(4, "c"),
        ]);
        let names: Vec<_> = index
            .list_events(FamilyFilter::Events, Some(2))
            .iter()
            .map(|r| r.title())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(index.list_events(FamilyFilter::All, None).len(), 3);
        assert!(index.list_events(FamilyFilter::Batches, None).is_empty());
    }

    #[test]
    fn late_step_after_end_keeps_ended_state() {
        let index = EventIndex::build(vec![start(1, "x"), end(2, 1, 3), step(3, 1, 1)]);
        let family = index.family(LogId(1)).unwrap();
        assert_eq!(family.len(), 3);
        assert_eq!(family.state(), EventState::Ended { exit_code: Some(3) });
    }

    #[test]
    fn duplicate_ids_resolve_to_first() {
        let index = EventIndex::build(vec![start(1, "first"), start(1, "second")]);
        assert_eq!(index.get(LogId(1)).unwrap().title(), "first");
    }
}
