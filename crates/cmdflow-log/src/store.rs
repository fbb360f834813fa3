//! Append-only log store
//!
//! The store never edits a record in place. Appends go to the end of the log
//! file; the only deletion is [`LogStore::clear`], which removes the log and
//! its counter together.

use crate::allocator::IdAllocator;
use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::event::EventIndex;
use crate::record::{LogId, LogRecord, Payload};
use crate::session::SessionInfo;
use chrono::{DateTime, FixedOffset, Local};
use regex::{Regex, RegexBuilder};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Log file name inside a store directory
pub const LOG_FILE_NAME: &str = "history.log";
/// Counter file name inside a store directory
pub const COUNTER_FILE_NAME: &str = "counter";

/// File locations of one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// Record file
    pub log_file: PathBuf,
    /// Id counter file
    pub counter_file: PathBuf,
}

impl StorePaths {
    /// Standard layout inside `dir`
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            log_file: dir.join(LOG_FILE_NAME),
            counter_file: dir.join(COUNTER_FILE_NAME),
        }
    }
}

/// Text search over raw record text
#[derive(Debug, Clone)]
pub enum Query {
    /// Case-insensitive substring
    Text(String),
    /// Regular expression
    Pattern(Regex),
}

impl Query {
    /// Case-insensitive substring query
    #[must_use]
    pub fn text(needle: impl Into<String>) -> Self {
        Self::Text(needle.into().to_lowercase())
    }

    /// Regular expression query, multi-line mode
    pub fn regex(pattern: &str) -> StoreResult<Self> {
        let regex = RegexBuilder::new(pattern).multi_line(true).build()?;
        Ok(Self::Pattern(regex))
    }

    /// Records whose session line carries `pid`
    pub fn session(pid: u32) -> StoreResult<Self> {
        Self::regex(&format!(r"^Session: {pid} \|"))
    }

    /// Whether a raw record chunk matches
    #[must_use]
    pub fn matches(&self, raw: &str) -> bool {
        match self {
            Query::Text(needle) => raw.to_lowercase().contains(needle.as_str()),
            Query::Pattern(regex) => regex.is_match(raw),
        }
    }
}

/// Append-only text log with a shared id counter
#[derive(Debug, Clone)]
pub struct LogStore {
    paths: StorePaths,
    allocator: IdAllocator,
}

impl LogStore {
    /// Store using the standard layout inside `dir`
    #[must_use]
    pub fn open(dir: impl AsRef<Path>) -> Self {
        Self::with_paths(StorePaths::in_dir(dir))
    }

    /// Store with explicit file locations
    #[must_use]
    pub fn with_paths(paths: StorePaths) -> Self {
        let allocator = IdAllocator::new(&paths.counter_file);
        Self { paths, allocator }
    }

    /// File locations
    #[inline]
    #[must_use]
    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Allocate an id, stamp the time and append the record
    pub fn append(&self, session: SessionInfo, payload: Payload) -> StoreResult<LogRecord> {
        let record = LogRecord {
            id: self.allocator.next(),
            timestamp: DateTime::<FixedOffset>::from(Local::now()),
            session,
            payload,
        };
        self.append_record(&record)?;
        tracing::debug!(id = %record.id, kind = %record.kind(), "appended log record");
        Ok(record)
    }

    /// Append a fully formed record as-is
    pub fn append_record(&self, record: &LogRecord) -> StoreResult<()> {
        let path = &self.paths.log_file;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        let mut entry = String::new();
        if !ends_with_newline(&mut file).map_err(|e| StoreError::io(path, e))? {
            entry.push('\n');
        }
        entry.push_str(&codec::encode_entry(record));
        file.write_all(entry.as_bytes())
            .map_err(|e| StoreError::io(path, e))
    }

    /// Every well-formed record, in write order
    pub fn read_all(&self) -> StoreResult<Vec<LogRecord>> {
        Ok(codec::decode_all(&self.read_text()?))
    }

    /// The most recent `n` well-formed records in write order; `0` means all
    pub fn read_last(&self, n: usize) -> StoreResult<Vec<LogRecord>> {
        let mut records = self.read_all()?;
        if n > 0 && records.len() > n {
            records.drain(..records.len() - n);
        }
        Ok(records)
    }

    /// Linear scan matching `query` against each record's raw text
    pub fn search(&self, query: &Query) -> StoreResult<Vec<LogRecord>> {
        let text = self.read_text()?;
        Ok(codec::split_records(&text)
            .iter()
            .filter(|chunk| query.matches(chunk))
            .filter_map(|chunk| codec::decode(chunk).ok())
            .collect())
    }

    /// Records written from the session with this pid
    pub fn search_session(&self, pid: u32) -> StoreResult<Vec<LogRecord>> {
        self.search(&Query::session(pid)?)
    }

    /// Record with this id
    pub fn find(&self, id: LogId) -> StoreResult<Option<LogRecord>> {
        Ok(self.read_all()?.into_iter().find(|r| r.id == id))
    }

    /// In-memory event projection over the whole store
    pub fn index(&self) -> StoreResult<EventIndex> {
        Ok(EventIndex::build(self.read_all()?))
    }

    /// Delete the log and its counter
    pub fn clear(&self) -> StoreResult<()> {
        for path in [&self.paths.log_file, &self.paths.counter_file] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        tracing::info!(path = %self.paths.log_file.display(), "cleared log store");
        Ok(())
    }

    fn read_text(&self) -> StoreResult<String> {
        match fs::read_to_string(&self.paths.log_file) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StoreError::io(&self.paths.log_file, e)),
        }
    }
}

/// Whether the file is empty or its last byte is a newline
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordKind, SingleRun};

    fn session(pid: u32) -> SessionInfo {
        SessionInfo {
            pid,
            user: "bob".into(),
            host: "devbox".into(),
            cwd: "/srv".into(),
            shell: "zsh".into(),
        }
    }

    fn single(name: &str, exit_code: i32) -> Payload {
        Payload::Single(SingleRun {
            name: name.into(),
            command: format!("make {name}"),
            exit_code,
            duration_ms: 5,
            stdout: format!("{name} done"),
            stderr: String::new(),
        })
    }

    #[test]
    fn append_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("nested/logs"));
        let rec = store.append(session(1), single("build", 0)).unwrap();
        assert_eq!(rec.id, LogId(1));
        assert!(store.paths().log_file.exists());
        assert!(store.paths().counter_file.exists());
    }

    #[test]
    fn read_last_returns_tail_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path());
        for name in ["a", "b", "c", "d"] {
            store.append(session(1), single(name, 0)).unwrap();
        }
        let tail: Vec<_> = store.read_last(2).unwrap().iter().map(|r| r.title()).collect();
        assert_eq!(tail, vec!["c", "d"]);
        assert_eq!(store.read_last(0).unwrap().len(), 4);
        assert_eq!(store.read_last(10).unwrap().len(), 4);
    }

    #[test]
    fn empty_store_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path());
        assert!(store.read_all().unwrap().is_empty());
        assert!(store.search(&Query::text("x")).unwrap().is_empty());
    }

    #[test]
    fn search_by_text_regex_and_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path());
        store.append(session(10), single("deploy", 0)).unwrap();
        store.append(session(11), single("test", 1)).unwrap();
        store.append(session(10), single("lint", 0)).unwrap();

        let hits = store.search(&Query::text("DEPLOY DONE")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title(), "deploy");

        let failing = store.search(&Query::regex(r"^Exit Code: [1-9]").unwrap()).unwrap();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].kind(), RecordKind::Single);

        let session_hits = store.search_session(10).unwrap();
        let titles: Vec<_> = session_hits.iter().map(|r| r.title()).collect();
        assert_eq!(titles, vec!["deploy", "lint"]);
    }

    #[test]
    fn torn_write_does_not_swallow_the_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path());
        store.append(session(1), single("first", 0)).unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(&store.paths().log_file)
                .unwrap();
            file.write_all(b"[#77] [2024-05-01T10:00:00+00:00]\nsecond: make second\nOutput:\n  parti")
                .unwrap();
        }
        store.append(session(1), single("third", 0)).unwrap();

        let records = store.read_all().unwrap();
        let titles: Vec<_> = records.iter().map(LogRecord::title).collect();
        assert_eq!(titles, vec!["first", "third"]);
        assert_eq!(records[1].as_single().unwrap().stdout, "third done");
        let text = fs::read_to_string(&store.paths().log_file).unwrap();
        assert!(text.contains("  parti\n"));
    }

    #[test]
    fn invalid_regex_is_reported() {
        assert!(matches!(Query::regex("("), Err(StoreError::InvalidPattern(_))));
    }

    #[test]
    fn clear_removes_log_and_counter() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path());
        store.append(session(1), single("a", 0)).unwrap();
        store.clear().unwrap();
        assert!(store.read_all().unwrap().is_empty());
        // Counter restarts after a clear.
        assert_eq!(store.append(session(1), single("b", 0)).unwrap().id, LogId(1));
        // Clearing twice is fine.
        store.clear().unwrap();
        store.clear().unwrap();
    }

    #[test]
    fn find_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path());
        store.append(session(1), single("a", 0)).unwrap();
        let b = store.append(session(1), single("b", 2)).unwrap();
        assert_eq!(store.find(b.id).unwrap().unwrap().title(), "b");
        assert!(store.find(LogId(99)).unwrap().is_none());
    }
}
