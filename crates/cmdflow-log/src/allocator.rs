//! Store-wide id allocation
//!
//! One decimal counter file backs every record kind. The allocator favours
//! availability over uniqueness: if the counter cannot be read or written it
//! hands out the current time in milliseconds instead of failing the caller.
//!
//! Two processes allocating at once may read the same counter value and
//! return the same id. This race is accepted; see the crate docs.

use crate::error::{StoreError, StoreResult};
use crate::record::LogId;
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Issues monotonically increasing [`LogId`]s backed by a counter file
#[derive(Debug, Clone)]
pub struct IdAllocator {
    path: PathBuf,
}

impl IdAllocator {
    /// Allocator persisting to `path`
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Counter file location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last issued value, if the counter file exists and parses
    #[must_use]
    pub fn current(&self) -> Option<u64> {
        self.read().ok().flatten()
    }

    /// Next id; never fails.
    ///
    /// Falls back to a timestamp-derived id when the counter is unusable.
    #[must_use]
    pub fn next(&self) -> LogId {
        match self.try_next() {
            Ok(id) => id,
            Err(error) => {
                let fallback = fallback_id();
                tracing::warn!(%error, %fallback, "id counter unavailable, using timestamp id");
                fallback
            }
        }
    }

    /// Next id, surfacing counter I/O errors
    pub fn try_next(&self) -> StoreResult<LogId> {
        let next = self.read()?.unwrap_or(0).saturating_add(1);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::write(&self.path, next.to_string()).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(LogId(next))
    }

    fn read(&self) -> StoreResult<Option<u64>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed
                    .parse()
                    .map(Some)
                    .map_err(|_| StoreError::CorruptCounter {
                        path: self.path.clone(),
                        value: trimmed.to_string(),
                    })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

fn fallback_id() -> LogId {
    LogId(u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1).max(1))
}
