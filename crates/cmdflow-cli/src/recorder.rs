//! Best-effort writes to the log store
//!
//! Logging must never break the command being logged. Every write returns
//! `Option<LogId>`: `None` means the record was lost, a warning has been
//! emitted, and the caller carries on.

use cmdflow_log::{LogId, LogStore, Payload, SessionInfo};

/// Writes records for one invocation
#[derive(Debug, Clone)]
pub struct Recorder {
    store: LogStore,
    session: SessionInfo,
}

impl Recorder {
    /// Recorder stamping every record with `session`
    #[must_use]
    pub fn new(store: LogStore, session: SessionInfo) -> Self {
        Self { store, session }
    }

    /// Underlying store, for reads
    #[inline]
    #[must_use]
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Session captured at startup
    #[inline]
    #[must_use]
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Append one record
    pub fn record(&self, payload: Payload) -> Option<LogId> {
        let kind = payload.kind();
        match self.store.append(self.session.clone(), payload) {
            Ok(record) => {
                tracing::debug!(id = %record.id, %kind, "recorded");
                Some(record.id)
            }
            Err(e) => {
                tracing::warn!(error = %e, %kind, "could not write to the log store, continuing");
                None
            }
        }
    }
}
