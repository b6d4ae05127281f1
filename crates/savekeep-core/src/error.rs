//! Error types shared by the scheduler, the rewind controller and the load path.

use std::time::Duration;

use thiserror::Error;

/// Why a save, capture or load produced no result.
///
/// Every variant is contained at the single-request boundary: none of them
/// leaves the scheduler or the rewind controller in a broken state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error("no active engine session")]
    EngineUnavailable,

    #[error("request waited {waited:?} in the queue and was dropped")]
    Timeout { waited: Duration },

    #[error("state capture failed: {0}")]
    CaptureFailed(String),

    #[error("state restore failed: {0}")]
    RestoreFailed(String),

    #[error("snapshot payload is empty")]
    EmptyPayload,

    #[error("capture rejected: {pending} low-priority requests already queued")]
    Rejected { pending: usize },

    #[error("request cancelled before it was serviced")]
    Cancelled,

    #[error("save scheduler is no longer running")]
    SchedulerClosed,

    #[error("engine is busy with another state operation")]
    Busy,

    #[error("failed to persist snapshot: {0}")]
    Persist(String),
}

impl SaveError {
    /// Returns `true` for outcomes that are part of normal operation under load
    /// (backpressure, queue timeouts, cancellation) rather than real failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            SaveError::Rejected { .. } | SaveError::Timeout { .. } | SaveError::Cancelled
        )
    }
}

impl From<std::io::Error> for SaveError {
    fn from(err: std::io::Error) -> Self {
        SaveError::Persist(err.to_string())
    }
}
