//! Restore path shared by save-slot loading and rewind playback.
//!
//! A restore is followed by a short fixed delay and an explicit resume, so
//! the engine's running state matches the UI's paused/running indicator as
//! soon as the load returns.

use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineGuard, EngineSession};
use crate::error::SaveError;
use crate::snapshot::{LoadPayload, Snapshot};

/// Loads `payload` into the engine, waiting for the engine to be free first.
pub async fn load_snapshot<E: Engine>(
    session: &EngineSession<E>,
    payload: impl Into<LoadPayload>,
    resume_delay: Duration,
) -> Result<(), SaveError> {
    let snapshot = payload.into().into_snapshot();
    if snapshot.is_empty() {
        return Err(SaveError::EmptyPayload);
    }

    let guard = session.acquire().await?;
    restore_locked(session, &guard, &snapshot, resume_delay).await
}

/// Restores `snapshot` and resumes the engine. The guard is held throughout,
/// including the settle delay before the resume.
pub(crate) async fn restore_locked<E: Engine>(
    session: &EngineSession<E>,
    guard: &EngineGuard,
    snapshot: &Snapshot,
    resume_delay: Duration,
) -> Result<(), SaveError> {
    if let Err(err) = session.restore_with(guard, snapshot).await {
        warn!(%err, bytes = snapshot.len(), "snapshot restore failed");
        return Err(err);
    }

    if !resume_delay.is_zero() {
        tokio::time::sleep(resume_delay).await;
    }
    session.resume()?;
    debug!(bytes = snapshot.len(), "snapshot restored");
    Ok(())
}
