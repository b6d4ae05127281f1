//! Save requests and their completion slots.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::SaveError;
use crate::snapshot::Snapshot;

/// Result of a save or capture request. `Err` is the "absent" outcome.
pub type SaveOutcome = Result<Snapshot, SaveError>;

/// Request priority. `High` orders before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Rewind-buffer capture.
    Low,
    /// Manual, auto or emergency save.
    High,
}

/// A pending request owned by the scheduler.
///
/// The completion slot is consumed by [`SaveRequest::resolve`], so a request
/// can be resolved at most once. Dropping an unresolved request resolves its
/// ticket with [`SaveError::SchedulerClosed`].
#[derive(Debug)]
pub(crate) struct SaveRequest {
    pub(crate) id: u64,
    pub(crate) priority: Priority,
    pub(crate) enqueued_at: Instant,
    completion: oneshot::Sender<SaveOutcome>,
}

impl SaveRequest {
    pub(crate) fn new(id: u64, priority: Priority, enqueued_at: Instant) -> (Self, SaveTicket) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id,
                priority,
                enqueued_at,
                completion: tx,
            },
            SaveTicket { id, priority, rx },
        )
    }

    #[inline]
    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    pub(crate) fn resolve(self, outcome: SaveOutcome) {
        // The caller may have stopped waiting; that is not an error.
        let _ = self.completion.send(outcome);
    }
}

/// Future side of a save request.
///
/// Always resolves: with the snapshot, or with the reason it is absent.
#[derive(Debug)]
#[must_use = "a ticket does nothing unless awaited"]
pub struct SaveTicket {
    id: u64,
    priority: Priority,
    rx: oneshot::Receiver<SaveOutcome>,
}

impl SaveTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl Future for SaveTicket {
    type Output = SaveOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SaveError::SchedulerClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
