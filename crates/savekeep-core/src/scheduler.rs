//! Single-flight save scheduler.
//!
//! Every caller that wants a snapshot goes through a [`Scheduler`]. Requests
//! are executed against the engine one at a time, highest priority first and
//! FIFO within a priority tier, with a minimum gap between engine operations
//! and a queue timeout for requests that wait too long.
//!
//! # Design
//! - The [`Scheduler`] handle is cheap to clone and only sends commands.
//! - A runner task exclusively owns the queue, the `busy` flag and the
//!   completion slots. It is the only place where they change.
//! - The engine call itself runs in a spawned task so that a panicking engine
//!   is reported as a failed capture instead of taking the runner down.
//! - Queue length and the busy flag are mirrored into atomics for the UI.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::engine::{Engine, EngineSession};
use crate::error::SaveError;
use crate::request::{Priority, SaveOutcome, SaveRequest, SaveTicket};

enum SchedulerCommand {
    Enqueue(SaveRequest),
    /// Resolve queued requests (optionally of one priority) as cancelled.
    Cancel(Option<Priority>),
    Shutdown,
}

/// Read-only counters for UI indicators and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub queue_len: usize,
    pub queued_low: usize,
    pub busy: bool,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct SchedulerShared {
    busy: AtomicBool,
    queue_len: AtomicUsize,
    queued_low: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
}

/// Handle to a running scheduler.
#[derive(Clone)]
pub struct Scheduler {
    tx: UnboundedSender<SchedulerCommand>,
    shared: Arc<SchedulerShared>,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    /// Spawns the runner task on the current tokio runtime.
    pub fn spawn<E: Engine>(session: Arc<EngineSession<E>>, config: SchedulerConfig) -> Self {
        let (tx, rx) = unbounded_channel();
        let shared = Arc::new(SchedulerShared::default());

        let runner = SchedulerRunner {
            session,
            config,
            state: SchedulerState::default(),
            shared: Arc::clone(&shared),
            rx,
            in_flight: None,
            drain_at: None,
        };
        tokio::spawn(runner.run());

        Self {
            tx,
            shared,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Queues a request. The returned ticket always resolves.
    pub fn enqueue(&self, priority: Priority) -> SaveTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (request, ticket) = SaveRequest::new(id, priority, Instant::now());
        // If the runner is gone the request is dropped here, which resolves
        // the ticket with `SchedulerClosed`.
        let _ = self.tx.send(SchedulerCommand::Enqueue(request));
        ticket
    }

    /// Manual, auto or emergency save. Always accepted.
    pub fn enqueue_high(&self) -> SaveTicket {
        self.enqueue(Priority::High)
    }

    /// Rewind capture. Rejected when too many captures are already queued.
    pub fn enqueue_low(&self) -> SaveTicket {
        self.enqueue(Priority::Low)
    }

    /// Resolves every queued request as cancelled. An in-flight engine call
    /// is left to finish.
    pub fn clear(&self) {
        let _ = self.tx.send(SchedulerCommand::Cancel(None));
    }

    /// Like [`clear`](Self::clear), restricted to one priority.
    pub fn cancel_pending(&self, priority: Priority) {
        let _ = self.tx.send(SchedulerCommand::Cancel(Some(priority)));
    }

    /// Cancels queued work and stops the runner once any in-flight call ends.
    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.shared.queue_len.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SchedulerStats {
        let s = &self.shared;
        SchedulerStats {
            queue_len: s.queue_len.load(Ordering::Acquire),
            queued_low: s.queued_low.load(Ordering::Acquire),
            busy: s.busy.load(Ordering::Acquire),
            completed: s.completed.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            timed_out: s.timed_out.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            cancelled: s.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Queue and guard owned by the runner.
#[derive(Default)]
struct SchedulerState {
    /// Pending requests, not kept sorted. Sorted right before each pop.
    queue: Vec<SaveRequest>,
    /// `true` exactly while one engine call is outstanding.
    busy: bool,
    last_completed_at: Option<Instant>,
}

impl SchedulerState {
    fn queued(&self, priority: Priority) -> usize {
        self.queue.iter().filter(|r| r.priority == priority).count()
    }

    /// Removes the next request: highest priority first, oldest first within
    /// a priority. The sort is stable, so equal timestamps keep arrival order.
    fn pop_next(&mut self) -> Option<SaveRequest> {
        if self.queue.is_empty() {
            return None;
        }
        self.queue.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        });
        Some(self.queue.remove(0))
    }

    /// Time still to wait before the engine may be touched again.
    fn spacing_remaining(&self, now: Instant, min_spacing: Duration) -> Duration {
        match self.last_completed_at {
            Some(last) => min_spacing.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

struct InFlight {
    request: SaveRequest,
    handle: JoinHandle<SaveOutcome>,
}

struct SchedulerRunner<E> {
    session: Arc<EngineSession<E>>,
    config: SchedulerConfig,
    state: SchedulerState,
    shared: Arc<SchedulerShared>,
    rx: UnboundedReceiver<SchedulerCommand>,
    in_flight: Option<InFlight>,
    /// When to re-run the queue after the last completion.
    drain_at: Option<Instant>,
}

impl<E: Engine> SchedulerRunner<E> {
    async fn run(mut self) {
        debug!("save scheduler started");
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Enqueue(request)) => {
                            self.accept(request);
                            self.process();
                        }
                        Some(SchedulerCommand::Cancel(priority)) => self.cancel(priority),
                        Some(SchedulerCommand::Shutdown) | None => break,
                    }
                }
                result = wait_in_flight(&mut self.in_flight) => {
                    if let Some(InFlight { request, .. }) = self.in_flight.take() {
                        self.complete(request, result);
                    }
                }
                _ = wait_until(self.drain_at) => {
                    self.drain_at = None;
                    self.process();
                }
            }
        }

        self.cancel(None);
        if let Some(InFlight { request, handle }) = self.in_flight.take() {
            // Never abandon an engine call halfway through.
            let result = handle.await;
            self.complete(request, result);
        }
        self.rx.close();
        while let Ok(cmd) = self.rx.try_recv() {
            if let SchedulerCommand::Enqueue(request) = cmd {
                request.resolve(Err(SaveError::SchedulerClosed));
            }
        }
        debug!("save scheduler stopped");
    }

    fn accept(&mut self, request: SaveRequest) {
        if request.priority == Priority::Low {
            let pending = self.state.queued(Priority::Low);
            if pending >= self.config.max_pending_low {
                trace!(id = request.id, pending, "rejecting low-priority capture");
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                request.resolve(Err(SaveError::Rejected { pending }));
                return;
            }
        }
        trace!(id = request.id, priority = ?request.priority, "save request queued");
        self.state.queue.push(request);
        self.publish();
    }

    /// Starts the next eligible request if the engine is free.
    fn process(&mut self) {
        if self.state.busy {
            return;
        }

        let now = Instant::now();
        while let Some(request) = self.state.pop_next() {
            let waited = request.age(now);
            if waited > self.config.request_timeout {
                warn!(
                    id = request.id,
                    priority = ?request.priority,
                    waited_ms = waited.as_millis() as u64,
                    "save request timed out in queue"
                );
                self.shared.timed_out.fetch_add(1, Ordering::Relaxed);
                request.resolve(Err(SaveError::Timeout { waited }));
                continue;
            }

            self.dispatch(request, now);
            break;
        }
        self.publish();
    }

    fn dispatch(&mut self, request: SaveRequest, now: Instant) {
        self.state.busy = true;
        let wait = self.state.spacing_remaining(now, self.config.min_spacing);
        debug!(
            id = request.id,
            priority = ?request.priority,
            wait_ms = wait.as_millis() as u64,
            "dispatching save request"
        );

        let session = Arc::clone(&self.session);
        let handle = tokio::spawn(async move {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            session.capture().await
        });
        self.in_flight = Some(InFlight { request, handle });
    }

    fn complete(&mut self, request: SaveRequest, result: Result<SaveOutcome, JoinError>) {
        let outcome = result.unwrap_or_else(|err| {
            Err(SaveError::CaptureFailed(format!("engine call aborted: {err}")))
        });
        match &outcome {
            Ok(snapshot) => {
                self.state.last_completed_at = Some(Instant::now());
                self.shared.completed.fetch_add(1, Ordering::Relaxed);
                debug!(id = request.id, bytes = snapshot.len(), "save request completed");
            }
            Err(err) => {
                self.shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(id = request.id, priority = ?request.priority, %err, "save request failed");
            }
        }
        request.resolve(outcome);

        self.state.busy = false;
        self.drain_at = Some(Instant::now() + self.config.min_spacing);
        self.publish();
    }

    fn cancel(&mut self, priority: Option<Priority>) {
        let (cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state.queue)
            .into_iter()
            .partition(|r| priority.is_none_or(|p| r.priority == p));
        self.state.queue = kept;

        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), ?priority, "cancelling queued save requests");
            self.shared
                .cancelled
                .fetch_add(cancelled.len() as u64, Ordering::Relaxed);
        }
        for request in cancelled {
            request.resolve(Err(SaveError::Cancelled));
        }
        self.publish();
    }

    fn publish(&self) {
        self.shared.busy.store(self.state.busy, Ordering::Release);
        self.shared
            .queue_len
            .store(self.state.queue.len(), Ordering::Release);
        self.shared
            .queued_low
            .store(self.state.queued(Priority::Low), Ordering::Release);
    }
}

async fn wait_in_flight(in_flight: &mut Option<InFlight>) -> Result<SaveOutcome, JoinError> {
    match in_flight {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
