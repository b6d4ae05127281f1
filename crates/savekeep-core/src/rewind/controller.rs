//! Rewind controller.
//!
//! Keeps a rolling window of recent snapshots by asking the [`Scheduler`]
//! for low-priority captures on a timer, and plays that window back
//! newest-to-oldest on request.
//!
//! # States
//! - `Idle`: no timer armed. Initial and terminal state.
//! - `Capturing`: every `capture_interval` a low-priority capture is queued;
//!   successful results are appended to the buffer. Paused engines and
//!   absent results are skipped silently.
//! - `Rewinding`: every `step_interval` the next snapshot (newest first) is
//!   restored. When the history is used up the controller stops by itself.
//!
//! Leaving `Rewinding` discards the buffer (playback consumes it) and, after
//! `settle_delay`, re-arms capture if the engine session is still alive.
//!
//! # Invariants
//! - The capture timer and the rewind timer are never armed together. Capture
//!   is fully disarmed before the rewind timer starts.
//! - At most one restore is in flight; a tick that finds one running is
//!   skipped. Restores also take the engine gate, so they never overlap a
//!   scheduler capture.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, trace, warn};

use crate::config::RewindConfig;
use crate::engine::{Engine, EngineSession};
use crate::error::SaveError;
use crate::load::restore_locked;
use crate::request::{Priority, SaveOutcome};
use crate::rewind::buffer::RewindBuffer;
use crate::scheduler::{Scheduler, wait_until};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewindMode {
    Idle = 0,
    Capturing = 1,
    Rewinding = 2,
}

impl RewindMode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RewindMode::Capturing,
            2 => RewindMode::Rewinding,
            _ => RewindMode::Idle,
        }
    }
}

/// Observable state for UI indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewindStatus {
    pub mode: RewindMode,
    pub buffer_len: usize,
    /// Capture will be re-armed once the post-rewind settle delay ends.
    pub settling: bool,
}

enum RewindCommand {
    StartCapture,
    StopCapture,
    StartRewind,
    StopRewind,
    Shutdown,
}

struct RewindShared {
    mode: AtomicU8,
    buffer_len: AtomicUsize,
    settling: AtomicBool,
}

/// Handle to a running rewind controller.
#[derive(Clone)]
pub struct RewindController {
    tx: UnboundedSender<RewindCommand>,
    shared: Arc<RewindShared>,
}

impl RewindController {
    /// Spawns the controller task. It starts `Idle`. Each rewind step waits
    /// `resume_delay` between its restore and the resume.
    pub fn spawn<E: Engine>(
        session: Arc<EngineSession<E>>,
        scheduler: Scheduler,
        config: RewindConfig,
        resume_delay: Duration,
    ) -> Self {
        let (tx, rx) = unbounded_channel();
        let shared = Arc::new(RewindShared {
            mode: AtomicU8::new(RewindMode::Idle as u8),
            buffer_len: AtomicUsize::new(0),
            settling: AtomicBool::new(false),
        });

        let runner = RewindRunner {
            session,
            scheduler,
            state: RewindState::new(config.capacity),
            config,
            resume_delay,
            shared: Arc::clone(&shared),
            rx,
            capture_timer: None,
            rewind_timer: None,
            captures: JoinSet::new(),
            restore: None,
        };
        tokio::spawn(runner.run());

        Self { tx, shared }
    }

    pub fn start_capture(&self) {
        self.send(RewindCommand::StartCapture);
    }

    pub fn stop_capture(&self) {
        self.send(RewindCommand::StopCapture);
    }

    /// No-op unless capturing with a non-empty buffer.
    pub fn start_rewind(&self) {
        self.send(RewindCommand::StartRewind);
    }

    pub fn stop_rewind(&self) {
        self.send(RewindCommand::StopRewind);
    }

    /// Stops all timers, lets an in-flight restore finish, drops the history.
    pub fn shutdown(&self) {
        self.send(RewindCommand::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    #[inline]
    pub fn mode(&self) -> RewindMode {
        RewindMode::from_u8(self.shared.mode.load(Ordering::Acquire))
    }

    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len.load(Ordering::Acquire)
    }

    pub fn status(&self) -> RewindStatus {
        RewindStatus {
            mode: self.mode(),
            buffer_len: self.buffer_len(),
            settling: self.shared.settling.load(Ordering::Acquire),
        }
    }

    fn send(&self, cmd: RewindCommand) {
        if self.tx.send(cmd).is_err() {
            trace!("rewind controller is gone; command dropped");
        }
    }
}

/// History and mode owned by the runner.
struct RewindState {
    mode: RewindMode,
    buffer: RewindBuffer,
    /// Next snapshot to restore while rewinding; `None` once past the oldest.
    rewind_index: Option<usize>,
    /// Bumped whenever capture is disarmed, so late results can be dropped.
    generation: u64,
    /// Re-arm capture when the settle delay after rewinding ends.
    resume_capture: bool,
    /// Rewinding ended while a restore was still running.
    discard_pending: bool,
    settle_at: Option<Instant>,
}

impl RewindState {
    fn new(capacity: usize) -> Self {
        Self {
            mode: RewindMode::Idle,
            buffer: RewindBuffer::new(capacity),
            rewind_index: None,
            generation: 0,
            resume_capture: false,
            discard_pending: false,
            settle_at: None,
        }
    }
}

struct RewindRunner<E> {
    session: Arc<EngineSession<E>>,
    scheduler: Scheduler,
    config: RewindConfig,
    resume_delay: Duration,
    state: RewindState,
    shared: Arc<RewindShared>,
    rx: UnboundedReceiver<RewindCommand>,
    capture_timer: Option<Interval>,
    rewind_timer: Option<Interval>,
    /// Outstanding capture tickets, tagged with the generation that issued them.
    captures: JoinSet<(u64, SaveOutcome)>,
    restore: Option<JoinHandle<Result<(), SaveError>>>,
}

impl<E: Engine> RewindRunner<E> {
    async fn run(mut self) {
        debug!("rewind controller started");
        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(RewindCommand::StartCapture) => self.start_capture(),
                        Some(RewindCommand::StopCapture) => self.stop_capture(),
                        Some(RewindCommand::StartRewind) => self.start_rewind(),
                        Some(RewindCommand::StopRewind) => self.leave_rewinding("stopped"),
                        Some(RewindCommand::Shutdown) | None => break,
                    }
                }
                _ = tick(&mut self.capture_timer) => self.on_capture_tick(),
                _ = tick(&mut self.rewind_timer) => self.on_rewind_tick(),
                Some(joined) = self.captures.join_next(), if !self.captures.is_empty() => {
                    self.on_capture_result(joined);
                }
                result = wait_restore(&mut self.restore) => {
                    self.restore = None;
                    self.on_restore_done(result);
                }
                _ = wait_until(self.state.settle_at) => self.on_settled(),
            }
        }

        self.disarm_capture();
        self.rewind_timer = None;
        if let Some(restore) = self.restore.take() {
            let result = restore.await;
            self.on_restore_done(result);
        }
        self.state.mode = RewindMode::Idle;
        self.state.settle_at = None;
        self.state.buffer.clear();
        self.publish();
        debug!("rewind controller stopped");
    }

    fn start_capture(&mut self) {
        if !self.config.enabled {
            debug!("rewind buffer disabled; not capturing");
            return;
        }
        if self.state.mode != RewindMode::Idle {
            trace!(mode = ?self.state.mode, "start_capture ignored");
            return;
        }
        if !self.session.is_alive() {
            debug!("no engine session; not capturing");
            return;
        }
        self.state.settle_at = None;
        self.state.resume_capture = false;
        if self.state.discard_pending {
            // The restore still finishing holds its own copy of the snapshot.
            self.state.discard_pending = false;
            self.state.buffer.clear();
        }
        self.enter_capturing();
    }

    fn enter_capturing(&mut self) {
        let period = self.config.capture_interval;
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.capture_timer = Some(timer);
        self.state.mode = RewindMode::Capturing;
        info!(
            interval_ms = period.as_millis() as u64,
            capacity = self.state.buffer.capacity(),
            "rewind capture started"
        );
        self.publish();
    }

    fn stop_capture(&mut self) {
        match self.state.mode {
            RewindMode::Capturing => {
                self.disarm_capture();
                self.state.mode = RewindMode::Idle;
                info!("rewind capture stopped");
            }
            RewindMode::Rewinding => {
                // Capture is already disarmed; just don't come back to it.
                self.state.resume_capture = false;
            }
            RewindMode::Idle => {
                if self.state.settle_at.take().is_some() {
                    debug!("pending capture re-arm cancelled");
                }
                self.state.resume_capture = false;
            }
        }
        self.publish();
    }

    /// Cancels the capture timer and forgets every outstanding capture,
    /// including the ones still queued in the scheduler.
    fn disarm_capture(&mut self) {
        self.capture_timer = None;
        self.captures.abort_all();
        self.scheduler.cancel_pending(Priority::Low);
        self.state.generation += 1;
    }

    fn on_capture_tick(&mut self) {
        if self.state.mode != RewindMode::Capturing {
            return;
        }
        if self.session.is_paused() || !self.session.is_alive() {
            trace!("engine paused or gone; skipping capture");
            return;
        }

        let ticket = self.scheduler.enqueue_low();
        let generation = self.state.generation;
        self.captures.spawn(async move { (generation, ticket.await) });
    }

    fn on_capture_result(&mut self, joined: Result<(u64, SaveOutcome), JoinError>) {
        let Ok((generation, outcome)) = joined else {
            // Aborted when capture was disarmed.
            return;
        };
        if generation != self.state.generation || self.state.mode != RewindMode::Capturing {
            trace!("dropping capture from a previous capture cycle");
            return;
        }

        match outcome {
            Ok(snapshot) => {
                self.state.buffer.push(snapshot);
                self.publish();
            }
            Err(err) if err.is_expected() => trace!(%err, "capture skipped"),
            Err(err) => debug!(%err, "capture failed"),
        }
    }

    fn start_rewind(&mut self) {
        match self.state.mode {
            RewindMode::Rewinding => {
                trace!("already rewinding");
                return;
            }
            RewindMode::Idle => {
                trace!("start_rewind ignored while idle");
                return;
            }
            RewindMode::Capturing => {}
        }
        if self.state.buffer.is_empty() {
            debug!("rewind buffer empty; nothing to rewind");
            return;
        }

        // Capture must be fully disarmed before the rewind timer exists.
        self.disarm_capture();

        let period = self.config.step_interval;
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.rewind_timer = Some(timer);

        self.state.mode = RewindMode::Rewinding;
        self.state.rewind_index = self.state.buffer.len().checked_sub(1);
        self.state.resume_capture = true;
        info!(snapshots = self.state.buffer.len(), "rewind started");
        self.publish();
    }

    fn on_rewind_tick(&mut self) {
        if self.state.mode != RewindMode::Rewinding {
            return;
        }
        if self.restore.is_some() {
            trace!("previous restore still running; skipping rewind step");
            return;
        }

        let Some(index) = self.state.rewind_index else {
            self.leave_rewinding("history exhausted");
            return;
        };
        let Some(snapshot) = self.state.buffer.get(index).cloned() else {
            self.leave_rewinding("no snapshot at rewind index");
            return;
        };

        let guard = match self.session.try_acquire() {
            Ok(guard) => guard,
            Err(SaveError::Busy) => {
                trace!("engine busy; skipping rewind step");
                return;
            }
            Err(err) => {
                warn!(%err, "cannot rewind without an engine");
                self.leave_rewinding("engine unavailable");
                return;
            }
        };

        self.state.rewind_index = index.checked_sub(1);
        let session = Arc::clone(&self.session);
        let resume_delay = self.resume_delay;
        trace!(index, "restoring rewind snapshot");
        self.restore = Some(tokio::spawn(async move {
            restore_locked(&session, &guard, &snapshot, resume_delay).await
        }));
    }

    fn on_restore_done(&mut self, result: Result<Result<(), SaveError>, JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(%err, "rewind step failed"),
            Err(err) => warn!(%err, "rewind restore task aborted"),
        }
        if self.state.discard_pending {
            self.discard_history();
        }
    }

    /// Explicit stop and automatic exhaustion both end up here.
    fn leave_rewinding(&mut self, reason: &'static str) {
        if self.state.mode != RewindMode::Rewinding {
            trace!("stop_rewind ignored; not rewinding");
            return;
        }
        self.rewind_timer = None;
        self.state.mode = RewindMode::Idle;
        self.state.rewind_index = None;
        info!(reason, "rewind stopped");

        if self.restore.is_some() {
            self.state.discard_pending = true;
        } else {
            self.discard_history();
        }
        self.publish();
    }

    /// Rewinding consumes the history; it cannot be resumed from the same point.
    fn discard_history(&mut self) {
        self.state.discard_pending = false;
        self.state.buffer.clear();
        if self.state.resume_capture {
            self.state.settle_at = Some(Instant::now() + self.config.settle_delay);
        }
        self.publish();
    }

    fn on_settled(&mut self) {
        self.state.settle_at = None;
        self.state.resume_capture = false;
        if self.state.mode != RewindMode::Idle {
            return;
        }
        if !self.session.is_alive() {
            info!("engine session ended while settling; staying idle");
            self.publish();
            return;
        }
        self.enter_capturing();
    }

    fn publish(&self) {
        self.shared
            .mode
            .store(self.state.mode as u8, Ordering::Release);
        self.shared
            .buffer_len
            .store(self.state.buffer.len(), Ordering::Release);
        self.shared
            .settling
            .store(self.state.settle_at.is_some(), Ordering::Release);
    }
}

async fn tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

async fn wait_restore(
    restore: &mut Option<JoinHandle<Result<(), SaveError>>>,
) -> Result<Result<(), SaveError>, JoinError> {
    match restore {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
