//! In-memory engine double.
//!
//! `MockEngine` keeps its "run-time state" as a byte vector, records every
//! call it receives and tracks how many state operations overlapped. Tests
//! use it to observe ordering and exclusivity; the CLI simulator drives it as
//! a stand-in emulator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::{Engine, EngineError};

/// One call observed by a [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Capture,
    Restore(Vec<u8>),
    Pause,
    Resume,
}

struct MockInner {
    state: Mutex<Vec<u8>>,
    frame: AtomicU64,
    calls: Mutex<Vec<EngineCall>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_captures: AtomicUsize,
    fail_restores: AtomicUsize,
    running: AtomicBool,
}

/// Decrements the in-flight counter when a state operation ends.
struct InFlight<'a>(&'a MockInner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a MockInner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloning shares the same underlying engine.
#[derive(Clone)]
pub struct MockEngine {
    inner: Arc<MockInner>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Creates an engine positioned at frame 0.
    pub fn new() -> Self {
        let engine = Self::with_state(Vec::new());
        engine.set_frame(0);
        engine
    }

    /// Creates an engine whose state is exactly `state`.
    pub fn with_state(state: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(state),
                frame: AtomicU64::new(0),
                calls: Mutex::new(Vec::new()),
                latency: Mutex::new(Duration::ZERO),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_captures: AtomicUsize::new(0),
                fail_restores: AtomicUsize::new(0),
                running: AtomicBool::new(true),
            }),
        }
    }

    /// How long each capture/restore takes.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Replaces the engine state without recording a call.
    pub fn set_state(&self, state: Vec<u8>) {
        *self.inner.state.lock() = state;
    }

    pub fn state(&self) -> Vec<u8> {
        self.inner.state.lock().clone()
    }

    /// Jumps to `frame`; the state becomes `b"frame:<n>"`.
    pub fn set_frame(&self, frame: u64) {
        self.inner.frame.store(frame, Ordering::Release);
        self.set_state(format!("frame:{frame}").into_bytes());
    }

    /// Advances one frame if the engine is running. Returns the current frame.
    pub fn step(&self) -> u64 {
        if !self.is_running() {
            return self.inner.frame.load(Ordering::Acquire);
        }
        let frame = self.inner.frame.fetch_add(1, Ordering::AcqRel) + 1;
        self.set_state(format!("frame:{frame}").into_bytes());
        frame
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The next `count` captures fail.
    pub fn fail_captures(&self, count: usize) {
        self.inner.fail_captures.store(count, Ordering::Release);
    }

    /// The next `count` restores fail.
    pub fn fail_restores(&self, count: usize) {
        self.inner.fail_restores.store(count, Ordering::Release);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.inner.calls.lock().clone()
    }

    pub fn capture_count(&self) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| matches!(call, EngineCall::Capture))
            .count()
    }

    /// Payloads of every restore, in call order.
    pub fn restores(&self) -> Vec<Vec<u8>> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Restore(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of overlapping capture/restore calls ever observed.
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::Acquire)
    }

    fn record(&self, call: EngineCall) {
        self.inner.calls.lock().push(call);
    }

    fn latency(&self) -> Duration {
        *self.inner.latency.lock()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

impl Engine for MockEngine {
    async fn capture_state(&self) -> Result<Vec<u8>, EngineError> {
        let _in_flight = InFlight::enter(&self.inner);
        self.record(EngineCall::Capture);

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if take_failure(&self.inner.fail_captures) {
            return Err(EngineError::Failed("injected capture failure".to_string()));
        }
        Ok(self.state())
    }

    async fn restore_state(&self, snapshot: &[u8]) -> Result<(), EngineError> {
        let _in_flight = InFlight::enter(&self.inner);
        self.record(EngineCall::Restore(snapshot.to_vec()));

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if take_failure(&self.inner.fail_restores) {
            return Err(EngineError::Failed("injected restore failure".to_string()));
        }
        self.set_state(snapshot.to_vec());
        // Snapshots taken from this double carry their frame number.
        if let Some(frame) = std::str::from_utf8(snapshot)
            .ok()
            .and_then(|s| s.strip_prefix("frame:"))
            .and_then(|n| n.parse().ok())
        {
            self.inner.frame.store(frame, Ordering::Release);
        }
        Ok(())
    }

    fn pause(&self) {
        self.record(EngineCall::Pause);
        self.inner.running.store(false, Ordering::Release);
    }

    fn resume(&self) {
        self.record(EngineCall::Resume);
        self.inner.running.store(true, Ordering::Release);
    }
}
