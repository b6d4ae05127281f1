//! The emulation engine collaborator and its per-session wrapper.
//!
//! [`Engine`] is the narrow interface this crate consumes. It may be slow and
//! may fail, and it must never be invoked concurrently with itself.
//! [`EngineSession`] owns one engine for the lifetime of an emulation session
//! and enforces that rule with a single-permit gate: every capture or restore
//! requires an [`EngineGuard`], and only one guard exists at a time.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::SaveError;
use crate::snapshot::Snapshot;

/// Failure reported by an engine implementation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,

    #[error("engine failure: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An emulation engine that can serialize and restore its run-time state.
///
/// Implementations are treated as black boxes. Callers in this crate
/// guarantee that at most one of `capture_state`/`restore_state` is
/// outstanding at any time.
pub trait Engine: Send + Sync + 'static {
    /// Serializes the complete run-time state.
    fn capture_state(&self) -> impl Future<Output = Result<Vec<u8>, EngineError>> + Send;

    /// Replaces the run-time state with `snapshot`.
    fn restore_state(&self, snapshot: &[u8])
    -> impl Future<Output = Result<(), EngineError>> + Send;

    fn pause(&self);

    fn resume(&self);
}

/// Proof of exclusive access to the engine for one state operation.
pub struct EngineGuard {
    _permit: OwnedMutexGuard<()>,
}

/// One live emulation session.
///
/// Tracks liveness (an ended session answers every operation with
/// [`SaveError::EngineUnavailable`]) and the paused/running indicator shown
/// by the UI.
pub struct EngineSession<E> {
    engine: E,
    gate: Arc<Mutex<()>>,
    alive: AtomicBool,
    paused: AtomicBool,
}

impl<E: Engine> EngineSession<E> {
    pub fn new(engine: E) -> Arc<Self> {
        Arc::new(Self {
            engine,
            gate: Arc::new(Mutex::new(())),
            alive: AtomicBool::new(true),
            paused: AtomicBool::new(false),
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Returns `true` while a capture or restore holds the engine.
    pub fn is_engaged(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Marks the session as ended. Operations already holding a guard finish
    /// normally; everything after resolves to `EngineUnavailable`.
    pub fn end(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            debug!("engine session ended");
        }
    }

    pub fn pause(&self) -> Result<(), SaveError> {
        self.ensure_alive()?;
        self.engine.pause();
        self.paused.store(true, Ordering::Release);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SaveError> {
        self.ensure_alive()?;
        self.engine.resume();
        self.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Waits until no other state operation holds the engine.
    pub async fn acquire(&self) -> Result<EngineGuard, SaveError> {
        self.ensure_alive()?;
        let permit = Arc::clone(&self.gate).lock_owned().await;
        Ok(EngineGuard { _permit: permit })
    }

    /// Takes the engine only if it is free right now.
    pub fn try_acquire(&self) -> Result<EngineGuard, SaveError> {
        self.ensure_alive()?;
        Arc::clone(&self.gate)
            .try_lock_owned()
            .map(|permit| EngineGuard { _permit: permit })
            .map_err(|_| SaveError::Busy)
    }

    /// Acquires the engine and captures its state.
    pub async fn capture(&self) -> Result<Snapshot, SaveError> {
        let guard = self.acquire().await?;
        self.capture_with(&guard).await
    }

    /// Captures the engine state under an already held guard.
    ///
    /// An empty payload counts as a failed capture.
    pub async fn capture_with(&self, _guard: &EngineGuard) -> Result<Snapshot, SaveError> {
        self.ensure_alive()?;
        match self.engine.capture_state().await {
            Ok(bytes) if bytes.is_empty() => Err(SaveError::CaptureFailed(
                "engine returned an empty snapshot".to_string(),
            )),
            Ok(bytes) => Ok(Snapshot::from(bytes)),
            Err(err) => Err(SaveError::CaptureFailed(err.to_string())),
        }
    }

    /// Restores `snapshot` under an already held guard. Does not resume.
    pub async fn restore_with(
        &self,
        _guard: &EngineGuard,
        snapshot: &Snapshot,
    ) -> Result<(), SaveError> {
        self.ensure_alive()?;
        if snapshot.is_empty() {
            return Err(SaveError::EmptyPayload);
        }
        self.engine
            .restore_state(snapshot.as_bytes())
            .await
            .map_err(|err| SaveError::RestoreFailed(err.to_string()))
    }

    fn ensure_alive(&self) -> Result<(), SaveError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SaveError::EngineUnavailable)
        }
    }
}
