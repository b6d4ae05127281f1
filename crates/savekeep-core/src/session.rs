//! The inbound interface used by UI code.

use std::sync::Arc;

use tracing::{info, warn};

use crate::autosave::AutoSaver;
use crate::config::SessionConfig;
use crate::engine::{Engine, EngineSession};
use crate::error::SaveError;
use crate::load;
use crate::persist::SaveSink;
use crate::request::{Priority, SaveOutcome};
use crate::rewind::{RewindController, RewindStatus};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::snapshot::{LoadPayload, SaveKind, SnapshotBlob};

/// Snapshot of everything a status bar would show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub paused: bool,
    pub scheduler: SchedulerStats,
    pub rewind: RewindStatus,
}

/// One emulation session's save machinery: a scheduler, a rewind controller
/// and an optional auto-saver, all sharing the same engine.
///
/// Must be created inside a tokio runtime.
pub struct SaveSession<E> {
    engine: Arc<EngineSession<E>>,
    scheduler: Scheduler,
    rewind: RewindController,
    auto_saver: Option<AutoSaver>,
    sink: Option<Arc<dyn SaveSink>>,
    config: SessionConfig,
}

impl<E: Engine> SaveSession<E> {
    /// Starts a session without a persistence backend. Auto-save needs a
    /// sink, so `config.auto_save` is ignored here.
    pub fn start(engine: E, config: SessionConfig) -> Self {
        Self::build(engine, config, None)
    }

    pub fn with_sink(engine: E, config: SessionConfig, sink: Arc<dyn SaveSink>) -> Self {
        Self::build(engine, config, Some(sink))
    }

    fn build(engine: E, config: SessionConfig, sink: Option<Arc<dyn SaveSink>>) -> Self {
        let engine = EngineSession::new(engine);
        let scheduler = Scheduler::spawn(Arc::clone(&engine), config.scheduler.clone());
        let rewind = RewindController::spawn(
            Arc::clone(&engine),
            scheduler.clone(),
            config.rewind.clone(),
            config.resume_delay,
        );

        let auto_saver = match (config.auto_save.interval, &sink) {
            (Some(period), Some(sink)) => Some(AutoSaver::spawn(
                Arc::clone(&engine),
                scheduler.clone(),
                Arc::clone(sink),
                period,
            )),
            (Some(_), None) => {
                warn!("auto-save requested without a save sink; disabled");
                None
            }
            (None, _) => None,
        };

        info!(
            rewind = config.rewind.enabled,
            auto_save = auto_saver.is_some(),
            "save session started"
        );

        Self {
            engine,
            scheduler,
            rewind,
            auto_saver,
            sink,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<EngineSession<E>> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn rewind(&self) -> &RewindController {
        &self.rewind
    }

    /// Manual save. The blob is delivered to the sink when one is configured.
    pub async fn request_save(&self) -> Result<SnapshotBlob, SaveError> {
        let snapshot = self.scheduler.enqueue_high().await?;
        let blob = snapshot.to_blob(SaveKind::Manual);
        if let Some(sink) = &self.sink {
            sink.deliver(&blob)?;
        }
        Ok(blob)
    }

    /// A low-priority capture that is not persisted anywhere. Rejected under
    /// backpressure like any rewind capture.
    pub async fn request_capture(&self) -> SaveOutcome {
        self.scheduler.enqueue_low().await
    }

    pub async fn load_snapshot(&self, payload: impl Into<LoadPayload>) -> Result<(), SaveError> {
        load::load_snapshot(&self.engine, payload, self.config.resume_delay).await
    }

    pub fn start_capture(&self) {
        self.rewind.start_capture();
    }

    pub fn stop_capture(&self) {
        self.rewind.stop_capture();
    }

    pub fn start_rewind(&self) {
        self.rewind.start_rewind();
    }

    pub fn stop_rewind(&self) {
        self.rewind.stop_rewind();
    }

    pub fn pause(&self) -> Result<(), SaveError> {
        self.engine.pause()
    }

    pub fn resume(&self) -> Result<(), SaveError> {
        self.engine.resume()
    }

    /// Cancels every queued save request.
    pub fn clear(&self) {
        self.scheduler.clear();
    }

    pub fn is_busy(&self) -> bool {
        self.scheduler.is_busy()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            paused: self.engine.is_paused(),
            scheduler: self.scheduler.stats(),
            rewind: self.rewind.status(),
        }
    }

    /// Tears the session down. Takes a final emergency save first when
    /// configured and returns it.
    pub async fn shutdown(self) -> Option<SnapshotBlob> {
        if let Some(auto_saver) = &self.auto_saver {
            auto_saver.stop();
        }
        self.rewind.shutdown();
        self.scheduler.cancel_pending(Priority::Low);

        let emergency = if self.config.emergency_save && self.engine.is_alive() {
            match self.scheduler.enqueue_high().await {
                Ok(snapshot) => {
                    let blob = snapshot.to_blob(SaveKind::Emergency);
                    if let Some(sink) = &self.sink {
                        if let Err(err) = sink.deliver(&blob) {
                            warn!(%err, "emergency save delivery failed");
                        }
                    }
                    info!(bytes = blob.len(), "emergency save taken");
                    Some(blob)
                }
                Err(err) => {
                    warn!(%err, "emergency save failed");
                    None
                }
            }
        } else {
            None
        };

        self.scheduler.shutdown();
        self.engine.end();
        info!("save session closed");
        emergency
    }
}
