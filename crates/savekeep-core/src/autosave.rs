//! Periodic high-priority saves.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineSession};
use crate::persist::SaveSink;
use crate::scheduler::Scheduler;
use crate::snapshot::SaveKind;

/// Background task that saves on a fixed interval and hands the result to a
/// [`SaveSink`]. Stops when dropped or when the engine session ends.
pub struct AutoSaver {
    task: JoinHandle<()>,
}

impl AutoSaver {
    pub fn spawn<E: Engine>(
        session: Arc<EngineSession<E>>,
        scheduler: Scheduler,
        sink: Arc<dyn SaveSink>,
        period: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs_f64(), "auto-save enabled");

            loop {
                timer.tick().await;
                if !session.is_alive() {
                    break;
                }
                if session.is_paused() {
                    debug!("engine paused; skipping auto-save");
                    continue;
                }

                match scheduler.enqueue_high().await {
                    Ok(snapshot) => {
                        let blob = snapshot.to_blob(SaveKind::Auto);
                        if let Err(err) = sink.deliver(&blob) {
                            warn!(%err, "auto-save delivery failed");
                        }
                    }
                    Err(err) => warn!(%err, "auto-save failed"),
                }
            }
            debug!("auto-save stopped");
        });

        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
