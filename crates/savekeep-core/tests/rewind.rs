use std::sync::Arc;
use std::time::Duration;

use savekeep_core::config::RESUME_DELAY;
use savekeep_core::mock::MockEngine;
use savekeep_core::{
    EngineSession, RewindConfig, RewindController, RewindMode, Scheduler, SchedulerConfig,
    load::load_snapshot,
};
use tokio::time::Instant;

struct Rig {
    engine: MockEngine,
    session: Arc<EngineSession<MockEngine>>,
    scheduler: Scheduler,
    rewind: RewindController,
}

fn rig(config: RewindConfig) -> Rig {
    let engine = MockEngine::new();
    let session = EngineSession::new(engine.clone());
    let scheduler = Scheduler::spawn(Arc::clone(&session), SchedulerConfig::default());
    let rewind = RewindController::spawn(
        Arc::clone(&session),
        scheduler.clone(),
        config,
        RESUME_DELAY,
    );
    Rig {
        engine,
        session,
        scheduler,
        rewind,
    }
}

fn with_capacity(capacity: usize) -> RewindConfig {
    RewindConfig {
        capacity,
        ..RewindConfig::default()
    }
}

/// Polls `cond` on the simulated clock until it holds.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..4000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Captures one snapshot per state, in order. `states` must fit the buffer.
async fn record(rig: &Rig, states: &[&[u8]]) {
    for (i, state) in states.iter().enumerate() {
        rig.engine.set_state(state.to_vec());
        wait_for("capture", || rig.rewind.buffer_len() > i).await;
    }
}

#[tokio::test(start_paused = true)]
async fn rewind_plays_history_newest_first_then_stops() {
    let rig = rig(with_capacity(3));
    rig.rewind.start_capture();
    record(&rig, &[b"A", b"B", b"C"]).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Capturing);

    rig.rewind.start_rewind();
    wait_for("rewinding", || rig.rewind.mode() == RewindMode::Rewinding).await;
    let captures_before = rig.engine.capture_count();

    wait_for("rewind exhaustion", || rig.rewind.mode() == RewindMode::Idle).await;
    let stopped_at = Instant::now();

    assert_eq!(
        rig.engine.restores(),
        vec![b"C".to_vec(), b"B".to_vec(), b"A".to_vec()]
    );
    let status = rig.rewind.status();
    assert_eq!(status.buffer_len, 0);
    assert!(status.settling);
    // Capture and rewind never run together.
    assert_eq!(rig.engine.capture_count(), captures_before);

    wait_for("capture re-armed", || rig.rewind.mode() == RewindMode::Capturing).await;
    assert!(stopped_at.elapsed() >= Duration::from_millis(990));
    assert_eq!(rig.engine.capture_count(), captures_before);
    assert!(!rig.rewind.status().settling);

    wait_for("fresh capture", || rig.rewind.buffer_len() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn second_start_rewind_does_not_restart_playback() {
    let rig = rig(with_capacity(3));
    rig.rewind.start_capture();
    record(&rig, &[b"A", b"B", b"C"]).await;

    rig.rewind.start_rewind();
    wait_for("first restore", || rig.engine.restores().len() == 1).await;
    rig.rewind.start_rewind();

    wait_for("rewind exhaustion", || rig.rewind.mode() == RewindMode::Idle).await;
    assert_eq!(
        rig.engine.restores(),
        vec![b"C".to_vec(), b"B".to_vec(), b"A".to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_capture_while_idle_is_ignored() {
    let rig = rig(RewindConfig::default());
    rig.rewind.stop_capture();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Idle);

    rig.rewind.start_capture();
    wait_for("capture", || rig.rewind.buffer_len() == 1).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Capturing);
}

#[tokio::test(start_paused = true)]
async fn full_buffer_evicts_oldest() {
    let rig = rig(with_capacity(2));
    rig.rewind.start_capture();

    for state in [b"A", b"B", b"C"] {
        let before = rig.engine.capture_count();
        rig.engine.set_state(state.to_vec());
        wait_for("capture", || rig.engine.capture_count() > before).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(rig.rewind.buffer_len(), 2);

    rig.rewind.start_rewind();
    wait_for("rewind exhaustion", || {
        rig.rewind.mode() == RewindMode::Idle && rig.engine.restores().len() == 2
    })
    .await;
    assert_eq!(rig.engine.restores(), vec![b"C".to_vec(), b"B".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn stop_rewind_discards_remaining_history() {
    let rig = rig(RewindConfig::default());
    rig.rewind.start_capture();
    record(&rig, &[b"A", b"B", b"C", b"D"]).await;

    rig.rewind.start_rewind();
    wait_for("first restore", || !rig.engine.restores().is_empty()).await;
    rig.rewind.stop_rewind();

    wait_for("history discarded", || {
        rig.rewind.mode() == RewindMode::Idle && rig.rewind.buffer_len() == 0
    })
    .await;
    assert_eq!(rig.engine.restores(), vec![b"D".to_vec()]);

    // Stopping capture during the settle delay keeps the controller idle.
    rig.rewind.stop_capture();
    let captures = rig.engine.capture_count();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Idle);
    assert!(!rig.rewind.status().settling);
    assert_eq!(rig.engine.capture_count(), captures);
}

#[tokio::test(start_paused = true)]
async fn start_rewind_needs_capturing_and_history() {
    let rig = rig(RewindConfig::default());

    rig.rewind.start_rewind();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Idle);

    rig.rewind.start_capture();
    rig.rewind.start_rewind();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Capturing);
    assert!(rig.engine.restores().is_empty());

    // A second start is ignored rather than restarting the timer.
    rig.rewind.start_capture();
    wait_for("capture", || rig.rewind.buffer_len() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn paused_engine_is_not_captured() {
    let rig = rig(RewindConfig::default());
    rig.session.pause().unwrap();
    rig.rewind.start_capture();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.rewind.buffer_len(), 0);
    assert_eq!(rig.engine.capture_count(), 0);

    rig.session.resume().unwrap();
    wait_for("capture after resume", || rig.rewind.buffer_len() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn disabled_buffer_never_captures() {
    let rig = rig(RewindConfig {
        enabled: false,
        ..RewindConfig::default()
    });
    rig.rewind.start_capture();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Idle);
    assert_eq!(rig.engine.capture_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn ended_session_is_not_rearmed_after_settle() {
    let rig = rig(with_capacity(2));
    rig.rewind.start_capture();
    record(&rig, &[b"A", b"B"]).await;

    rig.rewind.start_rewind();
    wait_for("rewind exhaustion", || {
        rig.rewind.mode() == RewindMode::Idle && rig.rewind.status().settling
    })
    .await;
    rig.session.end();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Idle);
    assert!(!rig.rewind.status().settling);
}

#[tokio::test(start_paused = true)]
async fn failed_restore_moves_to_next_snapshot() {
    let rig = rig(with_capacity(3));
    rig.rewind.start_capture();
    record(&rig, &[b"A", b"B", b"C"]).await;

    rig.engine.fail_restores(1);
    rig.rewind.start_rewind();
    wait_for("rewind exhaustion", || {
        rig.rewind.mode() == RewindMode::Idle && rig.engine.restores().len() == 3
    })
    .await;

    assert_eq!(rig.engine.state(), b"A".to_vec());
    assert_eq!(rig.scheduler.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn rewind_loads_and_saves_share_the_engine() {
    let rig = rig(with_capacity(5));
    rig.engine.set_latency(Duration::from_millis(30));
    rig.rewind.start_capture();
    wait_for("history", || rig.rewind.buffer_len() == 4).await;

    let traffic = {
        let session = Arc::clone(&rig.session);
        let scheduler = rig.scheduler.clone();
        tokio::spawn(async move {
            for frame in 0..4 {
                let saved = scheduler.enqueue_high();
                load_snapshot(
                    &session,
                    format!("frame:{frame}").into_bytes(),
                    Duration::from_millis(50),
                )
                .await
                .unwrap();
                assert!(saved.await.is_ok());
                tokio::time::sleep(Duration::from_millis(70)).await;
            }
        })
    };

    rig.rewind.start_rewind();
    traffic.await.unwrap();
    wait_for("rewind exhaustion", || rig.rewind.mode() == RewindMode::Idle).await;

    assert_eq!(rig.engine.max_concurrency(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_capture_and_drops_history() {
    let rig = rig(RewindConfig::default());
    rig.rewind.start_capture();
    wait_for("capture", || rig.rewind.buffer_len() == 2).await;

    rig.rewind.shutdown();
    wait_for("controller stopped", || !rig.rewind.is_running()).await;
    let captures = rig.engine.capture_count();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.rewind.mode(), RewindMode::Idle);
    assert_eq!(rig.rewind.buffer_len(), 0);
    assert_eq!(rig.engine.capture_count(), captures);
}
