use std::sync::Arc;
use std::time::Duration;

use savekeep_core::mock::{EngineCall, MockEngine};
use savekeep_core::{
    AutoSaveConfig, MemorySink, RewindMode, SaveError, SaveKind, SaveSession, SessionConfig,
};

fn session_with_sink(
    config: SessionConfig,
) -> (MockEngine, Arc<MemorySink>, SaveSession<MockEngine>) {
    let engine = MockEngine::new();
    let sink = Arc::new(MemorySink::new());
    let session = SaveSession::with_sink(engine.clone(), config, sink.clone());
    (engine, sink, session)
}

#[tokio::test(start_paused = true)]
async fn manual_save_reaches_the_sink() {
    let (engine, sink, session) = session_with_sink(SessionConfig::default());
    engine.set_frame(30);

    let blob = session.request_save().await.unwrap();
    assert_eq!(blob.kind(), SaveKind::Manual);
    assert_eq!(blob.data(), b"frame:30");
    assert_eq!(blob.content_type(), "application/octet-stream");
    assert_eq!(sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn saved_blob_loads_back_and_resumes() {
    let (engine, _sink, session) = session_with_sink(SessionConfig::default());
    engine.set_frame(12);
    let blob = session.request_save().await.unwrap();

    engine.set_frame(400);
    session.pause().unwrap();
    assert!(session.status().paused);

    session.load_snapshot(blob).await.unwrap();
    assert_eq!(engine.state(), b"frame:12".to_vec());
    assert_eq!(engine.calls().last(), Some(&EngineCall::Resume));
    assert!(!session.status().paused);
}

#[tokio::test(start_paused = true)]
async fn empty_load_is_rejected() {
    let engine = MockEngine::new();
    let session = SaveSession::start(engine.clone(), SessionConfig::default());
    assert_eq!(
        session.load_snapshot(Vec::new()).await,
        Err(SaveError::EmptyPayload)
    );
    assert!(engine.restores().is_empty());
}

#[tokio::test(start_paused = true)]
async fn auto_save_runs_on_its_interval() {
    let config = SessionConfig {
        auto_save: AutoSaveConfig {
            interval: Some(Duration::from_secs(1)),
        },
        ..SessionConfig::default()
    };
    let (_engine, sink, session) = session_with_sink(config);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let blobs = sink.blobs();
    assert_eq!(blobs.len(), 3);
    assert!(blobs.iter().all(|b| b.kind() == SaveKind::Auto));

    session.pause().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sink.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_takes_emergency_save_and_ends_session() {
    let (engine, sink, session) = session_with_sink(SessionConfig::default());
    engine.set_frame(77);
    session.start_capture();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(session.status().rewind.mode, RewindMode::Capturing);

    let engine_session = Arc::clone(session.engine());
    let scheduler = session.scheduler().clone();
    let blob = session.shutdown().await.unwrap();

    assert_eq!(blob.kind(), SaveKind::Emergency);
    assert_eq!(blob.data(), b"frame:77");
    assert_eq!(sink.blobs().last().map(|b| b.kind()), Some(SaveKind::Emergency));
    assert!(!engine_session.is_alive());

    let captures = engine.capture_count();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.capture_count(), captures);
    assert!(scheduler.enqueue_high().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_without_emergency_save() {
    let config = SessionConfig {
        emergency_save: false,
        ..SessionConfig::default()
    };
    let (engine, sink, session) = session_with_sink(config);
    assert!(session.shutdown().await.is_none());
    assert!(sink.is_empty());
    assert_eq!(engine.capture_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn status_reflects_rewind_and_queue() {
    let (engine, _sink, session) = session_with_sink(SessionConfig::default());
    engine.set_latency(Duration::from_millis(50));

    let first = session.request_capture();
    let second = session.request_capture();
    let (first, second) = tokio::join!(first, second);
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(session.scheduler().stats().queued_low, 0);

    let status = session.status();
    assert_eq!(status.scheduler.completed, 2);
    assert_eq!(status.scheduler.queue_len, 0);
    assert!(!status.scheduler.busy);
    assert_eq!(status.rewind.mode, RewindMode::Idle);
    assert!(!session.is_busy());
}

#[tokio::test(start_paused = true)]
async fn capture_request_is_subject_to_backpressure() {
    let (engine, sink, session) = session_with_sink(SessionConfig::default());
    engine.set_latency(Duration::from_millis(50));

    let scheduler = session.scheduler().clone();
    let busy = scheduler.enqueue_high();
    let queued: Vec<_> = (0..3).map(|_| scheduler.enqueue_low()).collect();

    assert_eq!(
        session.request_capture().await,
        Err(SaveError::Rejected { pending: 3 })
    );

    assert!(busy.await.is_ok());
    for ticket in queued {
        assert!(ticket.await.is_ok());
    }
    assert_eq!(engine.capture_count(), 4);
    assert!(sink.is_empty());
}
