//! Restart recovery integration tests.
//!
//! A "restart" here is a second engine constructed over the same
//! storage; the first engine's in-memory cache and scheduler state are
//! simply gone, as they would be after a process exit.

use crate::common::EventRecorder;
use chrono::{Duration, Utc};
use hearth::{
    EventBus, InMemoryStorage, SmartTimer, Storage, TimerEngine, TimerEvent, TimerState,
};
use std::sync::Arc;

/// Test: a running timer survives a restart and still fires on time.
#[tokio::test(start_paused = true)]
async fn test_running_timer_survives_restart() {
    let storage = Arc::new(InMemoryStorage::new());

    // First process: create and start a timer, then "crash".
    {
        let engine = TimerEngine::new(storage.clone(), Arc::new(EventBus::new()));
        let timer = engine.create("Roast", None, 10).await.unwrap();
        engine.start_timer(&timer.id, None).await.unwrap();
    }

    // Second process: recover and let the deadline arrive.
    let bus = Arc::new(EventBus::new());
    let recorder = EventRecorder::new();
    bus.register(recorder.clone()).await;
    let engine = TimerEngine::new(storage.clone(), bus);

    let summary = engine.recover_on_startup().await.unwrap();
    assert_eq!(summary.loaded, 1);
    assert_eq!(summary.rescheduled, 1);
    assert_eq!(summary.finished_late, 0);
    engine.start();

    tokio::time::sleep(std::time::Duration::from_secs(15)).await;

    let recovered = engine.list().await;
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].state, TimerState::Finished);
    match recorder.events().await.last().unwrap() {
        TimerEvent::Finished { late, .. } => assert!(!late),
        other => panic!("expected Finished, got {}", other.kind()),
    }
}

/// Test: a deadline that passed while the process was down finishes
/// immediately on recovery, flagged late.
#[tokio::test]
async fn test_missed_deadline_finishes_late_on_recovery() {
    let storage = Arc::new(InMemoryStorage::new());

    let mut timer = SmartTimer::new("Bread", None, 3600);
    timer.state = TimerState::Running;
    timer.start_time = Some(Utc::now() - Duration::hours(2));
    timer.end_time = Some(Utc::now() - Duration::hours(1));
    let id = timer.id;
    storage.save_timer(timer).await.unwrap();

    let bus = Arc::new(EventBus::new());
    let recorder = EventRecorder::new();
    bus.register(recorder.clone()).await;
    let engine = TimerEngine::new(storage.clone(), bus);

    let summary = engine.recover_on_startup().await.unwrap();
    assert_eq!(summary.finished_late, 1);

    // Durable, not just cached.
    assert_eq!(
        storage.get_timer(&id).await.unwrap().state,
        TimerState::Finished
    );
    match recorder.events().await.last().unwrap() {
        TimerEvent::Finished { late, .. } => assert!(late),
        other => panic!("expected Finished, got {}", other.kind()),
    }
}

/// Test: recovery leaves idle timers alone.
#[tokio::test]
async fn test_recovery_does_not_touch_idle_timers() {
    let storage = Arc::new(InMemoryStorage::new());

    let pending = SmartTimer::new("A", None, 60);
    let mut paused = SmartTimer::new("B", None, 120);
    paused.state = TimerState::Paused;
    let mut finished = SmartTimer::new("C", None, 60);
    finished.state = TimerState::Finished;

    let ids = [pending.id, paused.id, finished.id];
    storage.save_timer(pending).await.unwrap();
    storage.save_timer(paused).await.unwrap();
    storage.save_timer(finished).await.unwrap();

    let engine = TimerEngine::new(storage, Arc::new(EventBus::new()));
    let summary = engine.recover_on_startup().await.unwrap();

    assert_eq!(summary.loaded, 3);
    assert_eq!(summary.rescheduled, 0);
    assert_eq!(summary.finished_late, 0);

    assert_eq!(engine.get(&ids[0]).await.unwrap().state, TimerState::Pending);
    assert_eq!(engine.get(&ids[1]).await.unwrap().state, TimerState::Paused);
    assert_eq!(
        engine.get(&ids[2]).await.unwrap().state,
        TimerState::Finished
    );
}

/// Test: a paused timer recovered after a long gap resumes for its
/// stored remaining time, not its original length.
#[tokio::test]
async fn test_paused_timer_resumes_with_stored_remaining() {
    let storage = Arc::new(InMemoryStorage::new());

    // Paused a week ago with 42 seconds left.
    let mut timer = SmartTimer::new("Stew", None, 42);
    timer.state = TimerState::Paused;
    timer.updated_at = Utc::now() - Duration::days(7);
    let id = timer.id;
    storage.save_timer(timer).await.unwrap();

    let engine = TimerEngine::new(storage, Arc::new(EventBus::new()));
    engine.recover_on_startup().await.unwrap();

    let resumed = engine.unpause(&id).await.unwrap();
    assert_eq!(resumed.state, TimerState::Running);
    assert_eq!(
        resumed.end_time.unwrap() - resumed.start_time.unwrap(),
        Duration::seconds(42)
    );
}
