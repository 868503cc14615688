//! Full timer lifecycle scenarios through the engine.

use crate::common::engine_with_recorder;
use chrono::{Duration, Utc};
use hearth::TimerState;

/// Test: create-then-start yields a deadline exactly `duration` after
/// the start time.
#[tokio::test]
async fn test_start_deadline_matches_duration() {
    let (engine, _recorder) = engine_with_recorder().await;

    let timer = engine.create("Pasta", None, 600).await.unwrap();
    let started = engine.start_timer(&timer.id, None).await.unwrap();

    let start = started.start_time.unwrap();
    let end = started.end_time.unwrap();
    assert_eq!(end - start, Duration::seconds(600));
}

/// Test: pause then unpause preserves remaining time.
#[tokio::test]
async fn test_pause_unpause_preserves_remaining_time() {
    let (engine, _recorder) = engine_with_recorder().await;

    let timer = engine.create("Tea", None, 300).await.unwrap();
    engine.start_timer(&timer.id, None).await.unwrap();

    let paused = engine.pause(&timer.id).await.unwrap();
    assert_eq!(paused.state, TimerState::Paused);
    assert!(paused.end_time.is_none());
    assert!(paused.duration <= 300 && paused.duration >= 298);

    let resumed = engine.unpause(&timer.id).await.unwrap();
    assert_eq!(resumed.state, TimerState::Running);
    assert_eq!(
        resumed.end_time.unwrap() - resumed.start_time.unwrap(),
        Duration::seconds(paused.duration)
    );
}

/// Test: a kitchen-timer session end to end, with the event trail.
#[tokio::test]
async fn test_pasta_session_end_to_end() {
    let (engine, recorder) = engine_with_recorder().await;

    let timer = engine
        .create("Pasta", Some("rolling boil".into()), 600)
        .await
        .unwrap();
    assert_eq!(timer.state, TimerState::Pending);

    let started = engine.start_timer(&timer.id, None).await.unwrap();
    let end = started.end_time.unwrap();

    // Two more minutes, it's rigatoni.
    let extended = engine.add_time(&timer.id, 120).await.unwrap();
    assert_eq!(extended.end_time, Some(end + Duration::seconds(120)));
    assert_eq!(extended.duration, 720);

    let paused = engine.pause(&timer.id).await.unwrap();
    assert_eq!(paused.state, TimerState::Paused);

    let resumed = engine.unpause(&timer.id).await.unwrap();
    assert_eq!(resumed.state, TimerState::Running);

    let finished = engine.finish(&timer.id).await.unwrap();
    assert_eq!(finished.state, TimerState::Finished);
    assert!(finished.end_time.unwrap() <= Utc::now());

    assert_eq!(
        recorder.kinds().await,
        vec![
            "created",
            "started",
            "time-added",
            "paused",
            "unpaused",
            "finished"
        ]
    );
}

/// Test: cancel is terminal; a second cancel is rejected, emits nothing
/// and changes nothing.
#[tokio::test]
async fn test_second_cancel_is_rejected() {
    let (engine, recorder) = engine_with_recorder().await;

    let timer = engine.create("Laundry", None, 2700).await.unwrap();
    engine.start_timer(&timer.id, None).await.unwrap();

    let first = engine.cancel(&timer.id).await.unwrap();
    assert_eq!(first.state, TimerState::Canceled);

    assert!(matches!(
        engine.cancel(&timer.id).await,
        Err(hearth::EngineError::InvalidState {
            current: TimerState::Canceled,
            ..
        })
    ));

    let unchanged = engine.get(&timer.id).await.unwrap();
    assert_eq!(unchanged.updated_at, first.updated_at);
    assert_eq!(
        recorder.kinds().await,
        vec!["created", "started", "canceled"]
    );

    // And the timer stays dead.
    assert!(engine.start_timer(&timer.id, None).await.is_err());
    assert!(engine.pause(&timer.id).await.is_err());
    assert!(engine.add_time(&timer.id, 60).await.is_err());
}

/// Test: expiration through the scheduler finishes the timer and the
/// finish is not flagged late.
#[tokio::test(start_paused = true)]
async fn test_expiration_finishes_on_time() {
    let (engine, recorder) = engine_with_recorder().await;
    engine.start();

    let timer = engine.create("Egg", None, 420).await.unwrap();
    engine.start_timer(&timer.id, None).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(500)).await;

    let finished = engine.get(&timer.id).await.unwrap();
    assert_eq!(finished.state, TimerState::Finished);

    let events = recorder.events().await;
    match events.last().unwrap() {
        hearth::TimerEvent::Finished { late, .. } => assert!(!late),
        other => panic!("expected Finished, got {}", other.kind()),
    }
}

/// Test: canceling before the deadline suppresses the expiration.
#[tokio::test(start_paused = true)]
async fn test_cancel_beats_expiration() {
    let (engine, recorder) = engine_with_recorder().await;
    engine.start();

    let timer = engine.create("Egg", None, 420).await.unwrap();
    engine.start_timer(&timer.id, None).await.unwrap();
    engine.cancel(&timer.id).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(500)).await;

    assert_eq!(
        engine.get(&timer.id).await.unwrap().state,
        TimerState::Canceled
    );
    assert!(!recorder.kinds().await.contains(&"finished"));
}

/// Test: shortening a running timer past its deadline finishes it via
/// the late expiration path.
#[tokio::test(start_paused = true)]
async fn test_negative_add_time_past_deadline_finishes_late() {
    let (engine, recorder) = engine_with_recorder().await;
    engine.start();

    let timer = engine.create("Tea", None, 300).await.unwrap();
    engine.start_timer(&timer.id, None).await.unwrap();
    engine.add_time(&timer.id, -600).await.unwrap();

    // Give the expiration loop a tick to drain the immediate message.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(
        engine.get(&timer.id).await.unwrap().state,
        TimerState::Finished
    );
    let events = recorder.events().await;
    match events.last().unwrap() {
        hearth::TimerEvent::Finished { late, .. } => assert!(late),
        other => panic!("expected Finished, got {}", other.kind()),
    }
}
