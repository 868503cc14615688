//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use hearth::{
    EventBus, EventHandler, InMemoryStorage, SmartTimer, TimerEngine, TimerEvent, TimerId,
    TimerState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Event handler that records every event it sees.
pub struct EventRecorder {
    events: Mutex<Vec<TimerEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<TimerEvent> {
        self.events.lock().await.clone()
    }

    /// The short names of recorded events, in order.
    pub async fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.kind()).collect()
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle(&self, event: &TimerEvent) {
        self.events.lock().await.push(event.clone());
    }
}

/// Engine over fresh in-memory storage with a recorder on its bus.
pub async fn engine_with_recorder() -> (Arc<TimerEngine<InMemoryStorage>>, Arc<EventRecorder>) {
    let bus = Arc::new(EventBus::new());
    let recorder = EventRecorder::new();
    bus.register(recorder.clone()).await;
    let engine = TimerEngine::new(Arc::new(InMemoryStorage::new()), bus);
    (engine, recorder)
}

/// Wait for a timer to reach an expected state, polling the engine.
///
/// This is more reliable than fixed sleeps since timing can vary.
/// Polls every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the timer reaches the
/// expected state.
#[allow(dead_code)]
pub async fn wait_for_state(
    engine: &TimerEngine<InMemoryStorage>,
    id: &TimerId,
    expected: TimerState,
    timeout: Duration,
) -> SmartTimer {
    let start = tokio::time::Instant::now();
    loop {
        let timer = engine.get(id).await.unwrap();
        if timer.state == expected {
            return timer;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for timer {} to reach {}, current state: {}",
                id, expected, timer.state
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
