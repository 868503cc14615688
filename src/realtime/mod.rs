//! Realtime broadcast to connected clients.
//!
//! A process-wide broadcast channel carries framed timer updates to
//! every connected websocket. Each frame is self-describing JSON:
//! `{"event": "smart-timer-update", "data": <timer>}` for single-timer
//! updates and `{"event": "smart-timer-snapshot", "data": [<timer>...]}`
//! for the full listing a client gets on connect.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::SmartTimer;
use crate::events::{EventHandler, TimerEvent};

/// A frame sent to realtime clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeFrame {
    /// One timer changed.
    #[serde(rename = "smart-timer-update")]
    Update(SmartTimer),
    /// Full current listing, sent on connect or on demand.
    #[serde(rename = "smart-timer-snapshot")]
    Snapshot(Vec<SmartTimer>),
}

/// Fan-out point for realtime frames.
///
/// Slow clients that fall more than the channel capacity behind lose
/// frames (`RecvError::Lagged`) instead of applying backpressure to the
/// engine; the websocket layer resyncs them with a snapshot.
pub struct Broadcaster {
    tx: broadcast::Sender<RealtimeFrame>,
}

impl Broadcaster {
    /// Create a broadcaster buffering up to `capacity` frames per client.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe a new client.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeFrame> {
        self.tx.subscribe()
    }

    /// Broadcast a single-timer update.
    pub fn send_update(&self, timer: SmartTimer) {
        // Err means no clients connected right now.
        let _ = self.tx.send(RealtimeFrame::Update(timer));
    }

    /// Broadcast a full snapshot.
    pub fn send_snapshot(&self, timers: Vec<SmartTimer>) {
        let _ = self.tx.send(RealtimeFrame::Snapshot(timers));
    }

    /// Number of currently subscribed clients.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event handler that mirrors every committed transition to realtime
/// clients.
pub struct RealtimeForwarder {
    broadcaster: std::sync::Arc<Broadcaster>,
}

impl RealtimeForwarder {
    pub fn new(broadcaster: std::sync::Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl EventHandler for RealtimeForwarder {
    async fn handle(&self, event: &TimerEvent) {
        self.broadcaster.send_update(event.timer().clone());
    }
}
