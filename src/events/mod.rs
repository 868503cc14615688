//! Timer lifecycle events and event handling.
//!
//! Every state transition the engine commits is announced on the event
//! bus. Subscribers (push notifications, wire publication, realtime
//! broadcast, logging) never feed back into the engine; delivery is
//! decoupled from the transition that caused it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::SmartTimer;

/// Lifecycle events emitted after a timer transition commits.
///
/// Each event carries a snapshot of the timer as it was at commit time,
/// so handlers never have to read the store.
#[derive(Debug, Clone)]
pub enum TimerEvent {
    /// A timer was created (pending).
    Created {
        timer: SmartTimer,
        timestamp: DateTime<Utc>,
    },

    /// A timer entered the running state from pending.
    Started {
        timer: SmartTimer,
        timestamp: DateTime<Utc>,
    },

    /// A running timer was paused with its remaining seconds captured.
    Paused {
        timer: SmartTimer,
        timestamp: DateTime<Utc>,
    },

    /// A paused timer resumed counting down.
    Unpaused {
        timer: SmartTimer,
        timestamp: DateTime<Utc>,
    },

    /// A running timer's expiration moved by `seconds` (may be negative).
    TimeAdded {
        timer: SmartTimer,
        seconds: i64,
        timestamp: DateTime<Utc>,
    },

    /// A timer was canceled (terminal).
    Canceled {
        timer: SmartTimer,
        timestamp: DateTime<Utc>,
    },

    /// A timer finished (terminal).
    ///
    /// `late` is set when the expiration was discovered after the fact,
    /// e.g. on restart recovery of a timer whose deadline passed while
    /// the process was down.
    Finished {
        timer: SmartTimer,
        late: bool,
        timestamp: DateTime<Utc>,
    },
}

impl TimerEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimerEvent::Created { timestamp, .. } => *timestamp,
            TimerEvent::Started { timestamp, .. } => *timestamp,
            TimerEvent::Paused { timestamp, .. } => *timestamp,
            TimerEvent::Unpaused { timestamp, .. } => *timestamp,
            TimerEvent::TimeAdded { timestamp, .. } => *timestamp,
            TimerEvent::Canceled { timestamp, .. } => *timestamp,
            TimerEvent::Finished { timestamp, .. } => *timestamp,
        }
    }

    /// The timer snapshot carried by the event.
    pub fn timer(&self) -> &SmartTimer {
        match self {
            TimerEvent::Created { timer, .. } => timer,
            TimerEvent::Started { timer, .. } => timer,
            TimerEvent::Paused { timer, .. } => timer,
            TimerEvent::Unpaused { timer, .. } => timer,
            TimerEvent::TimeAdded { timer, .. } => timer,
            TimerEvent::Canceled { timer, .. } => timer,
            TimerEvent::Finished { timer, .. } => timer,
        }
    }

    /// Short lowercase name, used in notification payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TimerEvent::Created { .. } => "created",
            TimerEvent::Started { .. } => "started",
            TimerEvent::Paused { .. } => "paused",
            TimerEvent::Unpaused { .. } => "unpaused",
            TimerEvent::TimeAdded { .. } => "time-added",
            TimerEvent::Canceled { .. } => "canceled",
            TimerEvent::Finished { .. } => "finished",
        }
    }

    /// Create a Created event.
    pub fn created(timer: SmartTimer) -> Self {
        TimerEvent::Created {
            timer,
            timestamp: Utc::now(),
        }
    }

    /// Create a Started event.
    pub fn started(timer: SmartTimer) -> Self {
        TimerEvent::Started {
            timer,
            timestamp: Utc::now(),
        }
    }

    /// Create a Paused event.
    pub fn paused(timer: SmartTimer) -> Self {
        TimerEvent::Paused {
            timer,
            timestamp: Utc::now(),
        }
    }

    /// Create an Unpaused event.
    pub fn unpaused(timer: SmartTimer) -> Self {
        TimerEvent::Unpaused {
            timer,
            timestamp: Utc::now(),
        }
    }

    /// Create a TimeAdded event.
    pub fn time_added(timer: SmartTimer, seconds: i64) -> Self {
        TimerEvent::TimeAdded {
            timer,
            seconds,
            timestamp: Utc::now(),
        }
    }

    /// Create a Canceled event.
    pub fn canceled(timer: SmartTimer) -> Self {
        TimerEvent::Canceled {
            timer,
            timestamp: Utc::now(),
        }
    }

    /// Create a Finished event.
    pub fn finished(timer: SmartTimer, late: bool) -> Self {
        TimerEvent::Finished {
            timer,
            late,
            timestamp: Utc::now(),
        }
    }
}

/// Handler for receiving timer lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &TimerEvent);
}

/// Event bus for distributing events to registered handlers.
///
/// Handlers are invoked sequentially in registration order. A handler
/// that blocks delays the ones after it, so handlers doing real I/O
/// should hand off internally rather than await the network here. Each
/// delivery runs on its own task, so a panicking handler is logged and
/// skipped instead of unwinding into the caller.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: TimerEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = self.handlers.read().await.clone();
        for handler in handlers {
            let delivery = event.clone();
            let result = tokio::spawn(async move { handler.handle(&delivery).await }).await;
            if let Err(e) = result {
                tracing::error!(event = event.kind(), error = %e, "event handler panicked");
            }
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
