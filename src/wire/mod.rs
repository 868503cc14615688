//! Wire-protocol publication and inbound command routing.
//!
//! Timers are mirrored to an external message bus (MQTT or similar) on a
//! per-timer state topic, and remote controllers send commands back on a
//! per-timer command topic. The broker client itself lives behind the
//! [`WirePublisher`] trait; this module only owns the topic scheme, the
//! command grammar, and the mapping onto engine operations.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::core::TimerId;
use crate::engine::TimerEngine;
use crate::events::{EventHandler, TimerEvent};
use crate::storage::Storage;

/// Error publishing to the external bus.
#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// Publishes a JSON payload to a topic on the external bus.
#[async_trait]
pub trait WirePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError>;
}

/// Topic layout under a configurable prefix.
///
/// State goes out on `{prefix}/smarttimer/{id}/set`; commands come in on
/// `{prefix}/smarttimer/{id}/command`.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    prefix: String,
}

impl TopicScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    /// Topic the timer's state is published on.
    pub fn state_topic(&self, id: &TimerId) -> String {
        format!("{}/smarttimer/{}/set", self.prefix, id)
    }

    /// Topic commands for the timer arrive on.
    pub fn command_topic(&self, id: &TimerId) -> String {
        format!("{}/smarttimer/{}/command", self.prefix, id)
    }

    /// Subscription filter matching every timer's command topic.
    pub fn command_filter(&self) -> String {
        format!("{}/smarttimer/+/command", self.prefix)
    }

    /// Extract the timer id from a command topic, if the topic matches
    /// the scheme.
    pub fn parse_command_topic(&self, topic: &str) -> Option<TimerId> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let rest = rest.strip_prefix("smarttimer/")?;
        let id = rest.strip_suffix("/command")?;
        if id.contains('/') {
            return None;
        }
        TimerId::parse(id).ok()
    }
}

/// Remote command action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Start,
    Pause,
    Cancel,
}

/// An inbound command message.
#[derive(Debug, Clone, Deserialize)]
pub struct TimerCommand {
    pub action: CommandAction,
    /// Optional duration override, only meaningful for `start`.
    pub duration: Option<i64>,
}

/// Event handler that mirrors committed timer state onto the bus.
///
/// Only transitions a remote controller can cause or observe directly
/// are mirrored: start, pause, cancel, finish.
pub struct WireStatePublisher {
    publisher: Arc<dyn WirePublisher>,
    topics: TopicScheme,
}

impl WireStatePublisher {
    pub fn new(publisher: Arc<dyn WirePublisher>, topics: TopicScheme) -> Self {
        Self { publisher, topics }
    }
}

#[async_trait]
impl EventHandler for WireStatePublisher {
    async fn handle(&self, event: &TimerEvent) {
        let timer = match event {
            TimerEvent::Started { timer, .. }
            | TimerEvent::Paused { timer, .. }
            | TimerEvent::Canceled { timer, .. }
            | TimerEvent::Finished { timer, .. } => timer,
            _ => return,
        };

        let payload = match serde_json::to_value(timer) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(timer_id = %timer.id, error = %e, "failed to encode timer for wire");
                return;
            }
        };

        let topic = self.topics.state_topic(&timer.id);
        if let Err(e) = self.publisher.publish(&topic, payload).await {
            tracing::warn!(topic = %topic, error = %e, "wire publish failed");
        }
    }
}

/// Routes inbound command messages onto engine operations.
pub struct CommandRouter<S: Storage> {
    engine: Arc<TimerEngine<S>>,
    topics: TopicScheme,
}

impl<S: Storage + 'static> CommandRouter<S> {
    pub fn new(engine: Arc<TimerEngine<S>>, topics: TopicScheme) -> Self {
        Self { engine, topics }
    }

    /// Handle one raw message from the bus.
    ///
    /// Malformed topics and payloads, and commands the timer's state
    /// rejects, are logged and dropped; the bus offers nowhere to report
    /// them back to.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let Some(id) = self.topics.parse_command_topic(topic) else {
            tracing::debug!(topic = %topic, "ignoring message on unrecognized topic");
            return;
        };

        let command: TimerCommand = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "malformed command payload");
                return;
            }
        };

        let result = match command.action {
            CommandAction::Start => self.engine.start_timer(&id, command.duration).await,
            CommandAction::Pause => self.engine.pause(&id).await,
            CommandAction::Cancel => self.engine.cancel(&id).await,
        };

        match result {
            Ok(timer) => {
                tracing::info!(timer_id = %id, action = ?command.action, state = %timer.state, "wire command applied");
            }
            Err(e) => {
                tracing::warn!(timer_id = %id, action = ?command.action, error = %e, "wire command rejected");
            }
        }
    }
}
