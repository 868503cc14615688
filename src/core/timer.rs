//! The SmartTimer record and its state machine states.
//!
//! A SmartTimer is a countdown entity. While it is not running, `duration`
//! is the number of seconds it will run when (re)started. While it is
//! running, the authoritative countdown is derived from `end_time`;
//! `duration` keeps the originally requested length.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::TimerId;

/// Lifecycle state of a timer.
///
/// ```text
/// pending --start--> running
/// running --pause--> paused
/// paused  --unpause--> running
/// running/paused --cancel--> canceled   (terminal)
/// running --finish--> finished          (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    /// Created, never started.
    Pending,
    /// Counting down towards `end_time`.
    Running,
    /// Stopped with remaining time folded back into `duration`.
    Paused,
    /// Canceled by a caller (terminal).
    Canceled,
    /// Expired or explicitly finished (terminal).
    Finished,
}

impl TimerState {
    /// Whether the state permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerState::Canceled | TimerState::Finished)
    }

    /// Stable lowercase name, used in storage and API query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerState::Pending => "pending",
            TimerState::Running => "running",
            TimerState::Paused => "paused",
            TimerState::Canceled => "canceled",
            TimerState::Finished => "finished",
        }
    }

    /// Parse a state from its lowercase name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TimerState::Pending),
            "running" => Some(TimerState::Running),
            "paused" => Some(TimerState::Paused),
            "canceled" => Some(TimerState::Canceled),
            "finished" => Some(TimerState::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A smart timer record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartTimer {
    /// Unique identifier, assigned at creation, immutable.
    pub id: TimerId,
    /// Display name, non-empty.
    pub label: String,
    /// Optional free text.
    pub description: Option<String>,
    /// Seconds to run when (re)started; while running, the originally
    /// requested length.
    pub duration: i64,
    /// Current lifecycle state.
    pub state: TimerState,
    /// When the timer last entered `running`.
    pub start_time: Option<DateTime<Utc>>,
    /// Scheduled expiration while running; the moment of termination for
    /// canceled/finished timers; None otherwise.
    pub end_time: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl SmartTimer {
    /// Create a new pending timer.
    pub fn new(label: impl Into<String>, description: Option<String>, duration: i64) -> Self {
        let now = Utc::now();
        Self {
            id: TimerId::new(),
            label: label.into(),
            description,
            duration,
            state: TimerState::Pending,
            start_time: None,
            end_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the timer is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Seconds left on the countdown as of `now`.
    ///
    /// While running this is derived from `end_time` (floored, never
    /// negative); in every other state it is the stored `duration`.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        match (self.state, self.end_time) {
            (TimerState::Running, Some(end)) => (end - now).num_seconds().max(0),
            _ => self.duration,
        }
    }
}
