//! Storage abstraction for persisting timers and recipient registrations.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::{ChannelKind, DeviceId, Recipient, RecipientId, SmartTimer, TimerId, TimerState, UserId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// A partial update to a timer record.
///
/// `start_time` and `end_time` are double-optional: the outer `Option`
/// means "leave untouched", the inner one means "set to this / clear".
#[derive(Debug, Clone, Default)]
pub struct TimerPatch {
    pub state: Option<TimerState>,
    pub duration: Option<i64>,
    pub start_time: Option<Option<DateTime<Utc>>>,
    pub end_time: Option<Option<DateTime<Utc>>>,
}

impl TimerPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state.
    pub fn with_state(mut self, state: TimerState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the duration (seconds).
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set or clear the start time.
    pub fn with_start_time(mut self, start_time: Option<DateTime<Utc>>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Set or clear the end time.
    pub fn with_end_time(mut self, end_time: Option<DateTime<Utc>>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Apply the patch to a timer in place, bumping `updated_at`.
    pub fn apply(&self, timer: &mut SmartTimer, now: DateTime<Utc>) {
        if let Some(state) = self.state {
            timer.state = state;
        }
        if let Some(duration) = self.duration {
            timer.duration = duration;
        }
        if let Some(start_time) = self.start_time {
            timer.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            timer.end_time = end_time;
        }
        timer.updated_at = now;
    }
}

/// Storage trait for persisting timer state.
///
/// Timer writes are expected to commit before any in-memory mirror is
/// updated; backends must make each operation atomic.
#[async_trait]
pub trait Storage: Send + Sync {
    // Timer operations

    /// Persist a new timer. Fails with `DuplicateKey` if the id exists.
    async fn save_timer(&self, timer: SmartTimer) -> Result<(), StorageError>;

    /// Get a timer by id.
    async fn get_timer(&self, id: &TimerId) -> Result<SmartTimer, StorageError>;

    /// List all timers, ordered by creation time ascending.
    async fn list_timers(&self) -> Result<Vec<SmartTimer>, StorageError>;

    /// List timers whose state is one of `states`.
    async fn list_timers_by_state(
        &self,
        states: &[TimerState],
    ) -> Result<Vec<SmartTimer>, StorageError>;

    /// Apply a partial update and return the updated record.
    async fn update_timer(
        &self,
        id: &TimerId,
        patch: TimerPatch,
    ) -> Result<SmartTimer, StorageError>;

    /// Delete terminal-state (finished/canceled) timers last updated before
    /// `cutoff`, cascading their recipients. Returns the number deleted.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;

    // Recipient operations

    /// Persist a recipient registration. Fails with `DuplicateKey` when the
    /// (timer, user, device, channel, target) tuple already exists.
    async fn save_recipient(&self, recipient: Recipient) -> Result<(), StorageError>;

    /// Get a recipient by id.
    async fn get_recipient(&self, id: &RecipientId) -> Result<Recipient, StorageError>;

    /// Look up a recipient by its full unique tuple.
    async fn find_recipient(
        &self,
        timer_id: &TimerId,
        user_id: &UserId,
        device_id: &DeviceId,
        channel: ChannelKind,
        target: &str,
    ) -> Result<Option<Recipient>, StorageError>;

    /// List all recipients registered for a timer.
    async fn list_recipients_for_timer(
        &self,
        timer_id: &TimerId,
    ) -> Result<Vec<Recipient>, StorageError>;

    /// Remove a recipient registration.
    async fn remove_recipient(&self, id: &RecipientId) -> Result<(), StorageError>;
}
