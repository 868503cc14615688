//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Storage, StorageError, TimerPatch};
use crate::core::{ChannelKind, DeviceId, Recipient, RecipientId, SmartTimer, TimerId, TimerState, UserId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    timers: RwLock<HashMap<TimerId, SmartTimer>>,
    recipients: RwLock<HashMap<RecipientId, Recipient>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            recipients: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_timer(&self, timer: SmartTimer) -> Result<(), StorageError> {
        let mut timers = self.timers.write().map_err(|_| StorageError::LockPoisoned)?;
        if timers.contains_key(&timer.id) {
            return Err(StorageError::DuplicateKey(format!("timer: {}", timer.id)));
        }
        timers.insert(timer.id, timer);
        Ok(())
    }

    async fn get_timer(&self, id: &TimerId) -> Result<SmartTimer, StorageError> {
        let timers = self.timers.read().map_err(|_| StorageError::LockPoisoned)?;
        timers
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("timer: {}", id)))
    }

    async fn list_timers(&self) -> Result<Vec<SmartTimer>, StorageError> {
        let timers = self.timers.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = timers.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn list_timers_by_state(
        &self,
        states: &[TimerState],
    ) -> Result<Vec<SmartTimer>, StorageError> {
        let timers = self.timers.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = timers
            .values()
            .filter(|t| states.contains(&t.state))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn update_timer(
        &self,
        id: &TimerId,
        patch: TimerPatch,
    ) -> Result<SmartTimer, StorageError> {
        let mut timers = self.timers.write().map_err(|_| StorageError::LockPoisoned)?;
        let timer = timers
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("timer: {}", id)))?;
        patch.apply(timer, Utc::now());
        Ok(timer.clone())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut timers = self.timers.write().map_err(|_| StorageError::LockPoisoned)?;
        let doomed: Vec<TimerId> = timers
            .values()
            .filter(|t| t.is_terminal() && t.updated_at < cutoff)
            .map(|t| t.id)
            .collect();
        for id in &doomed {
            timers.remove(id);
        }
        drop(timers);

        // Cascade recipient registrations of pruned timers.
        let mut recipients = self
            .recipients
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        recipients.retain(|_, r| !doomed.contains(&r.timer_id));

        Ok(doomed.len() as u64)
    }

    async fn save_recipient(&self, recipient: Recipient) -> Result<(), StorageError> {
        // Same referential rule the SQLite backend enforces with its
        // foreign key: a registration needs an existing timer.
        // Lock order matches prune_before: timers first, then recipients.
        let timers = self.timers.read().map_err(|_| StorageError::LockPoisoned)?;
        if !timers.contains_key(&recipient.timer_id) {
            return Err(StorageError::NotFound(format!(
                "timer: {}",
                recipient.timer_id
            )));
        }
        drop(timers);

        let mut recipients = self
            .recipients
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let duplicate = recipients.values().any(|r| {
            r.timer_id == recipient.timer_id
                && r.user_id == recipient.user_id
                && r.device_id == recipient.device_id
                && r.channel == recipient.channel
                && r.target == recipient.target
        });
        if duplicate || recipients.contains_key(&recipient.id) {
            return Err(StorageError::DuplicateKey(format!(
                "recipient: {}/{}/{}",
                recipient.timer_id, recipient.user_id, recipient.device_id
            )));
        }
        recipients.insert(recipient.id, recipient);
        Ok(())
    }

    async fn get_recipient(&self, id: &RecipientId) -> Result<Recipient, StorageError> {
        let recipients = self
            .recipients
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        recipients
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("recipient: {}", id)))
    }

    async fn find_recipient(
        &self,
        timer_id: &TimerId,
        user_id: &UserId,
        device_id: &DeviceId,
        channel: ChannelKind,
        target: &str,
    ) -> Result<Option<Recipient>, StorageError> {
        let recipients = self
            .recipients
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(recipients
            .values()
            .find(|r| {
                &r.timer_id == timer_id
                    && &r.user_id == user_id
                    && &r.device_id == device_id
                    && r.channel == channel
                    && r.target == target
            })
            .cloned())
    }

    async fn list_recipients_for_timer(
        &self,
        timer_id: &TimerId,
    ) -> Result<Vec<Recipient>, StorageError> {
        let recipients = self
            .recipients
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = recipients
            .values()
            .filter(|r| &r.timer_id == timer_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn remove_recipient(&self, id: &RecipientId) -> Result<(), StorageError> {
        let mut recipients = self
            .recipients
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        recipients
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("recipient: {}", id)))?;
        Ok(())
    }
}
