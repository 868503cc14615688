//! Wall-clock expiration scheduling.
//!
//! One sleeping task per running timer. When a timer's deadline arrives
//! the scheduler sends an [`Expiration`] message; it never mutates timer
//! state itself. Scheduling is idempotent: scheduling an id that already
//! has a pending task replaces the old task.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::TimerId;

/// A deadline that has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    /// The timer whose deadline passed.
    pub id: TimerId,
    /// Set when the deadline had already passed at scheduling time, so
    /// the expiration was discovered after the fact rather than observed
    /// live.
    pub late: bool,
}

/// Schedules one expiration message per running timer.
pub struct ExpirationScheduler {
    tasks: Mutex<HashMap<TimerId, JoinHandle<()>>>,
    tx: mpsc::UnboundedSender<Expiration>,
}

impl ExpirationScheduler {
    /// Create a scheduler and the receiver its expirations arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiration>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tasks: Mutex::new(HashMap::new()),
            tx,
        };
        (scheduler, rx)
    }

    /// Schedule an expiration for `id` at `end_time`.
    ///
    /// Replaces any pending task for the same id. A deadline already in
    /// the past produces an immediate expiration marked `late`.
    pub fn schedule(&self, id: TimerId, end_time: DateTime<Utc>) {
        let now = Utc::now();
        let mut tasks = self.lock_tasks();

        if let Some(previous) = tasks.remove(&id) {
            previous.abort();
        }

        let delay = match (end_time - now).to_std() {
            Ok(delay) => delay,
            Err(_) => {
                // Deadline already passed.
                let _ = self.tx.send(Expiration { id, late: true });
                return;
            }
        };

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Expiration { id, late: false });
        });
        tasks.insert(id, handle);
    }

    /// Cancel any pending expiration for `id`. No-op when none is pending.
    pub fn cancel(&self, id: &TimerId) {
        if let Some(handle) = self.lock_tasks().remove(id) {
            handle.abort();
        }
    }

    /// Whether `id` currently has a pending expiration task.
    pub fn is_scheduled(&self, id: &TimerId) -> bool {
        self.lock_tasks().contains_key(id)
    }

    /// Number of pending expiration tasks.
    pub fn scheduled_count(&self) -> usize {
        self.lock_tasks().len()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<TimerId, JoinHandle<()>>> {
        // A poisoned lock only means a task panicked mid-update; the map
        // itself is still usable.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
