//! The timer lifecycle engine.
//!
//! The engine owns all timer state transitions. Every mutation follows
//! the same shape: validate against the cached record, commit to storage,
//! mirror into the cache, adjust the expiration scheduler, then emit a
//! lifecycle event. The cache lock is held across the storage write so
//! concurrent operations on the same timer serialize cleanly.

mod scheduler;

pub use scheduler::{Expiration, ExpirationScheduler};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::core::{
    ChannelKind, DeviceId, Recipient, RecipientId, SmartTimer, TimerId, TimerState, UserId,
};
use crate::events::{EventBus, TimerEvent};
use crate::storage::{Storage, StorageError, TimerPatch};

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Timer not found.
    #[error("timer not found: {0}")]
    NotFound(TimerId),

    /// Recipient not found.
    #[error("recipient not found: {0}")]
    RecipientNotFound(RecipientId),

    /// The operation is not allowed in the timer's current state.
    #[error("cannot {operation} timer {id} in state {current}")]
    InvalidState {
        id: TimerId,
        current: TimerState,
        operation: &'static str,
    },

    /// The recipient tuple is already registered for this timer.
    #[error("recipient already registered for timer {0}")]
    DuplicateRecipient(TimerId),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// What startup recovery found and did.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverySummary {
    /// Timers loaded into the cache.
    pub loaded: usize,
    /// Running timers whose expiration was rescheduled.
    pub rescheduled: usize,
    /// Running timers whose deadline passed while the process was down.
    pub finished_late: usize,
}

/// The timer lifecycle engine.
pub struct TimerEngine<S: Storage> {
    storage: Arc<S>,
    bus: Arc<EventBus>,
    cache: Mutex<HashMap<TimerId, SmartTimer>>,
    scheduler: ExpirationScheduler,
    expirations: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Expiration>>>,
}

impl<S: Storage + 'static> TimerEngine<S> {
    /// Create an engine over `storage` that announces transitions on `bus`.
    pub fn new(storage: Arc<S>, bus: Arc<EventBus>) -> Arc<Self> {
        let (scheduler, expirations) = ExpirationScheduler::new();
        Arc::new(Self {
            storage,
            bus,
            cache: Mutex::new(HashMap::new()),
            scheduler,
            expirations: std::sync::Mutex::new(Some(expirations)),
        })
    }

    /// Spawn the expiration loop that turns scheduler deadlines into
    /// finish transitions. Call once, after [`recover_on_startup`].
    ///
    /// [`recover_on_startup`]: TimerEngine::recover_on_startup
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let receiver = self
            .expirations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                tracing::warn!("expiration loop already running");
                return;
            };
            while let Some(expiration) = receiver.recv().await {
                match engine.complete(&expiration.id, expiration.late).await {
                    Ok(timer) if timer.state == TimerState::Finished => {
                        tracing::info!(timer_id = %expiration.id, late = expiration.late, "timer expired");
                    }
                    Ok(timer) => {
                        // Raced with a cancel or a concurrent finish.
                        tracing::debug!(timer_id = %expiration.id, state = %timer.state, "stale expiration ignored");
                    }
                    Err(e) => {
                        tracing::error!(timer_id = %expiration.id, error = %e, "failed to finish expired timer");
                    }
                }
            }
        })
    }

    // Timer operations

    /// Create a new pending timer.
    pub async fn create(
        &self,
        label: &str,
        description: Option<String>,
        duration: i64,
    ) -> Result<SmartTimer, EngineError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(EngineError::Validation("label must not be empty".into()));
        }
        if duration <= 0 {
            return Err(EngineError::Validation(
                "duration must be a positive number of seconds".into(),
            ));
        }

        let timer = SmartTimer::new(label, description, duration);

        let mut cache = self.cache.lock().await;
        self.storage.save_timer(timer.clone()).await?;
        cache.insert(timer.id, timer.clone());
        drop(cache);

        self.bus.emit(TimerEvent::created(timer.clone())).await;
        Ok(timer)
    }

    /// Start a pending or paused timer: it begins counting down
    /// `duration` seconds, or `duration_override` seconds when given.
    pub async fn start_timer(
        &self,
        id: &TimerId,
        duration_override: Option<i64>,
    ) -> Result<SmartTimer, EngineError> {
        let mut cache = self.cache.lock().await;
        let current = Self::cached(&cache, id)?;
        if !matches!(current.state, TimerState::Pending | TimerState::Paused) {
            return Err(EngineError::InvalidState {
                id: *id,
                current: current.state,
                operation: "start",
            });
        }

        // Validate the duration the countdown will actually use, whether
        // it comes from the override or the stored record.
        let duration = duration_override.unwrap_or(current.duration);
        if duration <= 0 {
            return Err(EngineError::Validation(
                "duration must be a positive number of seconds".into(),
            ));
        }
        let now = Utc::now();
        let end = now + Duration::seconds(duration);
        let updated = self
            .storage
            .update_timer(
                id,
                TimerPatch::new()
                    .with_state(TimerState::Running)
                    .with_duration(duration)
                    .with_start_time(Some(now))
                    .with_end_time(Some(end)),
            )
            .await?;
        cache.insert(*id, updated.clone());
        self.scheduler.schedule(*id, end);
        drop(cache);

        self.bus.emit(TimerEvent::started(updated.clone())).await;
        Ok(updated)
    }

    /// Pause a running timer, folding the remaining seconds back into
    /// `duration` so an unpause resumes where it left off.
    pub async fn pause(&self, id: &TimerId) -> Result<SmartTimer, EngineError> {
        let mut cache = self.cache.lock().await;
        let current = Self::cached(&cache, id)?;
        if current.state != TimerState::Running {
            return Err(EngineError::InvalidState {
                id: *id,
                current: current.state,
                operation: "pause",
            });
        }

        let remaining = current.remaining_seconds(Utc::now());
        let updated = self
            .storage
            .update_timer(
                id,
                TimerPatch::new()
                    .with_state(TimerState::Paused)
                    .with_duration(remaining)
                    .with_end_time(None),
            )
            .await?;
        cache.insert(*id, updated.clone());
        self.scheduler.cancel(id);
        drop(cache);

        self.bus.emit(TimerEvent::paused(updated.clone())).await;
        Ok(updated)
    }

    /// Resume a paused timer for its remaining `duration` seconds.
    pub async fn unpause(&self, id: &TimerId) -> Result<SmartTimer, EngineError> {
        let mut cache = self.cache.lock().await;
        let current = Self::cached(&cache, id)?;
        if current.state != TimerState::Paused {
            return Err(EngineError::InvalidState {
                id: *id,
                current: current.state,
                operation: "unpause",
            });
        }

        let now = Utc::now();
        let end = now + Duration::seconds(current.duration);
        let updated = self
            .storage
            .update_timer(
                id,
                TimerPatch::new()
                    .with_state(TimerState::Running)
                    .with_start_time(Some(now))
                    .with_end_time(Some(end)),
            )
            .await?;
        cache.insert(*id, updated.clone());
        self.scheduler.schedule(*id, end);
        drop(cache);

        self.bus.emit(TimerEvent::unpaused(updated.clone())).await;
        Ok(updated)
    }

    /// Adjust a non-terminal timer by `seconds`, added to `duration` and,
    /// while running, to the deadline as well.
    ///
    /// Negative values shorten the countdown; a delta that pushes a
    /// running deadline into the past finishes the timer through the
    /// expiration loop rather than here. Zero is rejected.
    pub async fn add_time(&self, id: &TimerId, seconds: i64) -> Result<SmartTimer, EngineError> {
        if seconds == 0 {
            return Err(EngineError::Validation("seconds must be non-zero".into()));
        }

        let mut cache = self.cache.lock().await;
        let current = Self::cached(&cache, id)?;
        if current.is_terminal() {
            return Err(EngineError::InvalidState {
                id: *id,
                current: current.state,
                operation: "add time to",
            });
        }

        let mut patch = TimerPatch::new().with_duration(current.duration + seconds);
        let mut new_end = None;
        if let (TimerState::Running, Some(end)) = (current.state, current.end_time) {
            let end = end + Duration::seconds(seconds);
            patch = patch.with_end_time(Some(end));
            new_end = Some(end);
        }

        let updated = self.storage.update_timer(id, patch).await?;
        cache.insert(*id, updated.clone());
        if let Some(end) = new_end {
            self.scheduler.schedule(*id, end);
        }
        drop(cache);

        self.bus
            .emit(TimerEvent::time_added(updated.clone(), seconds))
            .await;
        Ok(updated)
    }

    /// Cancel a timer. Canceling an already-terminal timer (including a
    /// second cancel of the same id) reports the illegal transition and
    /// leaves the record untouched.
    pub async fn cancel(&self, id: &TimerId) -> Result<SmartTimer, EngineError> {
        let mut cache = self.cache.lock().await;
        let current = Self::cached(&cache, id)?;
        if current.is_terminal() {
            return Err(EngineError::InvalidState {
                id: *id,
                current: current.state,
                operation: "cancel",
            });
        }

        let updated = self
            .storage
            .update_timer(
                id,
                TimerPatch::new()
                    .with_state(TimerState::Canceled)
                    .with_end_time(Some(Utc::now())),
            )
            .await?;
        cache.insert(*id, updated.clone());
        self.scheduler.cancel(id);
        drop(cache);

        self.bus.emit(TimerEvent::canceled(updated.clone())).await;
        Ok(updated)
    }

    /// Finish a running timer explicitly, ahead of its deadline.
    ///
    /// Finishing a timer that is not running is a no-op that returns the
    /// record unchanged, so an explicit finish racing the expiration loop
    /// (or a cancel) stays harmless.
    pub async fn finish(&self, id: &TimerId) -> Result<SmartTimer, EngineError> {
        self.complete(id, false).await
    }

    async fn complete(&self, id: &TimerId, late: bool) -> Result<SmartTimer, EngineError> {
        let mut cache = self.cache.lock().await;
        let current = Self::cached(&cache, id)?;
        if current.state != TimerState::Running {
            return Ok(current);
        }

        let updated = self
            .storage
            .update_timer(
                id,
                TimerPatch::new()
                    .with_state(TimerState::Finished)
                    .with_end_time(Some(Utc::now())),
            )
            .await?;
        cache.insert(*id, updated.clone());
        self.scheduler.cancel(id);
        drop(cache);

        self.bus
            .emit(TimerEvent::finished(updated.clone(), late))
            .await;
        Ok(updated)
    }

    /// Load every stored timer into the cache and reconcile running ones
    /// against the wall clock: future deadlines are rescheduled, passed
    /// deadlines finish immediately with the late flag set.
    pub async fn recover_on_startup(&self) -> Result<RecoverySummary, EngineError> {
        let timers = self.storage.list_timers().await?;
        let mut summary = RecoverySummary {
            loaded: timers.len(),
            ..Default::default()
        };

        let mut running = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            for timer in timers {
                if timer.state == TimerState::Running {
                    running.push((timer.id, timer.end_time));
                }
                cache.insert(timer.id, timer);
            }
        }

        let now = Utc::now();
        for (id, end_time) in running {
            match end_time {
                Some(end) if end > now => {
                    self.scheduler.schedule(id, end);
                    summary.rescheduled += 1;
                    tracing::info!(timer_id = %id, end_time = %end, "rescheduled running timer");
                }
                Some(_) => {
                    self.complete(&id, true).await?;
                    summary.finished_late += 1;
                    tracing::info!(timer_id = %id, "finished timer whose deadline passed while down");
                }
                None => {
                    // A running timer without a deadline cannot be
                    // scheduled; park it as paused with its stored
                    // duration intact.
                    tracing::warn!(timer_id = %id, "running timer has no end time, pausing it");
                    let mut cache = self.cache.lock().await;
                    let updated = self
                        .storage
                        .update_timer(&id, TimerPatch::new().with_state(TimerState::Paused))
                        .await?;
                    cache.insert(id, updated);
                }
            }
        }

        Ok(summary)
    }

    /// Get a timer by id.
    pub async fn get(&self, id: &TimerId) -> Result<SmartTimer, EngineError> {
        let cache = self.cache.lock().await;
        Self::cached(&cache, id)
    }

    /// List all timers, ordered by creation time.
    pub async fn list(&self) -> Vec<SmartTimer> {
        let cache = self.cache.lock().await;
        let mut timers: Vec<SmartTimer> = cache.values().cloned().collect();
        timers.sort_by_key(|t| t.created_at);
        timers
    }

    /// List timers whose state is one of `states`, ordered by creation time.
    pub async fn list_by_state(&self, states: &[TimerState]) -> Vec<SmartTimer> {
        let cache = self.cache.lock().await;
        let mut timers: Vec<SmartTimer> = cache
            .values()
            .filter(|t| states.contains(&t.state))
            .cloned()
            .collect();
        timers.sort_by_key(|t| t.created_at);
        timers
    }

    /// Delete terminal timers last touched before `cutoff`, cascading
    /// their recipients. Returns the number deleted.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let mut cache = self.cache.lock().await;
        let pruned = self.storage.prune_before(cutoff).await?;
        cache.retain(|_, t| !(t.is_terminal() && t.updated_at < cutoff));
        Ok(pruned)
    }

    // Recipient operations

    /// Register a notification recipient for a timer.
    pub async fn add_recipient(
        &self,
        timer_id: &TimerId,
        user_id: UserId,
        device_id: DeviceId,
        channel: ChannelKind,
        target: String,
    ) -> Result<Recipient, EngineError> {
        // Registrations only make sense against a live record.
        self.get(timer_id).await?;

        let recipient = Recipient {
            id: RecipientId::new(),
            timer_id: *timer_id,
            user_id,
            device_id,
            channel,
            target,
            created_at: Utc::now(),
        };

        match self.storage.save_recipient(recipient.clone()).await {
            Ok(()) => Ok(recipient),
            Err(StorageError::DuplicateKey(_)) => {
                Err(EngineError::DuplicateRecipient(*timer_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a recipient registration.
    pub async fn remove_recipient(&self, id: &RecipientId) -> Result<(), EngineError> {
        match self.storage.remove_recipient(id).await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound(_)) => Err(EngineError::RecipientNotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    /// List all recipients registered for a timer.
    pub async fn list_recipients(
        &self,
        timer_id: &TimerId,
    ) -> Result<Vec<Recipient>, EngineError> {
        self.get(timer_id).await?;
        Ok(self.storage.list_recipients_for_timer(timer_id).await?)
    }

    #[cfg(test)]
    fn is_scheduled(&self, id: &TimerId) -> bool {
        self.scheduler.is_scheduled(id)
    }

    fn cached(
        cache: &HashMap<TimerId, SmartTimer>,
        id: &TimerId,
    ) -> Result<SmartTimer, EngineError> {
        cache.get(id).cloned().ok_or(EngineError::NotFound(*id))
    }
}
