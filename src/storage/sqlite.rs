//! SQLite storage implementation.
//!
//! Provides persistent storage using a SQLite database. Timestamps are
//! stored as RFC 3339 text so rows stay readable with the sqlite CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{Storage, StorageError, TimerPatch};
use crate::core::{
    ChannelKind, DeviceId, Recipient, RecipientId, SmartTimer, TimerId, TimerState, UserId,
};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Helper functions for time conversion
fn datetime_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("invalid timestamp {:?}: {}", s, e)))
}

type TimerRow = (
    String,
    String,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn timer_from_row(row: TimerRow) -> Result<SmartTimer, StorageError> {
    Ok(SmartTimer {
        id: TimerId::parse(&row.0)
            .map_err(|e| StorageError::SerializationError(format!("invalid timer id: {}", e)))?,
        label: row.1,
        description: row.2,
        duration: row.3,
        state: TimerState::parse(&row.4)
            .ok_or_else(|| StorageError::SerializationError(format!("unknown state: {}", row.4)))?,
        start_time: row.5.as_deref().map(string_to_datetime).transpose()?,
        end_time: row.6.as_deref().map(string_to_datetime).transpose()?,
        created_at: string_to_datetime(&row.7)?,
        updated_at: string_to_datetime(&row.8)?,
    })
}

type RecipientRow = (String, String, String, String, String, String, String);

fn recipient_from_row(row: RecipientRow) -> Result<Recipient, StorageError> {
    Ok(Recipient {
        id: RecipientId::parse(&row.0).map_err(|e| {
            StorageError::SerializationError(format!("invalid recipient id: {}", e))
        })?,
        timer_id: TimerId::parse(&row.1)
            .map_err(|e| StorageError::SerializationError(format!("invalid timer id: {}", e)))?,
        user_id: UserId::new(row.2),
        device_id: DeviceId::new(row.3),
        channel: ChannelKind::parse(&row.4),
        target: row.5,
        created_at: string_to_datetime(&row.6)?,
    })
}

const TIMER_COLUMNS: &str =
    "id, label, description, duration, state, start_time, end_time, created_at, updated_at";
const RECIPIENT_COLUMNS: &str =
    "id, timer_id, user_id, device_id, channel, target, created_at";

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_timer(&self, timer: SmartTimer) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO smart_timers (id, label, description, duration, state, start_time, end_time, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(timer.id.to_string())
        .bind(&timer.label)
        .bind(&timer.description)
        .bind(timer.duration)
        .bind(timer.state.as_str())
        .bind(timer.start_time.map(datetime_to_string))
        .bind(timer.end_time.map(datetime_to_string))
        .bind(datetime_to_string(timer.created_at))
        .bind(datetime_to_string(timer.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("timer: {}", timer.id)))
            }
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn get_timer(&self, id: &TimerId) -> Result<SmartTimer, StorageError> {
        let row: TimerRow = sqlx::query_as(&format!(
            "SELECT {} FROM smart_timers WHERE id = ?",
            TIMER_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("timer: {}", id)))?;

        timer_from_row(row)
    }

    async fn list_timers(&self) -> Result<Vec<SmartTimer>, StorageError> {
        let rows: Vec<TimerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM smart_timers ORDER BY created_at",
            TIMER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(timer_from_row).collect()
    }

    async fn list_timers_by_state(
        &self,
        states: &[TimerState],
    ) -> Result<Vec<SmartTimer>, StorageError> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM smart_timers WHERE state IN ({}) ORDER BY created_at",
            TIMER_COLUMNS, placeholders
        );
        let mut query = sqlx::query_as::<_, TimerRow>(&sql);
        for state in states {
            query = query.bind(state.as_str());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(timer_from_row).collect()
    }

    async fn update_timer(
        &self,
        id: &TimerId,
        patch: TimerPatch,
    ) -> Result<SmartTimer, StorageError> {
        let mut timer = self.get_timer(id).await?;
        patch.apply(&mut timer, Utc::now());

        sqlx::query(
            r#"
            UPDATE smart_timers
            SET label = ?, description = ?, duration = ?, state = ?,
                start_time = ?, end_time = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&timer.label)
        .bind(&timer.description)
        .bind(timer.duration)
        .bind(timer.state.as_str())
        .bind(timer.start_time.map(datetime_to_string))
        .bind(timer.end_time.map(datetime_to_string))
        .bind(datetime_to_string(timer.updated_at))
        .bind(timer.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(timer)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM smart_timers WHERE state IN ('canceled', 'finished') AND updated_at < ?",
        )
        .bind(datetime_to_string(cutoff))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn save_recipient(&self, recipient: Recipient) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO recipients (id, timer_id, user_id, device_id, channel, target, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(recipient.id.to_string())
        .bind(recipient.timer_id.to_string())
        .bind(recipient.user_id.as_str())
        .bind(recipient.device_id.as_str())
        .bind(recipient.channel.as_str())
        .bind(&recipient.target)
        .bind(datetime_to_string(recipient.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("recipient: {}", recipient.id)),
            ),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => Err(
                StorageError::NotFound(format!("timer: {}", recipient.timer_id)),
            ),
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn get_recipient(&self, id: &RecipientId) -> Result<Recipient, StorageError> {
        let row: RecipientRow = sqlx::query_as(&format!(
            "SELECT {} FROM recipients WHERE id = ?",
            RECIPIENT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("recipient: {}", id)))?;

        recipient_from_row(row)
    }

    async fn find_recipient(
        &self,
        timer_id: &TimerId,
        user_id: &UserId,
        device_id: &DeviceId,
        channel: ChannelKind,
        target: &str,
    ) -> Result<Option<Recipient>, StorageError> {
        let row: Option<RecipientRow> = sqlx::query_as(&format!(
            "SELECT {} FROM recipients WHERE timer_id = ? AND user_id = ? AND device_id = ? AND channel = ? AND target = ?",
            RECIPIENT_COLUMNS
        ))
        .bind(timer_id.to_string())
        .bind(user_id.as_str())
        .bind(device_id.as_str())
        .bind(channel.as_str())
        .bind(target)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(recipient_from_row).transpose()
    }

    async fn list_recipients_for_timer(
        &self,
        timer_id: &TimerId,
    ) -> Result<Vec<Recipient>, StorageError> {
        let rows: Vec<RecipientRow> = sqlx::query_as(&format!(
            "SELECT {} FROM recipients WHERE timer_id = ? ORDER BY created_at",
            RECIPIENT_COLUMNS
        ))
        .bind(timer_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(recipient_from_row).collect()
    }

    async fn remove_recipient(&self, id: &RecipientId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM recipients WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("recipient: {}", id)));
        }
        Ok(())
    }
}
