//! Recipient registrations: who gets notified when a timer changes state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{DeviceId, RecipientId, TimerId, UserId};

/// Notification channel for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Web Push to a device's stored push subscription.
    WebPush,
    /// Email delivery (placeholder, not yet wired to a provider).
    Email,
    /// SMS delivery (placeholder, not yet wired to a provider).
    Sms,
    /// Anything we do not recognize; logged and skipped at dispatch time.
    #[serde(other)]
    Unknown,
}

impl ChannelKind {
    /// Stable lowercase name, used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WebPush => "webpush",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Unknown => "unknown",
        }
    }

    /// Parse a channel from its lowercase name. Unrecognized names map to
    /// `Unknown` rather than failing, so stored rows always load.
    pub fn parse(s: &str) -> Self {
        match s {
            "webpush" => ChannelKind::WebPush,
            "email" => ChannelKind::Email,
            "sms" => ChannelKind::Sms,
            _ => ChannelKind::Unknown,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered notification target for one timer.
///
/// The (timer, user, device, channel, target) tuple is unique per store.
/// For webpush the delivery address is the device's stored subscription,
/// so `target` is a label rather than the subscription itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// Unique identifier.
    pub id: RecipientId,
    /// Owning timer.
    pub timer_id: TimerId,
    /// The contact being notified.
    pub user_id: UserId,
    /// The device to notify.
    pub device_id: DeviceId,
    /// Notification channel.
    pub channel: ChannelKind,
    /// Channel-specific address or label.
    pub target: String,
    /// When the registration was created.
    pub created_at: DateTime<Utc>,
}
