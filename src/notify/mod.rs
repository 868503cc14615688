//! Push notification dispatch.
//!
//! The dispatcher resolves each recipient to a deliverable address and
//! hands the payload to a [`PushTransport`]. One recipient failing never
//! stops delivery to the rest; unresolvable recipients are logged and
//! skipped. Subscriptions reported gone by the push service deactivate
//! the device so we stop trying.

mod webpush;

pub use webpush::HttpPushTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::{ChannelKind, DeviceId, Recipient, SmartTimer, UserId};
use crate::events::{EventHandler, TimerEvent};
use crate::storage::Storage;

/// Key material for an encrypted push subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A browser/OS push subscription, as handed to us by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
}

/// A user's registered device.
#[derive(Debug, Clone)]
pub struct Device {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub subscription: Option<PushSubscription>,
    pub active: bool,
}

/// Looks up devices for recipients and retires dead subscriptions.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Find a device by owner and id.
    async fn get_device(&self, user_id: &UserId, device_id: &DeviceId) -> Option<Device>;

    /// Mark a device inactive so future dispatches skip it.
    async fn deactivate(&self, user_id: &UserId, device_id: &DeviceId);
}

/// In-memory device registry.
pub struct InMemoryDeviceRegistry {
    devices: RwLock<HashMap<(UserId, DeviceId), Device>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a device.
    pub async fn register(&self, device: Device) {
        let key = (device.user_id.clone(), device.device_id.clone());
        self.devices.write().await.insert(key, device);
    }
}

impl Default for InMemoryDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn get_device(&self, user_id: &UserId, device_id: &DeviceId) -> Option<Device> {
        self.devices
            .read()
            .await
            .get(&(user_id.clone(), device_id.clone()))
            .cloned()
    }

    async fn deactivate(&self, user_id: &UserId, device_id: &DeviceId) {
        if let Some(device) = self
            .devices
            .write()
            .await
            .get_mut(&(user_id.clone(), device_id.clone()))
        {
            device.active = false;
        }
    }
}

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The push service says the subscription no longer exists.
    #[error("subscription gone (status {0})")]
    Gone(u16),

    /// Transient or unexpected transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivers an encoded payload to one push subscription.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &serde_json::Value,
        ttl_seconds: u32,
    ) -> Result<(), DeliveryError>;
}

/// The JSON document delivered to devices.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    /// Lifecycle event name ("started", "paused", "finished").
    pub event: &'static str,
    /// Snapshot of the timer at the transition.
    pub timer: SmartTimer,
    /// Whether a finish was discovered after its deadline.
    pub late: bool,
}

/// Outcome counts for one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Fans a payload out to every recipient of a timer.
pub struct Dispatcher {
    registry: Arc<dyn DeviceRegistry>,
    transport: Arc<dyn PushTransport>,
    ttl_seconds: u32,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        transport: Arc<dyn PushTransport>,
        ttl_seconds: u32,
    ) -> Self {
        Self {
            registry,
            transport,
            ttl_seconds,
        }
    }

    /// Deliver `payload` to each recipient, independently.
    pub async fn send_to_recipients(
        &self,
        recipients: &[Recipient],
        payload: &NotificationPayload,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let encoded = match serde_json::to_value(payload) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode notification payload");
                report.failed = recipients.len();
                return report;
            }
        };

        for recipient in recipients {
            match recipient.channel {
                ChannelKind::WebPush => {
                    self.send_webpush(recipient, &encoded, &mut report).await;
                }
                other => {
                    tracing::warn!(
                        recipient_id = %recipient.id,
                        channel = %other,
                        "no dispatcher for channel, skipping recipient"
                    );
                    report.skipped += 1;
                }
            }
        }

        report
    }

    async fn send_webpush(
        &self,
        recipient: &Recipient,
        payload: &serde_json::Value,
        report: &mut DispatchReport,
    ) {
        let device = match self
            .registry
            .get_device(&recipient.user_id, &recipient.device_id)
            .await
        {
            Some(device) => device,
            None => {
                tracing::warn!(
                    recipient_id = %recipient.id,
                    device_id = %recipient.device_id,
                    "unknown device, skipping recipient"
                );
                report.skipped += 1;
                return;
            }
        };

        if !device.active {
            tracing::debug!(device_id = %device.device_id, "device inactive, skipping");
            report.skipped += 1;
            return;
        }

        let subscription = match &device.subscription {
            Some(subscription) => subscription,
            None => {
                tracing::warn!(
                    device_id = %device.device_id,
                    "device has no push subscription, skipping"
                );
                report.skipped += 1;
                return;
            }
        };

        match self
            .transport
            .send(subscription, payload, self.ttl_seconds)
            .await
        {
            Ok(()) => {
                tracing::debug!(device_id = %device.device_id, "push delivered");
                report.delivered += 1;
            }
            Err(DeliveryError::Gone(status)) => {
                tracing::info!(
                    device_id = %device.device_id,
                    status,
                    "subscription gone, deactivating device"
                );
                self.registry
                    .deactivate(&recipient.user_id, &recipient.device_id)
                    .await;
                report.failed += 1;
            }
            Err(e) => {
                tracing::warn!(
                    device_id = %device.device_id,
                    error = %e,
                    "push delivery failed"
                );
                report.failed += 1;
            }
        }
    }
}

/// Event handler that turns timer transitions into push notifications.
///
/// Delivery happens on a spawned task so slow push services never hold
/// up the event bus or the transition that triggered the event.
pub struct PushNotifier<S: Storage> {
    storage: Arc<S>,
    dispatcher: Arc<Dispatcher>,
}

impl<S: Storage + 'static> PushNotifier<S> {
    pub fn new(storage: Arc<S>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            storage,
            dispatcher,
        }
    }

    fn payload_for(event: &TimerEvent) -> Option<NotificationPayload> {
        match event {
            TimerEvent::Started { timer, .. } => Some(NotificationPayload {
                event: "started",
                timer: timer.clone(),
                late: false,
            }),
            TimerEvent::Paused { timer, .. } => Some(NotificationPayload {
                event: "paused",
                timer: timer.clone(),
                late: false,
            }),
            TimerEvent::Finished { timer, late, .. } => Some(NotificationPayload {
                event: "finished",
                timer: timer.clone(),
                late: *late,
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl<S: Storage + 'static> EventHandler for PushNotifier<S> {
    async fn handle(&self, event: &TimerEvent) {
        let Some(payload) = Self::payload_for(event) else {
            return;
        };

        let storage = Arc::clone(&self.storage);
        let dispatcher = Arc::clone(&self.dispatcher);
        let timer_id = payload.timer.id;

        tokio::spawn(async move {
            let recipients = match storage.list_recipients_for_timer(&timer_id).await {
                Ok(recipients) => recipients,
                Err(e) => {
                    tracing::error!(timer_id = %timer_id, error = %e, "failed to load recipients");
                    return;
                }
            };
            if recipients.is_empty() {
                return;
            }

            let report = dispatcher.send_to_recipients(&recipients, &payload).await;
            tracing::info!(
                timer_id = %timer_id,
                event = payload.event,
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "notification fan-out complete"
            );
        });
    }
}
