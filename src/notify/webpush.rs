//! HTTP transport for push delivery.
//!
//! Posts the JSON payload to the subscription endpoint. Payload
//! encryption and VAPID signing are the push relay's concern; this
//! transport speaks plain HTTPS to it.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::{DeliveryError, PushSubscription, PushTransport};

/// Push transport over reqwest.
pub struct HttpPushTransport {
    client: reqwest::Client,
}

impl HttpPushTransport {
    /// Build a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &serde_json::Value,
        ttl_seconds: u32,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", ttl_seconds)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(DeliveryError::Gone(response.status().as_u16()))
            }
            status => Err(DeliveryError::Transport(format!(
                "push service returned {}",
                status
            ))),
        }
    }
}
